//! Archive manager: type registry, mount list and overlay lookup
//!
//! Mounted archives form a priority stack. Lookups walk it from the most
//! recently mounted archive down, so a later mount shadows any resource an
//! earlier one defines at the same locator; listings union every mount.

use std::any::Any;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::archive::{Archive, Root, decode_as};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::locator::{ResourceLocator, sorted_unique};
use crate::loose::LooseNode;
use crate::node::Query;
use crate::packed::{self, PackSource};
use crate::registry::{ResourceFormat, SharedRegistry, TypeDescriptor, TypeKey, TypeRegistry};

/// Owner of a type registry and an ordered set of mounted archives
pub struct ArchiveManager {
    registry: SharedRegistry,
    mounts: RwLock<Vec<Archive>>,
    config: ArchiveConfig,
}

impl Default for ArchiveManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveManager {
    /// Create a manager with default configuration
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(TypeRegistry::new())),
            mounts: RwLock::new(Vec::new()),
            config: ArchiveConfig::default(),
        }
    }

    /// Create a manager with a validated configuration
    pub fn with_config(config: ArchiveConfig) -> ArchiveResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Configuration applied to archives this manager opens
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Register payload type `T`
    ///
    /// `name` is the stable string stored in pack type tables and
    /// `extensions` are the file extensions a loose archive maps to `T`.
    pub fn register<T, E, D>(
        &self,
        name: &str,
        format: ResourceFormat,
        extensions: &[&str],
        encode: E,
        decode: D,
    ) -> ArchiveResult<()>
    where
        T: Any + Send + Sync,
        E: Fn(&T) -> io::Result<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&[u8]) -> io::Result<T> + Send + Sync + 'static,
    {
        self.register_descriptor(
            TypeDescriptor::new::<T, E, D>(name, format, encode, decode)
                .with_extensions(extensions),
        )
    }

    /// Register a prepared descriptor
    pub fn register_descriptor(&self, descriptor: TypeDescriptor) -> ArchiveResult<()> {
        let descriptor = self.registry.write().register(descriptor)?;
        debug!(
            "Registered type {} ({:?}, extensions {:?})",
            descriptor.name(),
            descriptor.format(),
            descriptor.extensions()
        );
        Ok(())
    }

    /// Whether `T` has a registered descriptor
    pub fn is_registered<T: Any>(&self) -> bool {
        self.registry.read().lookup(TypeKey::of::<T>()).is_some()
    }

    /// Stable names of the registered types, in registration order
    pub fn registered_types(&self) -> Vec<String> {
        self.registry
            .read()
            .descriptors()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Save the registered type set
    pub fn push_registered_types(&self) {
        self.registry.write().push_snapshot();
    }

    /// Restore the most recently saved type set
    ///
    /// With nothing saved the registry is cleared.
    pub fn pop_registered_types(&self) {
        self.registry.write().pop_snapshot();
    }

    /// Remove every registered type
    pub fn clear_registered_types(&self) {
        self.registry.write().clear();
    }

    /// Open a packed container from any seekable source
    ///
    /// The index is parsed now against the currently registered types;
    /// bodies are read on demand.
    pub fn open_packed<R>(&self, reader: R) -> ArchiveResult<Archive>
    where
        R: PackSource + 'static,
    {
        let node = {
            let registry = self.registry.read();
            packed::load(reader, &registry, &self.config)?
        };
        Ok(self.archive(Root::Packed(node)))
    }

    /// Open a packed container file
    pub fn open_file(&self, path: impl AsRef<Path>) -> ArchiveResult<Archive> {
        let path = path.as_ref();
        debug!("Opening packed archive {}", path.display());
        self.open_packed(BufReader::new(File::open(path)?))
    }

    /// Open a directory as a loose archive, masking the `ignore` subtrees
    pub fn open_loose<I>(&self, directory: impl AsRef<Path>, ignore: I) -> ArchiveResult<Archive>
    where
        I: IntoIterator<Item = ResourceLocator>,
    {
        let directory = directory.as_ref();
        let ignore: Vec<_> = ignore.into_iter().filter(|l| !l.is_empty()).collect();
        debug!(
            "Opening loose archive {} ({} ignored)",
            directory.display(),
            ignore.len()
        );

        let node = LooseNode::open(
            directory,
            ignore,
            Arc::clone(&self.registry),
            self.config.max_indirection_hops,
        )?;
        Ok(self.archive(Root::Loose(node)))
    }

    fn archive(&self, root: Root) -> Archive {
        Archive::new(root, Arc::clone(&self.registry), self.config.clone())
    }

    /// Mount `archive` on top of the current stack
    ///
    /// Mounting an archive twice is a no-op. Archives opened by another
    /// manager are refused.
    pub fn mount(&self, archive: &Archive) -> ArchiveResult<()> {
        if !archive.uses_registry(&self.registry) {
            return Err(ArchiveError::ForeignArchive);
        }

        let mut mounts = self.mounts.write();
        if mounts.contains(archive) {
            debug!("Archive already mounted");
            return Ok(());
        }

        mounts.push(archive.clone());
        info!("Mounted archive ({} mounted)", mounts.len());
        Ok(())
    }

    /// Unmount `archive`; returns whether it was mounted
    pub fn unmount(&self, archive: &Archive) -> bool {
        let mut mounts = self.mounts.write();
        let before = mounts.len();
        mounts.retain(|mounted| mounted != archive);

        let removed = mounts.len() != before;
        if removed {
            info!("Unmounted archive ({} mounted)", mounts.len());
        }
        removed
    }

    /// Mounted archives, lowest priority first
    pub fn mounted(&self) -> Vec<Archive> {
        self.mounts.read().clone()
    }

    /// Whether `archive` is mounted
    pub fn is_mounted(&self, archive: &Archive) -> bool {
        self.mounts.read().contains(archive)
    }

    /// Decode the resource of type `T` at `locator` from the highest
    /// priority mount that has one
    pub fn get<T: Any + Send + Sync>(&self, locator: &ResourceLocator) -> ArchiveResult<T> {
        let descriptor = Archive::descriptor_for::<T>(&self.registry)?;

        for archive in self.mounted().iter().rev() {
            if let Some(bytes) = archive.resolve_bytes(locator, &descriptor)? {
                return decode_as(&descriptor, &bytes);
            }
        }

        Err(ArchiveError::ResourceNotFound(locator.to_string()))
    }

    /// Union of `query` over every mount, sorted by rendered path
    pub fn find(
        &self,
        locator: &ResourceLocator,
        query: &Query,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        let mut found = Vec::new();
        for archive in self.mounted() {
            found.extend(archive.find_unsorted(locator, query, recursive)?);
        }
        Ok(sorted_unique(found))
    }

    /// Locators of every resource of type `T` across all mounts
    pub fn find_all<T: Any>(
        &self,
        locator: &ResourceLocator,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        let descriptor = Archive::descriptor_for::<T>(&self.registry)?;
        self.find(locator, &Query::Resources(descriptor.key()), recursive)
    }

    /// Locators of every resource of any registered type across all mounts
    pub fn find_all_resources(
        &self,
        locator: &ResourceLocator,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        self.find(locator, &Query::AllResources, recursive)
    }

    /// Locators of child archives across all mounts
    pub fn find_directories(
        &self,
        locator: &ResourceLocator,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        self.find(locator, &Query::Directories, recursive)
    }
}

impl std::fmt::Debug for ArchiveManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveManager")
            .field("types", &self.registered_types())
            .field("mounted", &self.mounts.read().len())
            .field("config", &self.config)
            .finish()
    }
}
