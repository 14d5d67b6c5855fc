//! Archive handles
//!
//! An [`Archive`] is the root of one loose or packed tree, tied to the
//! manager that opened it. Handles are cheap to clone; clones compare equal
//! and refer to the same underlying tree.

use std::any::{Any, type_name};
use std::fs::File;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::locator::{ResourceLocator, sorted_unique};
use crate::loose::LooseNode;
use crate::node::{ArchiveNode, Query};
use crate::packed::{self, PackedNode};
use crate::registry::{SharedRegistry, TypeDescriptor, TypeKey};

/// Backing store of an archive's root
#[derive(Debug, Clone)]
pub(crate) enum Root {
    Loose(LooseNode),
    Packed(PackedNode),
}

struct ArchiveInner {
    root: Root,
    registry: SharedRegistry,
    config: ArchiveConfig,
}

/// Handle to a mounted or mountable archive
#[derive(Clone)]
pub struct Archive {
    inner: Arc<ArchiveInner>,
}

impl Archive {
    pub(crate) fn new(root: Root, registry: SharedRegistry, config: ArchiveConfig) -> Self {
        Self {
            inner: Arc::new(ArchiveInner {
                root,
                registry,
                config,
            }),
        }
    }

    /// Whether the archive is backed by a packed container
    pub fn is_packed(&self) -> bool {
        matches!(self.inner.root, Root::Packed(_))
    }

    /// Loose root node, if the archive is backed by a directory
    pub fn as_loose(&self) -> Option<&LooseNode> {
        match &self.inner.root {
            Root::Loose(node) => Some(node),
            Root::Packed(_) => None,
        }
    }

    /// Whether this archive was opened against `registry`
    pub(crate) fn uses_registry(&self, registry: &SharedRegistry) -> bool {
        Arc::ptr_eq(&self.inner.registry, registry)
    }

    /// Descriptor registered for `T`
    pub(crate) fn descriptor_for<T: Any>(
        registry: &SharedRegistry,
    ) -> ArchiveResult<Arc<TypeDescriptor>> {
        registry
            .read()
            .lookup(TypeKey::of::<T>())
            .ok_or_else(|| ArchiveError::TypeNotRegistered(type_name::<T>().to_string()))
    }

    /// Stored bytes at `locator`, if this archive has them
    pub(crate) fn resolve_bytes(
        &self,
        locator: &ResourceLocator,
        descriptor: &TypeDescriptor,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        match &self.inner.root {
            Root::Loose(node) => node.resolve(locator.segments(), descriptor),
            Root::Packed(node) => node.resolve(locator.segments(), descriptor),
        }
    }

    /// Unsorted listing with `locator` re-attached
    pub(crate) fn find_unsorted(
        &self,
        locator: &ResourceLocator,
        query: &Query,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        let found = match &self.inner.root {
            Root::Loose(node) => node.find(locator.segments(), query, recursive)?,
            Root::Packed(node) => node.find(locator.segments(), query, recursive)?,
        };

        Ok(found.iter().map(|l| locator.append(l)).collect())
    }

    /// Decode the resource of type `T` at `locator`
    ///
    /// Fails with [`ArchiveError::TypeNotRegistered`] for an unknown `T` and
    /// [`ArchiveError::ResourceNotFound`] if this archive has nothing there.
    pub fn get<T: Any + Send + Sync>(&self, locator: &ResourceLocator) -> ArchiveResult<T> {
        let descriptor = Self::descriptor_for::<T>(&self.inner.registry)?;
        let bytes = self
            .resolve_bytes(locator, &descriptor)?
            .ok_or_else(|| ArchiveError::ResourceNotFound(locator.to_string()))?;
        decode_as(&descriptor, &bytes)
    }

    /// List what `query` selects at `locator`, sorted by rendered path
    pub fn find(
        &self,
        locator: &ResourceLocator,
        query: &Query,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        Ok(sorted_unique(self.find_unsorted(locator, query, recursive)?))
    }

    /// Locators of every resource of type `T` at `locator`
    pub fn find_all<T: Any>(
        &self,
        locator: &ResourceLocator,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        let descriptor = Self::descriptor_for::<T>(&self.inner.registry)?;
        self.find(locator, &Query::Resources(descriptor.key()), recursive)
    }

    /// Locators of every resource of any registered type at `locator`
    pub fn find_all_resources(
        &self,
        locator: &ResourceLocator,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        self.find(locator, &Query::AllResources, recursive)
    }

    /// Locators of the child archives at `locator`
    pub fn find_directories(
        &self,
        locator: &ResourceLocator,
        recursive: bool,
    ) -> ArchiveResult<Vec<ResourceLocator>> {
        self.find(locator, &Query::Directories, recursive)
    }

    /// Write this archive as a packed container
    ///
    /// The type table is the registry's current descriptor set. Offsets are
    /// absolute, so `writer` should be positioned at the start of the stream.
    pub fn save<W: Write + Seek>(&self, writer: &mut W) -> ArchiveResult<()> {
        let types = self.inner.registry.read().descriptors().to_vec();
        match &self.inner.root {
            Root::Loose(node) => packed::save(node, &types, &self.inner.config, writer),
            Root::Packed(node) => packed::save(node, &types, &self.inner.config, writer),
        }
    }

    /// Write this archive as a packed container file
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> ArchiveResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.save(&mut writer)?;
        writer.flush()?;
        info!("Saved archive to {}", path.display());
        Ok(())
    }

    /// Write this archive as a packed container into memory
    pub fn save_to_vec(&self) -> ArchiveResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.save(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

/// Decode `bytes` and unwrap the payload as `T`
pub(crate) fn decode_as<T: Any>(descriptor: &TypeDescriptor, bytes: &[u8]) -> ArchiveResult<T> {
    descriptor
        .decode(bytes)?
        .downcast::<T>()
        .map(|payload| *payload)
        .map_err(|_| ArchiveError::Codec {
            type_name: descriptor.name().to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "decoder returned a different payload type",
            ),
        })
}

impl PartialEq for Archive {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Archive {}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("root", &self.inner.root)
            .finish_non_exhaustive()
    }
}
