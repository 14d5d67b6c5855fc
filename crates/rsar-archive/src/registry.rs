//! Payload type registry
//!
//! The registry maps a payload's identity (its Rust [`TypeId`]) to a
//! [`TypeDescriptor`]: the codec callbacks, the storage format flag and the
//! file extensions a loose archive recognizes for that type. Descriptors are
//! also addressable by a stable name string, which is what a packed
//! container's type table stores.
//!
//! The active descriptor set can be saved and restored as a LIFO stack of
//! snapshots, letting a caller narrow the set temporarily (for example while
//! packing one archive) and put it back afterwards.

use std::any::{Any, TypeId};
use std::fmt;
use std::io;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ArchiveError, ArchiveResult};

/// Decoded payload handed out by a codec
pub type Payload = Box<dyn Any + Send + Sync>;

type EncodeFn = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> io::Result<Vec<u8>> + Send + Sync>;
type DecodeFn = Arc<dyn Fn(&[u8]) -> io::Result<Payload> + Send + Sync>;

/// Registry shared between a manager and the archives it opens
pub(crate) type SharedRegistry = Arc<RwLock<TypeRegistry>>;

/// How a payload's encoded bytes are stored in a packed container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceFormat {
    /// Codec output is stored as-is
    #[default]
    Plain,
    /// Codec output is stored as a gzip stream
    Compressed,
}

impl ResourceFormat {
    /// Check if bodies of this format go through the gzip filter
    pub const fn is_compressed(self) -> bool {
        matches!(self, Self::Compressed)
    }
}

/// Stable, comparable identity of a payload type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeKey(TypeId);

impl TypeKey {
    /// Identity of `T`
    pub fn of<T: Any>() -> Self {
        Self(TypeId::of::<T>())
    }
}

/// Codec descriptor for one payload type
#[derive(Clone)]
pub struct TypeDescriptor {
    key: TypeKey,
    name: String,
    format: ResourceFormat,
    extensions: Vec<String>,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl TypeDescriptor {
    /// Create a descriptor for payload type `T`
    ///
    /// `name` is the stable string written into pack type tables; it must
    /// not change between the run that packs and the run that reads.
    pub fn new<T, E, D>(name: impl Into<String>, format: ResourceFormat, encode: E, decode: D) -> Self
    where
        T: Any + Send + Sync,
        E: Fn(&T) -> io::Result<Vec<u8>> + Send + Sync + 'static,
        D: Fn(&[u8]) -> io::Result<T> + Send + Sync + 'static,
    {
        let encode: EncodeFn = Arc::new(move |value: &(dyn Any + Send + Sync)| {
            let value = value.downcast_ref::<T>().ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "payload type mismatch")
            })?;
            encode(value)
        });
        let decode: DecodeFn = Arc::new(move |bytes: &[u8]| Ok(Box::new(decode(bytes)?) as Payload));

        Self {
            key: TypeKey::of::<T>(),
            name: name.into(),
            format,
            extensions: Vec::new(),
            encode,
            decode,
        }
    }

    /// Set the file extensions recognized in loose archives
    ///
    /// A leading `.` is accepted and stripped.
    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for extension in extensions {
            let extension = extension.as_ref().trim_start_matches('.');
            if !extension.is_empty() && !self.extensions.iter().any(|e| e == extension) {
                self.extensions.push(extension.to_string());
            }
        }
        self
    }

    /// Identity of the payload type
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Stable name used in pack type tables
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last `::` component of the stable name
    pub fn short_name(&self) -> &str {
        short_name(&self.name)
    }

    /// Storage format flag
    pub fn format(&self) -> ResourceFormat {
        self.format
    }

    /// Recognized extensions, in registration order, without leading dots
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Check if `extension` (without dot) belongs to this type
    pub fn handles_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == extension)
    }

    /// Encode a payload into bytes
    pub fn encode(&self, value: &(dyn Any + Send + Sync)) -> ArchiveResult<Vec<u8>> {
        (self.encode)(value).map_err(|source| self.codec_error(source))
    }

    /// Decode bytes into a payload
    pub fn decode(&self, bytes: &[u8]) -> ArchiveResult<Payload> {
        (self.decode)(bytes).map_err(|source| self.codec_error(source))
    }

    fn codec_error(&self, source: io::Error) -> ArchiveError {
        ArchiveError::Codec {
            type_name: self.name.clone(),
            source,
        }
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("format", &self.format)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

fn short_name(name: &str) -> &str {
    name.rsplit("::").next().unwrap_or(name)
}

fn is_bare(name: &str) -> bool {
    !name.contains("::")
}

/// Ordered set of registered descriptors with snapshot stack
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<Arc<TypeDescriptor>>,
    snapshots: Vec<Vec<Arc<TypeDescriptor>>>,
}

impl TypeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor; fails if its identity is already present
    pub fn register(&mut self, descriptor: TypeDescriptor) -> ArchiveResult<Arc<TypeDescriptor>> {
        if self.lookup(descriptor.key()).is_some() {
            return Err(ArchiveError::TypeAlreadyRegistered(descriptor.name));
        }

        let descriptor = Arc::new(descriptor);
        self.types.push(Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Remove every descriptor (the snapshot stack is kept)
    pub fn clear(&mut self) {
        self.types.clear();
    }

    /// Descriptor registered for `key`
    pub fn lookup(&self, key: TypeKey) -> Option<Arc<TypeDescriptor>> {
        self.types.iter().find(|d| d.key() == key).cloned()
    }

    /// First descriptor whose extension set contains `extension`
    pub fn lookup_by_extension(&self, extension: &str) -> Option<Arc<TypeDescriptor>> {
        let extension = extension.trim_start_matches('.');
        self.types
            .iter()
            .find(|d| d.handles_extension(extension))
            .cloned()
    }

    /// First descriptor whose stable name matches
    ///
    /// An exact match wins. Failing that, a bare name (no `::`) on either
    /// side is compared against the other's last `::` component, so tables
    /// written with short names still resolve. Two qualified names with
    /// different paths never match.
    pub fn lookup_by_name(&self, name: &str) -> Option<Arc<TypeDescriptor>> {
        self.types
            .iter()
            .find(|d| d.name() == name)
            .or_else(|| {
                let wanted = short_name(name);
                self.types.iter().find(|d| {
                    (is_bare(name) || is_bare(d.name())) && d.short_name() == wanted
                })
            })
            .cloned()
    }

    /// Registered descriptors in registration order
    pub fn descriptors(&self) -> &[Arc<TypeDescriptor>] {
        &self.types
    }

    /// Number of registered descriptors
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no descriptor is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Index of `key` in registration order (the pack type id)
    pub fn position(&self, key: TypeKey) -> Option<usize> {
        self.types.iter().position(|d| d.key() == key)
    }

    /// Save the current descriptor set on the snapshot stack
    pub fn push_snapshot(&mut self) {
        self.snapshots.push(self.types.clone());
    }

    /// Restore the most recently pushed descriptor set
    ///
    /// With an empty stack the registry is simply cleared.
    pub fn pop_snapshot(&mut self) {
        self.types = self.snapshots.pop().unwrap_or_default();
    }

    /// Depth of the snapshot stack
    pub fn snapshot_depth(&self) -> usize {
        self.snapshots.len()
    }
}
