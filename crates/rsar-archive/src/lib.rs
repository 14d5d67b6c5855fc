//! Typed, hierarchical resource archives.
//!
//! Resources are named, typed assets (images, documents, ...) arranged in a
//! directory-like tree and addressed by [`ResourceLocator`]. An archive is
//! backed either by a loose directory on disk or by a single packed
//! container file; [`ArchiveManager`] overlays any number of archives so
//! that later mounts shadow earlier ones.
//!
//! Payload types are not built in. Callers register a codec per type (a
//! stable name, an encode and a decode callback, a storage format and the
//! file extensions used in loose directories); [`codecs`] provides
//! [`Bitmap`] and [`XmlDocument`] as ready-made registrations.
//!
//! # Packed format
//!
//! Little-endian, starting with the magic `RSAR`, a version and the type
//! name table, followed by a depth-first tree of node indexes. Resource
//! bodies start on a configurable alignment boundary (256 bytes by default)
//! and are gzip compressed for types registered as
//! [`ResourceFormat::Compressed`]. See [`packed`] for the full layout.
//!
//! # Example
//!
//! ```rust,no_run
//! use rsar_archive::{ArchiveManager, Bitmap, ResourceLocator, register_default_types};
//!
//! # fn example() -> Result<(), rsar_archive::ArchiveError> {
//! let manager = ArchiveManager::new();
//! register_default_types(&manager)?;
//!
//! // Pack a directory, then serve from the packed copy
//! let loose = manager.open_loose("assets", [])?;
//! loose.save_to_path("assets.dat")?;
//!
//! let packed = manager.open_file("assets.dat")?;
//! manager.mount(&packed)?;
//!
//! let frame: Bitmap = manager.get(&ResourceLocator::parse("images/ents/human/frame0"))?;
//! println!("{}x{}", frame.width(), frame.height());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Addressing
pub mod locator;

// Payload type registry
pub mod registry;

// Shared traversal over archive levels
pub mod node;

// Directory-backed archives
pub mod loose;

// Container-backed archives
pub mod packed;

// Archive handles and overlay management
pub mod archive;
mod manager;

// Default payload types
pub mod codecs;

// Configuration
pub mod config;

// Errors
pub mod error;

pub use archive::Archive;
pub use codecs::{Bitmap, ImageFormat, XmlDocument, register_default_types};
pub use config::{ArchiveConfig, DEFAULT_ALIGNMENT, MAX_DECOMPRESSION_SIZE};
pub use error::{ArchiveError, ArchiveResult};
pub use locator::ResourceLocator;
pub use loose::LooseNode;
pub use manager::ArchiveManager;
pub use node::{ArchiveNode, Query};
pub use packed::{FORMAT_VERSION, MAGIC, PackSource, PackedNode};
pub use registry::{Payload, ResourceFormat, TypeDescriptor, TypeKey, TypeRegistry};
