//! Packed archives backed by a single container stream
//!
//! The whole index is parsed eagerly when the container is opened; resource
//! bodies are read and decoded only on request. Every node of one container
//! shares the same stream behind a mutex, so a seek and the read that
//! follows it happen as one critical section.
//!
//! # Layout
//!
//! ```text
//! [root only] magic "RSAR" | version: i32 | type_count: i32 | type_count x name
//! per node:   child_count: i32 | resource_count: i32
//!             child_count x    { name | type_id = -1 | offset: i64 | length: i64 }
//!             resource_count x { name | type_id      | offset: i64 | length: i64 }
//!             child bodies in index order
//!             resource bodies in index order, each padded to the alignment
//! ```
//!
//! Integers are little-endian, names carry a LEB128 byte length, offsets
//! are absolute from the start of the stream and `type_id` indexes the
//! root's type name table. Entries are sorted by name.

mod format;
mod reader;
mod writer;

pub use format::{CHILD_TYPE_ID, FORMAT_VERSION, MAGIC};

pub(crate) use reader::load;
pub(crate) use writer::save;

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use flate2::read::GzDecoder;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{ArchiveError, ArchiveResult};
use crate::node::ArchiveNode;
use crate::registry::TypeDescriptor;

/// Readable, seekable container source
pub trait PackSource: Read + Seek + Send {}

impl<T: Read + Seek + Send> PackSource for T {}

/// Stream and limits shared by every node of one container
pub(crate) struct PackedTree {
    stream: Mutex<Box<dyn PackSource>>,
    max_decompressed_size: u64,
}

/// Location of one resource body
#[derive(Debug, Clone)]
pub(crate) struct ResourceSpan {
    pub descriptor: Arc<TypeDescriptor>,
    pub offset: u64,
    pub length: u64,
}

/// Parsed index of one node
#[derive(Debug, Default)]
pub(crate) struct PackedDirectory {
    pub children: BTreeMap<String, Arc<PackedDirectory>>,
    pub resources: BTreeMap<String, Vec<ResourceSpan>>,
}

/// One level of a packed archive
#[derive(Clone)]
pub struct PackedNode {
    tree: Arc<PackedTree>,
    directory: Arc<PackedDirectory>,
}

impl PackedNode {
    fn read_span(&self, span: &ResourceSpan) -> ArchiveResult<Vec<u8>> {
        let length = usize::try_from(span.length)
            .map_err(|_| ArchiveError::malformed("resource length exceeds address space"))?;

        let raw = {
            let mut stream = self.tree.stream.lock();
            stream.seek(SeekFrom::Start(span.offset))?;
            let mut raw = vec![0u8; length];
            stream.read_exact(&mut raw)?;
            raw
        };

        trace!(
            "Read {} bytes at {:#x} for {}",
            span.length,
            span.offset,
            span.descriptor.name()
        );

        if !span.descriptor.format().is_compressed() {
            return Ok(raw);
        }

        decompress(&raw, self.tree.max_decompressed_size)
    }
}

/// Inflate a gzip body, refusing output above `limit` bytes
fn decompress(raw: &[u8], limit: u64) -> ArchiveResult<Vec<u8>> {
    let mut decompressed = Vec::new();
    GzDecoder::new(raw)
        .take(limit.saturating_add(1))
        .read_to_end(&mut decompressed)
        .map_err(|e| ArchiveError::malformed(format!("corrupt compressed body: {e}")))?;

    if decompressed.len() as u64 > limit {
        return Err(ArchiveError::malformed(format!(
            "decompressed body exceeds maximum allowed size of {limit} bytes"
        )));
    }

    Ok(decompressed)
}

impl ArchiveNode for PackedNode {
    fn child(&self, name: &str) -> ArchiveResult<Option<Self>> {
        Ok(self.directory.children.get(name).map(|directory| Self {
            tree: Arc::clone(&self.tree),
            directory: Arc::clone(directory),
        }))
    }

    fn children(&self) -> ArchiveResult<Vec<(String, Self)>> {
        Ok(self
            .directory
            .children
            .iter()
            .map(|(name, directory)| {
                let child = Self {
                    tree: Arc::clone(&self.tree),
                    directory: Arc::clone(directory),
                };
                (name.clone(), child)
            })
            .collect())
    }

    fn resource_bytes(
        &self,
        name: &str,
        descriptor: &TypeDescriptor,
    ) -> ArchiveResult<Option<Vec<u8>>> {
        let span = self
            .directory
            .resources
            .get(name)
            .and_then(|spans| spans.iter().find(|s| s.descriptor.key() == descriptor.key()));

        span.map(|span| self.read_span(span)).transpose()
    }

    fn resources(&self) -> ArchiveResult<Vec<(String, Arc<TypeDescriptor>)>> {
        Ok(self
            .directory
            .resources
            .iter()
            .flat_map(|(name, spans)| {
                spans
                    .iter()
                    .map(move |span| (name.clone(), Arc::clone(&span.descriptor)))
            })
            .collect())
    }
}

impl std::fmt::Debug for PackedNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackedNode")
            .field("children", &self.directory.children.len())
            .field("resources", &self.directory.resources.len())
            .finish_non_exhaustive()
    }
}
