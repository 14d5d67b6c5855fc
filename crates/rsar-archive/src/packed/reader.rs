//! Index parsing for packed containers

use std::collections::BTreeMap;
use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use binrw::BinRead;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::format::{FORMAT_VERSION, IndexEntry, NodeCounts, PackPreamble, PackString};
use super::{PackSource, PackedDirectory, PackedNode, PackedTree, ResourceSpan};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::locator::is_valid_segment;
use crate::registry::{TypeDescriptor, TypeRegistry};

/// Deepest node nesting accepted before the index is treated as cyclic
const MAX_NODE_DEPTH: usize = 256;

/// Parse a container's header and full index
///
/// The stream is kept for lazy body reads and released with the last node
/// of the tree.
pub(crate) fn load<R>(
    mut stream: R,
    registry: &TypeRegistry,
    config: &ArchiveConfig,
) -> ArchiveResult<PackedNode>
where
    R: PackSource + 'static,
{
    let stream_len = stream.seek(SeekFrom::End(0))?;
    stream.seek(SeekFrom::Start(0))?;

    let preamble = PackPreamble::read_le(&mut stream)?;
    if preamble.version > FORMAT_VERSION {
        return Err(ArchiveError::UnsupportedVersion(preamble.version));
    }

    let type_count = count(preamble.type_count, "type")?;
    let mut table = Vec::with_capacity(type_count.min(1024));
    for _ in 0..type_count {
        let PackString(name) = PackString::read_le(&mut stream)?;
        table.push(resolve_type(&name, registry, config)?);
    }

    let mut parser = IndexParser {
        stream: &mut stream,
        stream_len,
        table: &table,
        resources: 0,
    };
    let root = parser.read_directory(0)?;
    let resources = parser.resources;

    info!(
        "Loaded packed archive: {} types, {} resources, {} bytes",
        table.len(),
        resources,
        stream_len
    );

    let stream: Box<dyn PackSource> = Box::new(stream);
    let tree = PackedTree {
        stream: Mutex::new(stream),
        max_decompressed_size: config.max_decompressed_size,
    };

    Ok(PackedNode {
        tree: Arc::new(tree),
        directory: Arc::new(root),
    })
}

fn resolve_type(
    name: &str,
    registry: &TypeRegistry,
    config: &ArchiveConfig,
) -> ArchiveResult<Option<Arc<TypeDescriptor>>> {
    match registry.lookup_by_name(name) {
        Some(descriptor) => Ok(Some(descriptor)),
        None if config.strict_type_table => Err(ArchiveError::TypeNotRegistered(name.to_string())),
        None => {
            warn!("Type {name} in pack type table is not registered, its resources are skipped");
            Ok(None)
        }
    }
}

/// Entry names must be usable as locator segments
fn check_name(entry: &IndexEntry) -> ArchiveResult<()> {
    if is_valid_segment(&entry.name.0) {
        Ok(())
    } else {
        Err(ArchiveError::malformed(format!(
            "invalid entry name {:?}",
            entry.name.0
        )))
    }
}

fn count(value: i32, what: &str) -> ArchiveResult<usize> {
    usize::try_from(value)
        .map_err(|_| ArchiveError::malformed(format!("negative {what} count {value}")))
}

struct IndexParser<'a, R> {
    stream: &'a mut R,
    stream_len: u64,
    table: &'a [Option<Arc<TypeDescriptor>>],
    resources: usize,
}

impl<R: PackSource> IndexParser<'_, R> {
    fn read_directory(&mut self, depth: usize) -> ArchiveResult<PackedDirectory> {
        if depth > MAX_NODE_DEPTH {
            return Err(ArchiveError::malformed(format!(
                "node nesting deeper than {MAX_NODE_DEPTH}"
            )));
        }

        let counts = NodeCounts::read_le(&mut *self.stream)?;
        let child_count = count(counts.child_count, "child")?;
        let resource_count = count(counts.resource_count, "resource")?;

        let mut child_entries = Vec::with_capacity(child_count.min(1024));
        for _ in 0..child_count {
            let entry = IndexEntry::read_le(&mut *self.stream)?;
            check_name(&entry)?;
            if !entry.is_child() {
                return Err(ArchiveError::malformed(format!(
                    "child entry {} has type id {}",
                    entry.name.0, entry.type_id
                )));
            }
            child_entries.push(entry);
        }

        let mut directory = PackedDirectory::default();
        for _ in 0..resource_count {
            let entry = IndexEntry::read_le(&mut *self.stream)?;
            check_name(&entry)?;
            let (offset, length) = self.span(&entry)?;

            let descriptor = usize::try_from(entry.type_id)
                .ok()
                .and_then(|index| self.table.get(index))
                .ok_or_else(|| {
                    ArchiveError::malformed(format!(
                        "resource {} has type id {} outside the type table",
                        entry.name.0, entry.type_id
                    ))
                })?;

            // Unregistered type, already reported when the table was read
            let Some(descriptor) = descriptor else {
                continue;
            };

            self.resources += 1;
            directory
                .resources
                .entry(entry.name.0)
                .or_insert_with(Vec::new)
                .push(ResourceSpan {
                    descriptor: Arc::clone(descriptor),
                    offset,
                    length,
                });
        }

        let mut children = BTreeMap::new();
        for entry in child_entries {
            if children.contains_key(&entry.name.0) {
                return Err(ArchiveError::malformed(format!(
                    "duplicate child entry {}",
                    entry.name.0
                )));
            }

            let (offset, _) = self.span(&entry)?;
            self.stream.seek(SeekFrom::Start(offset))?;
            debug!("Reading child {} at {offset:#x}", entry.name.0);
            let child = self.read_directory(depth + 1)?;
            children.insert(entry.name.0, Arc::new(child));
        }
        directory.children = children;

        Ok(directory)
    }

    /// Validated body span of an entry
    fn span(&self, entry: &IndexEntry) -> ArchiveResult<(u64, u64)> {
        let (Ok(offset), Ok(length)) = (u64::try_from(entry.offset), u64::try_from(entry.length))
        else {
            return Err(ArchiveError::malformed(format!(
                "entry {} has negative span ({}, {})",
                entry.name.0, entry.offset, entry.length
            )));
        };

        if offset.checked_add(length).is_none_or(|end| end > self.stream_len) {
            return Err(ArchiveError::malformed(format!(
                "entry {} span {offset:#x}+{length} runs past end of stream ({} bytes)",
                entry.name.0, self.stream_len
            )));
        }

        Ok((offset, length))
    }
}
