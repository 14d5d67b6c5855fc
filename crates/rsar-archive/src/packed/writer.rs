//! Container serialization
//!
//! Nodes are written depth-first. Each node's index goes out with zeroed
//! spans; bodies follow, and every placeholder is patched by seeking back
//! once its body's extent is known.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use binrw::BinWrite;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, trace, warn};

use super::format::{
    CHILD_TYPE_ID, FORMAT_VERSION, IndexEntry, NodeCounts, PackPreamble, PackString, SLOT_SIZE,
    SpanSlot,
};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, ArchiveResult};
use crate::node::ArchiveNode;
use crate::registry::TypeDescriptor;

/// Write `root` and everything below it as a packed container
///
/// `types` becomes the container's type table; resources of any other type
/// are left out.
pub(crate) fn save<N, W>(
    root: &N,
    types: &[Arc<TypeDescriptor>],
    config: &ArchiveConfig,
    writer: &mut W,
) -> ArchiveResult<()>
where
    N: ArchiveNode,
    W: Write + Seek,
{
    config.validate()?;

    PackPreamble {
        version: FORMAT_VERSION,
        type_count: to_i32(types.len(), "type count")?,
    }
    .write_le(&mut *writer)?;

    for descriptor in types {
        PackString::from(descriptor.name()).write_le(&mut *writer)?;
    }

    let mut packer = Packer {
        writer,
        types,
        config,
        resources: 0,
    };
    packer.write_node(root)?;

    debug!(
        "Packed {} resources with {} types",
        packer.resources,
        types.len()
    );
    Ok(())
}

fn to_i32(value: usize, what: &str) -> ArchiveResult<i32> {
    i32::try_from(value).map_err(|_| ArchiveError::malformed(format!("{what} {value} exceeds i32")))
}

fn to_i64(value: u64) -> ArchiveResult<i64> {
    i64::try_from(value).map_err(|_| ArchiveError::malformed(format!("offset {value} exceeds i64")))
}

struct Packer<'a, W> {
    writer: &'a mut W,
    types: &'a [Arc<TypeDescriptor>],
    config: &'a ArchiveConfig,
    resources: usize,
}

impl<W: Write + Seek> Packer<'_, W> {
    fn write_node<N: ArchiveNode>(&mut self, node: &N) -> ArchiveResult<()> {
        let mut children = node.children()?;
        children.sort_by(|a, b| a.0.cmp(&b.0));

        let mut resources = Vec::new();
        for (name, descriptor) in node.resources()? {
            match self.types.iter().position(|t| t.key() == descriptor.key()) {
                Some(type_id) => resources.push((name, descriptor, to_i32(type_id, "type id")?)),
                None => warn!(
                    "Skipping {name}: type {} is not in the type table",
                    descriptor.name()
                ),
            }
        }
        resources.sort_by(|a, b| a.0.cmp(&b.0).then(a.2.cmp(&b.2)));

        NodeCounts {
            child_count: to_i32(children.len(), "child count")?,
            resource_count: to_i32(resources.len(), "resource count")?,
        }
        .write_le(&mut *self.writer)?;

        let mut child_slots = Vec::with_capacity(children.len());
        for (name, _) in &children {
            child_slots.push(self.write_entry(name, CHILD_TYPE_ID)?);
        }

        let mut resource_slots = Vec::with_capacity(resources.len());
        for (name, _, type_id) in &resources {
            resource_slots.push(self.write_entry(name, *type_id)?);
        }

        for ((name, child), slot) in children.iter().zip(child_slots) {
            let start = self.writer.stream_position()?;
            self.write_node(child)?;
            let end = self.writer.stream_position()?;
            trace!("Child {name} spans {start:#x}..{end:#x}");
            self.patch(slot, start, end)?;
        }

        for ((name, descriptor, _), slot) in resources.iter().zip(resource_slots) {
            let bytes = node
                .resource_bytes(name, descriptor)?
                .ok_or_else(|| ArchiveError::ResourceNotFound(name.clone()))?;

            // Round-trip through the codec so the stored bytes are its encoding
            let payload = descriptor.decode(&bytes)?;
            let encoded = descriptor.encode(&*payload)?;

            self.pad()?;
            let start = self.writer.stream_position()?;
            self.write_body(descriptor, &encoded)?;
            let end = self.writer.stream_position()?;
            trace!("Resource {name} ({}) spans {start:#x}..{end:#x}", descriptor.name());
            self.patch(slot, start, end)?;
            self.resources += 1;
        }

        Ok(())
    }

    /// Write an index entry with a zeroed span and return the span's position
    fn write_entry(&mut self, name: &str, type_id: i32) -> ArchiveResult<u64> {
        IndexEntry::placeholder(name, type_id).write_le(&mut *self.writer)?;
        Ok(self.writer.stream_position()? - SLOT_SIZE)
    }

    /// Fill in a placeholder and return to `end`
    fn patch(&mut self, slot: u64, start: u64, end: u64) -> ArchiveResult<()> {
        self.writer.seek(SeekFrom::Start(slot))?;
        SpanSlot {
            offset: to_i64(start)?,
            length: to_i64(end - start)?,
        }
        .write_le(&mut *self.writer)?;
        self.writer.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Zero-fill up to the next alignment boundary
    fn pad(&mut self) -> ArchiveResult<()> {
        let alignment = self.config.alignment;
        let position = self.writer.stream_position()?;
        let padding = (alignment - position % alignment) % alignment;
        io::copy(&mut io::repeat(0).take(padding), &mut *self.writer)?;
        Ok(())
    }

    fn write_body(&mut self, descriptor: &TypeDescriptor, encoded: &[u8]) -> ArchiveResult<()> {
        if descriptor.format().is_compressed() {
            let mut encoder = GzEncoder::new(
                &mut *self.writer,
                Compression::new(self.config.compression_level),
            );
            encoder.write_all(encoded)?;
            encoder.finish()?;
        } else {
            self.writer.write_all(encoded)?;
        }
        Ok(())
    }
}
