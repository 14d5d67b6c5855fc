//! On-disk records of the packed container
//!
//! All integers are little-endian. Strings carry a LEB128 byte length
//! followed by UTF-8 bytes.

use std::io::{Read, Seek, Write};

use binrw::{BinRead, BinResult, BinWrite};

use crate::error::ArchiveError;

/// Magic bytes at the start of every packed container
pub const MAGIC: [u8; 4] = *b"RSAR";

/// Format version written by this crate
pub const FORMAT_VERSION: i32 = 0;

/// Type id marking an index entry as a child node
pub const CHILD_TYPE_ID: i32 = -1;

/// Size of the offset/length pair at the end of every index entry
pub const SLOT_SIZE: u64 = 16;

/// Longest name accepted when reading
const MAX_STRING_LEN: u32 = 1024 * 1024;

/// Fixed part of the root header
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little, magic = b"RSAR")]
pub struct PackPreamble {
    /// Format version
    pub version: i32,
    /// Number of names in the type table that follows
    pub type_count: i32,
}

/// Entry counts opening every node
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct NodeCounts {
    /// Number of child entries
    pub child_count: i32,
    /// Number of resource entries
    pub resource_count: i32,
}

/// One index entry, child or resource
#[derive(Debug, Clone, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct IndexEntry {
    /// Child or resource name
    pub name: PackString,
    /// [`CHILD_TYPE_ID`] or an index into the type table
    pub type_id: i32,
    /// Absolute stream offset of the body
    pub offset: i64,
    /// Body length in bytes
    pub length: i64,
}

impl IndexEntry {
    /// Entry with a zeroed span, patched once the body is written
    pub fn placeholder(name: &str, type_id: i32) -> Self {
        Self {
            name: PackString(name.to_string()),
            type_id,
            offset: 0,
            length: 0,
        }
    }

    /// Whether this entry names a child node
    pub fn is_child(&self) -> bool {
        self.type_id == CHILD_TYPE_ID
    }
}

/// Offset/length pair written over a placeholder
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(little)]
pub struct SpanSlot {
    /// Absolute stream offset of the body
    pub offset: i64,
    /// Body length in bytes
    pub length: i64,
}

/// Length-prefixed UTF-8 string
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackString(pub String);

impl BinRead for PackString {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let len = read_varint(reader, pos)?;

        if len > MAX_STRING_LEN {
            return Err(binrw::Error::AssertFail {
                pos,
                message: format!("string length {len} exceeds {MAX_STRING_LEN}"),
            });
        }

        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;

        String::from_utf8(bytes).map(Self).map_err(|e| binrw::Error::Custom {
            pos,
            err: Box::new(ArchiveError::malformed(format!("invalid UTF-8 name: {e}"))),
        })
    }
}

impl BinWrite for PackString {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        _endian: binrw::Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<()> {
        let bytes = self.0.as_bytes();
        let pos = writer.stream_position()?;
        let len = u32::try_from(bytes.len()).map_err(|_| binrw::Error::AssertFail {
            pos,
            message: format!("string of {} bytes is too long", bytes.len()),
        })?;

        writer.write_all(&encode_varint(len))?;
        writer.write_all(bytes)?;
        Ok(())
    }
}

impl From<&str> for PackString {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Read a LEB128 varint of at most 32 bits
fn read_varint<R: Read>(reader: &mut R, pos: u64) -> BinResult<u32> {
    let mut result = 0u32;
    let mut shift = 0;

    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        let byte = byte[0];

        // Take lower 7 bits
        result |= u32::from(byte & 0x7F) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
        if shift >= 32 {
            return Err(binrw::Error::AssertFail {
                pos,
                message: "string length varint too long".to_string(),
            });
        }
    }
}

/// Encode a LEB128 varint
fn encode_varint(value: u32) -> Vec<u8> {
    let mut value = value;
    let mut out = Vec::with_capacity(5);

    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // Set continuation bit
        }

        out.push(byte);

        if value == 0 {
            return out;
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use binrw::BinWriterExt;
    use std::io::Cursor;

    macro_rules! written {
        ($value:expr) => {{
            let mut cursor = Cursor::new(Vec::new());
            cursor.write_le($value).unwrap();
            cursor.into_inner()
        }};
    }

    #[test]
    fn test_varint_boundaries() {
        assert_eq!(encode_varint(0), [0x00]);
        assert_eq!(encode_varint(127), [0x7F]);
        assert_eq!(encode_varint(128), [0x80, 0x01]);
        assert_eq!(encode_varint(300), [0xAC, 0x02]);

        let mut cursor = Cursor::new(vec![0xAC, 0x02]);
        assert_eq!(read_varint(&mut cursor, 0).unwrap(), 300);
    }

    #[test]
    fn test_varint_rejects_overlong() {
        let mut cursor = Cursor::new(vec![0xFF; 6]);
        assert!(read_varint(&mut cursor, 0).is_err());
    }

    #[test]
    fn test_string_layout() {
        assert_eq!(written!(&PackString::from("abc")), b"\x03abc");

        let long = "x".repeat(200);
        let bytes = written!(&PackString::from(long.as_str()));
        assert_eq!(&bytes[..2], &[0xC8, 0x01]);
        assert_eq!(bytes.len(), 202);
    }

    #[test]
    fn test_preamble_layout() {
        let preamble = PackPreamble {
            version: FORMAT_VERSION,
            type_count: 2,
        };
        assert_eq!(written!(&preamble), b"RSAR\x00\x00\x00\x00\x02\x00\x00\x00");
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut cursor = Cursor::new(b"NOPE\x00\x00\x00\x00\x00\x00\x00\x00".to_vec());
        let err: ArchiveError = PackPreamble::read_le(&mut cursor).unwrap_err().into();
        assert!(matches!(err, ArchiveError::MalformedArchive { .. }));
    }

    #[test]
    fn test_child_entry_layout() {
        let bytes = written!(&IndexEntry::placeholder("ab", CHILD_TYPE_ID));
        assert_eq!(bytes.len(), 3 + 4 + SLOT_SIZE as usize);
        assert_eq!(&bytes[3..7], &[0xFF, 0xFF, 0xFF, 0xFF]);

        let entry = IndexEntry::read_le(&mut Cursor::new(bytes)).unwrap();
        assert!(entry.is_child());
        assert_eq!(entry.name.0, "ab");
    }

    #[test]
    fn test_invalid_utf8_name_is_malformed() {
        let mut cursor = Cursor::new(vec![0x02, 0xFF, 0xFE]);
        let err: ArchiveError = PackString::read_le(&mut cursor).unwrap_err().into();
        assert!(matches!(err, ArchiveError::MalformedArchive { .. }));
    }
}
