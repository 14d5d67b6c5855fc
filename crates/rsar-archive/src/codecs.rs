//! Default payload types
//!
//! [`Bitmap`] keeps an image's encoded bytes and reads its dimensions from
//! the file header; [`XmlDocument`] holds XML text. Both are stored
//! compressed in packed containers. Call [`register_default_types`] to make
//! them available to a manager.

use std::io;

use crate::error::ArchiveResult;
use crate::manager::ArchiveManager;
use crate::registry::ResourceFormat;

/// Stable type-table name of [`Bitmap`]
pub const BITMAP_TYPE_NAME: &str = "Bitmap";

/// Stable type-table name of [`XmlDocument`]
pub const XML_DOCUMENT_TYPE_NAME: &str = "XmlDocument";

/// Extensions mapped to [`Bitmap`] in loose archives
pub const BITMAP_EXTENSIONS: &[&str] = &["png", "gif", "jpg", "jpeg", "ico"];

/// Extensions mapped to [`XmlDocument`] in loose archives
pub const XML_EXTENSIONS: &[&str] = &["xml"];

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

/// Container format of a [`Bitmap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ImageFormat {
    Png,
    Gif,
    Jpeg,
    Ico,
}

/// Encoded image with its declared dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    format: ImageFormat,
    width: u32,
    height: u32,
    bytes: Vec<u8>,
}

impl Bitmap {
    /// Parse the header of an encoded PNG, GIF, JPEG or ICO image
    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        let (format, width, height) = if bytes.starts_with(&PNG_SIGNATURE) {
            png_size(bytes)?
        } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
            gif_size(bytes)?
        } else if bytes.starts_with(&[0xFF, 0xD8]) {
            jpeg_size(bytes)?
        } else if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
            ico_size(bytes)?
        } else {
            return Err(invalid("unrecognized image format"));
        };

        Ok(Self {
            format,
            width,
            height,
            bytes: bytes.to_vec(),
        })
    }

    /// The encoded image bytes
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    /// Detected container format
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Declared width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Declared height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encoded image bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn be_u16(bytes: &[u8], at: usize) -> io::Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid("truncated image header"))
}

fn le_u16(bytes: &[u8], at: usize) -> io::Result<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| invalid("truncated image header"))
}

fn be_u32(bytes: &[u8], at: usize) -> io::Result<u32> {
    bytes
        .get(at..at + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| invalid("truncated image header"))
}

fn png_size(bytes: &[u8]) -> io::Result<(ImageFormat, u32, u32)> {
    // IHDR is always the first chunk
    if bytes.get(12..16) != Some(b"IHDR".as_slice()) {
        return Err(invalid("PNG without leading IHDR chunk"));
    }
    Ok((ImageFormat::Png, be_u32(bytes, 16)?, be_u32(bytes, 20)?))
}

fn gif_size(bytes: &[u8]) -> io::Result<(ImageFormat, u32, u32)> {
    Ok((
        ImageFormat::Gif,
        u32::from(le_u16(bytes, 6)?),
        u32::from(le_u16(bytes, 8)?),
    ))
}

fn jpeg_size(bytes: &[u8]) -> io::Result<(ImageFormat, u32, u32)> {
    let mut pos = 2;

    loop {
        if bytes.get(pos) != Some(&0xFF) {
            return Err(invalid("JPEG marker expected"));
        }

        // Fill bytes may precede a marker
        while bytes.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }

        let marker = *bytes
            .get(pos + 1)
            .ok_or_else(|| invalid("truncated JPEG"))?;

        match marker {
            // Start of frame, excluding DHT, JPG and DAC
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let height = be_u16(bytes, pos + 5)?;
                let width = be_u16(bytes, pos + 7)?;
                return Ok((ImageFormat::Jpeg, u32::from(width), u32::from(height)));
            }
            0xD9 | 0xDA => return Err(invalid("JPEG without frame header")),
            // Standalone markers
            0x01 | 0xD0..=0xD8 => pos += 2,
            _ => pos += 2 + usize::from(be_u16(bytes, pos + 2)?),
        }
    }
}

fn ico_size(bytes: &[u8]) -> io::Result<(ImageFormat, u32, u32)> {
    if le_u16(bytes, 4)? == 0 {
        return Err(invalid("ICO without images"));
    }

    // First directory entry; a stored 0 means 256
    let dimension = |at: usize| {
        bytes
            .get(at)
            .map(|&b| if b == 0 { 256 } else { u32::from(b) })
            .ok_or_else(|| invalid("truncated ICO directory"))
    };
    Ok((ImageFormat::Ico, dimension(6)?, dimension(7)?))
}

/// XML document text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    text: String,
}

impl XmlDocument {
    /// Wrap XML text
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Decode UTF-8 XML, dropping a byte order mark
    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        if !text.trim_start().starts_with('<') {
            return Err(invalid("document does not start with markup"));
        }

        Ok(Self::new(text))
    }

    /// UTF-8 bytes of the document
    pub fn encode(&self) -> io::Result<Vec<u8>> {
        Ok(self.text.as_bytes().to_vec())
    }

    /// Document text
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Register [`Bitmap`] and [`XmlDocument`] with `manager`
pub fn register_default_types(manager: &ArchiveManager) -> ArchiveResult<()> {
    manager.register::<Bitmap, _, _>(
        BITMAP_TYPE_NAME,
        ResourceFormat::Compressed,
        BITMAP_EXTENSIONS,
        Bitmap::encode,
        Bitmap::decode,
    )?;
    manager.register::<XmlDocument, _, _>(
        XML_DOCUMENT_TYPE_NAME,
        ResourceFormat::Compressed,
        XML_EXTENSIONS,
        XmlDocument::encode,
        XmlDocument::decode,
    )
}
