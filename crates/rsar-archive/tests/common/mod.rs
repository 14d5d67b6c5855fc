//! Shared fixtures for archive integration tests

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::Path;

use rsar_archive::{ArchiveManager, ResourceFormat, ResourceLocator, register_default_types};

/// Plain text payload stored uncompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Text(pub String);

pub fn register_text(manager: &ArchiveManager) {
    manager
        .register::<Text, _, _>(
            "tests::Text",
            ResourceFormat::Plain,
            &["txt"],
            |t| Ok(t.0.as_bytes().to_vec()),
            |b| {
                String::from_utf8(b.to_vec())
                    .map(Text)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            },
        )
        .unwrap();
}

/// Manager with the default types plus [`Text`]
pub fn manager() -> ArchiveManager {
    let manager = ArchiveManager::new();
    register_default_types(&manager).unwrap();
    register_text(&manager);
    manager
}

/// Minimal PNG: signature plus IHDR
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes
}

/// Write `contents` at `relative` below `root`, creating parents
pub fn write(root: &Path, relative: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

pub fn loc(path: &str) -> ResourceLocator {
    ResourceLocator::parse(path)
}

pub fn rendered(locators: &[ResourceLocator]) -> Vec<String> {
    locators.iter().map(ToString::to_string).collect()
}
