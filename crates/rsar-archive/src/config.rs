//! Configuration for archive loading and packing

use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, ArchiveResult};

/// Default byte boundary for resource bodies in a packed container
pub const DEFAULT_ALIGNMENT: u64 = 0x100;

/// Maximum allowed decompression size (1 GB)
pub const MAX_DECOMPRESSION_SIZE: u64 = 1024 * 1024 * 1024;

/// Configuration shared by every archive a manager opens or saves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Byte boundary every resource body starts on when saving
    pub alignment: u64,

    /// Gzip level (0-9) for types with the compressed format flag
    pub compression_level: u32,

    /// Upper bound on a single decompressed resource body
    pub max_decompressed_size: u64,

    /// Number of indirection files followed before giving up
    pub max_indirection_hops: usize,

    /// Fail on pack type names that are not registered instead of skipping them
    pub strict_type_table: bool,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            compression_level: 6,
            max_decompressed_size: MAX_DECOMPRESSION_SIZE,
            max_indirection_hops: 32,
            strict_type_table: false,
        }
    }
}

impl ArchiveConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resource body alignment
    #[must_use]
    pub const fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    /// Set the gzip compression level
    #[must_use]
    pub const fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the decompressed size limit
    #[must_use]
    pub const fn with_max_decompressed_size(mut self, size: u64) -> Self {
        self.max_decompressed_size = size;
        self
    }

    /// Set the indirection hop limit
    #[must_use]
    pub const fn with_max_indirection_hops(mut self, hops: usize) -> Self {
        self.max_indirection_hops = hops;
        self
    }

    /// Enable or disable strict pack type table resolution
    #[must_use]
    pub const fn with_strict_type_table(mut self, strict: bool) -> Self {
        self.strict_type_table = strict;
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> ArchiveResult<()> {
        if self.alignment == 0 {
            return Err(ArchiveError::InvalidConfig(
                "alignment must be greater than zero".to_string(),
            ));
        }

        if self.compression_level > 9 {
            return Err(ArchiveError::InvalidConfig(format!(
                "compression level {} out of range 0-9",
                self.compression_level
            )));
        }

        if self.max_indirection_hops == 0 {
            return Err(ArchiveError::InvalidConfig(
                "indirection hop limit must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
