//! Error types for archive operations

use std::path::PathBuf;
use thiserror::Error;

/// Archive operation result type
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Error types for archive operations
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Payload type has no registered descriptor
    #[error("Type not registered: {0}")]
    TypeNotRegistered(String),

    /// A descriptor with the same identity is already registered
    #[error("Type already registered: {0}")]
    TypeAlreadyRegistered(String),

    /// Locator does not resolve to a resource of the requested type
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Packed container is corrupt or truncated
    #[error("Malformed archive: {reason}")]
    MalformedArchive {
        /// Detailed description of the format violation
        reason: String,
    },

    /// Pack header carries a version this reader does not understand
    #[error("Unsupported archive version: {0}")]
    UnsupportedVersion(i32),

    /// Archive belongs to a different manager
    #[error("Cannot mount an archive created by a different manager")]
    ForeignArchive,

    /// Locator segment is empty or contains a path separator
    #[error("Invalid locator segment: {0:?}")]
    InvalidLocator(String),

    /// Indirection files point back at each other
    #[error("Indirection cycle detected at {}", .0.display())]
    IndirectionCycle(PathBuf),

    /// Indirection chain exceeded the configured hop limit
    #[error("Indirection chain too deep at {}", .0.display())]
    IndirectionTooDeep(PathBuf),

    /// Encode or decode callback failed
    #[error("Codec error for {type_name}: {source}")]
    Codec {
        /// Stable name of the payload type
        type_name: String,
        /// Error reported by the callback
        source: std::io::Error,
    },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Shorthand for a malformed archive error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedArchive {
            reason: reason.into(),
        }
    }

    /// Check if this error only means "nothing at that locator"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound(_))
    }

    /// Check if this error must abort the operation rather than be read as absence
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedArchive { .. }
                | Self::UnsupportedVersion(_)
                | Self::Io(_)
                | Self::IndirectionCycle(_)
                | Self::IndirectionTooDeep(_)
        )
    }
}

impl From<binrw::Error> for ArchiveError {
    fn from(error: binrw::Error) -> Self {
        match error {
            binrw::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Self::malformed(format!("truncated index: {e}"))
            }
            binrw::Error::Io(e) => Self::Io(e),
            binrw::Error::Backtrace(backtrace) => Self::from(*backtrace.error),
            binrw::Error::Custom { err, .. } => match err.downcast::<ArchiveError>() {
                Ok(inner) => *inner,
                Err(other) => Self::malformed(format!("{other:?}")),
            },
            other => Self::malformed(other.to_string()),
        }
    }
}
