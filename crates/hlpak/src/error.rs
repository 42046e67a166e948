//! Error types shared by mappings, streams, packages and formats

use thiserror::Error;

/// Coarse classification of a [`PackageError`].
///
/// Lets a host decide how to react (log, retry with another format, report
/// corruption) without matching on every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or unsupported header, version or signature.
    Format,
    /// Access outside the extent of a mapping, view or stream.
    Bounds,
    /// View, item or stream used with an owner it does not belong to.
    Ownership,
    /// Operation not valid in the current open/closed state or mode.
    State,
    /// Failure reported by the backing source.
    Io,
    /// Requested format or operation is not implemented.
    Unsupported,
    /// Named item does not exist.
    NotFound,
}

/// Errors that can occur while opening, reading or mutating a package.
#[derive(Debug, Error)]
pub enum PackageError {
    /// I/O error from the backing file or stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Binary record could not be decoded or encoded.
    #[error("Binary format error: {0}")]
    BinRw(#[from] binrw::Error),

    /// Header, signature or structure is not valid for the format.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Format version is not one this crate knows how to read.
    #[error("Unsupported {format} version {version}")]
    UnsupportedVersion {
        /// Format name
        format: &'static str,
        /// Version found in the header
        version: u32,
    },

    /// Requested range lies outside the addressable extent.
    #[error("Range out of bounds: offset {offset} + length {length} exceeds size {size}")]
    OutOfBounds {
        /// Requested start offset
        offset: u64,
        /// Requested length
        length: u64,
        /// Size of the addressable extent
        size: u64,
    },

    /// Object belongs to a different mapping or package.
    #[error("Ownership violation: {0}")]
    Ownership(String),

    /// Operation requires an opened mapping, stream or package.
    #[error("Not open: {0}")]
    NotOpen(&'static str),

    /// Operation is not permitted by the current access mode.
    #[error("Invalid mode: {0}")]
    InvalidMode(String),

    /// Item or path does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Folder operation applied to a file item.
    #[error("Not a folder: {0}")]
    NotAFolder(String),

    /// File operation applied to a folder item.
    #[error("Not a file: {0}")]
    NotAFile(String),

    /// Format or operation is recognized but not implemented.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Block chain ended before the declared item size was reached.
    #[error("Unexpected end of stream ({read} B of {expected} B)")]
    UnexpectedEnd {
        /// Bytes reachable through the chain
        read: u64,
        /// Declared item size
        expected: u64,
    },

    /// An in-place rewrite failed part way; the archive may be corrupt.
    #[error("Archive possibly corrupted: {0}")]
    Corrupted(String),
}

impl PackageError {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Corrupted(_) => ErrorKind::Io,
            Self::BinRw(_) | Self::InvalidFormat(_) | Self::UnsupportedVersion { .. } => {
                ErrorKind::Format
            }
            Self::OutOfBounds { .. } | Self::UnexpectedEnd { .. } => ErrorKind::Bounds,
            Self::Ownership(_) => ErrorKind::Ownership,
            Self::NotOpen(_)
            | Self::InvalidMode(_)
            | Self::NotAFolder(_)
            | Self::NotAFile(_) => ErrorKind::State,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
        }
    }

    pub(crate) fn out_of_bounds(offset: u64, length: u64, size: u64) -> Self {
        Self::OutOfBounds {
            offset,
            length,
            size,
        }
    }
}

/// Result type for package operations.
pub type Result<T> = std::result::Result<T, PackageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PackageError::out_of_bounds(10, 4, 12).kind(),
            ErrorKind::Bounds
        );
        assert_eq!(
            PackageError::InvalidFormat("bad".to_string()).kind(),
            ErrorKind::Format
        );
        assert_eq!(PackageError::NotOpen("mapping").kind(), ErrorKind::State);
        assert_eq!(
            PackageError::Ownership("view".to_string()).kind(),
            ErrorKind::Ownership
        );
    }

    #[test]
    fn test_error_display() {
        let err = PackageError::UnexpectedEnd {
            read: 100,
            expected: 200,
        };
        assert_eq!(err.to_string(), "Unexpected end of stream (100 B of 200 B)");
    }
}
