//! Outcome of validating one file

use std::fmt;

/// Result of checking a file against the archive's own integrity data.
///
/// These are outcomes to inspect, not errors: an I/O failure while reading
/// the file is reported as an `Err` by the validating call instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Validation {
    /// Every checksum matched
    Ok,
    /// Nothing to check against (encrypted, or no checksums stored)
    AssumedOk,
    /// Fewer bytes allocated than the declared size
    Incomplete,
    /// A checksum did not match
    Corrupt,
    /// The checksum data does not cover the file
    Error,
}

impl Validation {
    /// `Ok` or `AssumedOk`.
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok | Self::AssumedOk)
    }
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "OK",
            Self::AssumedOk => "Assumed OK",
            Self::Incomplete => "Incomplete",
            Self::Corrupt => "Corrupt",
            Self::Error => "Error",
        };
        f.write_str(text)
    }
}
