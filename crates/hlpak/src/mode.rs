//! Access modes for mappings, streams and packages

use crate::{PackageError, Result};

/// Requested access to a backing source.
///
/// Combine with the `|` operator: `FileMode::READ | FileMode::WRITE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileMode {
    /// Read access
    pub read: bool,
    /// Write access
    pub write: bool,
    /// Create (or truncate) the backing source
    pub create: bool,
}

impl FileMode {
    /// No access; rejected by every `open`.
    pub const NONE: Self = Self {
        read: false,
        write: false,
        create: false,
    };

    /// Read-only access.
    pub const READ: Self = Self {
        read: true,
        write: false,
        create: false,
    };

    /// Write-only access.
    pub const WRITE: Self = Self {
        read: false,
        write: true,
        create: false,
    };

    /// Create flag, meaningful together with `WRITE`.
    pub const CREATE: Self = Self {
        read: false,
        write: false,
        create: true,
    };

    /// Read and write access to an existing source.
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
    };

    /// Whether at least one of read or write is requested.
    pub const fn is_valid(self) -> bool {
        self.read || self.write
    }

    /// Reject mode combinations no backing can honor.
    pub(crate) fn validate(self) -> Result<()> {
        if !self.is_valid() {
            return Err(PackageError::InvalidMode(
                "neither read nor write access requested".to_string(),
            ));
        }
        if self.create && !self.write {
            return Err(PackageError::InvalidMode(
                "create requested without write access".to_string(),
            ));
        }
        Ok(())
    }
}

impl std::ops::BitOr for FileMode {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            read: self.read || rhs.read,
            write: self.write || rhs.write,
            create: self.create || rhs.create,
        }
    }
}

impl std::fmt::Display for FileMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = if self.read { "r" } else { "-" };
        let w = if self.write { "w" } else { "-" };
        let c = if self.create { "c" } else { "-" };
        write!(f, "{r}{w}{c}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_combination() {
        let mode = FileMode::READ | FileMode::WRITE | FileMode::CREATE;
        assert!(mode.read && mode.write && mode.create);
        assert_eq!(mode.to_string(), "rwc");
    }

    #[test]
    fn test_mode_validation() {
        assert!(FileMode::NONE.validate().is_err());
        assert!(FileMode::CREATE.validate().is_err());
        assert!((FileMode::READ | FileMode::CREATE).validate().is_err());
        assert!(FileMode::READ.validate().is_ok());
        assert!((FileMode::WRITE | FileMode::CREATE).validate().is_ok());
    }
}
