//! Configuration for opening and operating on packages

use serde::{Deserialize, Serialize};

/// Default view size used by mapping-backed streams (64 KiB).
pub const DEFAULT_VIEW_SIZE: usize = 64 * 1024;

/// Configuration for a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    /// Memory-map read-only file backings instead of reading on demand
    pub enable_mmap: bool,

    /// Overwrite existing host files during extraction
    pub overwrite_files: bool,

    /// Reorder data blocks even when no file is fragmented
    pub force_defragment: bool,

    /// Validate each file before extracting it and skip corrupt ones
    pub validate_on_extract: bool,

    /// Window size for mapping-backed streams (in bytes)
    pub view_size: usize,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            enable_mmap: true,
            overwrite_files: false,
            force_defragment: false,
            validate_on_extract: false,
            view_size: DEFAULT_VIEW_SIZE,
        }
    }
}

impl PackageConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable memory-mapped file access
    #[must_use]
    pub const fn with_mmap(mut self, enable: bool) -> Self {
        self.enable_mmap = enable;
        self
    }

    /// Enable or disable overwriting of existing files on extraction
    #[must_use]
    pub const fn with_overwrite_files(mut self, overwrite: bool) -> Self {
        self.overwrite_files = overwrite;
        self
    }

    /// Enable or disable forced defragmentation
    #[must_use]
    pub const fn with_force_defragment(mut self, force: bool) -> Self {
        self.force_defragment = force;
        self
    }

    /// Enable or disable validation before extraction
    #[must_use]
    pub const fn with_validate_on_extract(mut self, validate: bool) -> Self {
        self.validate_on_extract = validate;
        self
    }

    /// Set the mapping stream window size (clamped to at least 1 byte)
    #[must_use]
    pub fn with_view_size(mut self, size: usize) -> Self {
        self.view_size = size.max(1);
        self
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = PackageConfig::new()
            .with_mmap(false)
            .with_overwrite_files(true)
            .with_view_size(0);
        assert!(!config.enable_mmap);
        assert!(config.overwrite_files);
        assert_eq!(config.view_size, 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PackageConfig =
            serde_json::from_str(r#"{"force_defragment": true}"#).expect("parse config");
        assert!(config.force_defragment);
        assert!(config.enable_mmap);
        assert_eq!(config.view_size, DEFAULT_VIEW_SIZE);
    }
}
