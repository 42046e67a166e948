//! Command-line arguments and the package configuration they produce

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hlpak::{FindType, PackageConfig, SortField};
use std::fs;
use std::path::PathBuf;

/// Inspect, validate, extract and defragment Half-Life era game archives.
#[derive(Debug, Parser)]
#[command(name = "hlpak", version, about)]
pub struct Cli {
    /// Archive to open
    pub archive: PathBuf,

    /// Open the archive for writing (required by `defragment`)
    #[arg(long, global = true)]
    pub write: bool,

    /// JSON file holding a package configuration
    #[arg(short, long, global = true, env = "HLPAK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Read the archive on demand instead of memory-mapping it
    #[arg(long, global = true, env = "HLPAK_NO_MMAP")]
    pub no_mmap: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show package type and attributes
    Info,

    /// List the directory tree
    List {
        /// Folder to list, relative to the root
        #[arg(long, default_value = "")]
        folder: String,

        /// Sort key
        #[arg(long, value_enum, default_value = "name")]
        sort: SortKey,

        /// Largest or last names first
        #[arg(long)]
        descending: bool,
    },

    /// Search items by name
    Find {
        /// Wildcard pattern (`*`, `?`), or text with --exact/--substring
        pattern: String,

        /// Match names containing the pattern
        #[arg(long, conflicts_with = "exact")]
        substring: bool,

        /// Match names equal to the pattern
        #[arg(long)]
        exact: bool,

        /// Compare names case-sensitively
        #[arg(long)]
        case_sensitive: bool,

        /// Only search the root folder
        #[arg(long)]
        no_recurse: bool,
    },

    /// Validate files against their stored checksums
    Validate {
        /// File or folder to validate, relative to the root
        #[arg(default_value = "")]
        path: String,
    },

    /// Extract a file or folder
    Extract {
        /// File or folder to extract, relative to the root
        path: String,

        /// Destination directory
        #[arg(short, long, default_value = ".")]
        dest: PathBuf,

        /// Overwrite files that already exist
        #[arg(long, env = "HLPAK_OVERWRITE")]
        overwrite: bool,

        /// Skip files that fail validation
        #[arg(long)]
        validate: bool,
    },

    /// Reorder data blocks so every file is contiguous
    Defragment {
        /// Reorder even when nothing is fragmented
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SortKey {
    Name,
    Size,
}

impl From<SortKey> for SortField {
    fn from(key: SortKey) -> Self {
        match key {
            SortKey::Name => Self::Name,
            SortKey::Size => Self::Size,
        }
    }
}

impl Command {
    /// Search flags for `find`.
    pub fn find_type(&self) -> FindType {
        let Self::Find {
            substring,
            exact,
            case_sensitive,
            no_recurse,
            ..
        } = self
        else {
            return FindType::ALL;
        };

        let mut find = FindType::ALL;
        if *substring {
            find = find | FindType::MODE_SUBSTRING;
        }
        if *exact {
            find = find | FindType::MODE_STRING;
        }
        if *case_sensitive {
            find = find | FindType::CASE_SENSITIVE;
        }
        if *no_recurse {
            find = find | FindType::NO_RECURSE;
        }
        find
    }
}

impl Cli {
    /// Configuration from `--config` (or defaults) with flags applied on top.
    pub fn package_config(&self) -> Result<PackageConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => PackageConfig::default(),
        };

        if self.no_mmap {
            config = config.with_mmap(false);
        }
        match &self.command {
            Command::Extract {
                overwrite,
                validate,
                ..
            } => {
                if *overwrite {
                    config = config.with_overwrite_files(true);
                }
                if *validate {
                    config = config.with_validate_on_extract(true);
                }
            }
            Command::Defragment { force: true } => {
                config = config.with_force_defragment(true);
            }
            _ => {}
        }
        Ok(config)
    }
}
