//! Uniform access layer over Half-Life era game archives
//!
//! An archive is opened through a [`Package`], which binds a [`PackageFormat`]
//! implementation to a [`Mapping`](mapping::Mapping) over a file, a memory
//! buffer or another [`Stream`](stream::Stream). The format parses its header
//! structures from views of the mapping and builds a [`DirectoryTree`] of
//! folders and files. Files are then read through item streams, validated
//! against stored checksums or extracted to disk.
//!
//! # Supported Formats
//!
//! - **GCF**: Steam cache files (minor versions 3, 5 and 6), including
//!   checksum validation and in-place defragmentation
//!
//! The other formats of the family (BSP, NCF, PAK, SGA, VBSP, VPK, WAD, XZP,
//! ZIP) are recognized by [`PackageType::detect`] but rejected as
//! unsupported when opened.
//!
//! # Example
//!
//! ```no_run
//! use hlpak::stream::Stream;
//! use hlpak::{FileMode, FindType, Package, PackageConfig};
//! use std::io::Read;
//!
//! # fn main() -> hlpak::Result<()> {
//! let mut package = Package::open_file_auto(
//!     "half-life.gcf",
//!     FileMode::READ,
//!     PackageConfig::default(),
//! )?;
//! let root = package.root()?;
//! let item = package
//!     .tree()?
//!     .get_relative_item(root, "valve/liblist.gam", FindType::FILES)?;
//!
//! if let Some(item) = item {
//!     let mut stream = package.create_stream(item)?;
//!     stream.open(FileMode::READ)?;
//!     let mut text = String::new();
//!     stream.reader().read_to_string(&mut text)?;
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::cast_precision_loss)] // Fragmentation percentages
#![allow(clippy::cast_possible_wrap)] // Signed attribute values
#![allow(clippy::redundant_closure_for_method_calls)] // Iterator chains
#![allow(clippy::return_self_not_must_use)] // Builder patterns

pub mod config;
pub mod directory;
pub mod error;
pub mod gcf;
pub mod mapping;
pub mod mode;
pub mod package;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::PackageConfig;
pub use directory::{
    DirectoryTree, FindType, ID_INVALID, ItemHandle, ItemKind, SortField, SortOrder,
};
pub use error::{ErrorKind, PackageError, Result};
pub use gcf::GcfFormat;
pub use mode::FileMode;
pub use package::{
    Attribute, AttributeValue, DefragmentReport, ExtractReport, ItemStream, Package,
    PackageFormat, PackageId, PackageType, Validation,
};
