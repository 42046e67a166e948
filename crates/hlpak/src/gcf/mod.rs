//! Half-Life cache file (GCF) format
//!
//! A GCF stores files in fixed-size data blocks. Each file owns a chain of
//! block entries, and each block entry owns a chain of data blocks linked
//! through the fragmentation map. Minor versions 3, 5 and 6 are read; they
//! differ only in a few optional header sections.
//!
//! Opening runs two passes over the header: [`layout`] records section
//! offsets with a sliding view, then [`archive`] maps the whole header once
//! and decodes every table. The header view stays mapped while the package
//! is open so defragmentation can rewrite the chain tables in place.

pub mod header;

mod archive;
mod defragment;
mod layout;
mod stream;
mod validation;

pub use stream::GcfStream;
pub use validation::chunk_checksum;

use self::archive::Archive;
use self::header::{FLAG_BACKUP_LOCAL, FLAG_COPY_LOCAL, FLAG_COPY_LOCAL_NO_OVERWRITE};
use self::layout::Layout;
use crate::directory::{DirectoryTree, ItemHandle};
use crate::mapping::SharedMapping;
use crate::package::{
    AttributeValue, DefragmentReport, PackageFormat, PackageId, PackageType, Validation,
};
use crate::stream::{NullStream, Stream};
use crate::{PackageConfig, PackageError, Result};
use std::cell::{Ref, RefCell};
use std::rc::Rc;
use tracing::debug;

const PACKAGE_ATTRIBUTES: &[&str] = &[
    "Version",
    "Cache ID",
    "Allocated Blocks",
    "Used Blocks",
    "Block Length",
    "Last Version Played",
    "Fragmentation",
];

const ITEM_ATTRIBUTES: &[&str] = &[
    "Encrypted",
    "Copy Locally",
    "Overwrite Local Copy",
    "Backup Local Copy",
    "Flags",
    "Fragmentation",
];

const ITEM_FRAGMENTATION: usize = 5;

/// [`PackageFormat`] implementation for GCF archives.
#[derive(Debug, Default)]
pub struct GcfFormat {
    mapping: Option<SharedMapping>,
    archive: Option<Rc<RefCell<Archive>>>,
}

impl GcfFormat {
    /// Format with nothing mapped.
    pub fn new() -> Self {
        Self::default()
    }

    fn parts(&self) -> Result<(&SharedMapping, &Rc<RefCell<Archive>>)> {
        match (&self.mapping, &self.archive) {
            (Some(mapping), Some(archive)) => Ok((mapping, archive)),
            _ => Err(PackageError::NotOpen("GCF archive")),
        }
    }

    fn archive(&self) -> Result<Ref<'_, Archive>> {
        Ok(self.parts()?.1.borrow())
    }
}

impl PackageFormat for GcfFormat {
    fn package_type(&self) -> PackageType {
        PackageType::Gcf
    }

    fn map_data_structures(
        &mut self,
        mapping: &SharedMapping,
        _config: &PackageConfig,
    ) -> Result<()> {
        let archive = {
            let mut mapping = mapping.borrow_mut();
            let layout = Layout::scan(&mut mapping)?;
            Archive::load(&mut mapping, layout)?
        };
        debug!(
            "GCF v{} cache {}: {} items, {} of {} blocks used ({} bytes each)",
            archive.header.minor_version,
            archive.header.cache_id,
            archive.directory_entries.len(),
            archive.data_block_header.blocks_used,
            archive.block_count(),
            archive.block_size()
        );

        self.mapping = Some(Rc::clone(mapping));
        self.archive = Some(Rc::new(RefCell::new(archive)));
        Ok(())
    }

    fn unmap_data_structures(&mut self) {
        let (Some(mapping), Some(archive)) = (self.mapping.take(), self.archive.take()) else {
            return;
        };
        // Streams the caller still holds keep the tables alive; their views
        // go away with the mapping.
        if let Ok(archive) = Rc::try_unwrap(archive)
            && let Err(e) = archive.into_inner().unmap(&mut mapping.borrow_mut())
        {
            debug!("header view already released: {}", e);
        }
    }

    fn build_root(&self, owner: PackageId) -> Result<DirectoryTree> {
        let archive = self.archive()?;
        let mut tree = DirectoryTree::new(owner, "root", 0);

        let mut pending = vec![(0u32, tree.root())];
        let mut added = 0usize;
        while let Some((folder, handle)) = pending.pop() {
            for child in archive.children(folder)? {
                added += 1;
                if added > archive.directory_entries.len() {
                    return Err(PackageError::InvalidFormat(
                        "directory entries form a cycle".to_string(),
                    ));
                }
                let entry = archive.entry(child)?;
                let name = archive.name(child)?;
                if entry.is_file() {
                    tree.add_file(handle, name, child, u64::from(entry.item_size))?;
                } else {
                    let folder = tree.add_folder(handle, name, child)?;
                    pending.push((child, folder));
                }
            }
        }
        Ok(tree)
    }

    fn package_attribute_names(&self) -> &'static [&'static str] {
        PACKAGE_ATTRIBUTES
    }

    fn package_attribute(&self, index: usize) -> Result<Option<AttributeValue>> {
        let archive = self.archive()?;
        let value = match index {
            0 => AttributeValue::unsigned(archive.header.minor_version),
            1 => AttributeValue::unsigned(archive.header.cache_id),
            2 => AttributeValue::unsigned(archive.data_block_header.block_count),
            3 => AttributeValue::unsigned(archive.data_block_header.blocks_used),
            4 => AttributeValue::unsigned(archive.block_size()),
            5 => AttributeValue::unsigned(archive.header.last_version_played),
            6 => AttributeValue::Float(archive.item_fragmentation(0)?.percent()),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn item_attribute_names(&self) -> &'static [&'static str] {
        ITEM_ATTRIBUTES
    }

    fn item_attribute(
        &self,
        tree: &DirectoryTree,
        item: ItemHandle,
        index: usize,
    ) -> Result<Option<AttributeValue>> {
        let archive = self.archive()?;
        let id = tree.id(item)?;
        if index == ITEM_FRAGMENTATION {
            return Ok(Some(AttributeValue::Float(
                archive.item_fragmentation(id)?.percent(),
            )));
        }

        let entry = archive.entry(id)?;
        if !entry.is_file() {
            return Ok(None);
        }
        let flags = entry.directory_flags;
        let value = match index {
            0 => AttributeValue::Boolean(entry.is_encrypted()),
            1 => AttributeValue::Boolean(flags & FLAG_COPY_LOCAL != 0),
            2 => AttributeValue::Boolean(flags & FLAG_COPY_LOCAL_NO_OVERWRITE == 0),
            3 => AttributeValue::Boolean(flags & FLAG_BACKUP_LOCAL != 0),
            4 => AttributeValue::hex(flags),
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn file_size(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<u64> {
        let archive = self.archive()?;
        Ok(u64::from(archive.entry(tree.id(item)?)?.item_size))
    }

    fn file_size_on_disk(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<u64> {
        Ok(self.archive()?.size_on_disk(tree.id(item)?))
    }

    fn file_extractable(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<bool> {
        let archive = self.archive()?;
        let id = tree.id(item)?;
        let entry = archive.entry(id)?;
        Ok(!entry.is_encrypted() && archive.allocated_size(id) >= u64::from(entry.item_size))
    }

    fn file_validation(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<Validation> {
        let (mapping, archive) = self.parts()?;
        validation::validate(mapping, archive, tree.id(item)?, tree.path(item)?)
    }

    fn create_stream(&self, tree: &DirectoryTree, item: ItemHandle) -> Result<Box<dyn Stream>> {
        let (mapping, archive) = self.parts()?;
        let id = tree.id(item)?;
        let name = tree.name(item)?.to_string();
        let size = u64::from(archive.borrow().entry(id)?.item_size);

        if size == 0 {
            return Ok(Box::new(NullStream::named(name)));
        }
        Ok(Box::new(GcfStream::new(
            name,
            Rc::clone(mapping),
            Rc::clone(archive),
            id,
            size,
        )))
    }

    fn defragment(&mut self, force: bool) -> Result<DefragmentReport> {
        let (mapping, archive) = self.parts()?;
        let mut mapping = mapping.borrow_mut();
        let mut archive = archive.borrow_mut();
        defragment::defragment(&mut archive, &mut mapping, force)
    }
}
