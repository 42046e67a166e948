//! First pass over the GCF header chain
//!
//! Each section's fixed prefix gives the length of the section and therefore
//! the offset of the next one. [`Layout::scan`] walks the chain with a single
//! sliding view and records every offset, so the second pass can map the
//! whole header once and decode each table in place.

use super::header::{
    BlockEntry, BlockEntryHeader, BlockEntryMap, BlockEntryMapHeader, ChecksumHeader,
    ChecksumMapEntry, ChecksumMapHeader, DataBlockHeader, DirectoryEntry, DirectoryHeader,
    DirectoryMapHeader, FragmentationMapHeader, GcfHeader, SUPPORTED_VERSIONS, decode,
};
use crate::mapping::{Mapping, View};
use crate::{PackageError, Result};
use binrw::BinRead;
use tracing::debug;

/// Section offsets and table lengths of one GCF header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    pub header: GcfHeader,
    pub block_entries: usize,
    pub block_entry_count: usize,
    pub fragmentation_header: usize,
    pub fragmentation_map: usize,
    pub fragmentation_count: usize,
    pub directory_entries: usize,
    pub item_count: usize,
    pub names: usize,
    pub name_size: usize,
    pub directory_map: usize,
    pub checksum_map_entries: usize,
    pub checksum_map_count: usize,
    pub checksum_entries: usize,
    pub checksum_count: usize,
    /// Where the 24-byte data block header record is decoded from. For
    /// minor versions below 5 this is 4 bytes before the stored record.
    pub data_block_header: usize,
    pub header_size: usize,
}

struct Scanner<'m> {
    mapping: &'m mut Mapping,
    view: Option<View>,
    size: u64,
}

impl Scanner<'_> {
    fn require(&self, what: &str, offset: usize, length: usize) -> Result<()> {
        let end = offset.checked_add(length).map(|end| end as u64);
        if end.is_none_or(|end| end > self.size) {
            return Err(PackageError::InvalidFormat(format!(
                "{what} at {offset} (+{length}) runs past the end of the file ({} bytes)",
                self.size
            )));
        }
        Ok(())
    }

    fn read<T>(&mut self, what: &str, offset: usize, length: usize) -> Result<T>
    where
        T: BinRead,
        for<'a> T::Args<'a>: Default,
    {
        self.require(what, offset, length)?;
        let mut view = self
            .mapping
            .map(self.view.take(), offset as u64, length)?;
        let value = self
            .mapping
            .data(&mut view)
            .and_then(|bytes| decode(bytes, 0));
        self.view = Some(view);
        value
    }

    fn finish(mut self) -> Result<()> {
        match self.view.take() {
            Some(view) => self.mapping.unmap(view),
            None => Ok(()),
        }
    }
}

fn table_size(what: &str, count: u32, record: usize) -> Result<usize> {
    (count as usize)
        .checked_mul(record)
        .ok_or_else(|| PackageError::InvalidFormat(format!("{what} table too large")))
}

fn advance(offset: usize, length: usize) -> Result<usize> {
    offset
        .checked_add(length)
        .ok_or_else(|| PackageError::InvalidFormat("header size overflow".to_string()))
}

impl Layout {
    /// Walk the header chain of an opened mapping.
    pub(crate) fn scan(mapping: &mut Mapping) -> Result<Self> {
        let size = mapping.size();
        let mut scanner = Scanner {
            mapping,
            view: None,
            size,
        };
        let layout = Self::scan_sections(&mut scanner);
        scanner.finish()?;
        layout
    }

    fn scan_sections(scanner: &mut Scanner<'_>) -> Result<Self> {
        let header: GcfHeader = scanner.read("header", 0, GcfHeader::SIZE)?;
        if header.dummy0 != 1 || header.major_version != 1 {
            return Err(PackageError::InvalidFormat(format!(
                "not a cache file (signature {}.{})",
                header.dummy0, header.major_version
            )));
        }
        if !SUPPORTED_VERSIONS.contains(&header.minor_version) {
            return Err(PackageError::UnsupportedVersion {
                format: "GCF",
                version: header.minor_version,
            });
        }
        let mut offset = GcfHeader::SIZE;

        let block_entry_header: BlockEntryHeader =
            scanner.read("block entry header", offset, BlockEntryHeader::SIZE)?;
        offset = advance(offset, BlockEntryHeader::SIZE)?;
        let block_entries = offset;
        let length = table_size("block entry", block_entry_header.block_count, BlockEntry::SIZE)?;
        scanner.require("block entries", offset, length)?;
        offset = advance(offset, length)?;

        let fragmentation_header = offset;
        let fragmentation: FragmentationMapHeader = scanner.read(
            "fragmentation map header",
            offset,
            FragmentationMapHeader::SIZE,
        )?;
        if fragmentation.terminator > 1 {
            return Err(PackageError::InvalidFormat(format!(
                "unknown fragmentation map terminator {}",
                fragmentation.terminator
            )));
        }
        offset = advance(offset, FragmentationMapHeader::SIZE)?;
        let fragmentation_map = offset;
        let length = table_size("fragmentation map", fragmentation.block_count, 4)?;
        scanner.require("fragmentation map", offset, length)?;
        offset = advance(offset, length)?;

        if header.minor_version < 6 {
            let map_header: BlockEntryMapHeader =
                scanner.read("block entry map header", offset, BlockEntryMapHeader::SIZE)?;
            offset = advance(offset, BlockEntryMapHeader::SIZE)?;
            let length = table_size("block entry map", map_header.block_count, BlockEntryMap::SIZE)?;
            scanner.require("block entry map", offset, length)?;
            offset = advance(offset, length)?;
        }

        let directory_start = offset;
        let directory: DirectoryHeader =
            scanner.read("directory header", offset, DirectoryHeader::SIZE)?;
        if directory.item_count == 0 {
            return Err(PackageError::InvalidFormat(
                "directory has no root entry".to_string(),
            ));
        }
        let directory_entries = advance(offset, DirectoryHeader::SIZE)?;
        let entries_length = table_size("directory", directory.item_count, DirectoryEntry::SIZE)?;
        let names = advance(directory_entries, entries_length)?;
        let directory_end = advance(directory_start, directory.directory_size as usize)?;
        if advance(names, directory.name_size as usize)? > directory_end {
            return Err(PackageError::InvalidFormat(format!(
                "directory size {} too small for {} entries and {} name bytes",
                directory.directory_size, directory.item_count, directory.name_size
            )));
        }
        scanner.require("directory", directory_start, directory.directory_size as usize)?;
        offset = directory_end;

        if header.minor_version >= 5 {
            scanner.require("directory map header", offset, DirectoryMapHeader::SIZE)?;
            offset = advance(offset, DirectoryMapHeader::SIZE)?;
        }
        let directory_map = offset;
        let length = table_size("directory map", directory.item_count, 4)?;
        scanner.require("directory map", offset, length)?;
        offset = advance(offset, length)?;

        let checksum: ChecksumHeader =
            scanner.read("checksum header", offset, ChecksumHeader::SIZE)?;
        offset = advance(offset, ChecksumHeader::SIZE)?;
        let checksum_start = offset;
        let checksum_size = checksum.checksum_size as usize;
        scanner.require("checksums", offset, checksum_size)?;

        let (checksum_map_count, checksum_count) = if checksum_size >= ChecksumMapHeader::SIZE {
            let map: ChecksumMapHeader =
                scanner.read("checksum map header", offset, ChecksumMapHeader::SIZE)?;
            (map.item_count as usize, map.checksum_count as usize)
        } else {
            (0, 0)
        };
        let checksum_map_entries = advance(checksum_start, ChecksumMapHeader::SIZE)?;
        let checksum_entries = advance(
            checksum_map_entries,
            table_size("checksum map", checksum_map_count as u32, ChecksumMapEntry::SIZE)?,
        )?;
        let checksums_end = advance(checksum_entries, table_size("checksum", checksum_count as u32, 4)?)?;
        if (checksum_map_count > 0 || checksum_count > 0)
            && checksums_end > checksum_start + checksum_size
        {
            return Err(PackageError::InvalidFormat(format!(
                "checksum section of {checksum_size} bytes too small for {checksum_map_count} map entries and {checksum_count} checksums"
            )));
        }
        offset = advance(offset, checksum_size)?;

        let (data_block_header, header_size) = if header.minor_version < 5 {
            let start = offset.checked_sub(4).ok_or_else(|| {
                PackageError::InvalidFormat("data block header before start of file".to_string())
            })?;
            (start, advance(offset, DataBlockHeader::LEGACY_SIZE)?)
        } else {
            (offset, advance(offset, DataBlockHeader::SIZE)?)
        };
        scanner.require(
            "data block header",
            data_block_header,
            DataBlockHeader::SIZE,
        )?;

        debug!(
            "GCF v{} layout: block entries @{} ({}), fragmentation map @{} ({}), directory @{} ({} items), checksums @{}, data block header @{}, header size {}",
            header.minor_version,
            block_entries,
            block_entry_header.block_count,
            fragmentation_map,
            fragmentation.block_count,
            directory_start,
            directory.item_count,
            checksum_start,
            data_block_header,
            header_size
        );

        Ok(Self {
            header,
            block_entries,
            block_entry_count: block_entry_header.block_count as usize,
            fragmentation_header,
            fragmentation_map,
            fragmentation_count: fragmentation.block_count as usize,
            directory_entries,
            item_count: directory.item_count as usize,
            names,
            name_size: directory.name_size as usize,
            directory_map,
            checksum_map_entries,
            checksum_map_count,
            checksum_entries,
            checksum_count,
            data_block_header,
            header_size,
        })
    }
}
