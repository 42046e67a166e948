//! Decoded header tables of an opened GCF and the chain walks over them

use super::header::{
    BlockEntry, ChecksumMapEntry, DataBlockHeader, DirectoryEntry, FragmentationMapHeader,
    GcfHeader, decode, decode_table, encode_table,
};
use super::layout::Layout;
use crate::mapping::{Mapping, View};
use crate::{PackageError, Result};

/// Directory sibling/child index meaning "none", besides 0.
pub(crate) const NO_INDEX: u32 = 0xFFFF_FFFF;

/// Block usage of one file or a set of files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct Fragmentation {
    pub used: u32,
    pub fragmented: u32,
}

impl Fragmentation {
    pub(crate) fn add(&mut self, other: Self) {
        self.used += other.used;
        self.fragmented += other.fragmented;
    }

    pub(crate) fn percent(self) -> f32 {
        if self.used == 0 {
            0.0
        } else {
            self.fragmented as f32 / self.used as f32 * 100.0
        }
    }
}

/// Header tables of one opened archive, decoded from a single view over
/// `[0, header_size)`.
#[derive(Debug)]
pub(crate) struct Archive {
    pub layout: Layout,
    pub header: GcfHeader,
    pub block_entries: Vec<BlockEntry>,
    pub fragmentation_header: FragmentationMapHeader,
    pub fragmentation_map: Vec<u32>,
    pub directory_entries: Vec<DirectoryEntry>,
    pub names: Vec<u8>,
    pub directory_map: Vec<u32>,
    pub checksum_map: Vec<ChecksumMapEntry>,
    pub checksums: Vec<u32>,
    pub data_block_header: DataBlockHeader,
    /// View over the whole header, kept for in-place rewrites.
    pub header_view: View,
    /// Bumped whenever block chains are rewritten; streams restart their
    /// cached position when it changes.
    pub generation: u64,
}

impl Archive {
    /// Map the header region described by `layout` and decode every table.
    pub(crate) fn load(mapping: &mut Mapping, layout: Layout) -> Result<Self> {
        let mut header_view = mapping.map(None, 0, layout.header_size)?;
        let decoded = mapping
            .data(&mut header_view)
            .and_then(|bytes| Tables::decode(bytes, &layout));
        let tables = match decoded {
            Ok(tables) => tables,
            Err(e) => {
                mapping.unmap(header_view)?;
                return Err(e);
            }
        };

        let mut data_block_header = tables.data_block_header;
        if layout.header.minor_version < 5 {
            data_block_header.last_version_played = layout.header.last_version_played;
        }
        if data_block_header.block_size == 0 {
            mapping.unmap(header_view)?;
            return Err(PackageError::InvalidFormat(
                "data block size is zero".to_string(),
            ));
        }
        let mapped_blocks = tables.fragmentation_map.len();
        if data_block_header.block_count as usize != mapped_blocks
            || tables.fragmentation_header.block_count as usize != mapped_blocks
        {
            mapping.unmap(header_view)?;
            return Err(PackageError::InvalidFormat(format!(
                "{} data blocks declared but the fragmentation map holds {}",
                data_block_header.block_count, mapped_blocks
            )));
        }

        Ok(Self {
            header: layout.header,
            layout,
            block_entries: tables.block_entries,
            fragmentation_header: tables.fragmentation_header,
            fragmentation_map: tables.fragmentation_map,
            directory_entries: tables.directory_entries,
            names: tables.names,
            directory_map: tables.directory_map,
            checksum_map: tables.checksum_map,
            checksums: tables.checksums,
            data_block_header,
            header_view,
            generation: 0,
        })
    }

    /// Name of a directory entry, lossily decoded up to its NUL.
    pub(crate) fn name(&self, item: u32) -> Result<String> {
        let entry = self.entry(item)?;
        let start = entry.name_offset as usize;
        let bytes = self.names.get(start..).ok_or_else(|| {
            PackageError::InvalidFormat(format!(
                "name offset {start} of item {item} outside the names table"
            ))
        })?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    pub(crate) fn entry(&self, item: u32) -> Result<&DirectoryEntry> {
        self.directory_entries
            .get(item as usize)
            .ok_or_else(|| PackageError::NotFound(format!("directory entry {item}")))
    }

    /// Data block index at or above which a fragmentation map link ends a
    /// chain.
    pub(crate) const fn terminator(&self) -> u32 {
        self.fragmentation_header.terminator_value()
    }

    /// Number of data blocks; also the block entry chain terminator.
    pub(crate) const fn block_count(&self) -> u32 {
        self.data_block_header.block_count
    }

    pub(crate) const fn block_size(&self) -> u32 {
        self.data_block_header.block_size
    }

    /// Offset of data block `index` in the mapping.
    pub(crate) fn block_offset(&self, index: u32) -> u64 {
        u64::from(self.data_block_header.first_block_offset)
            + u64::from(index) * u64::from(self.block_size())
    }

    /// Whether `next` continues a data block chain.
    pub(crate) fn is_block(&self, index: u32) -> bool {
        index < self.terminator() && (index as usize) < self.fragmentation_map.len()
    }

    /// Block entries of a file in chain order.
    ///
    /// The walk is bounded by the table length, so a corrupt cycle ends it.
    pub(crate) fn block_entry_chain(&self, item: u32) -> Vec<u32> {
        let mut chain = Vec::new();
        let Some(&first) = self.directory_map.get(item as usize) else {
            return chain;
        };
        let mut index = first;
        while index != self.block_count() && chain.len() < self.block_entries.len() {
            let Some(entry) = self.block_entries.get(index as usize) else {
                break;
            };
            chain.push(index);
            index = entry.next_block_entry_index;
        }
        chain
    }

    /// Data blocks needed to hold `size` bytes.
    pub(crate) fn blocks_for(&self, size: u32) -> u32 {
        size.div_ceil(self.block_size())
    }

    /// Physical data blocks of one block entry in chain order.
    pub(crate) fn data_blocks(&self, entry: &BlockEntry) -> Vec<u32> {
        let wanted = self.blocks_for(entry.file_data_size) as usize;
        let mut blocks = Vec::with_capacity(wanted.min(self.fragmentation_map.len()));
        let mut index = entry.first_data_block_index;
        while blocks.len() < wanted && self.is_block(index) {
            blocks.push(index);
            index = self.fragmentation_map[index as usize];
        }
        blocks
    }

    /// Bytes allocated to a file across its block entries.
    pub(crate) fn allocated_size(&self, item: u32) -> u64 {
        self.block_entry_chain(item)
            .into_iter()
            .map(|i| u64::from(self.block_entries[i as usize].file_data_size))
            .sum()
    }

    /// Bytes a file occupies in whole data blocks.
    pub(crate) fn size_on_disk(&self, item: u32) -> u64 {
        self.block_entry_chain(item)
            .into_iter()
            .map(|i| {
                let size = self.block_entries[i as usize].file_data_size;
                u64::from(self.blocks_for(size)) * u64::from(self.block_size())
            })
            .sum()
    }

    /// Used and fragmented block counts of one file.
    ///
    /// A block is fragmented when it does not directly follow the previous
    /// block of the same file.
    pub(crate) fn file_fragmentation(&self, item: u32) -> Fragmentation {
        let mut result = Fragmentation::default();
        let mut last: Option<u32> = None;
        for index in self.block_entry_chain(item) {
            for block in self.data_blocks(&self.block_entries[index as usize]) {
                if last.is_some_and(|last| last.wrapping_add(1) != block) {
                    result.fragmented += 1;
                }
                result.used += 1;
                last = Some(block);
            }
        }
        result
    }

    /// Fragmentation of an item; folders sum their whole subtree.
    pub(crate) fn item_fragmentation(&self, item: u32) -> Result<Fragmentation> {
        let mut result = Fragmentation::default();
        let mut stack = vec![item];
        let mut visited = 0usize;
        while let Some(current) = stack.pop() {
            visited += 1;
            if visited > self.directory_entries.len() {
                return Err(PackageError::InvalidFormat(
                    "cycle in directory entries".to_string(),
                ));
            }
            let entry = self.entry(current)?;
            if entry.is_file() {
                result.add(self.file_fragmentation(current));
            } else {
                stack.extend(self.children(current)?);
            }
        }
        Ok(result)
    }

    /// Indices of the files in directory order.
    pub(crate) fn files(&self) -> impl Iterator<Item = u32> + '_ {
        self.directory_entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_file())
            .map(|(index, _)| index as u32)
    }

    /// Child indices of a folder entry, following the sibling list.
    pub(crate) fn children(&self, folder: u32) -> Result<Vec<u32>> {
        let mut children = Vec::new();
        let mut index = self.entry(folder)?.first_index;
        while index != 0 && index != NO_INDEX {
            if children.len() >= self.directory_entries.len() {
                return Err(PackageError::InvalidFormat(format!(
                    "cycle in the children of directory entry {folder}"
                )));
            }
            children.push(index);
            index = self.entry(index)?.next_index;
        }
        Ok(children)
    }

    /// Write the block entry table and fragmentation map back into the
    /// header view and commit both regions.
    pub(crate) fn commit_chains(&mut self, mapping: &mut Mapping) -> Result<()> {
        let layout = &self.layout;
        let bytes = mapping.data_mut(&mut self.header_view)?;
        encode_table(bytes, layout.block_entries, &self.block_entries)?;
        encode_table(
            bytes,
            layout.fragmentation_header,
            std::slice::from_ref(&self.fragmentation_header),
        )?;
        encode_table(bytes, layout.fragmentation_map, &self.fragmentation_map)?;

        mapping.commit(
            &self.header_view,
            layout.block_entries,
            self.block_entries.len() * BlockEntry::SIZE,
        )?;
        mapping.commit(
            &self.header_view,
            layout.fragmentation_header,
            FragmentationMapHeader::SIZE + self.fragmentation_map.len() * 4,
        )
    }

    /// Release the header view.
    pub(crate) fn unmap(self, mapping: &mut Mapping) -> Result<()> {
        mapping.unmap(self.header_view)
    }
}

struct Tables {
    block_entries: Vec<BlockEntry>,
    fragmentation_header: FragmentationMapHeader,
    fragmentation_map: Vec<u32>,
    directory_entries: Vec<DirectoryEntry>,
    names: Vec<u8>,
    directory_map: Vec<u32>,
    checksum_map: Vec<ChecksumMapEntry>,
    checksums: Vec<u32>,
    data_block_header: DataBlockHeader,
}

impl Tables {
    fn decode(bytes: &[u8], layout: &Layout) -> Result<Self> {
        let names = bytes
            .get(layout.names..layout.names + layout.name_size)
            .ok_or_else(|| PackageError::InvalidFormat("names table out of range".to_string()))?
            .to_vec();

        Ok(Self {
            block_entries: decode_table(bytes, layout.block_entries, layout.block_entry_count)?,
            fragmentation_header: decode(bytes, layout.fragmentation_header)?,
            fragmentation_map: decode_table(
                bytes,
                layout.fragmentation_map,
                layout.fragmentation_count,
            )?,
            directory_entries: decode_table(bytes, layout.directory_entries, layout.item_count)?,
            names,
            directory_map: decode_table(bytes, layout.directory_map, layout.item_count)?,
            checksum_map: decode_table(
                bytes,
                layout.checksum_map_entries,
                layout.checksum_map_count,
            )?,
            checksums: decode_table(bytes, layout.checksum_entries, layout.checksum_count)?,
            data_block_header: decode(bytes, layout.data_block_header)?,
        })
    }
}
