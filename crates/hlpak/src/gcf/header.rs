//! On-disk records of the GCF cache format
//!
//! Every record is little-endian and tightly packed. Tables of single `u32`
//! values (fragmentation map, directory map, checksums, directory info
//! tables) are decoded as `Vec<u32>`.

use crate::Result;
use binrw::{BinRead, BinReaderExt, BinWrite, BinWriterExt};
use std::io::Cursor;

/// Directory entry flag: item is a file.
pub const FLAG_FILE: u32 = 0x0000_4000;
/// Directory entry flag: file data is encrypted.
pub const FLAG_ENCRYPTED: u32 = 0x0000_0100;
/// Directory entry flag: back up the local copy before overwriting.
pub const FLAG_BACKUP_LOCAL: u32 = 0x0000_0040;
/// Directory entry flags: copy the file out of the cache.
pub const FLAG_COPY_LOCAL: u32 = 0x0000_000A;
/// Directory entry flag: never overwrite an existing local copy.
pub const FLAG_COPY_LOCAL_NO_OVERWRITE: u32 = 0x0000_0001;

/// Checksum index of a file without checksums.
pub const NO_CHECKSUM: u32 = 0xFFFF_FFFF;

/// Bytes covered by one checksum entry.
pub const CHECKSUM_CHUNK_SIZE: usize = 0x8000;

/// Minor versions this crate reads.
pub const SUPPORTED_VERSIONS: [u32; 3] = [3, 5, 6];

/// File header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct GcfHeader {
    /// Always 1
    pub dummy0: u32,
    /// Always 1 for cache files
    pub major_version: u32,
    /// Layout version (3, 5 or 6)
    pub minor_version: u32,
    /// Steam cache id
    pub cache_id: u32,
    /// Last content version played
    pub last_version_played: u32,
    /// Unused
    pub dummy1: u32,
    /// Unused
    pub dummy2: u32,
    /// Total file size
    pub file_size: u32,
    /// Data block size
    pub block_size: u32,
    /// Number of data blocks
    pub block_count: u32,
    /// Unused
    pub dummy3: u32,
}

impl GcfHeader {
    /// Encoded size.
    pub const SIZE: usize = 44;
}

/// Header of the block entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockEntryHeader {
    /// Number of block entries
    pub block_count: u32,
    /// Number of block entries in use
    pub blocks_used: u32,
    /// Unused
    pub dummy0: u32,
    /// Unused
    pub dummy1: u32,
    /// Unused
    pub dummy2: u32,
    /// Unused
    pub dummy3: u32,
    /// Unused
    pub dummy4: u32,
    /// Sum of the preceding fields
    pub checksum: u32,
}

impl BlockEntryHeader {
    /// Encoded size.
    pub const SIZE: usize = 32;
}

/// One contiguous logical allocation of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockEntry {
    /// Allocation flags
    pub entry_flags: u32,
    /// Offset of this allocation within the file
    pub file_data_offset: u32,
    /// Bytes held by this allocation
    pub file_data_size: u32,
    /// First data block of the allocation
    pub first_data_block_index: u32,
    /// Next block entry of the file (data block count ends the chain)
    pub next_block_entry_index: u32,
    /// Previous block entry of the file
    pub previous_block_entry_index: u32,
    /// Directory entry owning the allocation
    pub directory_index: u32,
}

impl BlockEntry {
    /// Encoded size.
    pub const SIZE: usize = 28;
}

/// Header of the fragmentation map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct FragmentationMapHeader {
    /// Number of data blocks
    pub block_count: u32,
    /// Head of the free list
    pub first_unused_entry: u32,
    /// Chain terminator selector: 0 for `0xFFFF`, 1 for `0xFFFFFFFF`
    pub terminator: u32,
    /// `block_count + first_unused_entry + terminator`
    pub checksum: u32,
}

impl FragmentationMapHeader {
    /// Encoded size.
    pub const SIZE: usize = 16;

    /// Value at or above which a next-block index ends a chain.
    pub const fn terminator_value(&self) -> u32 {
        if self.terminator == 0 {
            0x0000_FFFF
        } else {
            0xFFFF_FFFF
        }
    }

    /// Header checksum for the current fields.
    pub const fn computed_checksum(&self) -> u32 {
        self.block_count
            .wrapping_add(self.first_unused_entry)
            .wrapping_add(self.terminator)
    }
}

/// Header of the block entry map (minor versions below 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockEntryMapHeader {
    /// Number of block entries
    pub block_count: u32,
    /// First block entry in allocation order
    pub first_block_entry_index: u32,
    /// Last block entry in allocation order
    pub last_block_entry_index: u32,
    /// Unused
    pub dummy0: u32,
    /// Sum of the preceding fields
    pub checksum: u32,
}

impl BlockEntryMapHeader {
    /// Encoded size.
    pub const SIZE: usize = 20;
}

/// Allocation-order links of one block entry (minor versions below 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct BlockEntryMap {
    /// Previous block entry
    pub previous_block_entry_index: u32,
    /// Next block entry
    pub next_block_entry_index: u32,
}

impl BlockEntryMap {
    /// Encoded size.
    pub const SIZE: usize = 8;
}

/// Header of the directory section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct DirectoryHeader {
    /// Unused
    pub dummy0: u32,
    /// Steam cache id
    pub cache_id: u32,
    /// Last content version played
    pub last_version_played: u32,
    /// Number of directory entries
    pub item_count: u32,
    /// Number of file entries
    pub file_count: u32,
    /// Bytes per checksum chunk
    pub checksum_data_length: u32,
    /// Bytes from the start of this header to the end of the local table
    pub directory_size: u32,
    /// Bytes of the names blob
    pub name_size: u32,
    /// Entries of the first info table
    pub info1_count: u32,
    /// Entries of the copy table
    pub copy_count: u32,
    /// Entries of the local table
    pub local_count: u32,
    /// Unused
    pub dummy2: u32,
    /// Unused
    pub dummy3: u32,
    /// Header checksum
    pub checksum: u32,
}

impl DirectoryHeader {
    /// Encoded size.
    pub const SIZE: usize = 56;
}

/// One node of the on-disk directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct DirectoryEntry {
    /// Offset of the NUL-terminated name in the names blob
    pub name_offset: u32,
    /// File size, or child count of a folder
    pub item_size: u32,
    /// Checksum map entry ([`NO_CHECKSUM`] when absent)
    pub checksum_index: u32,
    /// `FLAG_*` bits
    pub directory_flags: u32,
    /// Parent entry
    pub parent_index: u32,
    /// Next sibling (0 or `0xFFFFFFFF` for none)
    pub next_index: u32,
    /// First child (0 or `0xFFFFFFFF` for none)
    pub first_index: u32,
}

impl DirectoryEntry {
    /// Encoded size.
    pub const SIZE: usize = 28;

    /// Whether the entry describes a file.
    pub const fn is_file(&self) -> bool {
        self.directory_flags & FLAG_FILE != 0
    }

    /// Whether the file data is encrypted.
    pub const fn is_encrypted(&self) -> bool {
        self.directory_flags & FLAG_ENCRYPTED != 0
    }
}

/// Header of the directory map (minor versions 5 and up).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct DirectoryMapHeader {
    /// Always 1
    pub dummy0: u32,
    /// Always 0
    pub dummy1: u32,
}

impl DirectoryMapHeader {
    /// Encoded size.
    pub const SIZE: usize = 8;
}

/// Header of the checksum section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ChecksumHeader {
    /// Always 1
    pub dummy0: u32,
    /// Bytes following this header that belong to the checksum section
    pub checksum_size: u32,
}

impl ChecksumHeader {
    /// Encoded size.
    pub const SIZE: usize = 8;
}

/// Header of the checksum map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ChecksumMapHeader {
    /// Format tag, `0x14893721`
    pub dummy0: u32,
    /// Always 1
    pub dummy1: u32,
    /// Number of checksum map entries
    pub item_count: u32,
    /// Number of checksum entries
    pub checksum_count: u32,
}

impl ChecksumMapHeader {
    /// Encoded size.
    pub const SIZE: usize = 16;
    /// Value of `dummy0`.
    pub const TAG: u32 = 0x1489_3721;
}

/// Run of checksums belonging to one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct ChecksumMapEntry {
    /// Number of checksums (one per chunk)
    pub checksum_count: u32,
    /// Index of the first checksum
    pub first_checksum_index: u32,
}

impl ChecksumMapEntry {
    /// Encoded size.
    pub const SIZE: usize = 8;
}

/// Header of the data block region.
///
/// Minor versions below 5 store it without `last_version_played`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, BinRead, BinWrite)]
#[brw(little)]
pub struct DataBlockHeader {
    /// Last content version played
    pub last_version_played: u32,
    /// Number of data blocks
    pub block_count: u32,
    /// Bytes per data block
    pub block_size: u32,
    /// File offset of data block 0
    pub first_block_offset: u32,
    /// Number of data blocks in use
    pub blocks_used: u32,
    /// Sum of the preceding fields
    pub checksum: u32,
}

impl DataBlockHeader {
    /// Encoded size.
    pub const SIZE: usize = 24;
    /// Encoded size without `last_version_played`.
    pub const LEGACY_SIZE: usize = 20;
}

/// Decode one record at `offset` in `bytes`.
pub(crate) fn decode<T>(bytes: &[u8], offset: usize) -> Result<T>
where
    T: BinRead,
    for<'a> T::Args<'a>: Default,
{
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(offset as u64);
    Ok(cursor.read_le()?)
}

/// Decode `count` consecutive records of `size` bytes starting at `offset`.
pub(crate) fn decode_table<T>(bytes: &[u8], offset: usize, count: usize) -> Result<Vec<T>>
where
    T: BinRead,
    for<'a> T::Args<'a>: Default,
{
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(offset as u64);
    let mut table = Vec::with_capacity(count);
    for _ in 0..count {
        table.push(cursor.read_le()?);
    }
    Ok(table)
}

/// Encode `values` back to back into `bytes` starting at `offset`.
pub(crate) fn encode_table<T>(bytes: &mut [u8], offset: usize, values: &[T]) -> Result<()>
where
    T: BinWrite,
    for<'a> T::Args<'a>: Default,
{
    let mut cursor = Cursor::new(bytes);
    cursor.set_position(offset as u64);
    for value in values {
        cursor.write_le(value)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn encoded_len<T>(value: &T) -> usize
    where
        T: BinWrite,
        for<'a> T::Args<'a>: Default,
    {
        let mut cursor = Cursor::new(Vec::new());
        cursor.write_le(value).expect("encode");
        cursor.into_inner().len()
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(encoded_len(&GcfHeader::default()), GcfHeader::SIZE);
        assert_eq!(encoded_len(&BlockEntryHeader::default()), BlockEntryHeader::SIZE);
        assert_eq!(encoded_len(&BlockEntry::default()), BlockEntry::SIZE);
        assert_eq!(
            encoded_len(&FragmentationMapHeader::default()),
            FragmentationMapHeader::SIZE
        );
        assert_eq!(
            encoded_len(&BlockEntryMapHeader::default()),
            BlockEntryMapHeader::SIZE
        );
        assert_eq!(encoded_len(&BlockEntryMap::default()), BlockEntryMap::SIZE);
        assert_eq!(encoded_len(&DirectoryHeader::default()), DirectoryHeader::SIZE);
        assert_eq!(encoded_len(&DirectoryEntry::default()), DirectoryEntry::SIZE);
        assert_eq!(
            encoded_len(&DirectoryMapHeader::default()),
            DirectoryMapHeader::SIZE
        );
        assert_eq!(encoded_len(&ChecksumHeader::default()), ChecksumHeader::SIZE);
        assert_eq!(encoded_len(&ChecksumMapHeader::default()), ChecksumMapHeader::SIZE);
        assert_eq!(encoded_len(&ChecksumMapEntry::default()), ChecksumMapEntry::SIZE);
        assert_eq!(encoded_len(&DataBlockHeader::default()), DataBlockHeader::SIZE);
    }

    #[test]
    fn test_little_endian_fields() {
        let bytes = [
            0x01, 0, 0, 0, 0x10, 0, 0, 0, 0x00, 0x20, 0, 0, 0x02, 0, 0, 0, 0x05, 0, 0, 0, 0x06,
            0, 0, 0, 0x07, 0, 0, 0,
        ];
        let entry: BlockEntry = decode(&bytes, 0).expect("decode");
        assert_eq!(entry.file_data_offset, 0x10);
        assert_eq!(entry.file_data_size, 0x2000);
        assert_eq!(entry.first_data_block_index, 2);
        assert_eq!(entry.directory_index, 7);
    }

    #[test]
    fn test_terminator_selector() {
        let mut header = FragmentationMapHeader {
            block_count: 10,
            first_unused_entry: 4,
            terminator: 0,
            checksum: 0,
        };
        assert_eq!(header.terminator_value(), 0xFFFF);
        assert_eq!(header.computed_checksum(), 14);
        header.terminator = 1;
        assert_eq!(header.terminator_value(), 0xFFFF_FFFF);
        assert_eq!(header.computed_checksum(), 15);
    }

    #[test]
    fn test_table_encode_in_place() {
        let mut bytes = vec![0u8; 12];
        encode_table(&mut bytes, 4, &[0xAABB_CCDDu32, 1]).expect("encode");
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        let table: Vec<u32> = decode_table(&bytes, 4, 2).expect("decode");
        assert_eq!(table, vec![0xAABB_CCDD, 1]);
        assert!(encode_table(&mut bytes, 8, &[1u32, 2]).is_err());
    }
}
