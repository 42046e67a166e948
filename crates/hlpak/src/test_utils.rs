//! In-memory GCF images for tests

use crate::gcf::chunk_checksum;
use crate::gcf::header::{
    BlockEntry, BlockEntryHeader, BlockEntryMap, BlockEntryMapHeader, CHECKSUM_CHUNK_SIZE,
    ChecksumHeader, ChecksumMapEntry, ChecksumMapHeader, DataBlockHeader, DirectoryEntry,
    DirectoryHeader, DirectoryMapHeader, FLAG_ENCRYPTED, FLAG_FILE, FragmentationMapHeader,
    GcfHeader, NO_CHECKSUM,
};
use binrw::{BinWrite, BinWriterExt};
use std::collections::VecDeque;
use std::io::Cursor;

const SIGNATURE_SIZE: usize = 128;
const BLOCK_ENTRY_IN_USE: u32 = 0x0000_8000;

#[allow(clippy::expect_used)]
fn put<T>(out: &mut Cursor<Vec<u8>>, value: &T)
where
    T: BinWrite,
    for<'a> T::Args<'a>: Default,
{
    out.write_le(value).expect("encode");
}

/// Deterministic test bytes; different seeds give different content.
pub(crate) fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ ((i >> 8) as u8))
        .collect()
}

/// One file to store in a built image.
#[derive(Debug, Clone)]
pub(crate) struct FileSpec {
    name: String,
    data: Vec<u8>,
    fragments: Option<Vec<u32>>,
    checksums: bool,
    dropped_checksums: usize,
    flags: u32,
}

impl FileSpec {
    pub(crate) fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            fragments: None,
            checksums: true,
            dropped_checksums: 0,
            flags: 0,
        }
    }

    /// Split the data over block entries of these sizes. Sizes summing to
    /// less than the data leave the file incomplete.
    pub(crate) fn fragments(mut self, sizes: &[u32]) -> Self {
        self.fragments = Some(sizes.to_vec());
        self
    }

    pub(crate) fn no_checksums(mut self) -> Self {
        self.checksums = false;
        self
    }

    /// Store a checksum run missing the last `count` chunks.
    pub(crate) fn dropped_checksums(mut self, count: usize) -> Self {
        self.dropped_checksums = count;
        self
    }

    pub(crate) fn encrypted(mut self) -> Self {
        self.flags |= FLAG_ENCRYPTED;
        self
    }

    pub(crate) fn flags(mut self, flags: u32) -> Self {
        self.flags |= flags;
        self
    }

    fn entry_sizes(&self) -> Vec<u32> {
        match &self.fragments {
            Some(sizes) => sizes.clone(),
            None if self.data.is_empty() => Vec::new(),
            None => vec![self.data.len() as u32],
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    File(FileSpec),
    Folder { name: String, children: Vec<Node> },
}

/// Children of one folder under construction.
#[derive(Debug, Default)]
pub(crate) struct FolderBuilder {
    children: Vec<Node>,
}

impl FolderBuilder {
    pub(crate) fn file(&mut self, name: impl Into<String>, data: Vec<u8>) -> &mut Self {
        self.file_with(FileSpec::new(name, data))
    }

    pub(crate) fn file_with(&mut self, spec: FileSpec) -> &mut Self {
        self.children.push(Node::File(spec));
        self
    }

    pub(crate) fn folder(
        &mut self,
        name: impl Into<String>,
        build: impl FnOnce(&mut FolderBuilder),
    ) -> &mut Self {
        let mut folder = Self::default();
        build(&mut folder);
        self.children.push(Node::Folder {
            name: name.into(),
            children: folder.children,
        });
        self
    }
}

/// Flattened directory entry.
struct Item<'a> {
    name: &'a str,
    parent: u32,
    file: Option<&'a FileSpec>,
    children: Vec<u32>,
}

/// Block entry placed in the image.
struct Placed {
    item: u32,
    offset: u32,
    size: u32,
    first_logical: u32,
    next: Option<u32>,
    previous: Option<u32>,
}

/// Builds a GCF image: directory entries in breadth-first order, block
/// entries in file order and data blocks allocated in that same order.
#[derive(Debug)]
pub(crate) struct GcfBuilder {
    minor: u32,
    block_size: u32,
    root: FolderBuilder,
    reverse: bool,
    spare: u32,
    offset: u32,
    terminator: u32,
}

impl GcfBuilder {
    pub(crate) fn new(minor: u32, block_size: u32) -> Self {
        Self {
            minor,
            block_size,
            root: FolderBuilder::default(),
            reverse: false,
            spare: 0,
            offset: 0,
            terminator: 1,
        }
    }

    pub(crate) fn file(mut self, name: impl Into<String>, data: Vec<u8>) -> Self {
        self.root.file(name, data);
        self
    }

    pub(crate) fn file_with(mut self, spec: FileSpec) -> Self {
        self.root.file_with(spec);
        self
    }

    pub(crate) fn folder(
        mut self,
        name: impl Into<String>,
        build: impl FnOnce(&mut FolderBuilder),
    ) -> Self {
        self.root.folder(name, build);
        self
    }

    /// Store the used data blocks in reverse order, fragmenting every file
    /// with more than one block.
    pub(crate) fn reverse_blocks(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Free blocks after the used ones.
    pub(crate) fn spare_blocks(mut self, count: u32) -> Self {
        self.spare = count;
        self
    }

    /// Free blocks before the used ones.
    pub(crate) fn offset_blocks(mut self, count: u32) -> Self {
        self.offset = count;
        self
    }

    /// Fragmentation map terminator selector (0 or 1).
    pub(crate) fn terminator(mut self, terminator: u32) -> Self {
        self.terminator = terminator;
        self
    }

    fn items(&self) -> Vec<Item<'_>> {
        let mut items = vec![Item {
            name: "",
            parent: 0xFFFF_FFFF,
            file: None,
            children: Vec::new(),
        }];
        let mut queue = VecDeque::from([(0usize, &self.root.children)]);
        while let Some((index, children)) = queue.pop_front() {
            for child in children {
                let child_index = items.len();
                items[index].children.push(child_index as u32);
                match child {
                    Node::File(spec) => items.push(Item {
                        name: &spec.name,
                        parent: index as u32,
                        file: Some(spec),
                        children: Vec::new(),
                    }),
                    Node::Folder { name, children } => {
                        items.push(Item {
                            name,
                            parent: index as u32,
                            file: None,
                            children: Vec::new(),
                        });
                        queue.push_back((child_index, children));
                    }
                }
            }
        }
        items
    }

    fn place(&self, items: &[Item<'_>]) -> (Vec<Placed>, u32) {
        let mut placed: Vec<Placed> = Vec::new();
        let mut used = 0u32;
        for (index, item) in items.iter().enumerate() {
            let Some(spec) = item.file else { continue };
            let mut offset = 0u32;
            let mut previous = None;
            for size in spec.entry_sizes() {
                let entry = placed.len() as u32;
                if let Some(previous) = previous {
                    placed[previous as usize].next = Some(entry);
                }
                placed.push(Placed {
                    item: index as u32,
                    offset,
                    size,
                    first_logical: used,
                    next: None,
                    previous,
                });
                used += size.div_ceil(self.block_size);
                offset += size;
                previous = Some(entry);
            }
        }
        (placed, used)
    }

    fn block_count(&self, used: u32) -> u32 {
        self.offset + used + self.spare
    }

    fn physical(&self, logical: u32, used: u32) -> u32 {
        self.offset + if self.reverse { used - 1 - logical } else { logical }
    }

    /// Offset of the fragmentation map in built images.
    pub(crate) fn fragmentation_map_offset(&self) -> usize {
        let (_, used) = self.place(&self.items());
        GcfHeader::SIZE
            + BlockEntryHeader::SIZE
            + self.block_count(used) as usize * BlockEntry::SIZE
            + FragmentationMapHeader::SIZE
    }

    #[allow(clippy::expect_used)]
    pub(crate) fn build(&self) -> Vec<u8> {
        let items = self.items();
        let (placed, used) = self.place(&items);
        let block_count = self.block_count(used);
        let terminator = FragmentationMapHeader {
            terminator: self.terminator,
            ..Default::default()
        }
        .terminator_value();

        // Block entries and the fragmentation map.
        let mut block_entries = vec![BlockEntry::default(); block_count as usize];
        let mut fragmentation_map = vec![block_count; block_count as usize];
        for (index, entry) in placed.iter().enumerate() {
            let blocks = entry.size.div_ceil(self.block_size);
            for step in 0..blocks {
                let here = self.physical(entry.first_logical + step, used);
                fragmentation_map[here as usize] = if step + 1 < blocks {
                    self.physical(entry.first_logical + step + 1, used)
                } else {
                    terminator
                };
            }
            block_entries[index] = BlockEntry {
                entry_flags: BLOCK_ENTRY_IN_USE,
                file_data_offset: entry.offset,
                file_data_size: entry.size,
                first_data_block_index: self.physical(entry.first_logical, used),
                next_block_entry_index: entry.next.unwrap_or(block_count),
                previous_block_entry_index: entry.previous.unwrap_or(block_count),
                directory_index: entry.item,
            };
        }

        // Names, directory entries, directory map and checksums.
        let mut names = Vec::new();
        let mut directory = Vec::with_capacity(items.len());
        let mut directory_map = vec![block_count; items.len()];
        let mut checksum_map = Vec::new();
        let mut checksums = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let name_offset = names.len() as u32;
            names.extend_from_slice(item.name.as_bytes());
            names.push(0);

            let next_index = items
                .get(item.parent as usize)
                .and_then(|parent| {
                    let position = parent.children.iter().position(|&c| c == index as u32)?;
                    parent.children.get(position + 1).copied()
                })
                .unwrap_or(0);
            let first_index = item.children.first().copied().unwrap_or(0);

            let (item_size, checksum_index, directory_flags) = match item.file {
                Some(spec) => {
                    let checksum_index = if spec.checksums {
                        checksum_map.len() as u32
                    } else {
                        NO_CHECKSUM
                    };
                    let first = checksums.len() as u32;
                    if spec.checksums {
                        let run: Vec<u32> =
                            spec.data.chunks(CHECKSUM_CHUNK_SIZE).map(chunk_checksum).collect();
                        let kept = run.len().saturating_sub(spec.dropped_checksums);
                        checksums.extend_from_slice(&run[..kept]);
                    }
                    checksum_map.push(ChecksumMapEntry {
                        checksum_count: checksums.len() as u32 - first,
                        first_checksum_index: first,
                    });
                    (spec.data.len() as u32, checksum_index, FLAG_FILE | spec.flags)
                }
                None => (item.children.len() as u32, 0, 0),
            };
            directory.push(DirectoryEntry {
                name_offset,
                item_size,
                checksum_index,
                directory_flags,
                parent_index: item.parent,
                next_index,
                first_index,
            });

            if let Some(first) = placed.iter().position(|p| p.item == index as u32) {
                directory_map[index] = first as u32;
            }
        }

        let mut out = Cursor::new(Vec::new());

        let file_count = items.iter().filter(|i| i.file.is_some()).count() as u32;
        let directory_size = DirectoryHeader::SIZE
            + directory.len() * DirectoryEntry::SIZE
            + names.len()
            + items.len() * 4;
        let checksum_size = ChecksumMapHeader::SIZE
            + checksum_map.len() * ChecksumMapEntry::SIZE
            + checksums.len() * 4
            + SIGNATURE_SIZE;
        let mut header_size = GcfHeader::SIZE
            + BlockEntryHeader::SIZE
            + block_entries.len() * BlockEntry::SIZE
            + FragmentationMapHeader::SIZE
            + fragmentation_map.len() * 4
            + directory_size
            + directory_map.len() * 4
            + ChecksumHeader::SIZE
            + checksum_size;
        if self.minor < 6 {
            header_size += BlockEntryMapHeader::SIZE + block_entries.len() * BlockEntryMap::SIZE;
        }
        if self.minor >= 5 {
            header_size += DirectoryMapHeader::SIZE + DataBlockHeader::SIZE;
        } else {
            header_size += DataBlockHeader::LEGACY_SIZE;
        }
        let file_size = header_size + block_count as usize * self.block_size as usize;

        let cache_id = 70;
        let last_version_played = 12;
        put(&mut out, &GcfHeader {
            dummy0: 1,
            major_version: 1,
            minor_version: self.minor,
            cache_id,
            last_version_played,
            dummy1: 0,
            dummy2: 0,
            file_size: file_size as u32,
            block_size: self.block_size,
            block_count,
            dummy3: 0,
        });

        let entries_used = placed.len() as u32;
        put(&mut out, &BlockEntryHeader {
            block_count,
            blocks_used: entries_used,
            checksum: block_count.wrapping_add(entries_used),
            ..Default::default()
        });
        put(&mut out, &block_entries);

        let first_unused = if self.offset > 0 { 0 } else { used };
        let mut fragmentation_header = FragmentationMapHeader {
            block_count,
            first_unused_entry: first_unused.min(block_count),
            terminator: self.terminator,
            checksum: 0,
        };
        fragmentation_header.checksum = fragmentation_header.computed_checksum();
        put(&mut out, &fragmentation_header);
        put(&mut out, &fragmentation_map);

        if self.minor < 6 {
            put(&mut out, &BlockEntryMapHeader {
                block_count,
                first_block_entry_index: 0,
                last_block_entry_index: entries_used.saturating_sub(1),
                dummy0: 0,
                checksum: block_count.wrapping_add(entries_used.saturating_sub(1)),
            });
            let map: Vec<BlockEntryMap> = (0..block_count)
                .map(|i| BlockEntryMap {
                    previous_block_entry_index: if i == 0 { block_count } else { i - 1 },
                    next_block_entry_index: if i + 1 == block_count { block_count } else { i + 1 },
                })
                .collect();
            put(&mut out, &map);
        }

        put(&mut out, &DirectoryHeader {
            dummy0: 4,
            cache_id,
            last_version_played,
            item_count: items.len() as u32,
            file_count,
            checksum_data_length: 0,
            directory_size: directory_size as u32,
            name_size: names.len() as u32,
            info1_count: 0,
            copy_count: 0,
            local_count: 0,
            dummy2: 0,
            dummy3: 0,
            checksum: 0,
        });
        put(&mut out, &directory);
        put(&mut out, &names);
        put(&mut out, &vec![0u32; items.len()]);

        if self.minor >= 5 {
            put(&mut out, &DirectoryMapHeader {
                dummy0: 1,
                dummy1: 0,
            });
        }
        put(&mut out, &directory_map);

        put(&mut out, &ChecksumHeader {
            dummy0: 1,
            checksum_size: checksum_size as u32,
        });
        put(&mut out, &ChecksumMapHeader {
            dummy0: ChecksumMapHeader::TAG,
            dummy1: 1,
            item_count: checksum_map.len() as u32,
            checksum_count: checksums.len() as u32,
        });
        put(&mut out, &checksum_map);
        put(&mut out, &checksums);
        put(&mut out, &vec![0u8; SIGNATURE_SIZE]);

        let blocks_used = used;
        let header_checksum = block_count
            .wrapping_add(self.block_size)
            .wrapping_add(header_size as u32)
            .wrapping_add(blocks_used);
        if self.minor >= 5 {
            put(&mut out, &DataBlockHeader {
                last_version_played,
                block_count,
                block_size: self.block_size,
                first_block_offset: header_size as u32,
                blocks_used,
                checksum: header_checksum,
            });
        } else {
            put(&mut out, &[
                block_count,
                self.block_size,
                header_size as u32,
                blocks_used,
                header_checksum,
            ]);
        }

        let mut image = out.into_inner();
        assert_eq!(image.len(), header_size, "header size bookkeeping");
        image.resize(file_size, 0);

        for entry in &placed {
            let spec = items[entry.item as usize].file.expect("placed entries are files");
            let start = entry.offset as usize;
            let end = (start + entry.size as usize).min(spec.data.len());
            let data = spec.data.get(start..end).unwrap_or_default();
            for (step, chunk) in data.chunks(self.block_size as usize).enumerate() {
                let block = self.physical(entry.first_logical + step as u32, used);
                let at = header_size + block as usize * self.block_size as usize;
                image[at..at + chunk.len()].copy_from_slice(chunk);
            }
        }
        image
    }
}
