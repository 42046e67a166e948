//! In-place defragmentation of GCF data blocks
//!
//! Files are visited in directory order and every data block is moved to
//! the next free physical slot (`target`), so each file ends up contiguous
//! and files follow each other. A block already at `target` stays put.
//! Otherwise the slot is either claimed by a block not yet visited, and the
//! two blocks are swapped, or it is free, and the block is moved into it.
//!
//! Data is written (and committed) before any link is changed, so an I/O
//! failure leaves links that still describe the bytes on disk, apart from a
//! possibly half-written swap. On failure the free list is rebuilt from a
//! full re-scan and the error is reported as [`PackageError::Corrupted`].

use super::archive::Archive;
use crate::mapping::{Mapping, View};
use crate::package::DefragmentReport;
use crate::{PackageError, Result};
use tracing::{debug, info, warn};

/// A reference to a data block: the head of a block entry's chain, or the
/// fragmentation map slot of the preceding block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    First(u32),
    Next(u32),
}

impl Archive {
    fn link(&self, link: Link) -> u32 {
        match link {
            Link::First(entry) => self.block_entries[entry as usize].first_data_block_index,
            Link::Next(block) => self.fragmentation_map[block as usize],
        }
    }

    fn set_link(&mut self, link: Link, value: u32) {
        match link {
            Link::First(entry) => {
                self.block_entries[entry as usize].first_data_block_index = value;
            }
            Link::Next(block) => self.fragmentation_map[block as usize] = value,
        }
    }

    /// The link pointing at physical block `target` in the chains of `files`.
    fn find_link_to(&self, target: u32, files: &[u32]) -> Option<Link> {
        for &file in files {
            for entry in self.block_entry_chain(file) {
                let blocks = self.data_blocks(&self.block_entries[entry as usize]);
                if blocks.first() == Some(&target) {
                    return Some(Link::First(entry));
                }
                if let Some(pair) = blocks.windows(2).find(|pair| pair[1] == target) {
                    return Some(Link::Next(pair[0]));
                }
            }
        }
        None
    }

    /// Mark every block referenced by a file; reset the rest to free.
    fn rebuild_free_list(&mut self, files: &[u32]) {
        let mut used = vec![false; self.fragmentation_map.len()];
        for &file in files {
            for entry in self.block_entry_chain(file) {
                for block in self.data_blocks(&self.block_entries[entry as usize]) {
                    used[block as usize] = true;
                }
            }
        }

        let free = self.block_count();
        let mut first_unused = None;
        for (index, used) in used.into_iter().enumerate() {
            if !used {
                self.fragmentation_map[index] = free;
                first_unused.get_or_insert(index as u32);
            }
        }
        self.set_first_unused(first_unused.unwrap_or(free));
    }

    /// Mark every slot from `target` on as free.
    fn free_from(&mut self, target: u32) {
        let free = self.block_count();
        for next in self.fragmentation_map.iter_mut().skip(target as usize) {
            *next = free;
        }
        self.set_first_unused(target);
    }

    fn set_first_unused(&mut self, first_unused: u32) {
        self.fragmentation_header.first_unused_entry = first_unused;
        self.fragmentation_header.checksum = self.fragmentation_header.computed_checksum();
    }
}

fn block_view(archive: &Archive, mapping: &mut Mapping, index: u32) -> Result<View> {
    let offset = archive.block_offset(index);
    let length = u64::from(archive.block_size()).min(mapping.size().saturating_sub(offset));
    mapping.map(None, offset, length as usize)
}

/// Run `f` over the views of blocks `a` and `b`, unmapping both afterwards.
fn with_block_pair(
    archive: &Archive,
    mapping: &mut Mapping,
    a: u32,
    b: u32,
    f: impl FnOnce(&mut Mapping, &mut View, &mut View) -> Result<()>,
) -> Result<()> {
    let mut first = block_view(archive, mapping, a)?;
    let mut second = match block_view(archive, mapping, b) {
        Ok(view) => view,
        Err(e) => {
            mapping.unmap(first)?;
            return Err(e);
        }
    };
    let result = f(mapping, &mut first, &mut second);
    mapping.unmap(first)?;
    mapping.unmap(second)?;
    result
}

fn swap_blocks(archive: &Archive, mapping: &mut Mapping, a: u32, b: u32) -> Result<()> {
    with_block_pair(archive, mapping, a, b, |mapping, first, second| {
        let a_bytes = mapping.data(first)?.to_vec();
        let b_bytes = mapping.data(second)?.to_vec();
        let shared = a_bytes.len().min(b_bytes.len());
        mapping.data_mut(first)?[..shared].copy_from_slice(&b_bytes[..shared]);
        mapping.data_mut(second)?[..shared].copy_from_slice(&a_bytes[..shared]);
        mapping.commit_all(first)?;
        mapping.commit_all(second)
    })
}

fn move_block(archive: &Archive, mapping: &mut Mapping, from: u32, to: u32) -> Result<()> {
    with_block_pair(archive, mapping, from, to, |mapping, source, destination| {
        let bytes = mapping.data(source)?.to_vec();
        let shared = bytes.len().min(destination.length());
        mapping.data_mut(destination)?[..shared].copy_from_slice(&bytes[..shared]);
        mapping.commit_all(destination)
    })
}

/// Place every file block at consecutive slots; returns the first slot
/// after the last placed block.
fn place_blocks(
    archive: &mut Archive,
    mapping: &mut Mapping,
    files: &[u32],
    report: &mut DefragmentReport,
) -> Result<u32> {
    let block_count = archive.block_count();
    let mut target = 0u32;

    for (position, &file) in files.iter().enumerate() {
        for entry in archive.block_entry_chain(file) {
            let wanted = archive.blocks_for(archive.block_entries[entry as usize].file_data_size);
            let mut link = Link::First(entry);

            for _ in 0..wanted {
                let block = archive.link(link);
                if !archive.is_block(block) {
                    break;
                }
                if target >= block_count
                    || target as usize >= archive.fragmentation_map.len()
                {
                    return Err(PackageError::InvalidFormat(
                        "more blocks in use than the archive holds".to_string(),
                    ));
                }

                if block != target {
                    let block_next = archive.fragmentation_map[block as usize];
                    match archive.find_link_to(target, &files[position..]) {
                        Some(claim) => {
                            swap_blocks(archive, mapping, block, target)?;
                            let target_next = archive.fragmentation_map[target as usize];
                            archive.fragmentation_map[target as usize] =
                                if block_next == target { block } else { block_next };
                            archive.fragmentation_map[block as usize] =
                                if target_next == block { target } else { target_next };
                            if claim != Link::Next(block) {
                                archive.set_link(claim, block);
                            }
                        }
                        None => {
                            move_block(archive, mapping, block, target)?;
                            archive.fragmentation_map[target as usize] = block_next;
                            archive.fragmentation_map[block as usize] = block_count;
                        }
                    }
                    archive.set_link(link, target);
                    report.blocks_moved += 1;
                }

                link = Link::Next(target);
                target += 1;
            }
        }
    }
    Ok(target)
}

/// Defragment `archive` in place.
pub(crate) fn defragment(
    archive: &mut Archive,
    mapping: &mut Mapping,
    force: bool,
) -> Result<DefragmentReport> {
    let files: Vec<u32> = archive.files().collect();

    let mut report = DefragmentReport::default();
    for &file in &files {
        let fragmentation = archive.file_fragmentation(file);
        report.blocks_used += fragmentation.used;
        report.blocks_fragmented += fragmentation.fragmented;
        if fragmentation.fragmented > 0 {
            report.files_fragmented += 1;
        }
    }

    if report.blocks_used == 0 || (report.blocks_fragmented == 0 && !force) {
        debug!(
            "defragmentation skipped ({} blocks used, {} fragmented)",
            report.blocks_used, report.blocks_fragmented
        );
        report.skipped = true;
        return Ok(report);
    }

    let placed = place_blocks(archive, mapping, &files, &mut report);
    archive.generation += 1;

    match placed {
        Ok(target) => {
            archive.free_from(target);
            archive.commit_chains(mapping)?;
            info!(
                "defragmented {} of {} blocks in {} files ({} moved)",
                report.blocks_fragmented, report.blocks_used, report.files_fragmented,
                report.blocks_moved
            );
            Ok(report)
        }
        Err(e) => {
            warn!(
                "defragmentation aborted after {} moves: {}",
                report.blocks_moved, e
            );
            archive.rebuild_free_list(&files);
            let saved = archive.commit_chains(mapping);
            Err(PackageError::Corrupted(match saved {
                Ok(()) => format!("defragmentation aborted: {e}"),
                Err(commit) => format!(
                    "defragmentation aborted: {e}; header update failed: {commit}"
                ),
            }))
        }
    }
}
