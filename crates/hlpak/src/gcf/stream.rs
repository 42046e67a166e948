//! Stream over a file stored in GCF block chains

use super::archive::Archive;
use crate::mapping::{SharedMapping, View};
use crate::stream::{Stream, StreamKind, ensure_open, ensure_readable, resolve_seek};
use crate::{FileMode, PackageError, Result};
use std::cell::RefCell;
use std::io::SeekFrom;
use std::rc::Rc;
use tracing::{trace, warn};

/// Resolved position of the data block the stream last read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    block_entry_index: u32,
    /// File offset where the block entry starts
    block_entry_offset: u64,
    data_block_index: u32,
    /// File offset where the data block starts
    data_block_offset: u64,
}

/// A physical data block span and where the pointer lies in it.
#[derive(Debug, Clone, Copy)]
struct Span {
    block: u32,
    mapping_offset: u64,
    length: usize,
    within: usize,
}

/// Read-only stream over one file of a GCF archive.
///
/// The position in the block chains is cached. Reading forward continues
/// from the cached block; seeking backwards restarts from the file's first
/// block entry since the chains only link forwards.
#[derive(Debug)]
pub struct GcfStream {
    name: String,
    mapping: SharedMapping,
    archive: Rc<RefCell<Archive>>,
    item: u32,
    size: u64,
    mode: Option<FileMode>,
    pointer: u64,
    cursor: Option<Cursor>,
    generation: u64,
    view: Option<(u32, View)>,
}

impl GcfStream {
    pub(crate) fn new(
        name: String,
        mapping: SharedMapping,
        archive: Rc<RefCell<Archive>>,
        item: u32,
        size: u64,
    ) -> Self {
        Self {
            name,
            mapping,
            archive,
            item,
            size,
            mode: None,
            pointer: 0,
            cursor: None,
            generation: 0,
            view: None,
        }
    }

    fn release_view(&mut self) {
        if let Some((_, view)) = self.view.take() {
            // Already gone if the mapping was closed.
            let _ = self.mapping.borrow_mut().unmap(view);
        }
    }

    fn first_cursor(&self, archive: &Archive) -> Cursor {
        let first = archive
            .directory_map
            .get(self.item as usize)
            .copied()
            .unwrap_or_else(|| archive.block_count());
        let data_block_index = archive
            .block_entries
            .get(first as usize)
            .map_or(archive.terminator(), |e| e.first_data_block_index);
        Cursor {
            block_entry_index: first,
            block_entry_offset: 0,
            data_block_index,
            data_block_offset: 0,
        }
    }

    fn chain_end(&self) -> PackageError {
        warn!(
            "{}: block chain ends at {} of {} bytes",
            self.name, self.pointer, self.size
        );
        PackageError::UnexpectedEnd {
            read: self.pointer,
            expected: self.size,
        }
    }

    /// Walk the chains up to the data block holding the pointer.
    fn locate(&mut self) -> Result<Span> {
        let archive = Rc::clone(&self.archive);
        let archive = archive.borrow();

        if archive.generation != self.generation {
            trace!("{}: block chains rewritten, restarting", self.name);
            self.generation = archive.generation;
            self.cursor = None;
            self.release_view();
        }

        let mut cursor = match self.cursor {
            Some(cursor) if cursor.data_block_offset <= self.pointer => cursor,
            _ => self.first_cursor(&archive),
        };
        let block_size = u64::from(archive.block_size());
        let mut steps = 0usize;

        loop {
            let entry = archive
                .block_entries
                .get(cursor.block_entry_index as usize)
                .filter(|_| cursor.block_entry_index != archive.block_count())
                .ok_or_else(|| self.chain_end())?;
            let entry_end = cursor.block_entry_offset + u64::from(entry.file_data_size);

            if self.pointer >= entry_end {
                steps += 1;
                if steps > archive.block_entries.len() {
                    return Err(PackageError::InvalidFormat(format!(
                        "{}: cycle in block entry chain",
                        self.name
                    )));
                }
                let next = entry.next_block_entry_index;
                cursor = Cursor {
                    block_entry_index: next,
                    block_entry_offset: entry_end,
                    data_block_index: archive
                        .block_entries
                        .get(next as usize)
                        .map_or(archive.terminator(), |e| e.first_data_block_index),
                    data_block_offset: entry_end,
                };
                continue;
            }

            while self.pointer >= cursor.data_block_offset + block_size {
                if !archive.is_block(cursor.data_block_index) {
                    return Err(self.chain_end());
                }
                cursor.data_block_index =
                    archive.fragmentation_map[cursor.data_block_index as usize];
                cursor.data_block_offset += block_size;
            }
            if !archive.is_block(cursor.data_block_index) {
                return Err(self.chain_end());
            }

            let length = block_size.min(entry_end - cursor.data_block_offset);
            self.cursor = Some(cursor);
            return Ok(Span {
                block: cursor.data_block_index,
                mapping_offset: archive.block_offset(cursor.data_block_index),
                length: length as usize,
                within: (self.pointer - cursor.data_block_offset) as usize,
            });
        }
    }
}

impl Stream for GcfStream {
    fn kind(&self) -> StreamKind {
        StreamKind::Gcf
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    fn mode(&self) -> FileMode {
        self.mode.unwrap_or(FileMode::NONE)
    }

    fn open(&mut self, mode: FileMode) -> Result<()> {
        self.close();
        mode.validate()?;
        if mode.write || mode.create {
            return Err(PackageError::InvalidMode(
                "cache file items are read-only".to_string(),
            ));
        }
        if !self.mapping.borrow().is_open() {
            return Err(PackageError::NotOpen("package mapping"));
        }
        self.generation = self.archive.borrow().generation;
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        self.release_view();
        self.mode = None;
        self.pointer = 0;
        self.cursor = None;
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn pointer(&self) -> u64 {
        self.pointer
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        ensure_open(self.is_open())?;
        self.pointer = resolve_seek(self.pointer, self.size, pos);
        Ok(self.pointer)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        ensure_readable(self.mode())?;

        let mut total = 0;
        while total < buf.len() && self.pointer < self.size {
            let span = self.locate()?;

            let mut mapping = self.mapping.borrow_mut();
            let current = match self.view.take() {
                Some((block, view)) if block == span.block && view.length() == span.length => view,
                previous => mapping.map(
                    previous.map(|(_, view)| view),
                    span.mapping_offset,
                    span.length,
                )?,
            };
            let view = &mut self.view.insert((span.block, current)).1;
            let data = mapping.data(view)?;

            let available = (span.length - span.within)
                .min(buf.len() - total)
                .min((self.size - self.pointer) as usize);
            buf[total..total + available]
                .copy_from_slice(&data[span.within..span.within + available]);

            total += available;
            self.pointer += available as u64;
        }
        Ok(total)
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        Err(PackageError::InvalidMode(
            "cache file items are read-only".to_string(),
        ))
    }
}

impl Drop for GcfStream {
    fn drop(&mut self) {
        self.release_view();
    }
}
