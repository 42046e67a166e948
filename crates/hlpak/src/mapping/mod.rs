//! Mappings and views over a backing byte source
//!
//! A [`Mapping`] opens one backing source (file, memory buffer or
//! [`crate::stream::Stream`]) and hands out [`View`]s: bounded windows whose
//! bytes are read from the backing on first access and written back only by
//! an explicit [`Mapping::commit`]. Format code addresses arbitrary byte
//! ranges this way without loading the whole archive.
//!
//! A view never borrows its mapping. It carries the id of the mapping that
//! created it and every view operation goes through that mapping, which
//! rejects foreign views and views it has already unmapped (including every
//! view that was outstanding when the mapping closed).

mod file;
mod memory;
mod stream;

pub use file::FileBackend;
pub use memory::MemoryBackend;
pub use stream::StreamBackend;

use crate::stream::Stream;
use crate::{FileMode, PackageError, Result};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// A mapping shared between a package and the streams it creates.
pub type SharedMapping = Rc<RefCell<Mapping>>;

static NEXT_MAPPING_ID: AtomicU64 = AtomicU64::new(1);

/// Kind of backing source behind a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingKind {
    /// OS file
    File,
    /// Owned memory buffer
    Memory,
    /// Caller supplied stream
    Stream,
}

/// Backing-specific half of a [`Mapping`].
///
/// Implementations only move bytes; bounds checks, view bookkeeping and mode
/// checks are done by [`Mapping`] before any backend call.
pub trait MappingBackend: fmt::Debug {
    /// Backing kind.
    fn kind(&self) -> MappingKind;

    /// Open the backing and return its size in bytes.
    ///
    /// `mode` has already been validated. `overwrite` permits `create` on an
    /// existing source.
    fn open(&mut self, mode: FileMode, overwrite: bool) -> Result<u64>;

    /// Release the backing resource.
    fn close(&mut self);

    /// Fill `buf` with bytes starting at `offset`.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `offset`.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()>;
}

/// A bounded window into a mapping.
///
/// Content is materialized on first access through [`Mapping::data`] or
/// [`Mapping::data_mut`] and cached in the view until it is unmapped.
#[derive(Debug)]
pub struct View {
    mapping_id: u64,
    id: u64,
    offset: u64,
    length: usize,
    cache: Option<Vec<u8>>,
}

impl View {
    /// Offset of the window within the mapping.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length of the window in bytes.
    pub const fn length(&self) -> usize {
        self.length
    }

    /// Id of the mapping that created this view.
    pub const fn mapping_id(&self) -> u64 {
        self.mapping_id
    }

    /// Whether the content has been read from the backing yet.
    pub const fn is_materialized(&self) -> bool {
        self.cache.is_some()
    }

    /// Whether `[offset, offset + length)` of the mapping lies inside this view.
    pub const fn contains(&self, offset: u64, length: u64) -> bool {
        offset >= self.offset && offset + length <= self.offset + self.length as u64
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenState {
    mode: FileMode,
    size: u64,
}

/// An open handle onto a backing byte source producing [`View`]s.
#[derive(Debug)]
pub struct Mapping {
    id: u64,
    backend: Box<dyn MappingBackend>,
    state: Option<OpenState>,
    views: BTreeSet<u64>,
    next_view_id: u64,
}

impl Mapping {
    /// Create a closed mapping over `backend`.
    pub fn new(backend: impl MappingBackend + 'static) -> Self {
        Self {
            id: NEXT_MAPPING_ID.fetch_add(1, Ordering::Relaxed),
            backend: Box::new(backend),
            state: None,
            views: BTreeSet::new(),
            next_view_id: 1,
        }
    }

    /// Closed mapping over a host file.
    ///
    /// With `enable_mmap`, read-only opens memory-map the file.
    pub fn file(path: impl AsRef<Path>, enable_mmap: bool) -> Self {
        Self::new(FileBackend::new(path, enable_mmap))
    }

    /// Closed mapping over an owned buffer.
    pub fn memory(data: Vec<u8>) -> Self {
        Self::new(MemoryBackend::new(data))
    }

    /// Closed mapping over a stream; the mapping owns the stream.
    pub fn stream(stream: Box<dyn Stream>) -> Self {
        Self::new(StreamBackend::new(stream))
    }

    /// Wrap in a shared handle.
    pub fn into_shared(self) -> SharedMapping {
        Rc::new(RefCell::new(self))
    }

    /// Process-unique id of this mapping.
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Backing kind.
    pub fn kind(&self) -> MappingKind {
        self.backend.kind()
    }

    /// Whether the mapping is open.
    pub const fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Mode the mapping was opened with (`FileMode::NONE` when closed).
    pub fn mode(&self) -> FileMode {
        self.state.map_or(FileMode::NONE, |s| s.mode)
    }

    /// Whether commits and writes reach the backing.
    pub fn is_writable(&self) -> bool {
        self.mode().write
    }

    /// Size of the backing source (0 when closed).
    pub fn size(&self) -> u64 {
        self.state.map_or(0, |s| s.size)
    }

    /// Number of live views.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Open the backing source, closing any previous state first.
    ///
    /// Fails without leaving the mapping open when the mode is invalid or
    /// `create` targets an existing source and `overwrite` is not set.
    pub fn open(&mut self, mode: FileMode, overwrite: bool) -> Result<()> {
        self.close();
        mode.validate()?;

        let size = self.backend.open(mode, overwrite)?;
        debug!(
            "opened {:?} mapping {} ({}, {} bytes)",
            self.kind(),
            self.id,
            mode,
            size
        );
        self.state = Some(OpenState { mode, size });
        Ok(())
    }

    /// Unmap every outstanding view and release the backing source.
    pub fn close(&mut self) {
        if self.state.is_none() {
            return;
        }
        if !self.views.is_empty() {
            debug!(
                "closing mapping {} with {} outstanding views",
                self.id,
                self.views.len()
            );
        }
        self.views.clear();
        self.backend.close();
        self.state = None;
    }

    fn open_state(&self) -> Result<OpenState> {
        self.state.ok_or(PackageError::NotOpen("mapping"))
    }

    fn check_range(&self, offset: u64, length: u64) -> Result<()> {
        let size = self.open_state()?.size;
        match offset.checked_add(length) {
            Some(end) if offset < size && end <= size => Ok(()),
            _ => Err(PackageError::out_of_bounds(offset, length, size)),
        }
    }

    fn check_view(&self, view: &View) -> Result<()> {
        if view.mapping_id != self.id {
            return Err(PackageError::Ownership(format!(
                "view {} belongs to mapping {}, not {}",
                view.id, view.mapping_id, self.id
            )));
        }
        if !self.views.contains(&view.id) {
            return Err(PackageError::Ownership(format!(
                "view {} is no longer mapped",
                view.id
            )));
        }
        Ok(())
    }

    /// Map `[offset, offset + length)`.
    ///
    /// `existing`, when given, is unmapped first so callers can slide a
    /// single window across the source.
    pub fn map(&mut self, existing: Option<View>, offset: u64, length: usize) -> Result<View> {
        if let Some(view) = existing {
            self.unmap(view)?;
        }
        self.check_range(offset, length as u64)?;

        let id = self.next_view_id;
        self.next_view_id += 1;
        self.views.insert(id);
        trace!("mapping {}: view {} at {} (+{})", self.id, id, offset, length);

        Ok(View {
            mapping_id: self.id,
            id,
            offset,
            length,
            cache: None,
        })
    }

    /// Unmap `view`.
    ///
    /// Unmapping a view this mapping already released (explicitly or by
    /// closing) succeeds; a view created by another mapping is rejected.
    pub fn unmap(&mut self, view: View) -> Result<()> {
        if view.mapping_id != self.id {
            return Err(PackageError::Ownership(format!(
                "cannot unmap view {} of mapping {} from mapping {}",
                view.id, view.mapping_id, self.id
            )));
        }
        if self.views.remove(&view.id) {
            trace!("mapping {}: unmapped view {}", self.id, view.id);
        }
        Ok(())
    }

    fn materialize(&mut self, view: &mut View) -> Result<()> {
        self.check_view(view)?;
        if view.cache.is_none() {
            let mut buf = vec![0u8; view.length];
            self.backend.read_at(view.offset, &mut buf)?;
            view.cache = Some(buf);
        }
        Ok(())
    }

    /// Content of `view`, read from the backing on first access.
    pub fn data<'v>(&mut self, view: &'v mut View) -> Result<&'v [u8]> {
        self.materialize(view)?;
        Ok(view.cache.as_deref().unwrap_or_default())
    }

    /// Mutable content of `view`; changes reach the backing on commit.
    pub fn data_mut<'v>(&mut self, view: &'v mut View) -> Result<&'v mut [u8]> {
        self.materialize(view)?;
        Ok(view.cache.as_deref_mut().unwrap_or_default())
    }

    /// Write `[offset, offset + length)` of the view back to the source.
    ///
    /// A no-op success on mappings not opened for writing, and for views
    /// whose content was never materialized.
    pub fn commit(&mut self, view: &View, offset: usize, length: usize) -> Result<()> {
        self.check_view(view)?;
        let end = offset
            .checked_add(length)
            .filter(|&end| end <= view.length)
            .ok_or_else(|| {
                PackageError::out_of_bounds(offset as u64, length as u64, view.length as u64)
            })?;

        if !self.is_writable() {
            return Ok(());
        }
        let Some(cache) = view.cache.as_deref() else {
            return Ok(());
        };

        trace!(
            "mapping {}: commit view {} [{}..{})",
            self.id, view.id, offset, end
        );
        self.backend
            .write_at(view.offset + offset as u64, &cache[offset..end])
    }

    /// Commit the whole view.
    pub fn commit_all(&mut self, view: &View) -> Result<()> {
        self.commit(view, 0, view.length)
    }

    /// Read `length` bytes at `offset` without creating a view.
    pub fn read(&mut self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check_range(offset, length as u64)?;
        let mut buf = vec![0u8; length];
        self.backend.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Write `data` at `offset` without a view.
    pub fn write(&mut self, data: &[u8], offset: u64) -> Result<()> {
        self.check_range(offset, data.len() as u64)?;
        if !self.is_writable() {
            return Err(PackageError::InvalidMode(
                "mapping not opened for writing".to_string(),
            ));
        }
        self.backend.write_at(offset, data)
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn open_memory(data: Vec<u8>, mode: FileMode) -> Mapping {
        let mut mapping = Mapping::memory(data);
        mapping.open(mode, false).expect("open");
        mapping
    }

    #[test]
    fn test_map_and_read() {
        let mut mapping = open_memory((0u8..32).collect(), FileMode::READ);
        let mut view = mapping.map(None, 8, 4).expect("map");
        assert!(!view.is_materialized());
        assert_eq!(mapping.data(&mut view).expect("data"), &[8, 9, 10, 11]);
        assert!(view.is_materialized());
        assert_eq!(mapping.view_count(), 1);
    }

    #[test]
    fn test_map_replaces_existing_view() {
        let mut mapping = open_memory(vec![0u8; 16], FileMode::READ);
        let first = mapping.map(None, 0, 4).expect("map");
        let second = mapping.map(Some(first), 4, 4).expect("remap");
        assert_eq!(mapping.view_count(), 1);
        assert_eq!(second.offset(), 4);
    }

    #[test]
    fn test_commit_round_trip() {
        let mut mapping = open_memory(vec![0u8; 64], FileMode::READ_WRITE);
        let mut view = mapping.map(None, 16, 16).expect("map");
        mapping.data_mut(&mut view).expect("data")[4..8].copy_from_slice(b"gcf!");
        mapping.commit(&view, 4, 4).expect("commit");

        assert_eq!(mapping.read(20, 4).expect("read"), b"gcf!");
    }

    #[test]
    fn test_commit_read_only_is_noop() {
        let mut mapping = open_memory(vec![0u8; 8], FileMode::READ);
        let mut view = mapping.map(None, 0, 8).expect("map");
        mapping.data_mut(&mut view).expect("data")[0] = 0xFF;
        mapping.commit_all(&view).expect("commit");
        assert_eq!(mapping.read(0, 1).expect("read"), vec![0]);
    }

    #[test]
    fn test_commit_bounds() {
        let mut mapping = open_memory(vec![0u8; 8], FileMode::READ_WRITE);
        let view = mapping.map(None, 0, 4).expect("map");
        assert!(mapping.commit(&view, 2, 3).is_err());
        assert!(mapping.commit(&view, usize::MAX, 2).is_err());
    }

    #[test]
    fn test_foreign_view_rejected() {
        let mut a = open_memory(vec![0u8; 8], FileMode::READ);
        let mut b = open_memory(vec![0u8; 8], FileMode::READ);
        let mut view = a.map(None, 0, 4).expect("map");

        let err = b.data(&mut view).expect_err("foreign view");
        assert_eq!(err.kind(), crate::ErrorKind::Ownership);
        assert!(b.unmap(view).is_err());
        assert_eq!(a.view_count(), 1);
    }

    #[test]
    fn test_close_unmaps_views() {
        let mut mapping = open_memory(vec![1u8; 8], FileMode::READ);
        let mut view = mapping.map(None, 0, 8).expect("map");
        mapping.close();
        assert_eq!(mapping.view_count(), 0);

        mapping.open(FileMode::READ, false).expect("reopen");
        assert!(mapping.data(&mut view).is_err());
        // Unmapping a force-unmapped view is harmless.
        mapping.unmap(view).expect("idempotent unmap");
    }

    #[test]
    fn test_invalid_mode_leaves_mapping_closed() {
        let mut mapping = Mapping::memory(vec![0u8; 8]);
        assert!(mapping.open(FileMode::NONE, false).is_err());
        assert!(!mapping.is_open());
        assert!(mapping.map(None, 0, 1).is_err());
    }

    #[test]
    fn test_direct_write_requires_write_mode() {
        let mut mapping = open_memory(vec![0u8; 8], FileMode::READ);
        assert!(mapping.write(b"ab", 0).is_err());

        let mut mapping = open_memory(vec![0u8; 8], FileMode::READ_WRITE);
        mapping.write(b"ab", 6).expect("write");
        assert!(mapping.write(b"abc", 6).is_err());
        assert_eq!(mapping.read(6, 2).expect("read"), b"ab");
    }

    proptest! {
        #[test]
        fn view_bounds_match_predicate(size in 0usize..256, offset in 0u64..300, length in 0usize..300) {
            let mut mapping = Mapping::memory(vec![0u8; size]);
            mapping.open(FileMode::READ, false).map_err(|e| TestCaseError::fail(e.to_string()))?;

            let expected = offset < size as u64 && offset + length as u64 <= size as u64;
            let result = mapping.map(None, offset, length);
            prop_assert_eq!(result.is_ok(), expected);
            prop_assert_eq!(mapping.view_count(), usize::from(expected));
        }
    }
}
