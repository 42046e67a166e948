//! Stream over a window of a mapping

use super::{Stream, StreamKind, ensure_open, ensure_readable, ensure_writable, resolve_seek};
use crate::mapping::{SharedMapping, View};
use crate::{FileMode, PackageError, Result};
use std::io::SeekFrom;

/// Stream over `[offset, offset + size)` of a shared mapping.
///
/// Bytes are accessed through one sliding view of at most `view_size`
/// bytes, aligned to `view_size` within the window, so contiguous items can
/// be streamed without materializing them whole.
#[derive(Debug)]
pub struct MappingStream {
    name: String,
    mapping: SharedMapping,
    offset: u64,
    size: u64,
    view_size: usize,
    view: Option<View>,
    pointer: u64,
    mode: Option<FileMode>,
}

impl MappingStream {
    /// Create a closed stream over a window of `mapping`.
    pub fn new(mapping: SharedMapping, offset: u64, size: u64, view_size: usize) -> Self {
        Self {
            name: String::new(),
            mapping,
            offset,
            size,
            view_size: view_size.max(1),
            view: None,
            pointer: 0,
            mode: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Ensure the current view covers the pointer; returns the offset of the
    /// pointer inside the view and the bytes available from there.
    fn map_pointer(&mut self) -> Result<(usize, usize)> {
        let window_start = self.pointer / self.view_size as u64 * self.view_size as u64;
        let absolute = self.offset + window_start;

        let covered = self
            .view
            .as_ref()
            .is_some_and(|v| v.offset() == absolute);
        if !covered {
            let length = (self.size - window_start).min(self.view_size as u64) as usize;
            let mut mapping = self.mapping.borrow_mut();
            let view = mapping.map(self.view.take(), absolute, length)?;
            self.view = Some(view);
        }

        let within = (self.pointer - window_start) as usize;
        let length = self.view.as_ref().map_or(0, View::length);
        Ok((within, length - within))
    }
}

impl Stream for MappingStream {
    fn kind(&self) -> StreamKind {
        StreamKind::Mapping
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
        if mode.create {
            return Err(PackageError::InvalidMode(
                "mapping streams cannot be created".to_string(),
            ));
        }

        let mapping = self.mapping.borrow();
        if !mapping.is_open() {
            return Err(PackageError::NotOpen("mapping"));
        }
        if mode.write && !mapping.is_writable() {
            return Err(PackageError::InvalidMode(
                "mapping not opened for writing".to_string(),
            ));
        }
        let end = self.offset.checked_add(self.size);
        if end.is_none_or(|end| end > mapping.size()) {
            return Err(PackageError::out_of_bounds(
                self.offset,
                self.size,
                mapping.size(),
            ));
        }
        drop(mapping);

        self.pointer = 0;
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(view) = self.view.take() {
            // The mapping may already be closed, which unmapped the view.
            let _ = self.mapping.borrow_mut().unmap(view);
        }
        self.mode = None;
        self.pointer = 0;
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
            let (within, available) = self.map_pointer()?;
            let n = available.min(buf.len() - total);

            let mut mapping = self.mapping.borrow_mut();
            let view = self
                .view
                .as_mut()
                .ok_or(PackageError::NotOpen("mapping stream view"))?;
            let data = mapping.data(view)?;
            buf[total..total + n].copy_from_slice(&data[within..within + n]);

            total += n;
            self.pointer += n as u64;
        }
        Ok(total)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        ensure_writable(self.mode())?;

        let mut total = 0;
        while total < data.len() && self.pointer < self.size {
            let (within, available) = self.map_pointer()?;
            let n = available.min(data.len() - total);

            let mut mapping = self.mapping.borrow_mut();
            let view = self
                .view
                .as_mut()
                .ok_or(PackageError::NotOpen("mapping stream view"))?;
            mapping.data_mut(view)?[within..within + n].copy_from_slice(&data[total..total + n]);
            mapping.commit(view, within, n)?;

            total += n;
            self.pointer += n as u64;
        }
        Ok(total)
    }
}

impl Drop for MappingStream {
    fn drop(&mut self) {
        self.close();
    }
}
