//! Stream over an owned, fixed-capacity buffer

use super::{Stream, StreamKind, ensure_open, ensure_readable, ensure_writable, resolve_seek};
use crate::{FileMode, Result};
use std::io::SeekFrom;

/// Stream over an owned buffer.
///
/// The buffer's capacity is fixed at construction: writes past the end are
/// truncated and the stream's size grows only up to the buffer length.
/// Opening with `FileMode::CREATE` resets the size to zero.
#[derive(Debug)]
pub struct MemoryStream {
    name: String,
    buffer: Vec<u8>,
    /// Bytes of `buffer` that hold valid content.
    length: usize,
    pointer: usize,
    mode: Option<FileMode>,
}

impl MemoryStream {
    /// Create a closed stream whose content is `buffer`.
    pub fn new(buffer: Vec<u8>) -> Self {
        let length = buffer.len();
        Self {
            name: String::new(),
            buffer,
            length,
            pointer: 0,
            mode: None,
        }
    }

    /// Create a closed, empty stream that can hold up to `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            length: 0,
            ..Self::new(vec![0u8; capacity])
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Valid content of the stream.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    /// Consume the stream, returning its valid content.
    pub fn into_inner(mut self) -> Vec<u8> {
        self.buffer.truncate(self.length);
        self.buffer
    }
}

impl Stream for MemoryStream {
    fn kind(&self) -> StreamKind {
        StreamKind::Memory
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
            self.length = 0;
        }
        self.pointer = 0;
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        self.mode = None;
        self.pointer = 0;
    }

    fn size(&self) -> u64 {
        self.length as u64
    }

    fn pointer(&self) -> u64 {
        self.pointer as u64
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        ensure_open(self.is_open())?;
        let target = resolve_seek(self.pointer(), self.size(), pos);
        self.pointer = target as usize;
        Ok(target)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        ensure_readable(self.mode())?;
        let available = self.length - self.pointer;
        let n = buf.len().min(available);
        buf[..n].copy_from_slice(&self.buffer[self.pointer..self.pointer + n]);
        self.pointer += n;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        ensure_writable(self.mode())?;
        let available = self.buffer.len() - self.pointer;
        let n = data.len().min(available);
        self.buffer[self.pointer..self.pointer + n].copy_from_slice(&data[..n]);
        self.pointer += n;
        self.length = self.length.max(self.pointer);
        Ok(n)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_seek() {
        let mut stream = MemoryStream::new(b"0123456789".to_vec());
        stream.open(FileMode::READ).expect("open");

        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).expect("read"), 4);
        assert_eq!(&buf, b"0123");

        stream.seek(SeekFrom::End(-2)).expect("seek");
        assert_eq!(stream.read(&mut buf).expect("read"), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(stream.read(&mut buf).expect("read"), 0);
    }

    #[test]
    fn test_write_truncated_at_capacity() {
        let mut stream = MemoryStream::with_capacity(6);
        stream
            .open(FileMode::WRITE | FileMode::CREATE)
            .expect("open");
        assert_eq!(stream.size(), 0);
        assert_eq!(stream.write(b"abcdefgh").expect("write"), 6);
        assert_eq!(stream.size(), 6);
        assert_eq!(stream.write(b"x").expect("write"), 0);
        assert_eq!(stream.into_inner(), b"abcdef");
    }

    #[test]
    fn test_mode_enforced() {
        let mut stream = MemoryStream::new(vec![0u8; 4]);
        stream.open(FileMode::READ).expect("open");
        assert!(stream.write(b"x").is_err());

        stream.close();
        assert!(stream.read(&mut [0u8; 1]).is_err());
    }
}
