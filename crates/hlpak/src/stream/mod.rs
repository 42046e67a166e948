//! Seekable byte streams
//!
//! A [`Stream`] is an explicitly opened, seekable channel over some byte
//! source. Streams back mappings ([`crate::mapping::StreamBackend`]), expose
//! package items to clients ([`crate::package::Package::create_stream`]) and
//! can be adapted to `std::io::Read` with [`StreamReader`].
//!
//! Variants:
//! - [`FileStream`]: an OS file
//! - [`MemoryStream`]: a fixed-capacity owned buffer
//! - [`MappingStream`]: a window of a [`crate::mapping::Mapping`]
//! - [`NullStream`]: always empty
//! - [`crate::gcf::GcfStream`]: a file inside a cache archive

mod file;
mod mapping;
mod memory;
mod null;

pub use file::FileStream;
pub use mapping::MappingStream;
pub use memory::MemoryStream;
pub use null::NullStream;

pub use std::io::SeekFrom;

use crate::{FileMode, PackageError, Result};
use std::fmt;

/// Concrete stream variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Always-empty stream
    Null,
    /// OS file
    File,
    /// Owned memory buffer
    Memory,
    /// Window onto a mapping
    Mapping,
    /// File inside a GCF cache archive
    Gcf,
}

/// A seekable, explicitly opened byte channel.
pub trait Stream: fmt::Debug {
    /// Stream variant.
    fn kind(&self) -> StreamKind;

    /// Human readable name (path, item name, ...).
    fn name(&self) -> &str;

    /// Whether the stream is open.
    fn is_open(&self) -> bool;

    /// Mode the stream was opened with (`FileMode::NONE` when closed).
    fn mode(&self) -> FileMode;

    /// Open the stream, closing any previous state first.
    fn open(&mut self, mode: FileMode) -> Result<()>;

    /// Close the stream. Closing a closed stream does nothing.
    fn close(&mut self);

    /// Current size in bytes.
    fn size(&self) -> u64;

    /// Current position in bytes.
    fn pointer(&self) -> u64;

    /// Move the position; the result is clamped to `[0, size]`.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Read up to `buf.len()` bytes; returns 0 at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write up to `data.len()` bytes; returns the number written.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Read exactly `buf.len()` bytes or fail.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(PackageError::UnexpectedEnd {
                    read: filled as u64,
                    expected: buf.len() as u64,
                });
            }
            filled += n;
        }
        Ok(())
    }

    /// Write all of `data` or fail.
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < data.len() {
            let n = self.write(&data[written..])?;
            if n == 0 {
                return Err(PackageError::out_of_bounds(
                    self.pointer(),
                    (data.len() - written) as u64,
                    self.size(),
                ));
            }
            written += n;
        }
        Ok(())
    }
}

/// Resolve a seek request against the current pointer and size.
///
/// Positions before the start clamp to 0 and past the end clamp to `size`.
pub(crate) fn resolve_seek(pointer: u64, size: u64, pos: SeekFrom) -> u64 {
    let target = match pos {
        SeekFrom::Start(offset) => i128::from(offset),
        SeekFrom::Current(delta) => i128::from(pointer) + i128::from(delta),
        SeekFrom::End(delta) => i128::from(size) + i128::from(delta),
    };
    target.clamp(0, i128::from(size)) as u64
}

pub(crate) fn ensure_open(open: bool) -> Result<()> {
    if open {
        Ok(())
    } else {
        Err(PackageError::NotOpen("stream"))
    }
}

pub(crate) fn ensure_readable(mode: FileMode) -> Result<()> {
    if mode.read {
        Ok(())
    } else {
        Err(PackageError::InvalidMode("stream not opened for reading".to_string()))
    }
}

pub(crate) fn ensure_writable(mode: FileMode) -> Result<()> {
    if mode.write {
        Ok(())
    } else {
        Err(PackageError::InvalidMode("stream not opened for writing".to_string()))
    }
}

/// `std::io::Read`/`Seek` adapter over a [`Stream`].
#[derive(Debug)]
pub struct StreamReader<'a, S: Stream + ?Sized> {
    inner: &'a mut S,
}

impl<'a, S: Stream + ?Sized> StreamReader<'a, S> {
    /// Wrap an opened stream.
    pub fn new(inner: &'a mut S) -> Self {
        Self { inner }
    }
}

impl<S: Stream + ?Sized> std::io::Read for StreamReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).map_err(std::io::Error::other)
    }
}

impl<S: Stream + ?Sized> std::io::Seek for StreamReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.inner.seek(pos).map_err(std::io::Error::other)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_resolve_seek_clamps() {
        assert_eq!(resolve_seek(5, 10, SeekFrom::Current(-20)), 0);
        assert_eq!(resolve_seek(5, 10, SeekFrom::Current(20)), 10);
        assert_eq!(resolve_seek(5, 10, SeekFrom::End(-3)), 7);
        assert_eq!(resolve_seek(5, 10, SeekFrom::Start(4)), 4);
    }

    #[test]
    fn test_stream_reader_adapter() {
        let mut stream = MemoryStream::new(b"adapter data".to_vec());
        stream.open(FileMode::READ).expect("open");
        let mut out = String::new();
        StreamReader::new(&mut stream)
            .read_to_string(&mut out)
            .expect("read");
        assert_eq!(out, "adapter data");
    }

    #[test]
    fn test_read_exact_past_end() {
        let mut stream = MemoryStream::new(vec![1, 2, 3]);
        stream.open(FileMode::READ).expect("open");
        let mut buf = [0u8; 4];
        let err = stream.read_exact(&mut buf).expect_err("short read");
        assert!(matches!(
            err,
            PackageError::UnexpectedEnd {
                read: 3,
                expected: 4
            }
        ));
    }
}
