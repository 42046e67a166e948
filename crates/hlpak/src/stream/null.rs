//! Always-empty stream

use super::{Stream, StreamKind, ensure_open};
use crate::{FileMode, Result};
use std::io::SeekFrom;

/// A stream with no content.
///
/// Reads return 0 bytes and writes accept nothing. Used for zero-length
/// package items, which have no backing storage to stream from.
#[derive(Debug, Default)]
pub struct NullStream {
    name: String,
    mode: Option<FileMode>,
}

impl NullStream {
    /// Create a closed null stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a closed null stream with a display name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: None,
        }
    }
}

impl Stream for NullStream {
    fn kind(&self) -> StreamKind {
        StreamKind::Null
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
        self.mode = Some(mode);
        Ok(())
    }

    fn close(&mut self) {
        self.mode = None;
    }

    fn size(&self) -> u64 {
        0
    }

    fn pointer(&self) -> u64 {
        0
    }

    fn seek(&mut self, _pos: SeekFrom) -> Result<u64> {
        ensure_open(self.is_open())?;
        Ok(0)
    }

    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        Ok(0)
    }

    fn write(&mut self, _data: &[u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        Ok(0)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_null_stream() {
        let mut stream = NullStream::named("empty.txt");
        assert!(stream.read(&mut [0u8; 4]).is_err());

        stream.open(FileMode::READ_WRITE).expect("open");
        assert_eq!(stream.name(), "empty.txt");
        assert_eq!(stream.read(&mut [0u8; 4]).expect("read"), 0);
        assert_eq!(stream.write(b"data").expect("write"), 0);
        assert_eq!(stream.seek(SeekFrom::End(10)).expect("seek"), 0);
        assert_eq!(stream.size(), 0);
    }
}
