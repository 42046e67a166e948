//! Stream-backed mapping

use super::{MappingBackend, MappingKind};
use crate::stream::{SeekFrom, Stream};
use crate::{FileMode, Result};

/// Mapping backend over a caller supplied [`Stream`].
///
/// View reads and commits seek the stream to the view's offset and transfer
/// the affected sub-range.
#[derive(Debug)]
pub struct StreamBackend {
    stream: Box<dyn Stream>,
}

impl StreamBackend {
    /// Back a mapping with `stream`. The stream is opened by the mapping.
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self { stream }
    }

    /// The wrapped stream.
    pub fn stream(&self) -> &dyn Stream {
        self.stream.as_ref()
    }
}

impl MappingBackend for StreamBackend {
    fn kind(&self) -> MappingKind {
        MappingKind::Stream
    }

    fn open(&mut self, mode: FileMode, _overwrite: bool) -> Result<u64> {
        self.stream.open(mode)?;
        Ok(self.stream.size())
    }

    fn close(&mut self) {
        self.stream.close();
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.stream.seek(SeekFrom::Start(offset))?;
        self.stream.write_all(data)
    }
}
