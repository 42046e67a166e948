//! Memory-backed mapping

use super::{MappingBackend, MappingKind};
use crate::{FileMode, Result};

/// Mapping backend over an owned buffer.
///
/// Commits are in-place copies into the buffer; the buffer never grows.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    data: Vec<u8>,
}

impl MemoryBackend {
    /// Back a mapping with `data`.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl MappingBackend for MemoryBackend {
    fn kind(&self) -> MappingKind {
        MappingKind::Memory
    }

    fn open(&mut self, _mode: FileMode, _overwrite: bool) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn close(&mut self) {}

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}
