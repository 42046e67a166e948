//! File-backed mapping

use super::{MappingBackend, MappingKind};
use crate::{FileMode, PackageError, Result};
use memmap2::{Mmap, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Mapping backend over a host file.
///
/// Read-only opens are memory-mapped when enabled; otherwise views are read
/// with positioned reads. Commits always seek and write the affected range.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    enable_mmap: bool,
    file: Option<File>,
    mmap: Option<Mmap>,
}

impl FileBackend {
    /// Back a mapping with the file at `path`.
    pub fn new(path: impl AsRef<Path>, enable_mmap: bool) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            enable_mmap,
            file: None,
            mmap: None,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(PackageError::NotOpen("file mapping"))
    }
}

impl MappingBackend for FileBackend {
    fn kind(&self) -> MappingKind {
        MappingKind::File
    }

    fn open(&mut self, mode: FileMode, overwrite: bool) -> Result<u64> {
        if mode.create && !overwrite && self.path.exists() {
            return Err(PackageError::InvalidMode(format!(
                "{} already exists and overwrite was not requested",
                self.path.display()
            )));
        }

        let file = OpenOptions::new()
            .read(mode.read)
            .write(mode.write)
            .create(mode.create)
            .truncate(mode.create)
            .open(&self.path)?;
        let size = file.metadata()?.len();

        // Zero-length files cannot be mapped on every platform.
        if self.enable_mmap && !mode.write && size > 0 {
            #[allow(unsafe_code)]
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            debug!("memory-mapped {} ({} bytes)", self.path.display(), size);
            self.mmap = Some(mmap);
        }

        self.file = Some(file);
        Ok(size)
    }

    fn close(&mut self) {
        self.mmap = None;
        self.file = None;
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        if let Some(mmap) = &self.mmap {
            let start = offset as usize;
            buf.copy_from_slice(&mmap[start..start + buf.len()]);
            return Ok(());
        }

        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use crate::mapping::Mapping;
    use crate::FileMode;
    use tempfile::tempdir;

    #[test]
    fn test_file_mapping_commit_persists() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("archive.bin");
        std::fs::write(&path, vec![0u8; 128]).expect("write fixture");

        let mut mapping = Mapping::file(&path, true);
        mapping.open(FileMode::READ_WRITE, false).expect("open");
        let mut view = mapping.map(None, 100, 20).expect("map");
        mapping.data_mut(&mut view).expect("data")[2..6].copy_from_slice(b"WAD3");
        mapping.commit(&view, 2, 4).expect("commit");
        mapping.close();

        let on_disk = std::fs::read(&path).expect("read back");
        assert_eq!(&on_disk[102..106], b"WAD3");
    }

    #[test]
    fn test_mmap_read() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("archive.bin");
        std::fs::write(&path, b"0123456789").expect("write fixture");

        let mut mapping = Mapping::file(&path, true);
        mapping.open(FileMode::READ, false).expect("open");
        let mut view = mapping.map(None, 3, 4).expect("map");
        assert_eq!(mapping.data(&mut view).expect("data"), b"3456");
        assert!(mapping.map(None, 10, 0).is_err());
    }

    #[test]
    fn test_create_requires_overwrite_for_existing_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("existing.bin");
        std::fs::write(&path, b"keep").expect("write fixture");

        let mut mapping = Mapping::file(&path, false);
        let mode = FileMode::READ_WRITE | FileMode::CREATE;
        assert!(mapping.open(mode, false).is_err());
        assert!(!mapping.is_open());
        assert_eq!(std::fs::read(&path).expect("read"), b"keep");

        mapping.open(mode, true).expect("overwrite");
        assert_eq!(mapping.size(), 0);
    }
}
