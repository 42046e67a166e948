//! Stream over an OS file

use super::{Stream, StreamKind, ensure_open, ensure_readable, ensure_writable, resolve_seek};
use crate::{FileMode, PackageError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Stream over a file on the host filesystem.
#[derive(Debug)]
pub struct FileStream {
    path: PathBuf,
    name: String,
    file: Option<File>,
    mode: FileMode,
    size: u64,
    pointer: u64,
}

impl FileStream {
    /// Create a closed stream for `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        Self {
            path,
            name,
            file: None,
            mode: FileMode::NONE,
            size: 0,
            pointer: 0,
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(PackageError::NotOpen("file stream"))
    }
}

impl Stream for FileStream {
    fn kind(&self) -> StreamKind {
        StreamKind::File
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }

    fn mode(&self) -> FileMode {
        self.mode
    }

    fn open(&mut self, mode: FileMode) -> Result<()> {
        self.close();
        mode.validate()?;

        let file = OpenOptions::new()
            .read(mode.read)
            .write(mode.write)
            .create(mode.create)
            .truncate(mode.create)
            .open(&self.path)?;
        let size = file.metadata()?.len();

        debug!("opened file stream {} ({}, {} bytes)", self.name, mode, size);
        self.file = Some(file);
        self.mode = mode;
        self.size = size;
        self.pointer = 0;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take() {
            if self.mode.write
                && let Err(e) = file.flush()
            {
                debug!("flush on close of {} failed: {}", self.name, e);
            }
            self.mode = FileMode::NONE;
            self.size = 0;
            self.pointer = 0;
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn pointer(&self) -> u64 {
        self.pointer
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        ensure_open(self.is_open())?;
        let target = resolve_seek(self.pointer, self.size, pos);
        self.file_mut()?.seek(SeekFrom::Start(target))?;
        self.pointer = target;
        Ok(target)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        ensure_readable(self.mode)?;
        let n = self.file_mut()?.read(buf)?;
        self.pointer += n as u64;
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        ensure_open(self.is_open())?;
        ensure_writable(self.mode)?;
        let n = self.file_mut()?.write(data)?;
        self.pointer += n as u64;
        self.size = self.size.max(self.pointer);
        Ok(n)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_write_reopen_read() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("stream.bin");

        let mut stream = FileStream::new(&path);
        stream
            .open(FileMode::WRITE | FileMode::CREATE)
            .expect("create");
        stream.write_all(b"hello file stream").expect("write");
        assert_eq!(stream.size(), 17);
        stream.close();

        stream.open(FileMode::READ).expect("reopen");
        stream.seek(SeekFrom::Start(6)).expect("seek");
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).expect("read");
        assert_eq!(&buf, b"file");
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempdir().expect("tempdir");
        let mut stream = FileStream::new(dir.path().join("missing.bin"));
        let err = stream.open(FileMode::READ).expect_err("missing file");
        assert_eq!(err.kind(), crate::ErrorKind::Io);
        assert!(!stream.is_open());
    }
}
