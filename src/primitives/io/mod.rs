#![forbid(unsafe_code)]

use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    sync::Arc,
};

use crate::types::{GinError, Result};

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(unix)]
mod stdio_unix {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    /// Reads exact number of bytes at offset using pread semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    /// Writes all bytes at offset using pwrite semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod stdio_win {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    /// Reads exact number of bytes at offset using seek_read semantics.
    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    /// Writes all bytes at offset using seek_write semantics.
    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

/// Standard file I/O implementation using `Arc<File>`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
    writable: bool,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File, writable: bool) -> Self {
        Self {
            inner: Arc::new(file),
            writable,
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file, true))
    }

    /// Opens an existing file without write access.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self::new(file, false))
    }

    fn file(&self) -> &File {
        &self.inner
    }

    #[cfg(unix)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_unix::read_exact(self.file(), off, dst)
    }

    #[cfg(windows)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_win::read_exact(self.file(), off, dst)
    }

    #[cfg(unix)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_unix::write_all(self.file(), off, src)
    }

    #[cfg(windows)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_win::write_all(self.file(), off, src)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_all(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(GinError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(GinError::Invalid("file opened read-only"));
        }
        self.write_all(off, src).map_err(GinError::from)
    }

    fn sync_all(&self) -> Result<()> {
        self.file().sync_all().map_err(GinError::from)
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }
}
