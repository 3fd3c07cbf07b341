//! Raw File Access
//!
//! Positional reads and writes over the database file.
//!
//! ## Responsibilities
//! - Abstract the file behind `FileIo` so the pool never touches `std::fs`
//! - Provide the on-disk implementation (`StdFileIo`)
//! - Provide an in-memory implementation (`MemFileIo`) that can simulate a
//!   crash: only bytes present at the last successful `sync_all` survive

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Positioned I/O over a single file
pub trait FileIo: Send + Sync + 'static {
    /// Read up to `dst.len()` bytes at `off`; returns the number of bytes
    /// read, which is short only at end of file.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize>;

    /// Write all of `src` at `off`, extending the file if needed
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;

    /// Make every previous write durable
    fn sync_all(&self) -> Result<()>;

    /// Current file length in bytes
    fn len(&self) -> Result<u64>;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

// =============================================================================
// StdFileIo
// =============================================================================

/// `FileIo` over a regular file
#[derive(Debug, Clone)]
pub struct StdFileIo {
    file: Arc<File>,
}

impl StdFileIo {
    /// Open (or create) the file at `path` for reading and writing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Arc::new(file),
        })
    }
}

#[cfg(unix)]
fn read_once(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(dst, off)
}

#[cfg(unix)]
fn write_once(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.write_at(src, off)
}

#[cfg(windows)]
fn read_once(file: &File, dst: &mut [u8], off: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(dst, off)
}

#[cfg(windows)]
fn write_once(file: &File, src: &[u8], off: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(src, off)
}

impl FileIo for StdFileIo {
    fn read_at(&self, mut off: u64, mut dst: &mut [u8]) -> Result<usize> {
        let mut total = 0;
        while !dst.is_empty() {
            let read = match read_once(&self.file, dst, off) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            total += read;
            off += read as u64;
            dst = &mut dst[read..];
        }
        Ok(total)
    }

    fn write_at(&self, mut off: u64, mut src: &[u8]) -> Result<()> {
        while !src.is_empty() {
            let written = match write_once(&self.file, src, off) {
                Ok(0) => {
                    return Err(io::Error::new(ErrorKind::WriteZero, "write_at wrote zero bytes").into())
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}

// =============================================================================
// MemFileIo
// =============================================================================

/// In-memory file with a crash switch
///
/// `durable_image()` returns what a real disk would hold after a power cut:
/// the bytes as of the last successful `sync_all`. After
/// `crash_after_syncs(n)`, the n+1-th sync and every later write or sync
/// fails, freezing the durable image.
#[derive(Debug, Default)]
pub struct MemFileIo {
    inner: Mutex<MemInner>,
}

#[derive(Debug, Default)]
struct MemInner {
    data: Vec<u8>,
    durable: Vec<u8>,
    syncs: usize,
    syncs_left: Option<usize>,
    crashed: bool,
}

impl MemFileIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// A file whose volatile and durable contents are `image`
    pub fn from_image(image: Vec<u8>) -> Self {
        Self {
            inner: Mutex::new(MemInner {
                durable: image.clone(),
                data: image,
                ..MemInner::default()
            }),
        }
    }

    /// Let `n` more syncs succeed, then fail everything
    pub fn crash_after_syncs(&self, n: usize) {
        self.inner.lock().syncs_left = Some(n);
    }

    /// Bytes that survived the last successful sync
    pub fn durable_image(&self) -> Vec<u8> {
        self.inner.lock().durable.clone()
    }

    /// Current contents, including unsynced writes
    pub fn volatile_image(&self) -> Vec<u8> {
        self.inner.lock().data.clone()
    }

    /// Number of successful syncs so far
    pub fn sync_count(&self) -> usize {
        self.inner.lock().syncs
    }

    pub fn has_crashed(&self) -> bool {
        self.inner.lock().crashed
    }
}

fn crashed_error() -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, "simulated crash")
}

impl FileIo for MemFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<usize> {
        let inner = self.inner.lock();
        let start = off as usize;
        if start >= inner.data.len() {
            return Ok(0);
        }
        let n = dst.len().min(inner.data.len() - start);
        dst[..n].copy_from_slice(&inner.data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.crashed {
            return Err(crashed_error().into());
        }
        let start = off as usize;
        let end = start + src.len();
        if inner.data.len() < end {
            inner.data.resize(end, 0);
        }
        inner.data[start..end].copy_from_slice(src);
        Ok(())
    }

    fn sync_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.crashed {
            return Err(crashed_error().into());
        }
        if let Some(left) = inner.syncs_left {
            if left == 0 {
                inner.crashed = true;
                return Err(crashed_error().into());
            }
            inner.syncs_left = Some(left - 1);
        }
        inner.durable = inner.data.clone();
        inner.syncs += 1;
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.inner.lock().data.len() as u64)
    }
}
