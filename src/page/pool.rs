//! Page Pool
//!
//! Bounded cache of fixed-size pages over a `FileIo`.
//!
//! ## Responsibilities
//! - Serve page reads/writes by absolute, page-aligned offset
//! - Track dirty frames and write them back on eviction or flush
//! - Provide byte-range helpers that span page boundaries
//!
//! Access is borrow-scoped: a closure receives the page bytes while the pool
//! lock is held, which replaces explicit pin/unpin. Closures must not call
//! back into the pool.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::file::FileIo;
use crate::error::Result;
use crate::layout::PAGE_SIZE;

const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// One cached page
struct Frame {
    data: Box<[u8]>,
    dirty: bool,
    last_used: u64,
}

struct PoolInner {
    frames: HashMap<u64, Frame>,
    tick: u64,
}

/// Shared page cache
///
/// ## Concurrency:
/// - All frames live behind one `parking_lot::Mutex`
/// - Every method takes `&self`, so the pool is shared through `Arc`
pub struct PagePool {
    file: Arc<dyn FileIo>,
    capacity: usize,
    inner: Mutex<PoolInner>,
}

impl PagePool {
    /// Create a pool holding at most `capacity` pages
    pub fn new(file: Arc<dyn FileIo>, capacity: usize) -> Self {
        Self {
            file,
            capacity: capacity.max(4),
            inner: Mutex::new(PoolInner {
                frames: HashMap::new(),
                tick: 0,
            }),
        }
    }

    /// The underlying file
    pub fn file(&self) -> &Arc<dyn FileIo> {
        &self.file
    }

    // =========================================================================
    // Page Access
    // =========================================================================

    /// Run `f` over the page starting at `page`
    pub fn read<R>(&self, page: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        debug_assert_eq!(page & PAGE_MASK, 0);
        let mut inner = self.inner.lock();
        let frame = self.frame(&mut inner, page)?;
        Ok(f(&frame.data))
    }

    /// Run `f` over the page starting at `page` and mark it dirty
    pub fn write<R>(&self, page: u64, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        debug_assert_eq!(page & PAGE_MASK, 0);
        let mut inner = self.inner.lock();
        let frame = self.frame(&mut inner, page)?;
        frame.dirty = true;
        Ok(f(&mut frame.data))
    }

    // =========================================================================
    // Byte Ranges
    // =========================================================================

    /// Read `len` bytes starting at `pos`
    pub fn read_bytes(&self, pos: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len];
        let mut done = 0;
        let mut inner = self.inner.lock();
        while done < len {
            let at = pos + done as u64;
            let offs = (at & PAGE_MASK) as usize;
            let n = (PAGE_SIZE - offs).min(len - done);
            let frame = self.frame(&mut inner, at - offs as u64)?;
            out[done..done + n].copy_from_slice(&frame.data[offs..offs + n]);
            done += n;
        }
        Ok(out)
    }

    /// Write `data` starting at `pos`
    pub fn write_bytes(&self, pos: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        let mut inner = self.inner.lock();
        while done < data.len() {
            let at = pos + done as u64;
            let offs = (at & PAGE_MASK) as usize;
            let n = (PAGE_SIZE - offs).min(data.len() - done);
            let frame = self.frame(&mut inner, at - offs as u64)?;
            frame.data[offs..offs + n].copy_from_slice(&data[done..done + n]);
            frame.dirty = true;
            done += n;
        }
        Ok(())
    }

    /// Copy `len` bytes from `src` to `dst`; the ranges must not overlap
    pub fn copy(&self, dst: u64, src: u64, len: u64) -> Result<()> {
        let mut done = 0u64;
        while done < len {
            let chunk = (len - done).min(PAGE_SIZE as u64);
            let bytes = self.read_bytes(src + done, chunk as usize)?;
            self.write_bytes(dst + done, &bytes)?;
            done += chunk;
        }
        Ok(())
    }

    /// Read a big-endian u64 at `pos` (must not straddle pages)
    pub fn read_u64(&self, pos: u64) -> Result<u64> {
        let offs = (pos & PAGE_MASK) as usize;
        self.read(pos - offs as u64, |page| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&page[offs..offs + 8]);
            u64::from_be_bytes(raw)
        })
    }

    /// Write a big-endian u64 at `pos` (must not straddle pages)
    pub fn write_u64(&self, pos: u64, value: u64) -> Result<()> {
        let offs = (pos & PAGE_MASK) as usize;
        self.write(pos - offs as u64, |page| {
            page[offs..offs + 8].copy_from_slice(&value.to_be_bytes());
        })
    }

    // =========================================================================
    // Durability
    // =========================================================================

    /// Write every dirty page (in offset order) and sync the file
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut dirty: Vec<u64> = inner
            .frames
            .iter()
            .filter(|(_, frame)| frame.dirty)
            .map(|(&page, _)| page)
            .collect();
        dirty.sort_unstable();
        for page in dirty {
            if let Some(frame) = inner.frames.get_mut(&page) {
                self.file.write_at(page, &frame.data)?;
                frame.dirty = false;
            }
        }
        drop(inner);
        self.file.sync_all()
    }

    /// Drop all cached frames without writing them
    pub fn discard(&self) {
        self.inner.lock().frames.clear();
    }

    /// Number of pages currently cached
    pub fn cached_pages(&self) -> usize {
        self.inner.lock().frames.len()
    }

    // =========================================================================
    // Helper Functions
    // =========================================================================

    /// Look up (or load) the frame for `page`, evicting when full
    fn frame<'a>(&self, inner: &'a mut PoolInner, page: u64) -> Result<&'a mut Frame> {
        inner.tick += 1;
        let tick = inner.tick;
        if !inner.frames.contains_key(&page) {
            if inner.frames.len() >= self.capacity {
                self.evict(inner)?;
            }
            let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
            // bytes past the end of the file read as zero
            self.file.read_at(page, &mut data)?;
            inner.frames.insert(
                page,
                Frame {
                    data,
                    dirty: false,
                    last_used: tick,
                },
            );
        }
        let frame = inner
            .frames
            .get_mut(&page)
            .ok_or_else(|| crate::AtlasError::Corruption(format!("page {} vanished from pool", page)))?;
        frame.last_used = tick;
        Ok(frame)
    }

    /// Evict the least recently used frame, writing it back if dirty
    fn evict(&self, inner: &mut PoolInner) -> Result<()> {
        let victim = inner
            .frames
            .iter()
            .min_by_key(|(_, frame)| frame.last_used)
            .map(|(&page, _)| page);
        if let Some(page) = victim {
            if let Some(frame) = inner.frames.remove(&page) {
                if frame.dirty {
                    self.file.write_at(page, &frame.data)?;
                }
            }
        }
        Ok(())
    }
}
