//! Bitmap Allocator
//!
//! First-fit allocation over the quantum bitmap.
//!
//! ## Responsibilities
//! - Find holes: whole-page runs for page-sized requests, bit runs otherwise
//! - Mark and clear bitmap bits, cloning committed bitmap pages first
//! - Relocate an owner's data when it moves (copy-on-write of page objects)
//! - Fall back to `grow` when no hole is large enough
//!
//! ## Scan
//! ```text
//!   cursor ──► last bitmap page      (next fit)
//!   page 0 ──► cursor page           (wrap around)
//!   collect once, rescan             (only at a safe point)
//!   grow the file                    (new bitmap pages)
//! ```

use super::holes::{FIRST_HOLE, LAST_HOLE, MAX_HOLE, MAX_HOLE_OFFSET};
use super::reserve::Reservations;
use crate::error::{AtlasError, Result};
use crate::layout::{
    align_quantum, Oid, BITMAP_ID, BITS_PER_PAGE, PAGE_BITMAP_BYTES, PAGE_SIZE, QUANTUM,
    QUANTUM_BITS,
};
use crate::store::{Cursor, Store};

const PAGE_MASK: u64 = PAGE_SIZE as u64 - 1;

/// Result of scanning a range of bitmap pages
enum Scan {
    Found(u64),
    /// Nothing fits; `tail_bits` free quanta end the last scanned page
    Exhausted { tail_bits: u64 },
}

/// Where a hole was found relative to the current bitmap byte
enum Fit {
    /// The run ends right before the current byte offset
    Ending,
    /// The run continues from earlier bytes into the low bits of this byte
    Straddle,
    /// The run lies inside this byte, starting at the given bit
    Inside(u8),
}

impl Store {
    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate `size` bytes (rounded up to the quantum) and return the
    /// file offset.
    ///
    /// When `owner` is not 0, the owner's current bytes are copied to the
    /// new place and its descriptor is repointed (flags kept, Modified set).
    pub(crate) fn allocate(&mut self, size: u64, owner: Oid, res: &mut Reservations) -> Result<u64> {
        if size > self.geometry.max_offset() {
            return Err(AtlasError::Capacity(format!(
                "cannot allocate {} bytes, the file is limited to {}",
                size,
                self.geometry.max_offset()
            )));
        }
        self.set_dirty()?;
        let size = align_quantum(size);
        debug_assert!(size != 0);

        let collect_here = self.at_safe_point(owner, res);
        if collect_here && self.threshold_crossed(size) {
            self.collect_now()?;
        }

        // counters only move once the space is really taken
        let pos = self.place(size, owner, res, collect_here)?;
        self.allocated_delta += size;
        self.used_size += size;
        Ok(pos)
    }

    /// Find and mark space for `size` quantum-aligned bytes
    fn place(
        &mut self,
        size: u64,
        owner: Oid,
        res: &mut Reservations,
        may_collect: bool,
    ) -> Result<u64> {
        let page_aligned = size & PAGE_MASK == 0;
        let last_page = self.bitmap_page_count();
        let start = if page_aligned {
            Cursor {
                page: self.cursors.pages.page,
                offs: align_up(self.cursors.pages.offs, PAGE_BITMAP_BYTES),
            }
        } else {
            self.cursors.records
        };

        let tail_bits = match self.scan(size, owner, res, start.page, last_page, start.offs)? {
            Scan::Found(pos) => return Ok(pos),
            Scan::Exhausted { tail_bits } => tail_bits,
        };
        if start.page != 0 {
            let wrap_end = (start.page + 1).min(last_page);
            if let Scan::Found(pos) = self.scan(size, owner, res, 0, wrap_end, 0)? {
                return Ok(pos);
            }
        }

        if may_collect
            && self.gc.threshold.is_some()
            && !self.gc.done
            && self.collect_now()?.is_some()
        {
            self.cursors.reset();
            return self.place(size, owner, res, false);
        }

        self.grow(size, owner, res, last_page, tail_bits)
    }

    /// Scan bitmap pages `[first_page, last_page)` for a hole of `size`
    fn scan(
        &mut self,
        size: u64,
        owner: Oid,
        res: &mut Reservations,
        first_page: u32,
        last_page: u32,
        mut offs: usize,
    ) -> Result<Scan> {
        let page_aligned = size & PAGE_MASK == 0;
        let obj_bits = size >> QUANTUM_BITS;
        let mut hole_bits = 0u64;
        let mut i = first_page;

        while i < last_page {
            let space_needed = (obj_bits - hole_bits).min(BITS_PER_PAGE as u64) as u32;
            if self.page_space[i as usize] <= space_needed {
                hole_bits = 0;
                offs = 0;
                i += 1;
                continue;
            }
            let page_pos = self.bitmap_page_pos(i)?;
            let mut start_offs = offs;

            loop {
                let fit = if page_aligned {
                    self.pool.read(page_pos, |data| {
                        fit_pages(data, &mut offs, &mut hole_bits, obj_bits)
                    })?
                } else {
                    self.pool.read(page_pos, |data| {
                        fit_quanta(data, &mut offs, &mut hole_bits, obj_bits)
                    })?
                };
                let Some(fit) = fit else { break };

                let byte_quantum = (i as u64 * PAGE_SIZE as u64 + offs as u64) * 8;
                let quantum = match fit {
                    Fit::Ending | Fit::Straddle => byte_quantum - hole_bits,
                    Fit::Inside(bit) => byte_quantum + bit as u64,
                };
                let pos = quantum << QUANTUM_BITS;

                if res.conflicts(pos, size) {
                    offs = if page_aligned {
                        align_up(offs + (obj_bits >> 3) as usize, PAGE_BITMAP_BYTES)
                    } else {
                        offs + ((obj_bits + 7) >> 3) as usize
                    };
                    start_offs = offs;
                    hole_bits = 0;
                    continue;
                }

                let cursor = Cursor { page: i, offs };
                if page_aligned {
                    self.cursors.pages = cursor;
                } else {
                    self.cursors.records = cursor;
                }
                res.reserve(pos, size);
                self.extend_to(pos + size);
                if owner != 0 {
                    self.relocate(owner, pos, size)?;
                }
                self.mark_bits(quantum, obj_bits, true, res)?;
                res.release();
                return Ok(Scan::Found(pos));
            }

            if start_offs == 0 && hole_bits == 0 && space_needed < self.page_space[i as usize] {
                self.page_space[i as usize] = space_needed;
            }
            offs = 0;
            i += 1;
        }
        Ok(Scan::Exhausted {
            tail_bits: hole_bits,
        })
    }

    /// Copy the owner's bytes to `pos` and repoint its descriptor
    pub(crate) fn relocate(&mut self, owner: Oid, pos: u64, size: u64) -> Result<()> {
        let prev = self.get_pos(owner)?;
        self.pool.copy(pos, prev.offset(), size)?;
        self.set_pos(owner, prev.relocated(pos).with_modified())
    }

    /// Raise the working file size to at least `size`
    pub(crate) fn extend_to(&mut self, size: u64) {
        let working = self.working_mut();
        if size > working.size {
            working.size = size;
        }
    }

    /// Whether an implicit collection may run inside this allocation
    fn at_safe_point(&self, owner: Oid, res: &Reservations) -> bool {
        owner == 0 && res.is_empty() && !self.gc.suppressed
    }

    fn threshold_crossed(&self, size: u64) -> bool {
        matches!(self.gc.threshold, Some(limit) if self.allocated_delta + size > limit)
    }

    // =========================================================================
    // Deallocation
    // =========================================================================

    /// Return `[pos, pos + size)` to the working bitmap
    pub(crate) fn free(&mut self, pos: u64, size: u64, res: &mut Reservations) -> Result<()> {
        debug_assert!(pos != 0 && pos & (QUANTUM - 1) == 0);
        let quantum = pos >> QUANTUM_BITS;
        let bits = (size + QUANTUM - 1) >> QUANTUM_BITS;
        let page = (quantum / BITS_PER_PAGE as u64) as u32;
        let offs = ((quantum % BITS_PER_PAGE as u64) >> 3) as usize;

        let bytes = bits << QUANTUM_BITS;
        self.allocated_delta = self.allocated_delta.saturating_sub(bytes);
        self.used_size = self.used_size.saturating_sub(bytes);

        if pos & PAGE_MASK == 0 && size >= PAGE_SIZE as u64 {
            let cursor = &mut self.cursors.pages;
            if page == cursor.page && offs < cursor.offs {
                cursor.offs = offs;
            }
        }
        let cursor = &mut self.cursors.records;
        if page == cursor.page && offs < cursor.offs {
            cursor.offs = offs;
        }

        self.mark_bits(quantum, bits, false, res)
    }

    /// Make private copies of every committed bitmap page describing
    /// `[pos, pos + size)`, so the committed generation keeps its view
    pub(crate) fn clone_bitmap(&mut self, pos: u64, size: u64, res: &mut Reservations) -> Result<()> {
        let bits = (size + QUANTUM - 1) >> QUANTUM_BITS;
        if bits == 0 {
            return Ok(());
        }
        let first = pos >> QUANTUM_BITS;
        let first_page = first / BITS_PER_PAGE as u64;
        let last_page = (first + bits - 1) / BITS_PER_PAGE as u64;
        for page in first_page..=last_page {
            let oid = self.bitmap_page_oid(page as u32);
            let current = self.get_pos(oid)?;
            if !current.is_modified() {
                self.dirty_pages.mark(oid);
                self.allocate(PAGE_SIZE as u64, oid, res)?;
                self.clone_bitmap(current.offset(), PAGE_SIZE as u64, res)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Bitmap Pages
    // =========================================================================

    /// OID describing bitmap page `i`
    pub(crate) fn bitmap_page_oid(&self, i: u32) -> Oid {
        let default_pages = self.geometry.bitmap_pages();
        if i < default_pages {
            BITMAP_ID + i
        } else {
            self.working().bitmap_extent + (i - default_pages)
        }
    }

    /// Working offset of bitmap page `i` for reading
    fn bitmap_page_pos(&self, i: u32) -> Result<u64> {
        Ok(self.get_pos(self.bitmap_page_oid(i))?.offset())
    }

    /// Set (or clear) `count` bits starting at quantum `first`, page by page
    pub(crate) fn mark_bits(
        &mut self,
        first: u64,
        count: u64,
        set: bool,
        res: &mut Reservations,
    ) -> Result<()> {
        let per_page = BITS_PER_PAGE as u64;
        let mut quantum = first;
        let end = first + count;
        while quantum < end {
            let page = (quantum / per_page) as u32;
            let from = quantum % per_page;
            let n = (end - quantum).min(per_page - from);
            let oid = self.bitmap_page_oid(page);
            let page_pos = self.put_page(oid, res)?;
            self.pool.write(page_pos, |data| fill_bits(data, from, n, set))?;
            if !set {
                self.page_space[page as usize] = u32::MAX;
            } else if n == per_page {
                self.page_space[page as usize] = 0;
            }
            quantum += n;
        }
        Ok(())
    }

    /// Concatenated bytes of the working bitmap pages
    pub(crate) fn bitmap_image(&self) -> Result<Vec<u8>> {
        let pages = self.bitmap_page_count();
        let mut image = Vec::with_capacity(pages as usize * PAGE_SIZE);
        for i in 0..pages {
            let page_pos = self.bitmap_page_pos(i)?;
            self.pool.read(page_pos, |data| image.extend_from_slice(data))?;
        }
        Ok(image)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Raw bitmap pages with the first `used` bytes of the file allocated
pub(crate) fn allocator_image(pages: u32, used: u64) -> Vec<u8> {
    let mut image = vec![0u8; pages as usize * PAGE_SIZE];
    fill_bits(&mut image, 0, used >> QUANTUM_BITS, true);
    image
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Scan zero bytes for a page-aligned run of `obj_bits` quanta
fn fit_pages(data: &[u8], offs: &mut usize, hole_bits: &mut u64, obj_bits: u64) -> Option<Fit> {
    while *offs < PAGE_SIZE {
        let byte = data[*offs];
        *offs += 1;
        if byte != 0 {
            *offs = align_up(*offs, PAGE_BITMAP_BYTES);
            *hole_bits = 0;
        } else {
            *hole_bits += 8;
            if *hole_bits == obj_bits {
                return Some(Fit::Ending);
            }
        }
    }
    None
}

/// Classify bytes with the hole tables until a run of `obj_bits` fits
fn fit_quanta(data: &[u8], offs: &mut usize, hole_bits: &mut u64, obj_bits: u64) -> Option<Fit> {
    while *offs < PAGE_SIZE {
        let mask = data[*offs] as usize;
        if *hole_bits + FIRST_HOLE[mask] as u64 >= obj_bits {
            return Some(Fit::Straddle);
        }
        if MAX_HOLE[mask] as u64 >= obj_bits {
            return Some(Fit::Inside(MAX_HOLE_OFFSET[mask]));
        }
        *offs += 1;
        if LAST_HOLE[mask] == 8 {
            *hole_bits += 8;
        } else {
            *hole_bits = LAST_HOLE[mask] as u64;
        }
    }
    None
}

/// Set or clear `count` bits of `data` starting at bit `from`
pub(crate) fn fill_bits(data: &mut [u8], from: u64, count: u64, set: bool) {
    let mut bit = from as usize;
    let end = (from + count) as usize;
    while bit < end && bit % 8 != 0 {
        apply_mask(&mut data[bit / 8], 1 << (bit % 8), set);
        bit += 1;
    }
    while bit + 8 <= end {
        data[bit / 8] = if set { 0xFF } else { 0 };
        bit += 8;
    }
    while bit < end {
        apply_mask(&mut data[bit / 8], 1 << (bit % 8), set);
        bit += 1;
    }
}

fn apply_mask(byte: &mut u8, mask: u8, set: bool) {
    if set {
        *byte |= mask;
    } else {
        *byte &= !mask;
    }
}
