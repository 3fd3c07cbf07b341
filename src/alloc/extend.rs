//! File Extension
//!
//! Grows the file when no existing hole fits. New bitmap pages are laid
//! out right after the new object, describing themselves as allocated.
//! Crossing the default bitmap boundary switches the store into extended
//! mode: an OID extent is reserved for the additional bitmap pages and
//! the object table is moved into the new space when it is too small to
//! hold that extent.

use tracing::{debug, info};

use super::allocator::fill_bits;
use super::reserve::Reservations;
use crate::error::{AtlasError, Result};
use crate::layout::{
    Oid, Position, BITMAP_ID, BITS_PER_PAGE, HANDLES_PER_PAGE, PAGE_SIZE, QUANTUM_BITS,
    SEGMENT_BITS,
};
use crate::layout::position::FREE_HANDLE_FLAG;
use crate::store::{Cursor, Store};

/// Quanta described by one bitmap page's own storage
const QUANTA_PER_PAGE: u64 = (PAGE_SIZE as u64) >> QUANTUM_BITS;

/// Bytes of file one new bitmap page pays for (its segment minus itself)
const BYTES_PER_NEW_PAGE: u64 = PAGE_SIZE as u64 * (QUANTA_PER_PAGE * 2 - 1);

impl Store {
    /// Append `size` bytes past the last bitmap page, reusing `tail_bits`
    /// free quanta that end the current bitmap.
    pub(super) fn grow(
        &mut self,
        size: u64,
        owner: Oid,
        res: &mut Reservations,
        last_page: u32,
        tail_bits: u64,
    ) -> Result<u64> {
        let geometry = self.geometry;
        let default_pages = geometry.bitmap_pages();
        let large_pages = geometry.large_bitmap_pages();
        let page_aligned = size % PAGE_SIZE as u64 == 0;
        let i = last_page;

        let obj_bits = (size >> QUANTUM_BITS) - tail_bits;
        let skip = align_quanta(obj_bits);
        let pos = ((i as u64) << SEGMENT_BITS) + (skip << QUANTUM_BITS);

        let extension = size.max(self.extension_quantum);
        let mut more_pages = pages_for(extension)?;
        ensure_capacity(i, more_pages, large_pages)?;

        let mut index_bits = 0u64;
        let mut old_index: Option<(u64, u32)> = None;
        let switching = i <= default_pages && i + more_pages > default_pages;

        if switching {
            let extent = geometry.extent_size();
            let old_size = self.working().index_size;
            if old_size as u64 <= self.curr_index_size as u64 + extent as u64 {
                let new_size = grown_index_size(old_size, self.curr_index_size, extent)?;
                let index_bytes = new_size as u64 * 8;
                if size + index_bytes > self.extension_quantum {
                    more_pages = pages_for(size + index_bytes)?;
                }
                index_bits = index_bytes >> QUANTUM_BITS;
                more_pages = cover(skip, more_pages, index_bits);
                ensure_capacity(i, more_pages, large_pages)?;

                let new_index = pos + more_pages as u64 * PAGE_SIZE as u64;
                self.extend_to(new_index + index_bytes);
                let working = *self.working();
                self.pool
                    .copy(new_index, working.index, old_size as u64 * 8)?;
                old_index = Some((working.index, old_size));

                let working = self.working_mut();
                working.index = new_index;
                working.index_size = new_size;
                debug!(new_size, new_index, "Moved object table for extended bitmap");
            } else {
                more_pages = cover(skip, more_pages, 0);
                ensure_capacity(i, more_pages, large_pages)?;
            }

            self.page_space.resize(large_pages as usize, u32::MAX);

            let first = self.curr_index_size;
            self.curr_index_size += extent;
            let working = self.working_mut();
            working.bitmap_extent = first;
            working.index_used = first + extent;
            for oid in first..first + extent {
                self.set_pos(oid, Position::from_raw(FREE_HANDLE_FLAG))?;
            }
            info!(extent, bitmap_extent = first, "Switched to extended bitmap");
        } else {
            more_pages = cover(skip, more_pages, 0);
            ensure_capacity(i, more_pages, large_pages)?;
        }

        self.extend_to(pos + more_pages as u64 * PAGE_SIZE as u64);

        // The new bitmap pages describe segments i.., contiguously, so
        // one image covers the object, the pages themselves and the index.
        let own_bits = more_pages as u64 * QUANTA_PER_PAGE;
        let mut image = vec![0u8; more_pages as usize * PAGE_SIZE];
        fill_bits(&mut image, 0, obj_bits, true);
        fill_bits(&mut image, skip, own_bits, true);
        fill_bits(&mut image, skip + own_bits, index_bits, true);
        self.pool.write_bytes(pos, &image)?;

        for j in 0..more_pages {
            let oid = self.bitmap_page_oid(i + j);
            let page = Position::page(pos + j as u64 * PAGE_SIZE as u64).with_modified();
            self.set_pos(oid, page)?;
        }
        self.working_mut().bitmap_end = i + more_pages + BITMAP_ID;

        let full_pages = (obj_bits / BITS_PER_PAGE as u64) as u32;
        let cursor = Cursor {
            page: i + full_pages,
            offs: 0,
        };
        if page_aligned {
            self.cursors.pages = cursor;
        } else {
            self.cursors.records = cursor;
        }
        for page in i..i + full_pages {
            self.page_space[page as usize] = 0;
        }

        let obj_pos = ((i as u64 * BITS_PER_PAGE as u64) - tail_bits) << QUANTUM_BITS;
        if owner != 0 {
            self.relocate(owner, obj_pos, size)?;
        }
        if tail_bits != 0 {
            res.reserve(obj_pos, size);
            self.mark_bits(obj_pos >> QUANTUM_BITS, tail_bits, true, res)?;
            res.release();
        }
        if let Some((index, index_size)) = old_index {
            self.free(index, index_size as u64 * 8, res)?;
        }

        debug!(
            pages = more_pages,
            file_size = self.working().size,
            "Extended bitmap"
        );
        Ok(obj_pos)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Round a quantum count up to whole pages
fn align_quanta(bits: u64) -> u64 {
    (bits + QUANTA_PER_PAGE - 1) & !(QUANTA_PER_PAGE - 1)
}

/// Bitmap pages needed for an extension of `bytes`
fn pages_for(bytes: u64) -> Result<u32> {
    u32::try_from(bytes.div_ceil(BYTES_PER_NEW_PAGE)).map_err(|_| {
        AtlasError::Capacity(format!("extension of {} bytes needs too many bitmap pages", bytes))
    })
}

/// Raise `pages` until its segments hold the object, the pages and the index
fn cover(skip: u64, mut pages: u32, index_bits: u64) -> u32 {
    while skip + pages as u64 * QUANTA_PER_PAGE + index_bits > pages as u64 * BITS_PER_PAGE as u64
    {
        pages += 1;
    }
    pages
}

fn ensure_capacity(first: u32, pages: u32, large_pages: u32) -> Result<()> {
    if first as u64 + pages as u64 > large_pages as u64 {
        return Err(AtlasError::Capacity(format!(
            "bitmap would need {} pages, limit is {}",
            first as u64 + pages as u64,
            large_pages
        )));
    }
    Ok(())
}

/// Double the index size until it exceeds `used + extent`
fn grown_index_size(old: u32, used: u32, extent: u32) -> Result<u32> {
    let needed = used as u64 + extent as u64;
    let cap = i32::MAX as u64 & !(HANDLES_PER_PAGE as u64 - 1);
    let mut size = old as u64;
    while size <= needed {
        size <<= 1;
        if size > cap {
            if cap < needed {
                return Err(AtlasError::Capacity(format!(
                    "object table cannot hold {} handles",
                    needed
                )));
            }
            return Ok(cap as u32);
        }
    }
    Ok(size as u32)
}
