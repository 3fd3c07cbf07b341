//! Commit
//!
//! Turns the working generation into the committed one.
//!
//! ## Steps
//! ```text
//! 1. give the working table a shadow of matching size (if it grew)
//! 2. free committed versions of every replaced or deleted object
//! 3. clear the Modified flag in touched table pages
//! 4. write header, flush          (working generation durable)
//! 5. flip `curr`, write, flush    (switch point)
//! 6. seed the next working generation from the new committed one
//! ```
//! A crash before step 5 completes reopens the previous generation.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::alloc::Reservations;
use crate::error::Result;
use crate::layout::position::MODIFIED_FLAG;
use crate::layout::{Oid, Position, HANDLES_PER_PAGE, HANDLES_PER_PAGE_BITS, PAGE_SIZE};
use crate::store::Store;

impl Store {
    /// Make everything done since the last commit durable
    pub(crate) fn commit(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        self.gc.suppressed = true;
        let result = self.commit_generation();
        self.gc.suppressed = false;
        result?;
        self.modified = false;
        Ok(())
    }

    fn commit_generation(&mut self) -> Result<()> {
        let c = self.header.committed();
        let w = self.header.working();
        let old_index_size = self.header.root[c].index_size;
        let mut new_index_size = self.header.root[w].index_size;
        let mut res = Reservations::new();

        if new_index_size > old_index_size {
            let committed_index = self.header.root[c].index;
            self.clone_bitmap(committed_index, old_index_size as u64 * 8, &mut res)?;
            let shadow = loop {
                let pos = self.allocate(new_index_size as u64 * 8, 0, &mut res)?;
                if new_index_size == self.header.root[w].index_size {
                    break pos;
                }
                self.free(pos, new_index_size as u64 * 8, &mut res)?;
                new_index_size = self.header.root[w].index_size;
            };
            let working = &mut self.header.root[w];
            working.shadow_index = shadow;
            working.shadow_index_size = new_index_size;
            self.free(committed_index, old_index_size as u64 * 8, &mut res)?;
        }

        let released = self.release_replaced(&mut res)?;
        self.clear_modified_flags()?;

        self.header.root[w].used_size = self.used_size;
        self.write_header()?;
        self.pool.flush()?;
        self.header.curr ^= 1;
        self.header.dirty = true;
        self.write_header()?;
        self.pool.flush()?;

        self.seed_working(new_index_size != old_index_size)?;
        self.gc.done = false;
        self.committed_index_size = self.curr_index_size;

        info!(
            generation = self.header.curr,
            handles = self.committed_index_size,
            released,
            size = self.committed().size,
            "Committed transaction"
        );
        Ok(())
    }

    /// Free the committed space of every slot changed in this transaction
    ///
    /// Freeing can clone bitmap pages, which changes more slots, so pages
    /// are rescanned until no unhandled difference remains.
    fn release_replaced(&mut self, res: &mut Reservations) -> Result<usize> {
        let limit = self.committed_index_size;
        let mut handled: HashSet<Oid> = HashSet::new();
        loop {
            let mut pending = Vec::new();
            for page in self.dirty_pages.pages() {
                let first = page << HANDLES_PER_PAGE_BITS;
                if first >= limit {
                    continue;
                }
                let count = (limit - first).min(HANDLES_PER_PAGE);
                let working = self.slots(self.working().index, first, count)?;
                let committed = self.slots(self.committed().index, first, count)?;
                for (i, (new, old)) in working.iter().zip(&committed).enumerate() {
                    let oid = first + i as Oid;
                    if new != old && !handled.contains(&oid) {
                        pending.push((oid, *old));
                    }
                }
            }
            if pending.is_empty() {
                return Ok(handled.len());
            }
            for (oid, old) in pending {
                handled.insert(oid);
                if old.is_free() || old.is_null() {
                    continue;
                }
                if old.is_page_object() {
                    self.free(old.offset(), PAGE_SIZE as u64, res)?;
                } else {
                    let size = self.record_header_at(old.offset())?.size as u64;
                    self.free(old.offset(), size, res)?;
                }
            }
        }
    }

    /// Strip Modified from touched and newly used working table pages
    fn clear_modified_flags(&mut self) -> Result<()> {
        let mut pages: Vec<u32> = self.dirty_pages.pages();
        let first_new = self.committed_index_size >> HANDLES_PER_PAGE_BITS;
        let end_new = self.curr_index_size.div_ceil(HANDLES_PER_PAGE);
        pages.extend(first_new..end_new);
        pages.sort_unstable();
        pages.dedup();

        let index = self.working().index;
        let table_pages = (self.working().index_size as u64 * 8).div_ceil(PAGE_SIZE as u64);
        for page in pages {
            if page as u64 >= table_pages {
                continue;
            }
            self.pool
                .write(index + page as u64 * PAGE_SIZE as u64, |data| {
                    for slot in data.chunks_exact_mut(8) {
                        slot[7] &= !(MODIFIED_FLAG as u8);
                    }
                })?;
        }
        Ok(())
    }

    /// Start the next working generation as a copy of the new committed one
    fn seed_working(&mut self, index_moved: bool) -> Result<()> {
        let committed = *self.committed();
        let curr_index_size = self.curr_index_size;
        let working = self.working_mut();
        working.size = committed.size;
        working.used_size = committed.used_size;
        working.index_used = curr_index_size;
        working.free_list = committed.free_list;
        working.bitmap_end = committed.bitmap_end;
        working.root_object = committed.root_object;
        working.class_desc_list = committed.class_desc_list;
        working.bitmap_extent = committed.bitmap_extent;

        let table_bytes = curr_index_size as u64 * 8;
        if index_moved {
            working.index = committed.shadow_index;
            working.index_size = committed.shadow_index_size;
            working.shadow_index = committed.index;
            working.shadow_index_size = committed.index_size;
            self.pool
                .copy(committed.shadow_index, committed.index, table_bytes)?;
            debug!(index = committed.shadow_index, "Copied whole object table");
        } else {
            let mut pages = self.dirty_pages.pages();
            let first_new = self.committed_index_size >> HANDLES_PER_PAGE_BITS;
            pages.extend(first_new..curr_index_size.div_ceil(HANDLES_PER_PAGE));
            pages.sort_unstable();
            pages.dedup();
            let dst = self.working().index;
            for page in pages {
                let start = page as u64 * PAGE_SIZE as u64;
                if start >= table_bytes {
                    continue;
                }
                let len = (table_bytes - start).min(PAGE_SIZE as u64);
                self.pool.copy(dst + start, committed.index + start, len)?;
            }
        }
        self.dirty_pages.clear();
        Ok(())
    }

    /// Decode `count` table slots starting at `first`
    fn slots(&self, index: u64, first: Oid, count: u32) -> Result<Vec<Position>> {
        let raw = self
            .pool
            .read_bytes(index + first as u64 * 8, count as usize * 8)?;
        Ok(raw
            .chunks_exact(8)
            .map(|slot| {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(slot);
                Position::from_raw(u64::from_be_bytes(bytes))
            })
            .collect())
    }

    /// Commit pending work and mark the file cleanly closed
    pub(crate) fn close(&mut self) -> Result<()> {
        self.commit()?;
        if self.header.dirty {
            self.write_header()?;
            self.pool.flush()?;
            self.header.dirty = false;
            self.write_header()?;
            self.pool.flush()?;
        }
        info!(size = self.committed().size, "Closed object store");
        Ok(())
    }
}
