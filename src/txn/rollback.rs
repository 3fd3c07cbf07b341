//! Rollback
//!
//! Discards the working generation. Nothing on disk needs undoing: the
//! committed table, bitmap and objects were never written in place, so
//! the working table is simply overwritten with the committed one.

use tracing::debug;

use crate::error::Result;
use crate::layout::{HANDLES_PER_PAGE, HANDLES_PER_PAGE_BITS, PAGE_SIZE};
use crate::store::Store;

impl Store {
    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.cache.clear();
        if !self.modified {
            return Ok(());
        }

        let committed = *self.committed();
        let table_bytes = self.committed_index_size as u64 * 8;
        if self.working().index != committed.shadow_index {
            self.pool
                .copy(committed.shadow_index, committed.index, table_bytes)?;
        } else {
            let table_pages = self.committed_index_size.div_ceil(HANDLES_PER_PAGE);
            for page in self.dirty_pages.pages() {
                if page >= table_pages {
                    continue;
                }
                let start = (page << HANDLES_PER_PAGE_BITS) as u64 * 8;
                let len = (table_bytes - start).min(PAGE_SIZE as u64);
                self.pool.copy(
                    committed.shadow_index + start,
                    committed.index + start,
                    len,
                )?;
            }
        }
        let discarded = self.dirty_pages.len();
        self.dirty_pages.clear();

        let committed_index_size = self.committed_index_size;
        let working = self.working_mut();
        working.index = committed.shadow_index;
        working.index_size = committed.shadow_index_size;
        working.shadow_index = committed.index;
        working.shadow_index_size = committed.index_size;
        working.index_used = committed_index_size;
        working.free_list = committed.free_list;
        working.bitmap_end = committed.bitmap_end;
        working.size = committed.size;
        working.used_size = committed.used_size;
        working.root_object = committed.root_object;
        working.class_desc_list = committed.class_desc_list;
        working.bitmap_extent = committed.bitmap_extent;
        self.header.dirty = true;

        self.used_size = if committed.used_size != 0 {
            committed.used_size
        } else {
            committed.size
        };
        self.curr_index_size = committed_index_size;
        self.allocated_delta = 0;
        self.in_flight = None;
        self.cursors.reset();
        self.reset_page_space();
        self.modified = false;

        self.gc.suppressed = true;
        let reloaded = self.reload_catalog();
        self.gc.suppressed = false;
        reloaded?;

        debug!(pages = discarded, "Rolled back transaction");
        Ok(())
    }
}
