//! Open and Recovery
//!
//! Formats an empty file, or loads an existing one. A file whose header
//! still carries the dirty marker was not closed cleanly: its working
//! generation is rebuilt from the committed one before anything else
//! touches it.

use tracing::{info, warn};

use crate::alloc::allocator_image;
use crate::error::{AtlasError, Result};
use crate::layout::position::FREE_HANDLE_FLAG;
use crate::layout::{
    align_page, Header, Position, BITMAP_ID, BITS_PER_PAGE, HANDLES_PER_PAGE, HEADER_SIZE,
    PAGE_SIZE,
};
use crate::store::Store;

/// Bytes of file one initial bitmap page pays for (its segment minus itself)
const BYTES_PER_BITMAP_PAGE: u64 = PAGE_SIZE as u64 * (BITS_PER_PAGE as u64 / 128 - 1);

impl Store {
    /// Format or load the file behind the pool
    pub(crate) fn bootstrap(&mut self, init_index_size: u32) -> Result<()> {
        let file_len = self.pool.file().len()?;
        if file_len > 0 && file_len < HEADER_SIZE as u64 {
            return Err(AtlasError::Corruption(format!(
                "file of {} bytes cannot hold a header",
                file_len
            )));
        }
        self.header = self.pool.read(0, Header::decode)??;

        self.gc.suppressed = true;
        let result = if self.header.initialized {
            self.load_existing()
        } else {
            self.format(init_index_size)
        };
        self.gc.suppressed = false;
        result?;

        let working = *self.working();
        self.curr_index_size = working.index_used;
        self.committed_index_size = working.index_used;
        let committed = *self.committed();
        self.used_size = if committed.used_size != 0 {
            committed.used_size
        } else {
            committed.size
        };
        self.reset_page_space();
        self.cursors.reset();
        self.validate_bitmap()?;
        self.reload_catalog()?;

        info!(
            generation = self.header.curr,
            size = committed.size,
            handles = self.committed_index_size,
            "Opened object store"
        );
        Ok(())
    }

    // =========================================================================
    // Fresh File
    // =========================================================================

    fn format(&mut self, init_index_size: u32) -> Result<()> {
        let first_user_id = self.geometry.first_user_id();
        let index_size = init_index_size.max(first_user_id);
        let index_size = (index_size + HANDLES_PER_PAGE - 1) & !(HANDLES_PER_PAGE - 1);
        let index_bytes = index_size as u64 * 8;

        let first_index = PAGE_SIZE as u64;
        let second_index = first_index + index_bytes;
        let bitmap_pos = second_index + index_bytes;

        let bitmap_pages = bitmap_pos.div_ceil(BYTES_PER_BITMAP_PAGE) as u32;
        if bitmap_pages > self.geometry.bitmap_pages() {
            return Err(AtlasError::Config(format!(
                "initial index of {} handles does not fit the default bitmap",
                index_size
            )));
        }
        let used = bitmap_pos + bitmap_pages as u64 * PAGE_SIZE as u64;
        let image = allocator_image(bitmap_pages, used);
        self.pool.write_bytes(bitmap_pos, &image)?;

        let slots = align_page((first_user_id as u64) * 8) as usize;
        let mut index = vec![0u8; slots];
        let free = Position::from_raw(FREE_HANDLE_FLAG).raw().to_be_bytes();
        index[..8].copy_from_slice(&free);
        for i in 0..self.geometry.bitmap_pages() {
            let slot = (BITMAP_ID + i) as usize * 8;
            let pos = if i < bitmap_pages {
                Position::page(bitmap_pos + i as u64 * PAGE_SIZE as u64).raw()
            } else {
                FREE_HANDLE_FLAG
            };
            index[slot..slot + 8].copy_from_slice(&pos.to_be_bytes());
        }
        self.pool.write_bytes(first_index, &index)?;
        self.pool.write_bytes(second_index, &index)?;

        let mut header = Header::default();
        for (root, (index, shadow)) in header
            .root
            .iter_mut()
            .zip([(first_index, second_index), (second_index, first_index)])
        {
            root.size = used;
            root.used_size = used;
            root.index = index;
            root.shadow_index = shadow;
            root.index_size = index_size;
            root.shadow_index_size = index_size;
            root.index_used = first_user_id;
            root.bitmap_end = BITMAP_ID + bitmap_pages;
        }
        header.dirty = true;
        self.header = header;
        self.write_header()?;
        self.pool.flush()?;
        self.header.initialized = true;
        self.write_header()?;
        self.pool.flush()?;

        info!(index_size, bitmap_pages, size = used, "Formatted new object store");
        Ok(())
    }

    // =========================================================================
    // Existing File
    // =========================================================================

    fn load_existing(&mut self) -> Result<()> {
        let committed = *self.committed();
        if committed.index_size != committed.shadow_index_size {
            return Err(AtlasError::Corruption(format!(
                "index size {} differs from shadow index size {}",
                committed.index_size, committed.shadow_index_size
            )));
        }
        if self.header.dirty {
            warn!(generation = self.header.curr, "Store was not closed cleanly, recovering");
            self.recover()?;
            info!("Recovery completed");
        }
        Ok(())
    }

    /// Rebuild the working generation from the committed one
    fn recover(&mut self) -> Result<()> {
        let committed = *self.committed();
        let working = self.working_mut();
        working.size = committed.size;
        working.used_size = committed.used_size;
        working.index_used = committed.index_used;
        working.free_list = committed.free_list;
        working.index = committed.shadow_index;
        working.index_size = committed.shadow_index_size;
        working.shadow_index = committed.index;
        working.shadow_index_size = committed.index_size;
        working.bitmap_end = committed.bitmap_end;
        working.root_object = committed.root_object;
        working.class_desc_list = committed.class_desc_list;
        working.bitmap_extent = committed.bitmap_extent;
        self.write_header()?;

        self.pool.copy(
            committed.shadow_index,
            committed.index,
            align_page(committed.index_used as u64 * 8),
        )
    }

    /// Every scan hint starts unknown
    pub(crate) fn reset_page_space(&mut self) {
        let pages = if self.working().bitmap_extent == 0 {
            self.geometry.bitmap_pages()
        } else {
            self.geometry.large_bitmap_pages()
        };
        self.page_space = vec![u32::MAX; pages as usize];
    }

    fn validate_bitmap(&self) -> Result<()> {
        let working = self.working();
        let limit = if working.bitmap_extent == 0 {
            self.geometry.bitmap_pages()
        } else {
            self.geometry.large_bitmap_pages()
        };
        if working.bitmap_end <= BITMAP_ID || working.bitmap_end - BITMAP_ID > limit {
            return Err(AtlasError::Corruption(format!(
                "bitmap end {} outside the configured geometry ({} pages)",
                working.bitmap_end, limit
            )));
        }
        if working.index_used > working.index_size {
            return Err(AtlasError::Corruption(format!(
                "index uses {} of {} handles",
                working.index_used, working.index_size
            )));
        }
        Ok(())
    }
}
