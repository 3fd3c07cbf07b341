//! Object Table
//!
//! Handle slots of the working generation, the free handle list and page
//! objects. A slot write always lands in the working copy of the table
//! and marks its page dirty; the committed copy is only read by commit,
//! rollback and the collector.

use tracing::debug;

use crate::alloc::Reservations;
use crate::error::{AtlasError, Result};
use crate::layout::{Oid, Position, HANDLES_PER_PAGE, PAGE_SIZE};
use crate::store::Store;

impl Store {
    // =========================================================================
    // Slots
    // =========================================================================

    /// Descriptor of `oid` in the working generation
    pub(crate) fn get_pos(&self, oid: Oid) -> Result<Position> {
        self.check_oid(oid, self.curr_index_size)?;
        let raw = self.pool.read_u64(self.working().index + oid as u64 * 8)?;
        Ok(Position::from_raw(raw))
    }

    pub(crate) fn set_pos(&mut self, oid: Oid, pos: Position) -> Result<()> {
        self.check_oid(oid, self.curr_index_size)?;
        self.dirty_pages.mark(oid);
        self.pool
            .write_u64(self.working().index + oid as u64 * 8, pos.raw())
    }

    /// Descriptor of `oid` as of the last commit
    pub(crate) fn committed_pos(&self, oid: Oid) -> Result<Position> {
        self.check_oid(oid, self.committed_index_size)?;
        let raw = self.pool.read_u64(self.committed().index + oid as u64 * 8)?;
        Ok(Position::from_raw(raw))
    }

    fn check_oid(&self, oid: Oid, limit: u32) -> Result<()> {
        if oid == 0 || oid >= limit {
            return Err(AtlasError::Consistency(format!(
                "object id {} out of range (table holds {})",
                oid, limit
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Hand out a handle, reusing the free list first
    pub(crate) fn allocate_id(&mut self) -> Result<Oid> {
        self.set_dirty()?;

        let head = self.working().free_list;
        if head != 0 {
            let next = self.get_pos(head)?.next_free();
            self.working_mut().free_list = next;
            self.dirty_pages.mark(head);
            return Ok(head);
        }

        if self.curr_index_size >= self.working().index_size {
            self.grow_index()?;
        }
        let oid = self.curr_index_size;
        self.curr_index_size += 1;
        self.working_mut().index_used = self.curr_index_size;
        Ok(oid)
    }

    /// Double the working object table
    fn grow_index(&mut self) -> Result<()> {
        let old_size = self.working().index_size;
        let cap = i32::MAX as u32 & !(HANDLES_PER_PAGE - 1);
        let new_size = match old_size.checked_mul(2) {
            Some(size) if size <= cap => size,
            _ if cap > old_size => cap,
            _ => {
                return Err(AtlasError::Capacity(format!(
                    "object table cannot grow past {} handles",
                    old_size
                )))
            }
        };

        let mut res = Reservations::new();
        let new_index = self.allocate(new_size as u64 * 8, 0, &mut res)?;
        // A collection or extension inside `allocate` may have grown it already
        if self.curr_index_size >= self.working().index_size {
            let old_index = self.working().index;
            self.pool
                .copy(new_index, old_index, self.curr_index_size as u64 * 8)?;
            let working = self.working_mut();
            working.index = new_index;
            working.index_size = new_size;
            self.free(old_index, old_size as u64 * 8, &mut res)?;
            debug!(new_size, "Grew object table");
        } else {
            self.free(new_index, new_size as u64 * 8, &mut res)?;
        }
        Ok(())
    }

    /// Push `oid` onto the free handle list
    pub(crate) fn free_id(&mut self, oid: Oid) -> Result<()> {
        let head = self.working().free_list;
        self.set_pos(oid, Position::free_link(head))?;
        self.working_mut().free_list = oid;
        Ok(())
    }

    // =========================================================================
    // Page Objects
    // =========================================================================

    /// Offset of a page object for reading
    pub(crate) fn page_offset(&self, oid: Oid) -> Result<u64> {
        let pos = self.get_pos(oid)?;
        if !pos.is_live_page() {
            return Err(AtlasError::Consistency(format!(
                "object {} is not a page",
                oid
            )));
        }
        Ok(pos.offset())
    }

    /// Offset of a writable copy of page object `oid`
    ///
    /// The first write after a commit moves the page to fresh space so the
    /// committed generation keeps the old bytes.
    pub(crate) fn put_page(&mut self, oid: Oid, res: &mut Reservations) -> Result<u64> {
        let pos = self.get_pos(oid)?;
        if !pos.is_live_page() {
            return Err(AtlasError::Consistency(format!(
                "object {} is not a page",
                oid
            )));
        }
        if !pos.is_modified() {
            self.dirty_pages.mark(oid);
            self.allocate(PAGE_SIZE as u64, oid, res)?;
            self.clone_bitmap(pos.offset(), PAGE_SIZE as u64, res)?;
        }
        self.modified = true;
        Ok(self.get_pos(oid)?.offset())
    }

    /// New page object with unspecified contents
    pub(crate) fn allocate_page(&mut self) -> Result<Oid> {
        let oid = self.allocate_id()?;
        let mut res = Reservations::new();
        let pos = self.allocate(PAGE_SIZE as u64, 0, &mut res)?;
        self.set_pos(oid, Position::page(pos).with_modified())?;
        Ok(oid)
    }

    pub(crate) fn free_page(&mut self, oid: Oid, res: &mut Reservations) -> Result<()> {
        let pos = self.get_pos(oid)?;
        if !pos.is_live_page() {
            return Err(AtlasError::Consistency(format!(
                "object {} is not a page",
                oid
            )));
        }
        if pos.is_modified() {
            self.free(pos.offset(), PAGE_SIZE as u64, res)?;
        } else {
            self.clone_bitmap(pos.offset(), PAGE_SIZE as u64, res)?;
        }
        self.free_id(oid)
    }
}
