//! Composite Types
//!
//! Hooks for record types that own page objects (or other records) the
//! generic layout walk cannot see through. The collector asks the hook
//! what a record keeps alive, and hands garbage records to the hook so
//! it can release everything they own.

use super::plan::FieldPlan;
use crate::alloc::Reservations;
use crate::cache::Record;
use crate::error::Result;
use crate::gc::CommittedView;
use crate::layout::Oid;
use crate::store::Store;

pub trait CompositeType: Send + Sync {
    /// Report what `record` keeps alive beyond its layout references
    ///
    /// The default reports the record's `Page` fields as owned pages.
    fn trace(&self, record: &Record, plan: &FieldPlan, tracer: &mut Tracer<'_>) -> Result<()> {
        for page in plan.pages(&record.payload)? {
            tracer.owned_page(page);
        }
        Ok(())
    }

    /// Release `record` and everything it owns
    ///
    /// The default frees the record's `Page` fields, then the record.
    fn deallocate(
        &self,
        record: &Record,
        plan: &FieldPlan,
        reclaimer: &mut Reclaimer<'_>,
    ) -> Result<()> {
        for page in plan.pages(&record.payload)? {
            reclaimer.free_page(page)?;
        }
        reclaimer.free_record(record.oid)
    }
}

/// Built-in hook for layouts with `Page` fields
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnedPages;

impl CompositeType for OwnedPages {}

// =============================================================================
// Tracer
// =============================================================================

/// Collects what a traced record keeps alive (committed generation)
pub struct Tracer<'a> {
    view: &'a CommittedView,
    pub(crate) references: Vec<Oid>,
    pub(crate) pages: Vec<Oid>,
}

impl<'a> Tracer<'a> {
    pub(crate) fn new(view: &'a CommittedView) -> Self {
        Self {
            view,
            references: Vec::new(),
            pages: Vec::new(),
        }
    }

    /// Keep another record alive
    pub fn reference(&mut self, oid: Oid) {
        if oid != 0 {
            self.references.push(oid);
        }
    }

    /// Count a page object as owned by the traced record
    pub fn owned_page(&mut self, oid: Oid) {
        if oid != 0 {
            self.pages.push(oid);
        }
    }

    /// Committed contents of a page object, to follow links stored in it
    pub fn read_page(&self, oid: Oid) -> Result<Vec<u8>> {
        self.view.page(oid)
    }
}

// =============================================================================
// Reclaimer
// =============================================================================

/// Frees objects on behalf of a hook (working generation)
pub struct Reclaimer<'a> {
    store: &'a mut Store,
    res: &'a mut Reservations,
    pages_freed: u64,
}

impl<'a> Reclaimer<'a> {
    pub(crate) fn new(store: &'a mut Store, res: &'a mut Reservations) -> Self {
        Self {
            store,
            res,
            pages_freed: 0,
        }
    }

    /// Free a page object; returns false when `oid` is not a live page
    pub fn free_page(&mut self, oid: Oid) -> Result<bool> {
        if oid == 0 || !self.store.get_pos(oid)?.is_live_page() {
            return Ok(false);
        }
        self.store.free_page(oid, self.res)?;
        self.pages_freed += 1;
        Ok(true)
    }

    /// Free a record and its handle
    pub fn free_record(&mut self, oid: Oid) -> Result<()> {
        self.store.deallocate_object(oid, self.res)?;
        self.store.cache.remove(oid);
        Ok(())
    }

    /// Working contents of a page object
    pub fn read_page(&self, oid: Oid) -> Result<Vec<u8>> {
        let offset = self.store.page_offset(oid)?;
        self.store
            .pool
            .read_bytes(offset, crate::layout::PAGE_SIZE)
    }

    pub fn pages_freed(&self) -> u64 {
        self.pages_freed
    }
}
