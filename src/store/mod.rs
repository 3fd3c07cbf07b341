//! Store Module
//!
//! The single mutable engine value shared by the allocator, the object
//! table, the transaction coordinator and the collector.
//!
//! ## Responsibilities
//! - Own the in-memory header and both generations
//! - Own scan cursors, per-page space hints and the dirty-page map
//! - Provide the crash marker (`set_dirty`) and header write-out
//!
//! Each component adds its operations through its own `impl Store` block:
//! `alloc` (space), `index` (handles and objects), `txn` (open/commit/
//! rollback) and `gc` (collection).

use std::sync::Arc;

use crossbeam::channel::Sender;
use parking_lot::RwLock;

use crate::cache::ObjectCache;
use crate::catalog::Catalog;
use crate::error::Result;
use crate::gc::GcSignal;
use crate::index::DirtyPages;
use crate::layout::{Geometry, Header, Oid, RootPage, BITMAP_ID};
use crate::page::PagePool;

/// Position of the next-fit scan for one allocation class
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Cursor {
    pub page: u32,
    pub offs: usize,
}

/// Scan cursors: whole-page allocations and sub-page allocations advance
/// independently
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ScanCursors {
    pub pages: Cursor,
    pub records: Cursor,
}

impl ScanCursors {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Collection bookkeeping
#[derive(Debug, Default)]
pub(crate) struct GcState {
    /// Allocation delta that triggers a cycle
    pub threshold: Option<u64>,
    /// A cycle already ran since the last commit
    pub done: bool,
    /// A cycle is running (or was handed to the worker)
    pub active: bool,
    /// Implicit cycles are disabled (inside commit, rollback or open)
    pub suppressed: bool,
    /// Worker channel when collection runs in the background
    pub signal: Option<Sender<GcSignal>>,
}

/// Engine state guarded by the allocator lock
pub(crate) struct Store {
    pub pool: Arc<PagePool>,
    pub geometry: Geometry,
    pub header: Header,

    /// Index pages changed since the last commit
    pub dirty_pages: DirtyPages,
    /// Handles in use in the working generation
    pub curr_index_size: u32,
    /// Handles in use in the committed generation
    pub committed_index_size: u32,

    pub used_size: u64,
    /// Bytes allocated since the last collection
    pub allocated_delta: u64,
    pub extension_quantum: u64,

    pub cursors: ScanCursors,
    /// Upper bound of the largest run (in quanta) each bitmap page may hold
    pub page_space: Vec<u32>,

    pub gc: GcState,
    /// Something changed since the last commit or rollback
    pub modified: bool,
    /// Record currently being written; never swept
    pub in_flight: Option<Oid>,

    pub catalog: Arc<RwLock<Catalog>>,
    pub cache: Arc<ObjectCache>,
}

impl Store {
    pub fn new(
        pool: Arc<PagePool>,
        geometry: Geometry,
        extension_quantum: u64,
        catalog: Arc<RwLock<Catalog>>,
        cache: Arc<ObjectCache>,
    ) -> Self {
        Self {
            pool,
            geometry,
            header: Header::default(),
            dirty_pages: DirtyPages::new(),
            curr_index_size: 0,
            committed_index_size: 0,
            used_size: 0,
            allocated_delta: 0,
            extension_quantum,
            cursors: ScanCursors::default(),
            page_space: Vec::new(),
            gc: GcState::default(),
            modified: false,
            in_flight: None,
            catalog,
            cache,
        }
    }

    // =========================================================================
    // Generations
    // =========================================================================

    /// Generation being built by the open transaction
    pub fn working(&self) -> &RootPage {
        &self.header.root[self.header.working()]
    }

    pub fn working_mut(&mut self) -> &mut RootPage {
        let w = self.header.working();
        &mut self.header.root[w]
    }

    /// Generation visible to readers
    pub fn committed(&self) -> &RootPage {
        &self.header.root[self.header.committed()]
    }

    /// Number of bitmap pages in the working generation
    pub fn bitmap_page_count(&self) -> u32 {
        self.working().bitmap_end - BITMAP_ID
    }

    // =========================================================================
    // Header
    // =========================================================================

    /// Copy the in-memory header into page 0
    pub fn write_header(&self) -> Result<()> {
        let header = &self.header;
        self.pool.write(0, |page| header.encode(page))
    }

    /// Set the crash marker before the first mutation of a transaction
    pub fn set_dirty(&mut self) -> Result<()> {
        self.modified = true;
        if !self.header.dirty {
            self.header.dirty = true;
            self.write_header()?;
            self.pool.flush()?;
        }
        Ok(())
    }
}
