//! Mark Phase
//!
//! Walks the committed object graph from the root object. Only committed
//! state is read, so marking can run without the store lock: nothing
//! reachable from the committed table is overwritten until the next
//! commit, and commits wait for the collector.
//!
//! Marks are kept per OID rather than per allocation quantum. Every live
//! record owns exactly one quantum run reached only through its OID, so
//! "OID marked" and "first quantum black" select the same records. The
//! explicit grey stack replaces the repeated passes over a grey bitmap:
//! an OID is pushed once when first marked (grey) and counts as black
//! once popped and scanned.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cache::Record;
use crate::catalog::{Catalog, Tracer, TypeInfo};
use crate::error::{AtlasError, Result};
use crate::layout::{Oid, Position, RecordHeader, BITMAP_ID, PAGE_SIZE, RECORD_HEADER_SIZE};
use crate::page::PagePool;
use crate::store::Store;

// =============================================================================
// Committed View
// =============================================================================

/// Read-only access to the committed generation
pub struct CommittedView {
    pool: Arc<PagePool>,
    index: u64,
    handles: u32,
    pub(crate) root_object: Oid,
    pub(crate) index_size: u32,
    pub(crate) working_index_size: u32,
    bitmap_end: Oid,
    bitmap_extent: Oid,
    default_bitmap_pages: u32,
}

impl Store {
    pub(crate) fn committed_view(&self) -> CommittedView {
        let committed = self.committed();
        CommittedView {
            pool: self.pool.clone(),
            index: committed.index,
            handles: self.committed_index_size,
            root_object: committed.root_object,
            index_size: committed.index_size,
            working_index_size: self.working().index_size,
            bitmap_end: committed.bitmap_end,
            bitmap_extent: committed.bitmap_extent,
            default_bitmap_pages: self.geometry.bitmap_pages(),
        }
    }
}

impl CommittedView {
    pub(crate) fn handles(&self) -> u32 {
        self.handles
    }

    pub(crate) fn pos(&self, oid: Oid) -> Result<Position> {
        if oid == 0 || oid >= self.handles {
            return Err(AtlasError::Consistency(format!(
                "reference to object {} outside the committed table",
                oid
            )));
        }
        let raw = self.pool.read_u64(self.index + oid as u64 * 8)?;
        Ok(Position::from_raw(raw))
    }

    pub(crate) fn record(&self, oid: Oid) -> Result<(RecordHeader, Record)> {
        let pos = self.pos(oid)?;
        if !pos.is_record() {
            return Err(AtlasError::Consistency(format!(
                "reference to object {} which is not a live record",
                oid
            )));
        }
        let raw = self.pool.read_bytes(pos.offset(), RECORD_HEADER_SIZE)?;
        let header = RecordHeader::decode(&raw);
        let payload = self.pool.read_bytes(
            pos.offset() + RECORD_HEADER_SIZE as u64,
            header.payload_len(),
        )?;
        let record = Record {
            oid,
            type_oid: header.type_oid,
            payload: payload.into(),
        };
        Ok((header, record))
    }

    pub(crate) fn page(&self, oid: Oid) -> Result<Vec<u8>> {
        let pos = self.pos(oid)?;
        if !pos.is_live_page() {
            return Err(AtlasError::Consistency(format!(
                "object {} is not a page",
                oid
            )));
        }
        self.pool.read_bytes(pos.offset(), PAGE_SIZE)
    }

    /// Committed bitmap pages in order
    pub(crate) fn bitmap_pages(&self) -> Result<Vec<Vec<u8>>> {
        let count = self.bitmap_end - BITMAP_ID;
        let mut pages = Vec::with_capacity(count as usize);
        for i in 0..count {
            let oid = if i < self.default_bitmap_pages {
                BITMAP_ID + i
            } else {
                self.bitmap_extent + (i - self.default_bitmap_pages)
            };
            pages.push(self.page(oid)?);
        }
        Ok(pages)
    }

    pub(crate) fn bitmap_page_count(&self) -> u32 {
        self.bitmap_end - BITMAP_ID
    }
}

// =============================================================================
// Marking
// =============================================================================

/// Dense set of OIDs
pub(crate) struct OidSet {
    words: Vec<u64>,
}

impl OidSet {
    pub fn new(capacity: u32) -> Self {
        Self {
            words: vec![0; (capacity as usize).div_ceil(64)],
        }
    }

    /// Add `oid`; returns false when it was already present
    pub fn insert(&mut self, oid: Oid) -> bool {
        let (word, bit) = (oid as usize / 64, oid % 64);
        let mask = 1u64 << bit;
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    pub fn contains(&self, oid: Oid) -> bool {
        let word = oid as usize / 64;
        word < self.words.len() && self.words[word] & (1u64 << (oid % 64)) != 0
    }
}

/// One record reached by the marker
pub(crate) struct Visit<'a> {
    pub header: RecordHeader,
    pub info: Option<&'a TypeInfo>,
    pub pages: usize,
}

/// Mark everything reachable from the committed root
pub(crate) fn mark(
    view: &CommittedView,
    catalog: &Arc<RwLock<Catalog>>,
    visit: &mut dyn FnMut(Visit<'_>),
) -> Result<OidSet> {
    let mut marked = OidSet::new(view.handles());
    let mut grey = Vec::new();
    mark_oid(view, &mut marked, &mut grey, view.root_object)?;

    while let Some(oid) = grey.pop() {
        let (header, record) = view.record(oid)?;
        if record.type_oid == 0 {
            visit(Visit {
                header,
                info: None,
                pages: 0,
            });
            continue;
        }
        mark_oid(view, &mut marked, &mut grey, record.type_oid)?;
        let info = catalog.read().get(record.type_oid).ok_or_else(|| {
            AtlasError::UnknownType(format!(
                "object {} has unregistered type {}",
                oid, record.type_oid
            ))
        })?;

        if info.plan.has_references() {
            for reference in info.plan.links(&record.payload)?.references {
                mark_oid(view, &mut marked, &mut grey, reference)?;
            }
        }
        let mut pages = 0;
        if let Some(hook) = &info.hook {
            let mut tracer = Tracer::new(view);
            hook.trace(&record, &info.plan, &mut tracer)?;
            pages = tracer.pages.len();
            for reference in tracer.references {
                mark_oid(view, &mut marked, &mut grey, reference)?;
            }
        }
        visit(Visit {
            header,
            info: Some(info.as_ref()),
            pages,
        });
    }
    Ok(marked)
}

fn mark_oid(
    view: &CommittedView,
    marked: &mut OidSet,
    grey: &mut Vec<Oid>,
    oid: Oid,
) -> Result<()> {
    if oid == 0 {
        return Ok(());
    }
    let pos = view.pos(oid)?;
    if !pos.is_record() {
        return Err(AtlasError::Consistency(format!(
            "reference to object {} which is not a live record",
            oid
        )));
    }
    if marked.insert(oid) {
        grey.push(oid);
    }
    Ok(())
}
