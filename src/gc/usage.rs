//! Memory Usage
//!
//! Reuses the marker to account for every reachable record of the
//! committed generation, grouped by type.

use std::collections::BTreeMap;

use super::mark::{mark, Visit};
use crate::error::Result;
use crate::layout::{align_quantum, PAGE_SIZE, QUANTUM};
use crate::store::Store;

/// Counters for one group of objects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeUsage {
    pub instances: u64,
    /// Bytes requested (record headers and owned pages included)
    pub total_size: u64,
    /// Bytes actually taken, rounded to the allocation quantum
    pub allocated_size: u64,
}

impl TypeUsage {
    fn add(&mut self, total: u64, allocated: u64) {
        self.instances += 1;
        self.total_size += total;
        self.allocated_size += allocated;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Plain records by type name
    pub types: BTreeMap<String, TypeUsage>,
    /// Records whose type has a composite hook, with their owned pages
    pub composites: TypeUsage,
    /// Type descriptor records
    pub descriptors: TypeUsage,
    /// Object tables, bitmap pages and the header page; `allocated_size`
    /// is everything the committed bitmap marks as used
    pub system: TypeUsage,
}

impl Store {
    pub(crate) fn memory_usage(&self) -> Result<MemoryUsage> {
        let view = self.committed_view();
        let mut usage = MemoryUsage::default();

        let mut visit = |visit: Visit<'_>| {
            let size = visit.header.size as u64;
            let aligned = align_quantum(size);
            match visit.info {
                None => usage.descriptors.add(size, aligned),
                Some(info) if info.hook.is_some() => {
                    let pages = (visit.pages * PAGE_SIZE) as u64;
                    usage.composites.add(size + pages, aligned + pages);
                }
                Some(info) => usage
                    .types
                    .entry(info.descriptor.name.clone())
                    .or_default()
                    .add(size, aligned),
            }
        };
        mark(&view, &self.catalog, &mut visit)?;

        let allocated_bits: u64 = view
            .bitmap_pages()?
            .iter()
            .flat_map(|page| page.iter())
            .map(|byte| byte.count_ones() as u64)
            .sum();
        usage.system = TypeUsage {
            instances: view.index_size as u64,
            total_size: (view.index_size as u64 + view.working_index_size as u64) * 8
                + view.bitmap_page_count() as u64 * PAGE_SIZE as u64
                + PAGE_SIZE as u64,
            allocated_size: allocated_bits * QUANTUM,
        };
        Ok(usage)
    }
}
