//! Dirty Index Pages
//!
//! Tracks which object-table pages changed since the last commit, so
//! commit only has to diff and copy those pages between generations.

use std::collections::BTreeSet;

use crate::layout::{Oid, HANDLES_PER_PAGE_BITS};

#[derive(Debug, Default)]
pub struct DirtyPages {
    pages: BTreeSet<u32>,
}

impl DirtyPages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the table page holding `oid`
    pub fn mark(&mut self, oid: Oid) {
        self.pages.insert(oid >> HANDLES_PER_PAGE_BITS);
    }

    /// Dirty page numbers in ascending order
    pub fn pages(&self) -> Vec<u32> {
        self.pages.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}
