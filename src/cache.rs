//! Object Cache
//!
//! Bounded map from OID to the last loaded or written record. Lookups of a
//! resident record take only the read lock; inserts evict the oldest
//! entry once the bound is reached.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::layout::Oid;

/// A loaded record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub oid: Oid,
    pub type_oid: Oid,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<Oid, Arc<Record>>,
    /// Insertion order, oldest first (may hold stale OIDs)
    order: VecDeque<Oid>,
}

#[derive(Debug)]
pub struct ObjectCache {
    capacity: usize,
    inner: RwLock<CacheInner>,
}

impl ObjectCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    pub fn get(&self, oid: Oid) -> Option<Arc<Record>> {
        self.inner.read().entries.get(&oid).cloned()
    }

    pub fn put(&self, record: Arc<Record>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.write();
        let oid = record.oid;
        if inner.entries.insert(oid, record).is_none() {
            inner.order.push_back(oid);
        }
        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(victim) if victim != oid => {
                    inner.entries.remove(&victim);
                }
                Some(_) => inner.order.push_back(oid),
                None => break,
            }
        }
        if inner.order.len() > self.capacity * 2 {
            let CacheInner { entries, order } = &mut *inner;
            order.retain(|oid| entries.contains_key(oid));
        }
    }

    pub fn remove(&self, oid: Oid) {
        self.inner.write().entries.remove(&oid);
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
