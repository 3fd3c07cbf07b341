//! Garbage Collection Module
//!
//! Mark-sweep over the committed generation. Records are reachable from
//! the root object through layout references and composite hooks; every
//! unreachable record older than the open transaction is freed into the
//! working generation.
//!
//! ## Triggers
//! - `Engine::collect`: always runs synchronously
//! - allocation threshold: an allocation at a safe point that crosses the
//!   threshold runs a cycle inline, or signals the worker when background
//!   collection is enabled
//! - out of space: before growing the file, one cycle is tried if none
//!   ran since the last commit

mod mark;
mod sweep;
mod usage;
pub(crate) mod worker;

pub use mark::CommittedView;
pub use usage::{MemoryUsage, TypeUsage};

use crate::error::Result;
use crate::store::Store;

/// Requests understood by the background collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcSignal {
    Collect,
    Stop,
}

impl Store {
    /// Implicit collection; returns the number freed when a cycle ran here
    pub(crate) fn collect_now(&mut self) -> Result<Option<usize>> {
        if self.gc.done || self.gc.active {
            return Ok(None);
        }
        self.gc.active = true;
        let sent = self
            .gc
            .signal
            .as_ref()
            .map(|signal| signal.send(GcSignal::Collect).is_ok());
        match sent {
            Some(true) => return Ok(None),
            Some(false) => {
                tracing::warn!("Background collector is gone, collecting inline");
                self.gc.signal = None;
            }
            None => {}
        }
        let result = self.run_collection();
        self.gc.active = false;
        result.map(Some)
    }

    /// One full cycle under the store lock
    pub(crate) fn run_collection(&mut self) -> Result<usize> {
        let view = self.committed_view();
        let marked = mark::mark(&view, &self.catalog, &mut |_| {})?;
        self.sweep(&marked)
    }
}
