//! Background Collector
//!
//! A thread that runs collection cycles on request, so the allocation that
//! crossed the threshold does not pay for the mark phase.
//!
//! ## Cycle
//! ```text
//! gc_lock ──► snapshot committed view (store lock, brief)
//!         ──► mark (no store lock)
//!         ──► sweep (store lock)
//! ```
//! Commits take `gc_lock` first, so the committed generation cannot change
//! while a cycle is marking.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::mark::mark;
use super::GcSignal;
use crate::engine::Shared;
use crate::error::Result;

/// Start the worker; stop it by sending `GcSignal::Stop`
pub(crate) fn spawn(shared: Arc<Shared>) -> Result<(Sender<GcSignal>, JoinHandle<()>)> {
    let (tx, rx) = channel::unbounded();
    let handle = thread::Builder::new()
        .name("atlasobj-gc".to_string())
        .spawn(move || run(shared, rx))?;
    Ok((tx, handle))
}

fn run(shared: Arc<Shared>, rx: Receiver<GcSignal>) {
    tracing::debug!("Background collector started");
    while let Ok(signal) = rx.recv() {
        match signal {
            GcSignal::Stop => break,
            GcSignal::Collect => match cycle(&shared) {
                Ok(Some(freed)) => {
                    tracing::debug!("Background collection freed {} records", freed)
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!("Background collection failed: {}", e);
                    if let Some(store) = shared.state.lock().as_mut() {
                        store.gc.active = false;
                    }
                }
            },
        }
    }
    tracing::debug!("Background collector stopped");
}

fn cycle(shared: &Shared) -> Result<Option<usize>> {
    let _gc = shared.gc_lock.lock();

    let view = match shared.state.lock().as_ref() {
        Some(store) => store.committed_view(),
        None => return Ok(None),
    };
    let marked = mark(&view, &shared.catalog, &mut |_| {})?;

    let mut state = shared.state.lock();
    match state.as_mut() {
        Some(store) => store.sweep(&marked).map(Some),
        None => Ok(None),
    }
}
