//! Transaction Module
//!
//! Shadow-paged transactions over two generations of root metadata.
//!
//! ## Generations
//! ```text
//!              header.curr
//!                   │
//!   ┌───────────────▼──────────┐     ┌──────────────────────────┐
//!   │ committed generation     │     │ working generation       │
//!   │ (what a crash restores)  │     │ (open transaction)       │
//!   │ index ──► table A        │     │ index ──► table B        │
//!   │ shadow ─► table B        │     │ shadow ─► table A        │
//!   └──────────────────────────┘     └──────────────────────────┘
//! ```
//! Objects reachable from the committed table are never overwritten; the
//! working generation writes only into space its own bitmap allocated.
//!
//! ## Components
//! - `recovery`: format a new file, load or repair an existing one
//! - `commit`: the two-flush switch and close
//! - `rollback`: discard the working generation
//! - `batch`: deferred (grouped) commits

mod batch;
mod commit;
mod recovery;
mod rollback;

pub use batch::CommitSchedule;
