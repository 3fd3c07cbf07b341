//! Object Index Module
//!
//! Maps object ids to position descriptors. Each generation owns a full
//! copy of the table; the working copy is written, the committed copy is
//! what survives a crash.
//!
//! ## Slot Layout
//! ```text
//!  63                                   3   2   1   0
//! ┌──────────────────────────────────────┬───┬───┬───┐
//! │ offset (or next free id)             │ F │ M │ P │
//! └──────────────────────────────────────┴───┴───┴───┘
//!   F = free handle   M = modified since commit   P = page object
//! ```

mod dirty;
mod objects;
mod table;

pub use dirty::DirtyPages;
