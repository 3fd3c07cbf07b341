//! Space Allocator Module
//!
//! Quantum-granular allocation over a bitmap that is itself stored in
//! page objects, so bitmap pages are shadowed by the same copy-on-write
//! rules as the data they describe.
//!
//! ## Structure
//! ```text
//! ┌──────────────┐   hole tables, cursors, page hints
//! │  allocator   │──────────────────────────────┐
//! └──────┬───────┘                              │
//!        │ no hole                              ▼
//! ┌──────▼───────┐                      ┌──────────────┐
//! │   extend     │  new bitmap pages    │ reservations │
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! Every offset handed out is a multiple of 32 bytes; requests whose size
//! is a multiple of the page size are page aligned.

mod allocator;
mod extend;
mod holes;
mod reserve;

pub(crate) use allocator::allocator_image;
pub(crate) use reserve::Reservations;
