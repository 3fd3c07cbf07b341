//! # AtlasObj
//!
//! An embedded, single-file object store with:
//! - Shadow-paged transactions over a double-buffered object table
//! - Crash recovery by falling back to the last committed generation
//! - A bitmap space allocator with next-fit scanning
//! - Mark-sweep garbage collection, inline or on a worker thread
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │        (store lock, object cache, commit scheduling)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!      ┌────────────────┼─────────────────┬──────────────┐
//!      ▼                ▼                 ▼              ▼
//! ┌──────────┐   ┌─────────────┐   ┌────────────┐  ┌──────────┐
//! │   Txn    │   │ Object Table│   │ Collector  │  │ Catalog  │
//! │ (commit, │   │ (OID → pos, │   │ (mark from │  │ (type    │
//! │ rollback)│   │ generations)│   │  the root) │  │  layouts)│
//! └────┬─────┘   └──────┬──────┘   └─────┬──────┘  └──────────┘
//!      │                │                │
//!      └────────────────┼────────────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   Allocator   │
//!               │   (bitmap)    │
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐
//!               │   Page Pool   │
//!               │  (one file)   │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod layout;
pub mod page;

pub(crate) mod alloc;
pub(crate) mod index;
pub(crate) mod store;

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod gc;
pub mod txn;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cache::Record;
pub use catalog::{
    CompositeType, FieldKind, FieldPlan, OwnedPages, Payload, PayloadReader, Reclaimer, Tracer,
    TypeDescriptor,
};
pub use config::Config;
pub use engine::{Engine, StoreStats};
pub use error::{AtlasError, Result};
pub use gc::{MemoryUsage, TypeUsage};
pub use layout::Oid;
pub use page::{FileIo, MemFileIo, StdFileIo};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasObj
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
