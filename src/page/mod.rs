//! Page Store Module
//!
//! The file and page cache layer every other component goes through.
//!
//! ## Structure
//! ```text
//! ┌──────────────────────────┐
//! │ PagePool                 │  page-granular cache, dirty tracking
//! └────────────┬─────────────┘
//!              ▼
//! ┌──────────────────────────┐
//! │ FileIo                   │  StdFileIo (disk) / MemFileIo (tests)
//! └──────────────────────────┘
//! ```

pub mod file;
pub mod pool;

pub use file::{FileIo, MemFileIo, StdFileIo};
pub use pool::PagePool;
