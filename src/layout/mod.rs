//! On-disk Layout Module
//!
//! Bit-exact description of everything the engine writes to the file.
//!
//! ## File Format
//! ```text
//! ┌──────────────┬───────────────┬───────────────┬────────────┬──────────────┐
//! │ Page 0       │ Index (gen 0) │ Index (gen 1) │ Bitmap     │ Objects ...  │
//! │ Header       │ 8 B per OID   │ 8 B per OID   │ 1 bit/32 B │              │
//! └──────────────┴───────────────┴───────────────┴────────────┴──────────────┘
//! ```
//!
//! Everything after page 0 is ordinary allocated space: index copies and
//! bitmap pages move around exactly like records do.
//!
//! All integers are stored big-endian.

pub mod header;
pub mod position;
pub mod record;

pub use header::{Header, RootPage, HEADER_SIZE, ROOT_PAGE_SIZE};
pub use position::Position;
pub use record::{RecordHeader, RECORD_HEADER_SIZE};

// =============================================================================
// Constants
// =============================================================================

/// Object identifier; 0 is the null handle
pub type Oid = u32;

pub const PAGE_BITS: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;

pub const QUANTUM_BITS: u32 = 5;
/// Allocation granularity: every allocation is rounded up to this
pub const QUANTUM: u64 = 1 << QUANTUM_BITS;

/// Address bits described by one bitmap page (4096 B * 8 bits * 32 B = 1 MiB)
pub const SEGMENT_BITS: u32 = PAGE_BITS + 3 + QUANTUM_BITS;

/// Bits in one bitmap page
pub const BITS_PER_PAGE: u32 = (PAGE_SIZE * 8) as u32;

/// Bitmap bytes describing one page of space
pub const PAGE_BITMAP_BYTES: usize = PAGE_SIZE / QUANTUM as usize / 8;

pub const HANDLES_PER_PAGE_BITS: u32 = PAGE_BITS - 3;
pub const HANDLES_PER_PAGE: u32 = 1 << HANDLES_PER_PAGE_BITS;

pub const INVALID_ID: Oid = 0;
/// OID of the first bitmap page
pub const BITMAP_ID: Oid = 1;

/// Round `size` up to the allocation quantum
pub const fn align_quantum(size: u64) -> u64 {
    (size + QUANTUM - 1) & !(QUANTUM - 1)
}

/// Round `size` up to a whole number of pages
pub const fn align_page(size: u64) -> u64 {
    (size + PAGE_SIZE as u64 - 1) & !(PAGE_SIZE as u64 - 1)
}

// =============================================================================
// Geometry
// =============================================================================

/// Size of the bitmap address space
///
/// The default bitmap is described by OIDs `1..first_user_id()`. Once the
/// file outgrows it, further bitmap pages get OIDs from an extent reserved
/// in the object table (`RootPage::bitmap_extent`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    offset_bits: u32,
    large_offset_bits: u32,
}

impl Geometry {
    pub fn new(offset_bits: u32, large_offset_bits: u32) -> Self {
        Self {
            offset_bits,
            large_offset_bits,
        }
    }

    /// Bitmap pages addressable without the extent
    pub fn bitmap_pages(&self) -> u32 {
        1 << (self.offset_bits - SEGMENT_BITS)
    }

    /// Bitmap pages addressable in extended mode
    pub fn large_bitmap_pages(&self) -> u32 {
        1 << (self.large_offset_bits - SEGMENT_BITS)
    }

    /// OIDs handed out by the extended-mode extent
    pub fn extent_size(&self) -> u32 {
        self.large_bitmap_pages() - self.bitmap_pages()
    }

    /// First OID available to records and page objects
    pub fn first_user_id(&self) -> Oid {
        BITMAP_ID + self.bitmap_pages()
    }

    /// Largest file offset reachable in extended mode
    pub fn max_offset(&self) -> u64 {
        1u64 << self.large_offset_bits
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::new(32, 40)
    }
}
