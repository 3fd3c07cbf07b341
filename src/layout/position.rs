//! Position Descriptor
//!
//! One 8-byte object-table slot: a quantum-aligned file offset with three
//! flag bits packed into its low bits. A free slot stores the next free OID
//! instead of an offset.

use super::Oid;

pub const PAGE_OBJECT_FLAG: u64 = 1;
pub const MODIFIED_FLAG: u64 = 2;
pub const FREE_HANDLE_FLAG: u64 = 4;
pub const FLAGS_MASK: u64 = 7;
pub const FLAGS_BITS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Position(u64);

impl Position {
    pub const NULL: Position = Position(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    /// A record position
    pub const fn object(offset: u64) -> Self {
        Self(offset)
    }

    /// A page object position
    pub const fn page(offset: u64) -> Self {
        Self(offset | PAGE_OBJECT_FLAG)
    }

    /// A free slot linking to `next` in the free handle list
    pub const fn free_link(next: Oid) -> Self {
        Self(((next as u64) << FLAGS_BITS) | FREE_HANDLE_FLAG)
    }

    pub const fn offset(self) -> u64 {
        self.0 & !FLAGS_MASK
    }

    pub const fn flags(self) -> u64 {
        self.0 & FLAGS_MASK
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    pub const fn is_free(self) -> bool {
        self.0 & FREE_HANDLE_FLAG != 0
    }

    pub const fn is_page_object(self) -> bool {
        self.0 & PAGE_OBJECT_FLAG != 0
    }

    pub const fn is_modified(self) -> bool {
        self.0 & MODIFIED_FLAG != 0
    }

    /// Live record: placed, neither free nor a page object
    pub const fn is_record(self) -> bool {
        self.0 != 0 && self.0 & (FREE_HANDLE_FLAG | PAGE_OBJECT_FLAG) == 0
    }

    /// Live page object
    pub const fn is_live_page(self) -> bool {
        self.0 & (FREE_HANDLE_FLAG | PAGE_OBJECT_FLAG) == PAGE_OBJECT_FLAG
    }

    /// Next OID of the free list (only meaningful for free slots)
    pub const fn next_free(self) -> Oid {
        (self.0 >> FLAGS_BITS) as Oid
    }

    pub const fn with_modified(self) -> Self {
        Self(self.0 | MODIFIED_FLAG)
    }

    pub const fn without_modified(self) -> Self {
        Self(self.0 & !MODIFIED_FLAG)
    }

    /// Same flags at another offset
    pub const fn relocated(self, offset: u64) -> Self {
        Self(offset | self.flags())
    }
}
