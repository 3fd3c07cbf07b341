//! Database Header
//!
//! Page 0 holds the generation selector, the crash marker and two
//! generation records.
//!
//! ## Format
//! ```text
//! ┌──────┬───────┬─────────────┬────────────────┬────────────────┐
//! │ curr │ dirty │ initialized │ RootPage[0]    │ RootPage[1]    │
//! │ 1 B  │ 1 B   │ 1 B         │ 64 B           │ 64 B           │
//! └──────┴───────┴─────────────┴────────────────┴────────────────┘
//! ```

use bytes::{Buf, BufMut};

use super::Oid;
use crate::error::Result;
use crate::AtlasError;

pub const ROOT_PAGE_SIZE: usize = 64;
pub const HEADER_SIZE: usize = 3 + 2 * ROOT_PAGE_SIZE;

/// One generation of root metadata
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootPage {
    /// Database file size
    pub size: u64,
    /// Offset of the object table
    pub index: u64,
    /// Offset of the other generation's object table
    pub shadow_index: u64,
    /// Bytes used by allocated objects
    pub used_size: u64,
    /// Capacity of the object table, in handles
    pub index_size: u32,
    pub shadow_index_size: u32,
    /// Handles in use (high water mark)
    pub index_used: u32,
    /// Head of the free handle list
    pub free_list: Oid,
    /// One past the OID of the last bitmap page
    pub bitmap_end: Oid,
    pub root_object: Oid,
    /// Head of the type descriptor list
    pub class_desc_list: Oid,
    /// First OID of the extended bitmap extent, 0 when not extended
    pub bitmap_extent: Oid,
}

impl RootPage {
    fn encode(&self, out: &mut impl BufMut) {
        out.put_u64(self.size);
        out.put_u64(self.index);
        out.put_u64(self.shadow_index);
        out.put_u64(self.used_size);
        out.put_u32(self.index_size);
        out.put_u32(self.shadow_index_size);
        out.put_u32(self.index_used);
        out.put_u32(self.free_list);
        out.put_u32(self.bitmap_end);
        out.put_u32(self.root_object);
        out.put_u32(self.class_desc_list);
        out.put_u32(self.bitmap_extent);
    }

    fn decode(src: &mut impl Buf) -> Self {
        Self {
            size: src.get_u64(),
            index: src.get_u64(),
            shadow_index: src.get_u64(),
            used_size: src.get_u64(),
            index_size: src.get_u32(),
            shadow_index_size: src.get_u32(),
            index_used: src.get_u32(),
            free_list: src.get_u32(),
            bitmap_end: src.get_u32(),
            root_object: src.get_u32(),
            class_desc_list: src.get_u32(),
            bitmap_extent: src.get_u32(),
        }
    }
}

/// Contents of page 0
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// Which generation is authoritative for readers (0 or 1)
    pub curr: u8,
    /// Set while the file may contain uncommitted state
    pub dirty: bool,
    pub initialized: bool,
    pub root: [RootPage; 2],
}

impl Header {
    /// Index of the generation being built by the open transaction
    pub fn working(&self) -> usize {
        1 - self.curr as usize
    }

    /// Index of the committed generation
    pub fn committed(&self) -> usize {
        self.curr as usize
    }

    /// Serialize into the first `HEADER_SIZE` bytes of `page`
    pub fn encode(&self, page: &mut [u8]) {
        let mut out = &mut page[..HEADER_SIZE];
        out.put_u8(self.curr);
        out.put_u8(self.dirty as u8);
        out.put_u8(self.initialized as u8);
        for root in &self.root {
            root.encode(&mut out);
        }
    }

    /// Parse page 0, rejecting an invalid generation selector
    pub fn decode(page: &[u8]) -> Result<Self> {
        if page.len() < HEADER_SIZE {
            return Err(AtlasError::Corruption(format!(
                "header truncated: {} of {} bytes",
                page.len(),
                HEADER_SIZE
            )));
        }
        let mut src = &page[..HEADER_SIZE];
        let curr = src.get_u8();
        let dirty = src.get_u8() != 0;
        let initialized = src.get_u8() != 0;
        if curr > 1 {
            return Err(AtlasError::Corruption(format!(
                "invalid generation selector {}",
                curr
            )));
        }
        let first = RootPage::decode(&mut src);
        let second = RootPage::decode(&mut src);
        Ok(Self {
            curr,
            dirty,
            initialized,
            root: [first, second],
        })
    }
}
