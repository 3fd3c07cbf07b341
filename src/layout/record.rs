//! Record Header
//!
//! Every record starts with its total size (header included) and the OID of
//! its type descriptor. Type OID 0 marks a type descriptor itself.

use bytes::{Buf, BufMut};

use super::Oid;

pub const RECORD_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Size in bytes including this header
    pub size: u32,
    pub type_oid: Oid,
}

impl RecordHeader {
    pub fn new(payload_len: usize, type_oid: Oid) -> Self {
        Self {
            size: (payload_len + RECORD_HEADER_SIZE) as u32,
            type_oid,
        }
    }

    pub fn encode(&self, out: &mut [u8]) {
        let mut out = &mut out[..RECORD_HEADER_SIZE];
        out.put_u32(self.size);
        out.put_u32(self.type_oid);
    }

    pub fn decode(src: &[u8]) -> Self {
        let mut src = &src[..RECORD_HEADER_SIZE];
        Self {
            size: src.get_u32(),
            type_oid: src.get_u32(),
        }
    }

    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(RECORD_HEADER_SIZE)
    }
}
