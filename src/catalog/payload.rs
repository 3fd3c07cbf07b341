//! Payload Builder and Reader
//!
//! Helpers for encoding payloads that follow a field layout.
//!
//! ```text
//! let payload = Payload::new()
//!     .u32(7)
//!     .reference(next)
//!     .bytes(b"name")
//!     .finish();
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{AtlasError, Result};
use crate::layout::Oid;

#[derive(Debug, Default)]
pub struct Payload {
    buf: BytesMut,
}

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.buf.put_u16(value);
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.buf.put_u32(value);
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.buf.put_u64(value);
        self
    }

    /// Raw bytes of a `Scalar` field
    pub fn scalar(mut self, value: &[u8]) -> Self {
        self.buf.put_slice(value);
        self
    }

    pub fn reference(self, oid: Oid) -> Self {
        self.u32(oid)
    }

    pub fn page(self, oid: Oid) -> Self {
        self.u32(oid)
    }

    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
        self
    }

    pub fn references(mut self, oids: &[Oid]) -> Self {
        self.buf.put_u32(oids.len() as u32);
        for &oid in oids {
            self.buf.put_u32(oid);
        }
        self
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Sequential reader over a payload
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, n: usize) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(AtlasError::Serialization(format!(
                "payload needs {} more bytes, {} left",
                n,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn u32(&mut self) -> Result<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64())
    }

    pub fn scalar(&mut self, width: usize) -> Result<&'a [u8]> {
        self.need(width)?;
        let (value, rest) = self.buf.split_at(width);
        self.buf = rest;
        Ok(value)
    }

    pub fn reference(&mut self) -> Result<Oid> {
        self.u32()
    }

    pub fn page(&mut self) -> Result<Oid> {
        self.u32()
    }

    pub fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.scalar(len)
    }

    pub fn references(&mut self) -> Result<Vec<Oid>> {
        let count = self.u32()? as usize;
        self.need(count * 4)?;
        Ok((0..count).map(|_| self.buf.get_u32()).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
