//! Type Descriptors
//!
//! A descriptor names a record type and lists its fields in payload
//! order. Descriptors are themselves records (type OID 0) chained from
//! the root metadata.
//!
//! ## Stored Format
//! ```text
//! ┌───────────────────────────────────────┬──────────┐
//! │ bincode(name, fields, next)           │ crc32 BE │
//! └───────────────────────────────────────┴──────────┘
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{AtlasError, Result};
use crate::layout::Oid;

/// Kind of one payload field. All integers are big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain bytes of a fixed width
    Scalar(u16),
    /// OID of another record (0 = none)
    Reference,
    /// OID of a page object owned by the record (0 = none)
    Page,
    /// u32 length followed by that many bytes
    Bytes,
    /// u32 count followed by that many OIDs
    References,
}

impl FieldKind {
    /// Width in bytes when the field has a fixed size
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            FieldKind::Scalar(width) => Some(*width as usize),
            FieldKind::Reference | FieldKind::Page => Some(4),
            FieldKind::Bytes | FieldKind::References => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub fields: Vec<FieldKind>,
}

/// What is actually written into the descriptor record
#[derive(Serialize, Deserialize)]
struct StoredDescriptor {
    name: String,
    fields: Vec<FieldKind>,
    next: Oid,
}

impl TypeDescriptor {
    pub fn new(name: impl Into<String>, fields: Vec<FieldKind>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Encode with a link to the `next` descriptor of the chain
    pub fn encode(&self, next: Oid) -> Result<Vec<u8>> {
        let stored = StoredDescriptor {
            name: self.name.clone(),
            fields: self.fields.clone(),
            next,
        };
        let mut buf = bincode::serialize(&stored)?;
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_be_bytes());
        Ok(buf)
    }

    /// Decode a descriptor and the OID of the next one
    pub fn decode(buf: &[u8]) -> Result<(Self, Oid)> {
        if buf.len() < 4 {
            return Err(AtlasError::Corruption(
                "type descriptor shorter than its checksum".to_string(),
            ));
        }
        let (body, tail) = buf.split_at(buf.len() - 4);
        let expected = u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let actual = crc32fast::hash(body);
        if expected != actual {
            return Err(AtlasError::Corruption(format!(
                "type descriptor checksum mismatch: expected {:08x}, found {:08x}",
                expected, actual
            )));
        }
        let stored: StoredDescriptor = bincode::deserialize(body)?;
        Ok((
            Self {
                name: stored.name,
                fields: stored.fields,
            },
            stored.next,
        ))
    }
}
