//! Field Plans
//!
//! Precomputed walk of a payload layout. References and owned pages that
//! sit before the first variable-length field are read at fixed offsets;
//! the remaining fields are walked one by one.

use bytes::Buf;

use super::descriptor::FieldKind;
use crate::error::{AtlasError, Result};
use crate::layout::Oid;

#[derive(Debug, Clone, Default)]
pub struct FieldPlan {
    fixed_refs: Vec<usize>,
    fixed_pages: Vec<usize>,
    fixed_len: usize,
    tail: Vec<FieldKind>,
    has_references: bool,
    has_pages: bool,
}

/// OIDs found in one payload
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Links {
    pub references: Vec<Oid>,
    pub pages: Vec<Oid>,
}

impl FieldPlan {
    pub fn new(fields: &[FieldKind]) -> Self {
        let mut plan = FieldPlan::default();
        let mut offset = 0;
        let mut fields_iter = fields.iter();
        for field in fields_iter.by_ref() {
            match (field, field.fixed_width()) {
                (FieldKind::Reference, _) => plan.fixed_refs.push(offset),
                (FieldKind::Page, _) => plan.fixed_pages.push(offset),
                (_, None) => {
                    plan.tail.push(*field);
                    break;
                }
                _ => {}
            }
            offset += field.fixed_width().unwrap_or(0);
        }
        plan.tail.extend(fields_iter);
        plan.fixed_len = offset;

        plan.has_references = fields
            .iter()
            .any(|f| matches!(f, FieldKind::Reference | FieldKind::References));
        plan.has_pages = fields.iter().any(|f| matches!(f, FieldKind::Page));
        plan
    }

    pub fn has_references(&self) -> bool {
        self.has_references
    }

    pub fn has_pages(&self) -> bool {
        self.has_pages
    }

    /// Collect every non-null reference and owned page in `payload`
    pub fn links(&self, payload: &[u8]) -> Result<Links> {
        let mut links = Links::default();
        if payload.len() < self.fixed_len {
            return Err(truncated(payload.len()));
        }
        for &at in &self.fixed_refs {
            push_oid(&mut links.references, read_oid(&payload[at..]));
        }
        for &at in &self.fixed_pages {
            push_oid(&mut links.pages, read_oid(&payload[at..]));
        }

        let mut rest = &payload[self.fixed_len..];
        for field in &self.tail {
            match field {
                FieldKind::Scalar(width) => skip(&mut rest, *width as usize)?,
                FieldKind::Reference => push_oid(&mut links.references, take_u32(&mut rest)?),
                FieldKind::Page => push_oid(&mut links.pages, take_u32(&mut rest)?),
                FieldKind::Bytes => {
                    let len = take_u32(&mut rest)? as usize;
                    skip(&mut rest, len)?;
                }
                FieldKind::References => {
                    let count = take_u32(&mut rest)?;
                    for _ in 0..count {
                        push_oid(&mut links.references, take_u32(&mut rest)?);
                    }
                }
            }
        }
        Ok(links)
    }

    /// Owned pages only
    pub fn pages(&self, payload: &[u8]) -> Result<Vec<Oid>> {
        if self.has_pages {
            Ok(self.links(payload)?.pages)
        } else {
            Ok(Vec::new())
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn read_oid(mut src: &[u8]) -> Oid {
    src.get_u32()
}

fn push_oid(into: &mut Vec<Oid>, oid: Oid) {
    if oid != 0 {
        into.push(oid);
    }
}

fn take_u32(rest: &mut &[u8]) -> Result<u32> {
    if rest.remaining() < 4 {
        return Err(truncated(rest.remaining()));
    }
    Ok(rest.get_u32())
}

fn skip(rest: &mut &[u8], n: usize) -> Result<()> {
    if rest.remaining() < n {
        return Err(truncated(rest.remaining()));
    }
    rest.advance(n);
    Ok(())
}

fn truncated(left: usize) -> AtlasError {
    AtlasError::Corruption(format!("payload truncated ({} bytes left)", left))
}
