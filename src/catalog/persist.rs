//! Descriptor chain in the store
//!
//! Descriptors are records of type 0 linked from `class_desc_list`, newest
//! first.

use std::collections::HashSet;

use tracing::debug;

use super::descriptor::TypeDescriptor;
use crate::error::{AtlasError, Result};
use crate::layout::Oid;
use crate::store::Store;

impl Store {
    /// Rebuild the catalog from the descriptor chain of the working generation
    pub(crate) fn reload_catalog(&mut self) -> Result<()> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        let mut oid = self.working().class_desc_list;
        while oid != 0 {
            if !seen.insert(oid) {
                return Err(AtlasError::Corruption(format!(
                    "type descriptor chain loops at object {}",
                    oid
                )));
            }
            let (header, payload) = self.read_record(oid)?;
            if header.type_oid != 0 {
                return Err(AtlasError::Corruption(format!(
                    "object {} in the descriptor chain is not a descriptor",
                    oid
                )));
            }
            let (descriptor, next) = TypeDescriptor::decode(&payload)?;
            entries.push((oid, descriptor));
            oid = next;
        }
        debug!(types = entries.len(), "Loaded type catalog");
        self.catalog.write().reset(entries);
        Ok(())
    }

    /// Persist a descriptor at the head of the chain
    pub(crate) fn store_descriptor(&mut self, descriptor: &TypeDescriptor) -> Result<Oid> {
        let next = self.working().class_desc_list;
        let payload = descriptor.encode(next)?;
        let oid = self.insert_record(0, &payload)?;
        self.working_mut().class_desc_list = oid;
        Ok(oid)
    }
}
