//! Type Catalog Module
//!
//! Registry of record types. Every record names its type by the OID of a
//! descriptor record; the catalog maps those OIDs to layouts the collector
//! can walk, plus optional in-memory hooks for composite types.
//!
//! ## Components
//! - `descriptor`: persisted `TypeDescriptor` and `FieldKind`
//! - `plan`: precomputed `FieldPlan` used by the marker
//! - `composite`: `CompositeType` hooks, `Tracer`, `Reclaimer`
//! - `payload`: `Payload` builder and `PayloadReader`

mod composite;
mod descriptor;
mod payload;
mod persist;
mod plan;

use std::collections::HashMap;
use std::sync::Arc;

pub use composite::{CompositeType, OwnedPages, Reclaimer, Tracer};
pub use descriptor::{FieldKind, TypeDescriptor};
pub use payload::{Payload, PayloadReader};
pub use plan::{FieldPlan, Links};

use crate::layout::Oid;

/// A registered type
pub struct TypeInfo {
    pub oid: Oid,
    pub descriptor: TypeDescriptor,
    pub plan: FieldPlan,
    pub hook: Option<Arc<dyn CompositeType>>,
}

impl std::fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeInfo")
            .field("oid", &self.oid)
            .field("descriptor", &self.descriptor)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

#[derive(Default)]
pub struct Catalog {
    by_oid: HashMap<Oid, Arc<TypeInfo>>,
    by_name: HashMap<String, Oid>,
    /// Hooks by type name; they outlive reloads of the descriptor list
    hooks: HashMap<String, Arc<dyn CompositeType>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, oid: Oid) -> Option<Arc<TypeInfo>> {
        self.by_oid.get(&oid).cloned()
    }

    pub fn lookup(&self, name: &str) -> Option<Oid> {
        self.by_name.get(name).copied()
    }

    /// Add a descriptor stored at `oid`
    pub fn insert(&mut self, oid: Oid, descriptor: TypeDescriptor) -> Arc<TypeInfo> {
        let plan = FieldPlan::new(&descriptor.fields);
        let hook = match self.hooks.get(&descriptor.name) {
            Some(hook) => Some(hook.clone()),
            None if plan.has_pages() => Some(Arc::new(OwnedPages) as Arc<dyn CompositeType>),
            None => None,
        };
        let info = Arc::new(TypeInfo {
            oid,
            descriptor,
            plan,
            hook,
        });
        self.by_name.insert(info.descriptor.name.clone(), oid);
        self.by_oid.insert(oid, info.clone());
        info
    }

    /// Attach a hook to `name`, now and after any reload
    pub fn set_hook(&mut self, name: &str, hook: Arc<dyn CompositeType>) {
        self.hooks.insert(name.to_string(), hook);
        if let Some(oid) = self.lookup(name) {
            if let Some(info) = self.by_oid.remove(&oid) {
                let descriptor = info.descriptor.clone();
                self.insert(oid, descriptor);
            }
        }
    }

    /// Replace all descriptors, keeping hooks
    pub fn reset(&mut self, entries: Vec<(Oid, TypeDescriptor)>) {
        self.by_oid.clear();
        self.by_name.clear();
        for (oid, descriptor) in entries {
            self.insert(oid, descriptor);
        }
    }

    pub fn len(&self) -> usize {
        self.by_oid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_oid.is_empty()
    }

    pub fn types(&self) -> impl Iterator<Item = &Arc<TypeInfo>> {
        self.by_oid.values()
    }
}
