//! Tests for the Type Catalog
//!
//! These tests verify:
//! - Registering a type is idempotent for the same layout
//! - Conflicting layouts under one name are rejected
//! - Types persist across reopen and keep their descriptor OIDs
//! - Payloads are checked against their type's layout
//! - Composite hooks survive a catalog reload
//! - Payload builder and reader agree on the encoding

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use atlasobj::{
    AtlasError, CompositeType, Config, Engine, FieldKind, FieldPlan, FileIo, MemFileIo, Payload,
    PayloadReader, Reclaimer, Record, Result, TypeDescriptor,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_mem_engine() -> (Arc<MemFileIo>, Engine) {
    let file = Arc::new(MemFileIo::new());
    let engine = Engine::new(Config::default()).unwrap();
    engine.open_with_file(file.clone() as Arc<dyn FileIo>).unwrap();
    (file, engine)
}

fn person_fields() -> Vec<FieldKind> {
    vec![
        FieldKind::Scalar(2),
        FieldKind::Bytes,
        FieldKind::Reference,
        FieldKind::References,
    ]
}

// =============================================================================
// Registration Tests
// =============================================================================

#[test]
fn test_register_is_idempotent() {
    let (_file, engine) = setup_mem_engine();

    let first = engine.register_type("person", person_fields()).unwrap();
    let second = engine.register_type("person", person_fields()).unwrap();

    assert_eq!(first, second);
    assert_eq!(engine.type_oid("person"), Some(first));
}

#[test]
fn test_conflicting_layout_is_rejected() {
    let (_file, engine) = setup_mem_engine();
    engine.register_type("person", person_fields()).unwrap();

    let result = engine.register_type("person", vec![FieldKind::Bytes]);

    assert!(matches!(result, Err(AtlasError::Consistency(_))));
}

#[test]
fn test_distinct_types_get_distinct_oids() {
    let (_file, engine) = setup_mem_engine();

    let a = engine.register_type("a", vec![FieldKind::Scalar(8)]).unwrap();
    let b = engine.register_type("b", vec![FieldKind::Scalar(8)]).unwrap();

    assert_ne!(a, b);
    assert_eq!(engine.type_oid("missing"), None);
}

#[test]
fn test_types_persist_across_reopen() {
    let (file, engine) = setup_mem_engine();
    let person = engine.register_type("person", person_fields()).unwrap();
    let tag = engine.register_type("tag", vec![FieldKind::Bytes]).unwrap();
    engine.close().unwrap();

    let reopened = Engine::new(Config::default()).unwrap();
    reopened.open_with_file(file as Arc<dyn FileIo>).unwrap();

    assert_eq!(reopened.type_oid("person"), Some(person));
    assert_eq!(reopened.type_oid("tag"), Some(tag));
    assert_eq!(reopened.register_type("person", person_fields()).unwrap(), person);
}

// =============================================================================
// Payload Validation Tests
// =============================================================================

#[test]
fn test_insert_with_unknown_type() {
    let (_file, engine) = setup_mem_engine();

    assert!(matches!(
        engine.insert(12345, b"data"),
        Err(AtlasError::UnknownType(_))
    ));
}

#[test]
fn test_insert_with_truncated_payload() {
    let (_file, engine) = setup_mem_engine();
    let person = engine.register_type("person", person_fields()).unwrap();

    // the Bytes field claims 100 bytes but only 3 follow
    let payload = Payload::new().u16(1).u32(100).scalar(b"abc").finish();

    assert!(matches!(
        engine.insert(person, &payload),
        Err(AtlasError::Serialization(_))
    ));
}

#[test]
fn test_person_payload_round_trip() {
    let (_file, engine) = setup_mem_engine();
    let person = engine.register_type("person", person_fields()).unwrap();
    let friend = engine
        .insert(person, &Payload::new().u16(30).bytes(b"bob").reference(0).references(&[]).finish())
        .unwrap();

    let payload = Payload::new()
        .u16(41)
        .bytes(b"alice")
        .reference(friend)
        .references(&[friend, friend])
        .finish();
    let oid = engine.insert(person, &payload).unwrap();

    let record = engine.load(oid).unwrap();
    let mut reader = PayloadReader::new(&record.payload);
    assert_eq!(reader.u16().unwrap(), 41);
    assert_eq!(reader.bytes().unwrap(), b"alice");
    assert_eq!(reader.reference().unwrap(), friend);
    assert_eq!(reader.references().unwrap(), vec![friend, friend]);
    assert!(reader.is_empty());
    assert!(matches!(reader.u8(), Err(AtlasError::Serialization(_))));
}

// =============================================================================
// Composite Hook Tests
// =============================================================================

/// Counts the records it releases
#[derive(Default)]
struct Archive {
    released: AtomicUsize,
}

impl CompositeType for Archive {
    fn deallocate(
        &self,
        record: &Record,
        plan: &FieldPlan,
        reclaimer: &mut Reclaimer<'_>,
    ) -> Result<()> {
        for page in plan.pages(&record.payload)? {
            reclaimer.free_page(page)?;
        }
        reclaimer.free_record(record.oid)?;
        self.released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn test_hook_survives_catalog_reload() {
    let (_file, engine) = setup_mem_engine();
    let hook = Arc::new(Archive::default());
    let archive = engine
        .register_composite("archive", vec![FieldKind::Page], hook.clone())
        .unwrap();
    engine.commit().unwrap();

    // a rollback of real work reloads the catalog from the file
    engine.allocate_page().unwrap();
    engine.rollback().unwrap();

    let page = engine.allocate_page().unwrap();
    let record = engine.insert(archive, &Payload::new().page(page).finish()).unwrap();
    engine.delete(record).unwrap();

    assert_eq!(hook.released.load(Ordering::SeqCst), 1);
    assert!(engine.read_page(page).is_err());
}

// =============================================================================
// Descriptor Encoding Tests
// =============================================================================

#[test]
fn test_descriptor_checksum_detects_corruption() {
    let descriptor = TypeDescriptor::new("person", person_fields());
    let mut encoded = descriptor.encode(77).unwrap();

    let (decoded, next) = TypeDescriptor::decode(&encoded).unwrap();
    assert_eq!(decoded, descriptor);
    assert_eq!(next, 77);

    encoded[2] ^= 0xFF;
    assert!(matches!(
        TypeDescriptor::decode(&encoded),
        Err(AtlasError::Corruption(_))
    ));
}
