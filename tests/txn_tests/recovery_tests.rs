//! Tests for Open and Crash Recovery
//!
//! These tests verify:
//! - A fresh file is formatted and marked clean on close
//! - Uncommitted work is lost when the process dies
//! - A crash before the generation switch keeps the previous commit
//! - A crash after the switch keeps the new commit
//! - Truncated or corrupted headers are rejected
//! - Lifecycle errors (double open, use before open)

use std::sync::Arc;

use atlasobj::{AtlasError, Config, Engine, FieldKind, FileIo, MemFileIo, Oid, Payload};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_mem_engine() -> (Arc<MemFileIo>, Engine, Oid) {
    let file = Arc::new(MemFileIo::new());
    let engine = Engine::new(Config::default()).unwrap();
    engine.open_with_file(file.clone() as Arc<dyn FileIo>).unwrap();
    let text = engine.register_type("text", vec![FieldKind::Bytes]).unwrap();
    (file, engine, text)
}

/// Open a new engine over what survived the last successful sync
fn reopen_durable(file: &MemFileIo) -> Engine {
    let image = file.durable_image();
    let engine = Engine::new(Config::default()).unwrap();
    engine
        .open_with_file(Arc::new(MemFileIo::from_image(image)))
        .unwrap();
    engine
}

fn text(data: &[u8]) -> Vec<u8> {
    Payload::new().bytes(data).finish().to_vec()
}

// =============================================================================
// Format Tests
// =============================================================================

#[test]
fn test_format_new_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("fresh.dbs");
    let engine = Engine::new(Config::builder().path(&path).build()).unwrap();

    engine.open().unwrap();
    let header = engine.header().unwrap();
    assert!(header.initialized);
    assert_eq!(engine.root().unwrap(), 0);
    engine.close().unwrap();

    assert!(path.exists());
    let reopened = Engine::new(Config::builder().path(&path).build()).unwrap();
    reopened.open().unwrap();
    assert!(!reopened.header().unwrap().dirty);
}

#[test]
fn test_generations_agree_after_format() {
    let (_file, engine, _text) = setup_mem_engine();
    let header = engine.header().unwrap();

    let (a, b) = (&header.root[0], &header.root[1]);
    assert_eq!(a.index, b.shadow_index);
    assert_eq!(a.shadow_index, b.index);
    assert_eq!(a.index_size, b.index_size);
}

// =============================================================================
// Crash Recovery Tests
// =============================================================================

#[test]
fn test_uncommitted_work_is_lost() {
    let (file, engine, text_type) = setup_mem_engine();
    let kept = engine.insert(text_type, &text(b"v1")).unwrap();
    engine.set_root(kept).unwrap();
    engine.commit().unwrap();

    engine.update(kept, &text(b"v2")).unwrap();
    let lost = engine.insert(text_type, &text(b"never committed")).unwrap();
    drop(engine);

    let recovered = reopen_durable(&file);
    assert_eq!(recovered.root().unwrap(), kept);
    assert_eq!(recovered.load(kept).unwrap().payload.as_ref(), text(b"v1").as_slice());
    assert!(matches!(recovered.load(lost), Err(AtlasError::Consistency(_))));
    assert_eq!(recovered.type_oid("text"), Some(text_type));
}

#[test]
fn test_crash_before_switch_keeps_previous_commit() {
    let (file, engine, text_type) = setup_mem_engine();
    let oid = engine.insert(text_type, &text(b"v1")).unwrap();
    engine.set_root(oid).unwrap();
    engine.commit().unwrap();

    engine.update(oid, &text(b"v2")).unwrap();
    // the first flush of the commit succeeds, the switch does not
    file.crash_after_syncs(1);
    assert!(engine.commit().is_err());
    drop(engine);

    let recovered = reopen_durable(&file);
    assert_eq!(recovered.load(oid).unwrap().payload.as_ref(), text(b"v1").as_slice());
}

#[test]
fn test_crash_after_switch_keeps_new_commit() {
    let (file, engine, text_type) = setup_mem_engine();
    let oid = engine.insert(text_type, &text(b"v1")).unwrap();
    engine.set_root(oid).unwrap();
    engine.commit().unwrap();

    engine.update(oid, &text(b"v2")).unwrap();
    file.crash_after_syncs(2);
    engine.commit().unwrap();
    // nothing after the commit reaches the file
    assert!(engine.insert(text_type, &text(b"v3")).is_err() || engine.commit().is_err());
    drop(engine);

    let recovered = reopen_durable(&file);
    assert_eq!(recovered.load(oid).unwrap().payload.as_ref(), text(b"v2").as_slice());
}

#[test]
fn test_recovered_store_accepts_new_work() {
    let (file, engine, text_type) = setup_mem_engine();
    let first = engine.insert(text_type, &text(b"first")).unwrap();
    engine.set_root(first).unwrap();
    engine.commit().unwrap();
    engine.insert(text_type, &text(b"lost")).unwrap();
    drop(engine);

    let recovered = reopen_durable(&file);
    let second = recovered.insert(text_type, &text(b"second")).unwrap();
    recovered.commit().unwrap();

    assert_eq!(recovered.load(first).unwrap().payload.as_ref(), text(b"first").as_slice());
    assert_eq!(recovered.load(second).unwrap().payload.as_ref(), text(b"second").as_slice());
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_truncated_header_is_rejected() {
    let engine = Engine::new(Config::default()).unwrap();
    let file = Arc::new(MemFileIo::from_image(vec![0u8; 100]));

    assert!(matches!(
        engine.open_with_file(file),
        Err(AtlasError::Corruption(_))
    ));
    assert!(!engine.is_opened());
}

#[test]
fn test_invalid_generation_selector_is_rejected() {
    let engine = Engine::new(Config::default()).unwrap();
    let mut image = vec![0u8; 4096];
    image[0] = 5;

    assert!(matches!(
        engine.open_with_file(Arc::new(MemFileIo::from_image(image))),
        Err(AtlasError::Corruption(_))
    ));
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_double_open_is_rejected() {
    let (_file, engine, _text) = setup_mem_engine();

    assert!(matches!(
        engine.open_with_file(Arc::new(MemFileIo::new())),
        Err(AtlasError::AlreadyOpened)
    ));
}

#[test]
fn test_operations_require_open_store() {
    let engine = Engine::new(Config::default()).unwrap();

    assert!(matches!(engine.commit(), Err(AtlasError::NotOpened)));
    assert!(matches!(engine.load(5000), Err(AtlasError::NotOpened)));
    assert!(matches!(engine.allocate_page(), Err(AtlasError::NotOpened)));
    assert!(matches!(engine.close(), Err(AtlasError::NotOpened)));
}

#[test]
fn test_close_then_reopen_same_engine() {
    let file = Arc::new(MemFileIo::new());
    let engine = Engine::new(Config::default()).unwrap();
    engine.open_with_file(file.clone() as Arc<dyn FileIo>).unwrap();
    let text_type = engine.register_type("text", vec![FieldKind::Bytes]).unwrap();
    let oid = engine.insert(text_type, &text(b"again")).unwrap();
    engine.set_root(oid).unwrap();
    engine.close().unwrap();
    assert!(!engine.is_opened());

    engine.open_with_file(file as Arc<dyn FileIo>).unwrap();

    assert_eq!(engine.load(oid).unwrap().payload.as_ref(), text(b"again").as_slice());
}
