//! Tests for the Garbage Collector
//!
//! These tests verify:
//! - Only records unreachable from the root are freed
//! - Records changed by the open transaction are never swept
//! - Owned pages are freed with their record
//! - Composite hooks keep records alive through page contents
//! - Threshold-triggered collection, inline and on the worker thread
//! - Memory usage accounting by type

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use atlasobj::{
    AtlasError, CompositeType, Config, Engine, FieldKind, FieldPlan, FileIo, MemFileIo, Oid,
    Payload, Record, Result, Tracer,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_mem_engine(config: Config) -> (Engine, Oid) {
    let engine = Engine::new(config).unwrap();
    engine
        .open_with_file(Arc::new(MemFileIo::new()) as Arc<dyn FileIo>)
        .unwrap();
    let node = engine
        .register_type("node", vec![FieldKind::Reference, FieldKind::Bytes])
        .unwrap();
    (engine, node)
}

fn node(next: Oid, label: &[u8]) -> Vec<u8> {
    Payload::new().reference(next).bytes(label).finish().to_vec()
}

/// Insert `count` unreachable nodes
fn insert_garbage(engine: &Engine, node_type: Oid, count: usize) -> Vec<Oid> {
    (0..count)
        .map(|i| engine.insert(node_type, &node(0, &[i as u8; 40])).unwrap())
        .collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    done()
}

// =============================================================================
// Reachability Tests
// =============================================================================

#[test]
fn test_collect_frees_only_unreachable() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    let tail = engine.insert(node_type, &node(0, b"tail")).unwrap();
    let head = engine.insert(node_type, &node(tail, b"head")).unwrap();
    let garbage = insert_garbage(&engine, node_type, 3);
    engine.set_root(head).unwrap();
    engine.commit().unwrap();

    let freed = engine.collect().unwrap();

    assert_eq!(freed, 3);
    assert!(engine.load(head).is_ok());
    assert!(engine.load(tail).is_ok());
    for oid in garbage {
        assert!(matches!(engine.load(oid), Err(AtlasError::Consistency(_))));
    }
}

#[test]
fn test_collect_without_root_frees_everything_but_types() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    insert_garbage(&engine, node_type, 5);
    engine.commit().unwrap();

    assert_eq!(engine.collect().unwrap(), 5);
    engine.commit().unwrap();

    // descriptors are never swept
    let oid = engine.insert(node_type, &node(0, b"still typed")).unwrap();
    assert_eq!(engine.load(oid).unwrap().type_oid, node_type);
}

#[test]
fn test_uncommitted_records_are_not_swept() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    let old = engine.insert(node_type, &node(0, b"old")).unwrap();
    engine.commit().unwrap();

    // touched by the open transaction: working and committed slots differ
    engine.update(old, &node(0, b"updated")).unwrap();
    let fresh = engine.insert(node_type, &node(0, b"fresh")).unwrap();

    assert_eq!(engine.collect().unwrap(), 0);
    assert!(engine.load(old).is_ok());
    assert!(engine.load(fresh).is_ok());
}

#[test]
fn test_freed_space_returns_after_commit() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    insert_garbage(&engine, node_type, 20);
    engine.commit().unwrap();
    let before = engine.stats().unwrap().used_size;

    engine.collect().unwrap();
    engine.commit().unwrap();

    assert!(engine.stats().unwrap().used_size < before);
    assert_ne!(engine.stats().unwrap().free_list, 0);
}

#[test]
fn test_dangling_reference_is_reported() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    let target = engine.insert(node_type, &node(0, b"target")).unwrap();
    let root = engine.insert(node_type, &node(target, b"root")).unwrap();
    engine.set_root(root).unwrap();
    engine.delete(target).unwrap();
    engine.commit().unwrap();

    assert!(matches!(engine.collect(), Err(AtlasError::Consistency(_))));
}

// =============================================================================
// Composite Tests
// =============================================================================

#[test]
fn test_owned_pages_are_freed_with_record() {
    let (engine, _node_type) = setup_mem_engine(Config::default());
    let image = engine
        .register_type("image", vec![FieldKind::Page, FieldKind::Scalar(4)])
        .unwrap();
    let page = engine.allocate_page().unwrap();
    engine.write_page(page, b"pixels").unwrap();
    engine
        .insert(image, &Payload::new().page(page).u32(64).finish())
        .unwrap();
    engine.commit().unwrap();

    assert_eq!(engine.collect().unwrap(), 1);

    assert!(matches!(engine.read_page(page), Err(AtlasError::Consistency(_))));
}

#[test]
fn test_reachable_owned_pages_are_kept() {
    let (engine, _node_type) = setup_mem_engine(Config::default());
    let image = engine
        .register_type("image", vec![FieldKind::Page, FieldKind::Scalar(4)])
        .unwrap();
    let page = engine.allocate_page().unwrap();
    engine.write_page(page, b"pixels").unwrap();
    let record = engine
        .insert(image, &Payload::new().page(page).u32(64).finish())
        .unwrap();
    engine.set_root(record).unwrap();
    engine.commit().unwrap();

    assert_eq!(engine.collect().unwrap(), 0);
    assert_eq!(&engine.read_page(page).unwrap()[..6], b"pixels");
}

/// Records whose page holds the OID of another record
struct Bucket;

impl CompositeType for Bucket {
    fn trace(&self, record: &Record, plan: &FieldPlan, tracer: &mut Tracer<'_>) -> Result<()> {
        for page in plan.pages(&record.payload)? {
            tracer.owned_page(page);
            let data = tracer.read_page(page)?;
            let oid = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            tracer.reference(oid);
        }
        Ok(())
    }
}

#[test]
fn test_composite_hook_keeps_page_references_alive() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    let bucket = engine
        .register_composite("bucket", vec![FieldKind::Page], Arc::new(Bucket))
        .unwrap();
    let hidden = engine.insert(node_type, &node(0, b"hidden")).unwrap();
    let garbage = engine.insert(node_type, &node(0, b"garbage")).unwrap();
    let page = engine.allocate_page().unwrap();
    engine.write_page(page, &hidden.to_be_bytes()).unwrap();
    let root = engine.insert(bucket, &Payload::new().page(page).finish()).unwrap();
    engine.set_root(root).unwrap();
    engine.commit().unwrap();

    assert_eq!(engine.collect().unwrap(), 1);
    assert!(engine.load(hidden).is_ok());
    assert!(engine.load(garbage).is_err());
}

#[test]
fn test_composite_delete_frees_pages() {
    let (engine, _node_type) = setup_mem_engine(Config::default());
    let bucket = engine
        .register_composite("bucket", vec![FieldKind::Page], Arc::new(Bucket))
        .unwrap();
    let page = engine.allocate_page().unwrap();
    let record = engine.insert(bucket, &Payload::new().page(page).finish()).unwrap();

    engine.delete(record).unwrap();

    assert!(engine.read_page(page).is_err());
    assert!(engine.load(record).is_err());
}

// =============================================================================
// Threshold Tests
// =============================================================================

#[test]
fn test_threshold_triggers_inline_collection() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    let garbage = insert_garbage(&engine, node_type, 5);
    engine.commit().unwrap();

    engine.set_gc_threshold(Some(64)).unwrap();
    engine.insert(node_type, &node(0, &[9u8; 100])).unwrap();

    for oid in garbage {
        assert!(engine.load(oid).is_err());
    }
}

#[test]
fn test_threshold_collection_after_commit() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    engine.commit().unwrap();
    engine.set_gc_threshold(Some(64)).unwrap();

    // uncommitted garbage survives any collection in this transaction
    let garbage = insert_garbage(&engine, node_type, 6);
    for &oid in &garbage {
        assert!(engine.load(oid).is_ok());
    }
    engine.commit().unwrap();

    // the next allocation collects the committed garbage
    engine.insert(node_type, &node(0, b"trigger")).unwrap();
    for oid in garbage {
        assert!(engine.load(oid).is_err());
    }
}

#[test]
fn test_background_collection() {
    let config = Config::builder()
        .background_gc(true)
        .gc_threshold(Some(64))
        .build();
    let (engine, node_type) = setup_mem_engine(config);
    let garbage = insert_garbage(&engine, node_type, 5);
    engine.commit().unwrap();

    engine.insert(node_type, &node(0, &[1u8; 100])).unwrap();

    let swept = wait_until(Duration::from_secs(5), || {
        garbage.iter().all(|&oid| engine.load(oid).is_err())
    });
    assert!(swept, "background collector did not sweep");
    engine.close().unwrap();
}

// =============================================================================
// Memory Usage Tests
// =============================================================================

#[test]
fn test_memory_usage_by_type() {
    let (engine, node_type) = setup_mem_engine(Config::default());
    let leaf = engine.insert(node_type, &node(0, b"leaf")).unwrap();
    let root = engine.insert(node_type, &node(leaf, b"root")).unwrap();
    insert_garbage(&engine, node_type, 4);
    engine.set_root(root).unwrap();
    engine.commit().unwrap();

    let usage = engine.memory_usage().unwrap();

    let nodes = usage.types["node"];
    assert_eq!(nodes.instances, 2);
    assert!(nodes.allocated_size >= nodes.total_size);
    assert_eq!(nodes.allocated_size % 32, 0);
    assert_eq!(usage.descriptors.instances, 1);
    assert!(usage.system.allocated_size > 0);
    assert!(usage.system.total_size > 4096);
}
