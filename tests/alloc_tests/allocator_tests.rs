//! Tests for the Space Allocator
//!
//! These tests verify:
//! - Allocations are quantum aligned and never overlap
//! - Freed space is cleared in the bitmap and handed out again
//! - The file grows (with new bitmap pages) when no hole fits
//! - Small geometries switch to the extended bitmap and stop at its limit
//! - Extended stores survive close and reopen
//! - Allocating then freeing leaves the bitmap exactly as it was
//! - Failed or oversized requests leave the space accounting untouched
//! - Random allocate/free sequences never hand out overlapping ranges

use std::sync::Arc;

use atlasobj::{AtlasError, Config, Engine, FileIo, MemFileIo};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .path(temp_dir.path().join("alloc.dbs"))
        .build();
    let engine = Engine::new(config).unwrap();
    engine.open().unwrap();
    (temp_dir, engine)
}

/// 2 default bitmap pages, 8 in extended mode, 64 KB extension step
fn small_geometry_config() -> Config {
    Config::builder()
        .offset_bits(21, 23)
        .init_index_size(512)
        .extension_quantum(64 * 1024)
        .build()
}

fn setup_mem_engine(config: Config) -> (Arc<MemFileIo>, Engine) {
    let file = Arc::new(MemFileIo::new());
    let engine = Engine::new(config).unwrap();
    engine.open_with_file(file.clone() as Arc<dyn FileIo>).unwrap();
    (file, engine)
}

fn bit_is_set(image: &[u8], pos: u64) -> bool {
    let quantum = (pos / 32) as usize;
    image[quantum / 8] & (1 << (quantum % 8)) != 0
}

fn aligned(size: u64) -> u64 {
    (size + 31) / 32 * 32
}

/// The first bitmap write after open or commit copies a bitmap page,
/// which takes space of its own. Do that once up front.
fn warm_up(engine: &Engine, size: u64) {
    let pos = engine.allocate_space(size).unwrap();
    engine.free_space(pos, size).unwrap();
}

// =============================================================================
// Basic Allocation Tests
// =============================================================================

#[test]
fn test_allocations_are_aligned_and_disjoint() {
    let (_temp, engine) = setup_temp_engine();

    let sizes = [1u64, 31, 32, 33, 100, 500, 4096, 5000, 70];
    let mut ranges = Vec::new();
    for size in sizes {
        let pos = engine.allocate_space(size).unwrap();
        assert_eq!(pos % 32, 0);
        ranges.push((pos, (size + 31) / 32 * 32));
    }

    ranges.sort();
    for pair in ranges.windows(2) {
        let (pos, len) = pair[0];
        assert!(pos + len <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
    }
}

#[test]
fn test_page_sized_allocation_is_page_aligned() {
    let (_temp, engine) = setup_temp_engine();

    engine.allocate_space(100).unwrap();
    let pos = engine.allocate_space(8192).unwrap();

    assert_eq!(pos % 4096, 0);
}

#[test]
fn test_allocation_marks_bitmap() {
    let (_temp, engine) = setup_temp_engine();

    let pos = engine.allocate_space(96).unwrap();
    let image = engine.bitmap_image().unwrap();

    assert!(bit_is_set(&image, pos));
    assert!(bit_is_set(&image, pos + 64));
    // the header page is always allocated
    assert!(bit_is_set(&image, 0));
}

#[test]
fn test_zero_size_is_rejected() {
    let (_temp, engine) = setup_temp_engine();

    assert!(matches!(
        engine.allocate_space(0),
        Err(AtlasError::Consistency(_))
    ));
}

// =============================================================================
// Deallocation Tests
// =============================================================================

#[test]
fn test_free_clears_bitmap() {
    let (_temp, engine) = setup_temp_engine();

    let pos = engine.allocate_space(256).unwrap();
    engine.free_space(pos, 256).unwrap();
    let image = engine.bitmap_image().unwrap();

    for offset in (0..256).step_by(32) {
        assert!(!bit_is_set(&image, pos + offset));
    }
}

#[test]
fn test_freed_page_is_reused() {
    let (_temp, engine) = setup_temp_engine();

    let _a = engine.allocate_space(4096).unwrap();
    let b = engine.allocate_space(4096).unwrap();
    let _c = engine.allocate_space(4096).unwrap();

    engine.free_space(b, 4096).unwrap();
    let again = engine.allocate_space(4096).unwrap();

    assert_eq!(again, b);
}

#[test]
fn test_free_rejects_unaligned_range() {
    let (_temp, engine) = setup_temp_engine();

    assert!(matches!(
        engine.free_space(33, 32),
        Err(AtlasError::Consistency(_))
    ));
    assert!(matches!(
        engine.free_space(0, 32),
        Err(AtlasError::Consistency(_))
    ));
}

#[test]
fn test_used_size_tracks_allocations() {
    let (_temp, engine) = setup_temp_engine();
    engine.commit().unwrap();
    let before = engine.stats().unwrap().used_size;

    let pos = engine.allocate_space(4096).unwrap();
    let after_alloc = engine.stats().unwrap().used_size;
    engine.free_space(pos, 4096).unwrap();
    let after_free = engine.stats().unwrap().used_size;

    // the first allocation after a commit also clones a bitmap page
    assert!(after_alloc >= before + 4096);
    assert_eq!(after_free, after_alloc - 4096);
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_large_allocation_grows_file() {
    let (_temp, engine) = setup_temp_engine();
    let before = engine.stats().unwrap();

    let size = 3 * 1024 * 1024;
    let pos = engine.allocate_space(size).unwrap();
    let after = engine.stats().unwrap();

    assert!(after.bitmap_pages > before.bitmap_pages);
    assert!(after.database_size >= pos + size);
    let image = engine.bitmap_image().unwrap();
    assert!(bit_is_set(&image, pos));
    assert!(bit_is_set(&image, pos + size - 32));
}

#[test]
fn test_growth_is_committed() {
    let (file, engine) = setup_mem_engine(small_geometry_config());

    let pos = engine.allocate_space(1536 * 1024).unwrap();
    engine.commit().unwrap();
    let stats = engine.stats().unwrap();
    engine.close().unwrap();

    let reopened = Engine::new(small_geometry_config()).unwrap();
    reopened.open_with_file(file as Arc<dyn FileIo>).unwrap();

    let image = reopened.bitmap_image().unwrap();
    assert_eq!(reopened.stats().unwrap().bitmap_pages, stats.bitmap_pages);
    assert!(bit_is_set(&image, pos));
}

// =============================================================================
// Extended Bitmap Tests
// =============================================================================

#[test]
fn test_extended_bitmap_until_capacity() {
    let (_file, engine) = setup_mem_engine(small_geometry_config());

    let mut count = 0;
    let err = loop {
        match engine.allocate_space(64 * 1024) {
            Ok(_) => count += 1,
            Err(e) => break e,
        }
        assert!(count < 1000, "allocation never ran out of space");
    };

    assert!(matches!(err, AtlasError::Capacity(_)));
    assert!(count > 100);
    assert_eq!(engine.stats().unwrap().bitmap_pages, 8);
    let header = engine.header().unwrap();
    assert_ne!(header.root[header.curr as usize ^ 1].bitmap_extent, 0);
}

#[test]
fn test_extended_store_reopens() {
    let (file, engine) = setup_mem_engine(small_geometry_config());

    let mut last = 0;
    for _ in 0..50 {
        last = engine.allocate_space(64 * 1024).unwrap();
    }
    engine.commit().unwrap();
    let stats = engine.stats().unwrap();
    assert!(stats.bitmap_pages > 2);
    engine.close().unwrap();

    let reopened = Engine::new(small_geometry_config()).unwrap();
    reopened.open_with_file(file as Arc<dyn FileIo>).unwrap();

    let header = reopened.header().unwrap();
    assert_ne!(header.root[header.curr as usize].bitmap_extent, 0);
    assert_eq!(reopened.stats().unwrap().bitmap_pages, stats.bitmap_pages);
    assert!(bit_is_set(&reopened.bitmap_image().unwrap(), last));

    // still usable after the switch
    let pos = reopened.allocate_space(128).unwrap();
    assert!(bit_is_set(&reopened.bitmap_image().unwrap(), pos));
    reopened.commit().unwrap();
}

// =============================================================================
// Bitmap Restore Tests
// =============================================================================

#[test]
fn test_allocate_free_restores_bitmap() {
    let (_temp, engine) = setup_temp_engine();
    warm_up(&engine, 32);

    let sizes = [
        1u64, 31, 32, 33, 100, 4095, 4096, 4097, 8191, 8192, 12345, 65536,
    ];
    for size in sizes {
        let before = engine.bitmap_image().unwrap();
        let used = engine.stats().unwrap().used_size;

        let pos = engine.allocate_space(size).unwrap();
        assert_eq!(engine.stats().unwrap().used_size, used + aligned(size));
        engine.free_space(pos, size).unwrap();

        assert_eq!(engine.bitmap_image().unwrap(), before, "size {}", size);
        assert_eq!(engine.stats().unwrap().used_size, used, "size {}", size);
    }
}

#[test]
fn test_large_allocate_free_restores_bitmap() {
    let (_temp, engine) = setup_temp_engine();
    let size = 3 * 1024 * 1024;
    // grows the file once, later requests land in the freed hole
    warm_up(&engine, size);

    let before = engine.bitmap_image().unwrap();
    let pages = engine.stats().unwrap().bitmap_pages;

    let pos = engine.allocate_space(size).unwrap();
    assert!(bit_is_set(&engine.bitmap_image().unwrap(), pos + size - 32));
    engine.free_space(pos, size).unwrap();

    assert_eq!(engine.stats().unwrap().bitmap_pages, pages);
    assert_eq!(engine.bitmap_image().unwrap(), before);
}

// =============================================================================
// Accounting Tests
// =============================================================================

#[test]
fn test_failed_allocation_keeps_used_size() {
    let (file, engine) = setup_mem_engine(small_geometry_config());
    engine.commit().unwrap();
    let used = engine.stats().unwrap().used_size;
    let image = engine.bitmap_image().unwrap();

    // below the file limit, but more bitmap pages than the geometry allows
    let err = engine.allocate_space(7 * 1024 * 1024).unwrap_err();
    assert!(matches!(err, AtlasError::Capacity(_)));
    assert_eq!(engine.stats().unwrap().used_size, used);
    assert_eq!(engine.bitmap_image().unwrap(), image);

    engine.commit().unwrap();
    assert_eq!(engine.stats().unwrap().used_size, used);
    engine.close().unwrap();

    let reopened = Engine::new(small_geometry_config()).unwrap();
    reopened.open_with_file(file as Arc<dyn FileIo>).unwrap();
    assert_eq!(reopened.stats().unwrap().used_size, used);

    // the space is still there for a request that fits
    let pos = reopened.allocate_space(64 * 1024).unwrap();
    assert!(bit_is_set(&reopened.bitmap_image().unwrap(), pos));
}

#[test]
fn test_huge_request_is_capacity_error() {
    let (_temp, engine) = setup_temp_engine();
    let used = engine.stats().unwrap().used_size;

    for size in [u64::MAX, u64::MAX - 3, 1 << 62, (1 << 40) + 1] {
        let result = engine.allocate_space(size);
        assert!(
            matches!(result, Err(AtlasError::Capacity(_))),
            "size {} gave {:?}",
            size,
            result
        );
    }
    assert_eq!(engine.stats().unwrap().used_size, used);

    // nothing was left half done
    engine.allocate_space(128).unwrap();
    engine.commit().unwrap();
}

// =============================================================================
// Randomized Tests
// =============================================================================

#[test]
fn test_random_allocations_never_overlap() {
    let (_file, engine) = setup_mem_engine(small_geometry_config());
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed_a110c);
    let live_limit = 2 * 1024 * 1024;

    let mut live: Vec<(u64, u64)> = Vec::new();
    let mut live_bytes = 0u64;

    for step in 0..400 {
        let size = if step % 50 == 25 {
            256 * 1024
        } else if rng.gen_bool(0.2) {
            rng.gen_range(1..=4u64) * 4096
        } else {
            rng.gen_range(1..8192u64)
        };

        let pos = engine.allocate_space(size).unwrap();
        let len = aligned(size);
        assert_eq!(pos % 32, 0);
        for &(other, other_len) in &live {
            assert!(
                pos + len <= other || other + other_len <= pos,
                "step {}: {}+{} overlaps {}+{}",
                step,
                pos,
                len,
                other,
                other_len
            );
        }
        live.push((pos, len));
        live_bytes += len;

        while live_bytes > live_limit || (!live.is_empty() && rng.gen_bool(0.3)) {
            let (pos, len) = live.swap_remove(rng.gen_range(0..live.len()));
            engine.free_space(pos, len).unwrap();
            live_bytes -= len;
            if live_bytes <= live_limit {
                break;
            }
        }

        if step % 50 == 49 {
            engine.commit().unwrap();
            let image = engine.bitmap_image().unwrap();
            for &(pos, len) in &live {
                assert!(bit_is_set(&image, pos), "step {}: {} not marked", step, pos);
                assert!(bit_is_set(&image, pos + len - 32));
            }
        }
    }

    assert!(engine.stats().unwrap().bitmap_pages > 2);
}
