//! Configuration for AtlasObj
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::Result;
use crate::layout::{Geometry, PAGE_SIZE, SEGMENT_BITS};
use crate::AtlasError;

/// Main configuration for an AtlasObj storage
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Path of the single database file
    pub path: PathBuf,

    /// Bytes of page cache kept in memory (rounded down to whole pages)
    pub page_pool_size: usize,

    // -------------------------------------------------------------------------
    // Allocation Configuration
    // -------------------------------------------------------------------------
    /// Initial capacity of the object table, in handles
    pub init_index_size: u32,

    /// Minimal step by which the file grows when no hole is large enough
    pub extension_quantum: u64,

    /// Address bits covered by the default allocation bitmap
    pub offset_bits: u32,

    /// Address bits covered once the bitmap switches to extended mode
    pub large_offset_bits: u32,

    // -------------------------------------------------------------------------
    // Collection Configuration
    // -------------------------------------------------------------------------
    /// Bytes allocated since the last collection that trigger a new one.
    /// `None` disables implicit collection.
    pub gc_threshold: Option<u64>,

    /// Run implicit collections on a dedicated worker thread
    pub background_gc: bool,

    // -------------------------------------------------------------------------
    // Cache Configuration
    // -------------------------------------------------------------------------
    /// Maximal number of records kept in the object cache
    pub object_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./atlasobj.dbs"),
            page_pool_size: 4 * 1024 * 1024, // 4 MB
            init_index_size: 1024,
            extension_quantum: 1024 * 1024, // 1 MB
            offset_bits: 32,
            large_offset_bits: 40,
            gc_threshold: None,
            background_gc: false,
            object_cache_size: 1319,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check that the configured values describe a usable storage
    pub fn validate(&self) -> Result<()> {
        if self.offset_bits < SEGMENT_BITS {
            return Err(AtlasError::Config(format!(
                "offset_bits must be at least {}, got {}",
                SEGMENT_BITS, self.offset_bits
            )));
        }
        if self.large_offset_bits < self.offset_bits || self.large_offset_bits > 40 {
            return Err(AtlasError::Config(format!(
                "large_offset_bits must be within {}..=40, got {}",
                self.offset_bits, self.large_offset_bits
            )));
        }
        if self.page_pool_size < 16 * PAGE_SIZE {
            return Err(AtlasError::Config(format!(
                "page_pool_size must hold at least 16 pages, got {} bytes",
                self.page_pool_size
            )));
        }
        if self.init_index_size == 0 {
            return Err(AtlasError::Config("init_index_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Bitmap geometry derived from the offset bits
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.offset_bits, self.large_offset_bits)
    }

    /// Number of frames in the page pool
    pub fn pool_pages(&self) -> usize {
        self.page_pool_size / PAGE_SIZE
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the database file path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Set the page pool size (in bytes)
    pub fn page_pool_size(mut self, size: usize) -> Self {
        self.config.page_pool_size = size;
        self
    }

    /// Set the initial object table capacity (in handles)
    pub fn init_index_size(mut self, size: u32) -> Self {
        self.config.init_index_size = size;
        self
    }

    /// Set the minimal file extension step (in bytes)
    pub fn extension_quantum(mut self, size: u64) -> Self {
        self.config.extension_quantum = size;
        self
    }

    /// Set the address bits of the default and extended bitmap
    pub fn offset_bits(mut self, default_bits: u32, large_bits: u32) -> Self {
        self.config.offset_bits = default_bits;
        self.config.large_offset_bits = large_bits;
        self
    }

    /// Set the allocation delta that triggers a collection
    pub fn gc_threshold(mut self, threshold: Option<u64>) -> Self {
        self.config.gc_threshold = threshold;
        self
    }

    /// Run implicit collections on a worker thread
    pub fn background_gc(mut self, enabled: bool) -> Self {
        self.config.background_gc = enabled;
        self
    }

    /// Set the object cache bound (in records)
    pub fn object_cache_size(mut self, size: usize) -> Self {
        self.config.object_cache_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
