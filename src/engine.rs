//! Engine Module
//!
//! The public facade that owns the store and coordinates its components.
//!
//! ## Responsibilities
//! - Open, format and recover the database file; close it cleanly
//! - Serialize mutations through the store lock
//! - Serve records from the object cache when possible
//! - Run commits, rollbacks, deferred commits and collections
//! - Start and stop the background collector

use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam::channel::Sender;
use parking_lot::{Mutex, RwLock};

use crate::alloc::Reservations;
use crate::cache::{ObjectCache, Record};
use crate::catalog::{Catalog, CompositeType, FieldKind, Reclaimer, TypeDescriptor};
use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::gc::{worker, GcSignal, MemoryUsage};
use crate::layout::{Header, Oid, QUANTUM, PAGE_SIZE};
use crate::page::{FileIo, PagePool, StdFileIo};
use crate::store::Store;
use crate::txn::CommitSchedule;

/// State shared with the background collector
///
/// ## Lock Order
/// `gc_lock` → `state` → `catalog`. Commits and explicit collections take
/// `gc_lock` so they never overlap a background cycle; everything else
/// only needs `state`.
pub(crate) struct Shared {
    pub state: Mutex<Option<Store>>,
    pub gc_lock: Mutex<()>,
    pub catalog: Arc<RwLock<Catalog>>,
    pub cache: Arc<ObjectCache>,
    pub schedule: Mutex<CommitSchedule>,
}

/// Snapshot of store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Bytes taken by live objects (quantum rounded)
    pub used_size: u64,
    /// Size of the database file as seen by the open transaction
    pub database_size: u64,
    /// Capacity of the object table, in handles
    pub index_size: u32,
    /// Handles in use (high water mark)
    pub index_used: u32,
    /// Head of the free handle list (0 when empty)
    pub free_list: Oid,
    pub bitmap_pages: u32,
    /// Which generation is committed (0 or 1)
    pub generation: u8,
    pub cached_records: usize,
    pub cached_pages: usize,
}

/// An embedded single-file object store
///
/// ## Concurrency Model
///
/// - All mutations and uncached loads are serialized by one store lock
/// - Cached loads only take the cache's read lock
/// - A background collector (when enabled) marks without the store lock
///   and takes it only to sweep
pub struct Engine {
    config: Config,
    shared: Arc<Shared>,
    worker: Mutex<Option<(Sender<GcSignal>, JoinHandle<()>)>>,
}

impl Engine {
    /// Create an engine for `config`; nothing is opened yet
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(ObjectCache::new(config.object_cache_size));
        Ok(Self {
            config,
            shared: Arc::new(Shared {
                state: Mutex::new(None),
                gc_lock: Mutex::new(()),
                catalog: Arc::new(RwLock::new(Catalog::new())),
                cache,
                schedule: Mutex::new(CommitSchedule::new()),
            }),
            worker: Mutex::new(None),
        })
    }

    /// Create and open an engine over the file at `path` with default settings
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().path(path).build();
        let engine = Self::new(config)?;
        engine.open()?;
        Ok(engine)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the file named by the configuration
    pub fn open(&self) -> Result<()> {
        let file = StdFileIo::open(&self.config.path)?;
        self.open_with_file(Arc::new(file))
    }

    /// Open over any file implementation
    ///
    /// On startup:
    /// 1. Format the file if it was never initialized
    /// 2. Recover the working generation if it was not closed cleanly
    /// 3. Load the type catalog
    /// 4. Start the background collector if configured
    pub fn open_with_file(&self, file: Arc<dyn FileIo>) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.is_some() {
            return Err(AtlasError::AlreadyOpened);
        }

        let pool = Arc::new(PagePool::new(file, self.config.pool_pages()));
        self.shared.cache.clear();
        let mut store = Store::new(
            pool,
            self.config.geometry(),
            self.config.extension_quantum,
            self.shared.catalog.clone(),
            self.shared.cache.clone(),
        );
        store.gc.threshold = self.config.gc_threshold;
        store.bootstrap(self.config.init_index_size)?;

        if self.config.background_gc {
            let (tx, handle) = worker::spawn(self.shared.clone())?;
            store.gc.signal = Some(tx.clone());
            *self.worker.lock() = Some((tx, handle));
        }
        *state = Some(store);
        Ok(())
    }

    /// Commit pending changes, stop the collector and mark the file closed
    pub fn close(&self) -> Result<()> {
        let result = {
            let _gc = self.shared.gc_lock.lock();
            let mut state = self.shared.state.lock();
            let mut store = state.take().ok_or(AtlasError::NotOpened)?;
            store.close()
        };
        self.stop_worker();
        self.shared.schedule.lock().clear();
        self.shared.cache.clear();
        result
    }

    pub fn is_opened(&self) -> bool {
        self.shared.state.lock().is_some()
    }

    fn stop_worker(&self) {
        if let Some((tx, handle)) = self.worker.lock().take() {
            let _ = tx.send(GcSignal::Stop);
            if handle.join().is_err() {
                tracing::error!("Background collector panicked");
            }
        }
    }

    /// Run `f` against the open store
    fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> Result<R>) -> Result<R> {
        let mut state = self.shared.state.lock();
        let store = state.as_mut().ok_or(AtlasError::NotOpened)?;
        f(store)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Register (or look up) a record type and return its descriptor OID
    pub fn register_type(&self, name: &str, fields: Vec<FieldKind>) -> Result<Oid> {
        self.with_store(|store| {
            let existing = store.catalog.read().lookup(name);
            if let Some(oid) = existing {
                let info = store.catalog.read().get(oid);
                if let Some(info) = info {
                    if info.descriptor.fields != fields {
                        return Err(AtlasError::Consistency(format!(
                            "type {} is already registered with another layout",
                            name
                        )));
                    }
                }
                return Ok(oid);
            }
            let descriptor = TypeDescriptor::new(name, fields);
            let oid = store.store_descriptor(&descriptor)?;
            store.catalog.write().insert(oid, descriptor);
            tracing::debug!("Registered type {} as object {}", name, oid);
            Ok(oid)
        })
    }

    /// Register a type whose records own objects through `hook`
    pub fn register_composite(
        &self,
        name: &str,
        fields: Vec<FieldKind>,
        hook: Arc<dyn CompositeType>,
    ) -> Result<Oid> {
        let oid = self.register_type(name, fields)?;
        self.shared.catalog.write().set_hook(name, hook);
        Ok(oid)
    }

    /// Descriptor OID of a registered type
    pub fn type_oid(&self, name: &str) -> Option<Oid> {
        self.shared.catalog.read().lookup(name)
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Store a new record of `type_oid`
    pub fn insert(&self, type_oid: Oid, payload: &[u8]) -> Result<Oid> {
        self.check_payload(type_oid, payload)?;
        let oid = self.with_store(|store| store.insert_record(type_oid, payload))?;
        self.shared.cache.put(Arc::new(Record {
            oid,
            type_oid,
            payload: payload.to_vec().into(),
        }));
        Ok(oid)
    }

    /// Replace the payload of a record, keeping its type
    pub fn update(&self, oid: Oid, payload: &[u8]) -> Result<()> {
        let type_oid = self.with_store(|store| {
            let pos = store.record_pos(oid)?;
            let type_oid = store.record_header_at(pos.offset())?.type_oid;
            if type_oid == 0 {
                return Err(AtlasError::Consistency(format!(
                    "object {} is a type descriptor",
                    oid
                )));
            }
            Ok(type_oid)
        })?;
        self.check_payload(type_oid, payload)?;
        self.with_store(|store| store.update_record(oid, type_oid, payload))?;
        self.shared.cache.put(Arc::new(Record {
            oid,
            type_oid,
            payload: payload.to_vec().into(),
        }));
        Ok(())
    }

    /// Load a record, from the cache when resident
    pub fn load(&self, oid: Oid) -> Result<Arc<Record>> {
        if let Some(record) = self.shared.cache.get(oid) {
            return Ok(record);
        }
        let record = self.with_store(|store| {
            let (header, payload) = store.read_record(oid)?;
            Ok(Arc::new(Record {
                oid,
                type_oid: header.type_oid,
                payload,
            }))
        })?;
        self.shared.cache.put(record.clone());
        Ok(record)
    }

    /// Delete a record, releasing what its type's hook says it owns
    pub fn delete(&self, oid: Oid) -> Result<()> {
        self.with_store(|store| {
            let (header, payload) = store.read_record(oid)?;
            if header.type_oid == 0 {
                return Err(AtlasError::Consistency(format!(
                    "object {} is a type descriptor",
                    oid
                )));
            }
            let info = store.catalog.read().get(header.type_oid);
            let mut res = Reservations::new();
            match info {
                Some(info) if info.hook.is_some() => {
                    let record = Record {
                        oid,
                        type_oid: header.type_oid,
                        payload,
                    };
                    if let Some(hook) = info.hook.clone() {
                        let mut reclaimer = Reclaimer::new(store, &mut res);
                        hook.deallocate(&record, &info.plan, &mut reclaimer)?;
                    }
                }
                _ => store.deallocate_object(oid, &mut res)?,
            }
            Ok(())
        })?;
        self.shared.cache.remove(oid);
        Ok(())
    }

    fn check_payload(&self, type_oid: Oid, payload: &[u8]) -> Result<()> {
        let info = self.shared.catalog.read().get(type_oid).ok_or_else(|| {
            AtlasError::UnknownType(format!("no type registered as object {}", type_oid))
        })?;
        info.plan
            .links(payload)
            .map_err(|e| AtlasError::Serialization(format!("{}: {}", info.descriptor.name, e)))?;
        Ok(())
    }

    // =========================================================================
    // Page Objects
    // =========================================================================

    pub fn allocate_page(&self) -> Result<Oid> {
        self.with_store(|store| store.allocate_page())
    }

    pub fn read_page(&self, oid: Oid) -> Result<Vec<u8>> {
        self.with_store(|store| {
            let offset = store.page_offset(oid)?;
            store.pool.read_bytes(offset, PAGE_SIZE)
        })
    }

    /// Write `data` at the start of a page object
    pub fn write_page(&self, oid: Oid, data: &[u8]) -> Result<()> {
        if data.len() > PAGE_SIZE {
            return Err(AtlasError::Consistency(format!(
                "{} bytes do not fit in a page",
                data.len()
            )));
        }
        self.with_store(|store| {
            let mut res = Reservations::new();
            let offset = store.put_page(oid, &mut res)?;
            store.pool.write_bytes(offset, data)
        })
    }

    pub fn free_page(&self, oid: Oid) -> Result<()> {
        self.with_store(|store| {
            let mut res = Reservations::new();
            store.free_page(oid, &mut res)
        })
    }

    // =========================================================================
    // Root Object
    // =========================================================================

    pub fn root(&self) -> Result<Oid> {
        self.with_store(|store| Ok(store.working().root_object))
    }

    /// Make `oid` (a record, or 0) the root of the object graph
    pub fn set_root(&self, oid: Oid) -> Result<()> {
        self.with_store(|store| {
            if oid != 0 {
                store.record_pos(oid)?;
            }
            store.set_dirty()?;
            store.working_mut().root_object = oid;
            Ok(())
        })
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn commit(&self) -> Result<()> {
        let _gc = self.shared.gc_lock.lock();
        self.with_store(|store| store.commit())?;
        self.shared.schedule.lock().clear();
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.with_store(|store| store.rollback())
    }

    /// Finish a batch; commits now if `max_delay` is zero or an earlier
    /// batch's deadline passed. Returns whether a commit happened.
    pub fn end_batch(&self, max_delay: Duration) -> Result<bool> {
        if !self.is_opened() {
            return Err(AtlasError::NotOpened);
        }
        let due = self
            .shared
            .schedule
            .lock()
            .end_batch(max_delay, Instant::now());
        if due {
            self.commit()?;
        }
        Ok(due)
    }

    // =========================================================================
    // Collection
    // =========================================================================

    /// Run a full collection now; returns the number of records freed
    pub fn collect(&self) -> Result<usize> {
        let _gc = self.shared.gc_lock.lock();
        self.with_store(|store| {
            store.gc.active = true;
            let result = store.run_collection();
            store.gc.active = false;
            result
        })
    }

    pub fn memory_usage(&self) -> Result<MemoryUsage> {
        let _gc = self.shared.gc_lock.lock();
        self.with_store(|store| store.memory_usage())
    }

    /// Change the allocation delta that triggers implicit collection
    pub fn set_gc_threshold(&self, threshold: Option<u64>) -> Result<()> {
        self.with_store(|store| {
            store.gc.threshold = threshold;
            Ok(())
        })
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn stats(&self) -> Result<StoreStats> {
        self.with_store(|store| {
            let working = store.working();
            Ok(StoreStats {
                used_size: store.used_size,
                database_size: working.size,
                index_size: working.index_size,
                index_used: store.curr_index_size,
                free_list: working.free_list,
                bitmap_pages: store.bitmap_page_count(),
                generation: store.header.curr,
                cached_records: store.cache.len(),
                cached_pages: store.pool.cached_pages(),
            })
        })
    }

    /// Copy of the in-memory header
    pub fn header(&self) -> Result<Header> {
        self.with_store(|store| Ok(store.header.clone()))
    }

    /// Allocate raw space (quantum rounded); returns its file offset
    pub fn allocate_space(&self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(AtlasError::Consistency("cannot allocate 0 bytes".to_string()));
        }
        self.with_store(|store| {
            let mut res = Reservations::new();
            store.allocate(size, 0, &mut res)
        })
    }

    /// Return raw space obtained from `allocate_space`
    pub fn free_space(&self, pos: u64, size: u64) -> Result<()> {
        if pos == 0 || pos % QUANTUM != 0 || size == 0 {
            return Err(AtlasError::Consistency(format!(
                "invalid range {}+{}",
                pos, size
            )));
        }
        self.with_store(|store| {
            let mut res = Reservations::new();
            store.free(pos, size, &mut res)
        })
    }

    /// Bytes of the working allocation bitmap
    pub fn bitmap_image(&self) -> Result<Vec<u8>> {
        self.with_store(|store| store.bitmap_image())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
