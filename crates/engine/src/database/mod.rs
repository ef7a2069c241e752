//! Database struct and open logic
//!
//! This module provides the main Database struct that owns everything shared
//! by the connections of one database:
//! - the store, behind the `Storage` boundary
//! - the snapshot registry (snapshot counter + cache update log)
//! - the global write lock serializing read-write transactions
//! - collection registrations and the extension names they claim
//! - permanent change set observers
//!
//! ## Opening
//!
//! `Database::open(dir)` reads (or writes a default) `turf.toml` and opens
//! the persisted store in `turf.db`. Opening the same directory twice in one
//! process returns handles to the same instance.
//!
//! `Database::ephemeral()` keeps everything in memory.
//!
//! ## Lock order
//!
//! ```text
//! write lock  ->  connection state  ->  snapshot registry
//! ```
//!
//! Collection registration takes the write lock, so it must not be called
//! from inside a read-write transaction.

pub mod config;
pub mod observers;
mod registry;
pub mod snapshots;

pub use config::{TurfConfig, CONFIG_FILE_NAME, DATA_FILE_NAME, DEFAULT_CACHE_UPDATE_RETENTION};
pub use observers::{ChangeSetObserver, ObserverRegistry};
pub use snapshots::SnapshotRegistry;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use registry::OPEN_DATABASES;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use turf_core::codec::{from_msgpack, to_msgpack};
use turf_core::{
    Collection, ConnectionId, Error, Result, SnapshotNumber, Storage, RESERVED_TABLE_PREFIX,
};
use turf_storage::MemoryStore;

use crate::connection::Connection;

/// Metadata table holding one `CollectionRecord` per registered collection
pub const COLLECTIONS_TABLE: &str = "_turf_collections";

#[derive(Debug, Serialize, Deserialize)]
struct CollectionRecord {
    schema_version: u64,
}

/// What the engine remembers about a registered collection
#[derive(Debug, Clone)]
pub(crate) struct CollectionInfo {
    pub(crate) schema_version: u64,
    pub(crate) capacity: Option<usize>,
    /// Bumped whenever cached values may no longer match the declaration
    pub(crate) generation: u64,
    pub(crate) value_type: TypeId,
    pub(crate) extensions: Vec<String>,
}

/// State shared by every handle and connection of one database
pub(crate) struct DatabaseInner {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) registry: Mutex<SnapshotRegistry>,
    pub(crate) write_lock: Mutex<()>,
    pub(crate) collections: DashMap<String, CollectionInfo>,
    /// Extension name -> owning collection
    extension_owners: DashMap<String, String>,
    pub(crate) observers: ObserverRegistry,
    next_connection_id: AtomicU64,
    config: TurfConfig,
    data_dir: Option<PathBuf>,
}

impl DatabaseInner {
    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Store `version` for `name`, returning the previously stored version
    fn record_schema_version(&self, name: &str, version: u64) -> Result<Option<u64>> {
        let mut batch = self.storage.begin_write()?;
        let previous = match batch.get(COLLECTIONS_TABLE, name)? {
            Some(row) => Some(from_msgpack::<CollectionRecord>(&row.data)?.schema_version),
            None => None,
        };
        if previous != Some(version) {
            let record = CollectionRecord {
                schema_version: version,
            };
            batch.upsert(COLLECTIONS_TABLE, name, to_msgpack(&record)?)?;
            self.storage.commit(batch)?;
        }
        Ok(previous)
    }
}

/// Handle to an open database
///
/// Cheap to clone; every clone refers to the same instance.
///
/// # Example
///
/// ```
/// use turf_core::{codec, Collection, Result};
/// use turf_engine::Database;
///
/// struct Notes;
///
/// impl Collection for Notes {
///     type Value = String;
///     fn name(&self) -> &str { "Notes" }
///     fn schema_version(&self) -> u64 { 1 }
///     fn serialize_value(&self, v: &String) -> Result<Vec<u8>> { codec::to_msgpack(v) }
///     fn deserialize_value(&self, d: &[u8]) -> Result<String> { codec::from_msgpack(d) }
/// }
///
/// # fn main() -> Result<()> {
/// let db = Database::ephemeral();
/// db.register_collection(&Notes)?;
///
/// let connection = db.new_connection();
/// connection.read_write_transaction(|txn| {
///     txn.read_write(&Notes)?.set_value("hello".to_string(), "n1")?;
///     Ok(())
/// })?;
///
/// let value = connection.read_transaction(|txn| txn.read(&Notes)?.value_for_key("n1"))?;
/// assert_eq!(value.as_deref().map(String::as_str), Some("hello"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Open the database stored in directory `path`
    ///
    /// # Flow
    ///
    /// 1. Create the directory if needed
    /// 2. Read or create `turf.toml`
    /// 3. Return the instance already open for this directory, if any
    /// 4. Otherwise load `turf.db`
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid, the directory cannot be
    /// created, or the data file is unreadable or corrupt.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let config_path = data_dir.join(CONFIG_FILE_NAME);
        TurfConfig::write_default_if_missing(&config_path)?;
        let cfg = TurfConfig::from_file(&config_path)?;

        Self::open_dir(&data_dir, cfg)
    }

    /// Open directory `path` with an explicit configuration
    ///
    /// The configuration is written to `turf.toml` so that later `open`
    /// calls pick up the same settings. If the directory is already open in
    /// this process the running instance is returned unchanged.
    pub fn open_with_config<P: AsRef<Path>>(path: P, cfg: TurfConfig) -> Result<Self> {
        let data_dir = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        cfg.sync_mode()?;
        cfg.write_to_file(&data_dir.join(CONFIG_FILE_NAME))?;
        Self::open_dir(&data_dir, cfg)
    }

    fn open_dir(data_dir: &Path, cfg: TurfConfig) -> Result<Self> {
        let canonical_path = data_dir.canonicalize()?;

        // Held for the whole open so two threads can't both load the file
        let mut open = OPEN_DATABASES.lock();
        if let Some(inner) = open.get(&canonical_path).and_then(|w| w.upgrade()) {
            info!(target: "turf::db", path = ?canonical_path, "Returning existing database instance");
            return Ok(Database { inner });
        }

        let store = MemoryStore::open(canonical_path.join(DATA_FILE_NAME), cfg.sync_mode()?)?;
        let db = Self::build(Arc::new(store), cfg, Some(canonical_path.clone()));
        open.insert(canonical_path.clone(), Arc::downgrade(&db.inner));

        info!(
            target: "turf::db",
            path = ?canonical_path,
            durability = %db.inner.config.durability,
            "Opened database"
        );
        Ok(db)
    }

    /// In-memory database with default configuration; nothing touches disk
    pub fn ephemeral() -> Self {
        Self::with_storage(Arc::new(MemoryStore::new()), TurfConfig::default())
    }

    /// Database over any store implementing the `Storage` boundary
    pub fn with_storage(storage: Arc<dyn Storage>, config: TurfConfig) -> Self {
        Self::build(storage, config, None)
    }

    fn build(storage: Arc<dyn Storage>, config: TurfConfig, data_dir: Option<PathBuf>) -> Self {
        Database {
            inner: Arc::new(DatabaseInner {
                storage,
                registry: Mutex::new(SnapshotRegistry::new(config.cache_update_retention)),
                write_lock: Mutex::new(()),
                collections: DashMap::new(),
                extension_owners: DashMap::new(),
                observers: ObserverRegistry::new(),
                next_connection_id: AtomicU64::new(0),
                config,
                data_dir,
            }),
        }
    }

    /// Register `collection` so connections can read and write it
    ///
    /// Registering again is allowed. A changed schema version or cache
    /// capacity makes every connection drop its cached values for the
    /// collection at the start of its next transaction.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` for an empty name or one starting with `_`
    /// - `DuplicateExtension` if an extension name is already claimed by
    ///   another collection, or listed twice
    /// - `CollectionTypeMismatch` if the name is registered with another
    ///   value type
    /// - store errors while recording the schema version
    pub fn register_collection<C: Collection>(&self, collection: &C) -> Result<()> {
        let name = collection.name();
        if name.is_empty() || name.starts_with(RESERVED_TABLE_PREFIX) {
            return Err(Error::InvalidOperation(format!(
                "Collection name '{}' is empty or uses the reserved prefix '{}'",
                name, RESERVED_TABLE_PREFIX
            )));
        }
        let schema_version = collection.schema_version();
        let capacity = collection.value_cache_capacity();
        let value_type = TypeId::of::<C::Value>();

        // Ownership checks and claims happen under one write lock hold
        let _write = self.inner.write_lock.lock();

        let mut extensions = Vec::new();
        let mut seen = HashSet::new();
        for extension in collection.associated_extensions() {
            let ext_name = extension.name().to_string();
            if !seen.insert(ext_name.clone()) {
                return Err(Error::DuplicateExtension(ext_name));
            }
            if let Some(owner) = self.inner.extension_owners.get(&ext_name) {
                if owner.value() != name {
                    return Err(Error::DuplicateExtension(ext_name));
                }
            }
            extensions.push(ext_name);
        }

        if let Some(existing) = self.inner.collections.get(name) {
            if existing.value_type != value_type {
                return Err(Error::CollectionTypeMismatch(name.to_string()));
            }
        }

        let stored = self.inner.record_schema_version(name, schema_version)?;
        if let Some(previous) = stored.filter(|v| *v != schema_version) {
            warn!(
                target: "turf::db",
                collection = name,
                previous,
                schema_version,
                "Collection schema version changed"
            );
        }

        match self.inner.collections.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let info = entry.get_mut();
                if info.schema_version != schema_version || info.capacity != capacity {
                    info.generation += 1;
                    debug!(
                        target: "turf::cache",
                        collection = name,
                        generation = info.generation,
                        "Invalidating cached values"
                    );
                }
                for released in info.extensions.iter().filter(|e| !extensions.contains(*e)) {
                    self.inner.extension_owners.remove(released);
                }
                info.schema_version = schema_version;
                info.capacity = capacity;
                info.extensions = extensions.clone();
            }
            Entry::Vacant(entry) => {
                entry.insert(CollectionInfo {
                    schema_version,
                    capacity,
                    generation: 0,
                    value_type,
                    extensions: extensions.clone(),
                });
            }
        }
        for ext_name in &extensions {
            self.inner
                .extension_owners
                .insert(ext_name.clone(), name.to_string());
        }

        info!(
            target: "turf::db",
            collection = name,
            schema_version,
            extensions = extensions.len(),
            "Registered collection"
        );
        Ok(())
    }

    /// Schema version recorded in the store for `collection`
    pub fn stored_schema_version(&self, collection: &str) -> Result<Option<u64>> {
        let view = self.inner.storage.snapshot()?;
        match view.get(COLLECTIONS_TABLE, collection)? {
            Some(row) => Ok(Some(
                from_msgpack::<CollectionRecord>(&row.data)?.schema_version,
            )),
            None => Ok(None),
        }
    }

    /// Names of registered collections, sorted
    pub fn registered_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .collections
            .iter()
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Open a new connection at the current snapshot with empty caches
    pub fn new_connection(&self) -> Connection {
        Connection::new(Arc::clone(&self.inner))
    }

    /// Highest committed snapshot
    pub fn current_snapshot(&self) -> SnapshotNumber {
        self.inner.registry.lock().current()
    }

    /// Configuration this instance was opened with
    pub fn config(&self) -> &TurfConfig {
        &self.inner.config
    }

    /// Data directory, `None` for ephemeral and custom-storage databases
    pub fn data_dir(&self) -> Option<&Path> {
        self.inner.data_dir.as_deref()
    }

    /// True if nothing is persisted by this instance
    pub fn is_ephemeral(&self) -> bool {
        self.inner.data_dir.is_none()
    }

    /// True if both handles refer to the same instance
    pub fn same_instance(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.inner.data_dir)
            .field("collections", &self.registered_collections())
            .finish()
    }
}
