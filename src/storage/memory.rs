//! In-memory store backend.
//!
//! Cloned [`MemoryStoreManager`] handles reach the same tables, so several
//! authorities built from clones behave like processes sharing one cluster.
//! The reported [`StoreFeatures`] are configurable so callers can exercise
//! the distributed code paths without a network.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::debug;

use super::entry::Entry;
use super::entry_list::EntryList;
use super::store::{
    KeyColumnValueStore, KeyRange, KeySliceQuery, StoreFeatures, StoreManager, StoreTransaction,
    TxConfig,
};
use crate::primitives::bytes::StaticBuffer;
use crate::types::{Result, SombraError};

type Row = BTreeMap<StaticBuffer, Entry>;

/// Shareable in-memory backend.
#[derive(Clone, Debug)]
pub struct MemoryStoreManager {
    inner: Arc<ManagerInner>,
}

#[derive(Debug)]
struct ManagerInner {
    features: StoreFeatures,
    local_ranges: Vec<KeyRange>,
    stores: Mutex<FxHashMap<String, Arc<MemoryStore>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStoreManager {
    /// Local, key-consistent backend.
    pub fn new() -> Self {
        Self::with_features(StoreFeatures::local())
    }

    /// Backend reporting `features`.
    pub fn with_features(features: StoreFeatures) -> Self {
        Self::with_config(features, Vec::new())
    }

    /// Backend reporting `features` and owning `local_ranges`.
    pub fn with_config(features: StoreFeatures, local_ranges: Vec<KeyRange>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                features,
                local_ranges,
                stores: Mutex::new(FxHashMap::default()),
                closed: Arc::new(AtomicBool::new(false)),
            }),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(SombraError::Closed);
        }
        Ok(())
    }

    /// Opens `name` with its concrete type, for inspection in tools and tests.
    pub fn open_memory_store(&self, name: &str) -> Result<Arc<MemoryStore>> {
        self.ensure_open()?;
        let mut stores = self.inner.stores.lock();
        let store = stores
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(store = name, "memory_store.open");
                Arc::new(MemoryStore {
                    name: name.to_owned(),
                    rows: RwLock::new(BTreeMap::new()),
                    closed: Arc::clone(&self.inner.closed),
                })
            })
            .clone();
        Ok(store)
    }
}

impl Default for MemoryStoreManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreManager for MemoryStoreManager {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn features(&self) -> StoreFeatures {
        let mut features = self.inner.features;
        features.local_key_partition = features.local_key_partition || !self.inner.local_ranges.is_empty();
        features
    }

    fn open_database(&self, name: &str) -> Result<Arc<dyn KeyColumnValueStore>> {
        let store: Arc<dyn KeyColumnValueStore> = self.open_memory_store(name)?;
        Ok(store)
    }

    fn begin_transaction(&self, config: TxConfig) -> Result<Box<dyn StoreTransaction>> {
        self.ensure_open()?;
        Ok(Box::new(MemoryTransaction { config }))
    }

    fn local_key_partition(&self) -> Result<Vec<KeyRange>> {
        if !self.features().local_key_partition {
            return Err(SombraError::Unsupported("local key partition"));
        }
        Ok(self.inner.local_ranges.clone())
    }

    fn clear_storage(&self) -> Result<()> {
        let stores = self.inner.stores.lock();
        for store in stores.values() {
            store.rows.write().clear();
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// One in-memory table.
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    rows: RwLock<BTreeMap<StaticBuffer, Row>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Number of non-empty rows.
    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Number of columns stored under `key`.
    pub fn column_count(&self, key: &StaticBuffer) -> usize {
        self.rows.read().get(key).map_or(0, Row::len)
    }
}

impl KeyColumnValueStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_slice(&self, query: &KeySliceQuery, _txn: &dyn StoreTransaction) -> Result<EntryList> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SombraError::Closed);
        }
        if query.start >= query.end {
            return Ok(EntryList::empty());
        }
        let rows = self.rows.read();
        let Some(row) = rows.get(&query.key) else {
            return Ok(EntryList::empty());
        };
        let limit = query.limit.unwrap_or(usize::MAX);
        let columns = row
            .range((
                Bound::Included(query.start.clone()),
                Bound::Excluded(query.end.clone()),
            ))
            .map(|(_, entry)| entry)
            .take(limit);
        EntryList::from_iter_unbounded(columns)
    }

    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        _txn: &dyn StoreTransaction,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SombraError::Closed);
        }
        let mut rows = self.rows.write();
        let row = rows.entry(key.clone()).or_default();
        for column in deletions {
            row.remove(column);
        }
        for entry in additions {
            row.insert(entry.column(), entry.clone());
        }
        if row.is_empty() {
            rows.remove(key);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct MemoryTransaction {
    config: TxConfig,
}

impl StoreTransaction for MemoryTransaction {
    fn config(&self) -> &TxConfig {
        &self.config
    }

    fn commit(&self) -> Result<()> {
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        Ok(())
    }
}
