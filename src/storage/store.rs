//! The ordered key-column-value store contract consumed by the id layer.
//!
//! A store maps a row key to an ordered set of columns. The only atomic unit
//! is a mutation of a single row; nothing here offers multi-row atomicity or
//! compare-and-swap.

use std::fmt;
use std::sync::Arc;

use super::entry::Entry;
use super::entry_list::EntryList;
use crate::primitives::bytes::StaticBuffer;
use crate::types::{Result, SombraError};

/// Capability flags a backend reports about itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreFeatures {
    /// Single-row reads observe every acknowledged single-row write.
    pub key_consistent: bool,
    /// Several processes may share the store over a network.
    pub distributed: bool,
    /// Parts of the key space are physically local to this process.
    pub local_key_partition: bool,
    /// Rows come back in key order from key scans.
    pub ordered_scan: bool,
    /// Entries may carry a time-to-live.
    pub cell_ttl: bool,
    /// Entries may carry an explicit write timestamp.
    pub timestamps: bool,
}

impl StoreFeatures {
    /// Features of a single-process, consistent store.
    pub fn local() -> Self {
        Self {
            key_consistent: true,
            distributed: false,
            local_key_partition: false,
            ordered_scan: true,
            cell_ttl: true,
            timestamps: true,
        }
    }

    /// Sets [`StoreFeatures::key_consistent`].
    pub fn key_consistent(mut self, value: bool) -> Self {
        self.key_consistent = value;
        self
    }

    /// Sets [`StoreFeatures::distributed`].
    pub fn distributed(mut self, value: bool) -> Self {
        self.distributed = value;
        self
    }

    /// Sets [`StoreFeatures::local_key_partition`].
    pub fn local_key_partition(mut self, value: bool) -> Self {
        self.local_key_partition = value;
        self
    }

    /// Sets [`StoreFeatures::ordered_scan`].
    pub fn ordered_scan(mut self, value: bool) -> Self {
        self.ordered_scan = value;
        self
    }
}

/// Half-open range of row keys `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub start: StaticBuffer,
    /// Exclusive upper bound.
    pub end: StaticBuffer,
}

impl KeyRange {
    /// Creates a range.
    pub fn new(start: StaticBuffer, end: StaticBuffer) -> Self {
        Self { start, end }
    }

    /// Returns true when `key` lies inside the range.
    pub fn contains(&self, key: &StaticBuffer) -> bool {
        *key >= self.start && *key < self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Column slice of one row: `[start, end)` with an optional row limit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeySliceQuery {
    /// Row key.
    pub key: StaticBuffer,
    /// Inclusive first column.
    pub start: StaticBuffer,
    /// Exclusive last column.
    pub end: StaticBuffer,
    /// Maximum number of columns to return.
    pub limit: Option<usize>,
}

impl KeySliceQuery {
    /// Unlimited slice `[start, end)` of `key`.
    pub fn new(key: StaticBuffer, start: StaticBuffer, end: StaticBuffer) -> Self {
        Self {
            key,
            start,
            end,
            limit: None,
        }
    }

    /// Caps the number of returned columns.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Consistency a transaction asks the backend for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConsistencyLevel {
    /// Backend default.
    #[default]
    Default,
    /// Strong consistency on single-row operations.
    Key,
    /// Strong consistency scoped to the local data center.
    LocalKey,
}

/// Per-transaction settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TxConfig {
    /// Metrics/log group the transaction belongs to.
    pub group_name: Option<String>,
    /// Requested consistency.
    pub consistency: ConsistencyLevel,
}

impl TxConfig {
    /// Config with `consistency` and no group.
    pub fn with_consistency(consistency: ConsistencyLevel) -> Self {
        Self {
            group_name: None,
            consistency,
        }
    }

    /// Sets the group name.
    pub fn group(mut self, name: impl Into<String>) -> Self {
        self.group_name = Some(name.into());
        self
    }
}

/// Handle carried through store calls.
pub trait StoreTransaction: Send + Sync + fmt::Debug {
    /// Settings the transaction was opened with.
    fn config(&self) -> &TxConfig;

    /// Makes the transaction's effects durable.
    fn commit(&self) -> Result<()>;

    /// Abandons the transaction.
    fn rollback(&self) -> Result<()>;
}

/// One ordered table (column family) of a backend.
pub trait KeyColumnValueStore: Send + Sync + fmt::Debug {
    /// Table name.
    fn name(&self) -> &str;

    /// Columns of `query.key` in `[query.start, query.end)`, ordered by column bytes.
    fn get_slice(&self, query: &KeySliceQuery, txn: &dyn StoreTransaction) -> Result<EntryList>;

    /// Applies `additions` and `deletions` to one row atomically.
    ///
    /// Deletions are applied before additions so a column present in both ends up written.
    fn mutate(
        &self,
        key: &StaticBuffer,
        additions: &[Entry],
        deletions: &[StaticBuffer],
        txn: &dyn StoreTransaction,
    ) -> Result<()>;

    /// Releases the table handle.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Backend factory and lifecycle owner.
pub trait StoreManager: Send + Sync + fmt::Debug {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Capability flags.
    fn features(&self) -> StoreFeatures;

    /// Opens (creating if needed) the table `name`.
    fn open_database(&self, name: &str) -> Result<Arc<dyn KeyColumnValueStore>>;

    /// Starts a transaction.
    fn begin_transaction(&self, config: TxConfig) -> Result<Box<dyn StoreTransaction>>;

    /// Key ranges physically local to this process.
    fn local_key_partition(&self) -> Result<Vec<KeyRange>> {
        Err(SombraError::Unsupported("local key partition"))
    }

    /// Drops every table.
    fn clear_storage(&self) -> Result<()>;

    /// Shuts the backend down.
    fn close(&self) -> Result<()>;
}
