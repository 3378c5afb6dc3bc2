//! Entry encoding and the key-column-value store contract.
//!
//! Everything written to or read from a backend travels as [`Entry`] values
//! packed into [`EntryList`] arenas. Backends implement [`StoreManager`] and
//! [`KeyColumnValueStore`]; the id layer depends only on those traits.

/// Retry executor for single store operations.
pub mod backend_op;
mod entry;
mod entry_list;
/// In-memory backend.
pub mod memory;
mod meta;
mod store;

pub use entry::Entry;
pub use entry_list::{ColumnValue, EntryList, Iter as EntryIter, SlidingEntries, SlidingEntry};
pub use memory::{MemoryStore, MemoryStoreManager};
pub use meta::{EntryMeta, MetaKind, MetaSchema};
pub use store::{
    ConsistencyLevel, KeyColumnValueStore, KeyRange, KeySliceQuery, StoreFeatures, StoreManager,
    StoreTransaction, TxConfig,
};
