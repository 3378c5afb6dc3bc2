//! Zero-copy entry encoding and distributed id block allocation.
//!
//! The [`storage`] layer packs column/value entries into shared byte arenas
//! and defines the key-column-value store contract; [`ids`] allocates
//! disjoint id blocks on top of any key-consistent store.

#![warn(missing_docs)]

pub mod ids;
pub mod logging;
pub mod primitives;
pub mod storage;
pub mod types;

pub use ids::{ConsistentKeyIdAuthority, IdAuthority, IdAuthorityOptions, IdBlock, IdPool};
pub use types::{NamespaceId, PartitionId, Result, SombraError};
