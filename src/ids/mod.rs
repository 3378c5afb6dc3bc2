//! Id block allocation.
//!
//! [`ConsistentKeyIdAuthority`] hands out disjoint [`IdBlock`]s per
//! `(partition, namespace)` using a claim-and-verify protocol against any
//! key-consistent [`crate::storage::StoreManager`]; [`IdPool`] turns blocks
//! into single ids.

mod authority;
mod block;
mod metrics;
mod ops;
mod options;
mod pool;
mod registry;
mod sizer;

pub use authority::{ConsistentKeyIdAuthority, IdAuthority};
pub use block::IdBlock;
pub use metrics::{CounterMetrics, IdAuthorityMetrics, MetricsSnapshot, NoopMetrics};
pub use options::{ConflictAvoidanceMode, IdAuthorityOptions, RawOptions};
pub use pool::{IdPool, IdPoolOptions};
pub use registry::Registration;
pub use sizer::{FixedBlockSizer, IdBlockSizer, NamespaceBlockSizer, NamespaceLimits, SizerConfig};
