#![forbid(unsafe_code)]
//! Shared identifiers and the crate-wide error type.

use std::fmt;
use std::time::Duration;

/// Coarse-grained shard of the id space.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PartitionId(pub u32);

/// Logical category of ids with its own block-size policy.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct NamespaceId(pub u32);

/// Errors produced by the encoding layer, the store contract and the id authority.
///
/// Callers must be able to tell exhaustion, timeouts and identity collisions
/// apart, so each failure kind has its own variant.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// I/O failure (configuration files, CLI output).
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Retry-eligible storage failure (network blip, backend timeout).
    #[error("temporary storage failure: {0}")]
    TemporaryStorage(String),
    /// Storage failure that retrying cannot fix.
    #[error("permanent storage failure: {0}")]
    PermanentStorage(String),
    /// The id space of a namespace has no room for another block.
    #[error("id pool exhausted on partition({partition})-namespace({namespace}): {detail}")]
    PoolExhausted {
        /// Partition that ran out of ids.
        partition: PartitionId,
        /// Namespace that ran out of ids.
        namespace: NamespaceId,
        /// Human readable description of the bound that was hit.
        detail: String,
    },
    /// Two authorities share one unique instance id.
    #[error("uniqueness violation: {0}")]
    UniquenessViolation(String),
    /// The acquisition budget elapsed without winning a block.
    #[error(
        "timed out after {elapsed:?} (budget {timeout:?}) allocating id block on partition({partition})-namespace({namespace})"
    )]
    Timeout {
        /// Partition of the failed call.
        partition: PartitionId,
        /// Namespace of the failed call.
        namespace: NamespaceId,
        /// Time spent before giving up.
        elapsed: Duration,
        /// Budget supplied by the caller.
        timeout: Duration,
    },
    /// Indexed access outside of `[0, len)`.
    #[error("index {index} out of bounds for length {len}")]
    OutOfBounds {
        /// Requested index or byte position.
        index: usize,
        /// Length of the accessed structure.
        len: usize,
    },
    /// Invalid argument or configuration value.
    #[error("invalid argument: {0}")]
    Invalid(String),
    /// Operation not offered by this backend.
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    /// The component was closed while the call was in flight.
    #[error("closed")]
    Closed,
    /// Configuration file could not be parsed.
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SombraError>;

impl SombraError {
    /// Returns true when the failure may go away on retry.
    pub fn is_temporary(&self) -> bool {
        matches!(self, SombraError::TemporaryStorage(_))
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        SombraError::Invalid(msg.into())
    }

    pub(crate) fn out_of_bounds(index: usize, len: usize) -> Self {
        SombraError::OutOfBounds { index, len }
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(value: u32) -> Self {
        PartitionId(value)
    }
}

impl From<PartitionId> for u32 {
    fn from(value: PartitionId) -> Self {
        value.0
    }
}

impl From<u32> for NamespaceId {
    fn from(value: u32) -> Self {
        NamespaceId(value)
    }
}

impl From<NamespaceId> for u32 {
    fn from(value: NamespaceId) -> Self {
        value.0
    }
}
