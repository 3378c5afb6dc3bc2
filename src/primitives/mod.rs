//! Low-level primitives shared by the storage and id layers.
//!
//! Includes zero-copy byte buffers with order-preserving encoders and the
//! injectable clock the allocation protocol sleeps on.

/// Byte-level utilities and encoding/decoding.
///
/// Immutable buffers, sequential readers and writers used for every key,
/// column and value exchanged with a store.
pub mod bytes;

/// Time sources and interruptible sleeping.
pub mod time;
