//! Column/value pairs packed into a single buffer.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

use super::meta::EntryMeta;
use crate::primitives::bytes::{BufferFactory, ReadBuffer, StaticBuffer, StaticFactory};
use crate::types::{Result, SombraError};

/// A buffer split at `value_pos` into `column = [0, value_pos)` and
/// `value = [value_pos, len)`.
///
/// Equality, ordering and hashing look at the column range only, matching
/// how a column-ordered store treats its cells. Use [`Entry::cmp_encoded`]
/// or [`Entry::encoded_eq`] to compare the full encoding.
#[derive(Clone)]
pub struct Entry {
    buffer: StaticBuffer,
    value_pos: usize,
    meta: EntryMeta,
}

impl Entry {
    /// Wraps an encoded entry; requires `0 < value_pos <= buffer.len()`.
    pub fn new(buffer: StaticBuffer, value_pos: usize) -> Result<Self> {
        if value_pos == 0 || value_pos > buffer.len() {
            return Err(SombraError::invalid(format!(
                "value position {value_pos} outside (0, {}]",
                buffer.len()
            )));
        }
        Ok(Self {
            buffer,
            value_pos,
            meta: EntryMeta::EMPTY,
        })
    }

    /// Concatenates `column` and `value` into a fresh entry.
    pub fn of(column: &[u8], value: &[u8]) -> Result<Self> {
        let mut raw = Vec::with_capacity(column.len() + value.len());
        raw.extend_from_slice(column);
        raw.extend_from_slice(value);
        Self::new(StaticBuffer::new(raw), column.len())
    }

    /// Entry with an empty value.
    pub fn column_only(column: &[u8]) -> Result<Self> {
        Self::of(column, &[])
    }

    pub(crate) fn from_parts(buffer: StaticBuffer, value_pos: usize, meta: EntryMeta) -> Self {
        debug_assert!(value_pos > 0 && value_pos <= buffer.len());
        Self {
            buffer,
            value_pos,
            meta,
        }
    }

    /// Replaces the metadata.
    pub fn with_meta(mut self, meta: EntryMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Sets a time-to-live in seconds.
    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.meta.ttl = Some(ttl_secs);
        self
    }

    /// Sets a write timestamp.
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.meta.timestamp = Some(timestamp);
        self
    }

    /// Attached metadata.
    pub fn meta(&self) -> &EntryMeta {
        &self.meta
    }

    /// Time-to-live in seconds; `None` is infinite.
    pub fn ttl(&self) -> Option<u32> {
        self.meta.ttl
    }

    /// Offset where the value starts.
    pub fn value_position(&self) -> usize {
        self.value_pos
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Entries always have a non-empty column.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true when the value range is non-empty.
    pub fn has_value(&self) -> bool {
        self.value_pos < self.buffer.len()
    }

    /// Borrows the column bytes.
    pub fn column_slice(&self) -> &[u8] {
        &self.buffer.as_slice()[..self.value_pos]
    }

    /// Borrows the value bytes.
    pub fn value_slice(&self) -> &[u8] {
        &self.buffer.as_slice()[self.value_pos..]
    }

    /// Zero-copy column buffer.
    pub fn column(&self) -> StaticBuffer {
        self.column_as(&StaticFactory)
    }

    /// Zero-copy value buffer.
    pub fn value(&self) -> StaticBuffer {
        self.value_as(&StaticFactory)
    }

    /// Converts the column through `factory`.
    pub fn column_as<T>(&self, factory: &impl BufferFactory<T>) -> T {
        factory.build(self.buffer.bytes(), 0..self.value_pos)
    }

    /// Converts the value through `factory`.
    pub fn value_as<T>(&self, factory: &impl BufferFactory<T>) -> T {
        factory.build(self.buffer.bytes(), self.value_pos..self.buffer.len())
    }

    /// The full encoding (column followed by value).
    pub fn buffer(&self) -> &StaticBuffer {
        &self.buffer
    }

    /// Sequential reader over the full encoding.
    pub fn as_read_buffer(&self) -> ReadBuffer {
        self.buffer.as_read_buffer()
    }

    /// Orders by the full encoded bytes.
    pub fn cmp_encoded(&self, other: &Entry) -> Ordering {
        self.buffer.cmp(&other.buffer)
    }

    /// Compares the full encoding and the split point.
    pub fn encoded_eq(&self, other: &Entry) -> bool {
        self.value_pos == other.value_pos && self.buffer == other.buffer
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.column_slice() == other.column_slice()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.column_slice().cmp(other.column_slice())
    }
}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.column_slice().hash(state);
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}->0x{}",
            hex::encode_upper(self.column_slice()),
            hex::encode_upper(self.value_slice())
        )?;
        if !self.meta.is_empty() {
            write!(f, " {:?}", self.meta)?;
        }
        Ok(())
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}->0x{}",
            hex::encode_upper(self.column_slice()),
            hex::encode_upper(self.value_slice())
        )
    }
}
