//! Arena-packed entry lists.
//!
//! All entries of a list live back to back in one shared allocation. Each
//! entry is described by one packed `u64`: the cumulative end offset of the
//! entry in the high 32 bits and its value position in the low 32 bits. The
//! start of entry `i` is the end of entry `i - 1`. When the list carries
//! metadata, every entry's metadata bytes sit directly in front of its column.
//!
//! Two builders exist because stores hand back either a sized collection or a
//! cursor: [`EntryList::from_slice`] sizes the arena exactly in a first pass,
//! [`EntryList::from_iter_unbounded`] grows it geometrically and trims at the
//! end. Both produce the same entries.

use core::fmt;

use bytes::Bytes;

use super::entry::Entry;
use super::meta::{EntryMeta, MetaSchema};
use crate::primitives::bytes::{BufferFactory, StaticBuffer, StaticFactory};
use crate::types::{Result, SombraError};

const INITIAL_POSITIONS: usize = 10;
const INITIAL_BYTES_PER_ENTRY: usize = 15;

/// Anything that can be packed into an [`EntryList`].
pub trait ColumnValue {
    /// Column bytes; must be non-empty.
    fn column_bytes(&self) -> &[u8];
    /// Value bytes.
    fn value_bytes(&self) -> &[u8];
    /// Metadata to store alongside the entry.
    fn entry_meta(&self) -> EntryMeta {
        EntryMeta::EMPTY
    }
}

impl ColumnValue for Entry {
    fn column_bytes(&self) -> &[u8] {
        self.column_slice()
    }

    fn value_bytes(&self) -> &[u8] {
        self.value_slice()
    }

    fn entry_meta(&self) -> EntryMeta {
        *self.meta()
    }
}

impl ColumnValue for (StaticBuffer, StaticBuffer) {
    fn column_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    fn value_bytes(&self) -> &[u8] {
        self.1.as_slice()
    }
}

impl ColumnValue for (Vec<u8>, Vec<u8>) {
    fn column_bytes(&self) -> &[u8] {
        &self.0
    }

    fn value_bytes(&self) -> &[u8] {
        &self.1
    }
}

impl<'a> ColumnValue for (&'a [u8], &'a [u8]) {
    fn column_bytes(&self) -> &[u8] {
        self.0
    }

    fn value_bytes(&self) -> &[u8] {
        self.1
    }
}

impl<T: ColumnValue + ?Sized> ColumnValue for &T {
    fn column_bytes(&self) -> &[u8] {
        (**self).column_bytes()
    }

    fn value_bytes(&self) -> &[u8] {
        (**self).value_bytes()
    }

    fn entry_meta(&self) -> EntryMeta {
        (**self).entry_meta()
    }
}

/// Immutable, indexable sequence of entries over one shared allocation.
#[derive(Clone, Default)]
pub struct EntryList {
    data: Bytes,
    limit_and_value_pos: Vec<u64>,
    schema: MetaSchema,
}

fn pack(limit: usize, value_pos: usize) -> Result<u64> {
    let limit = u32::try_from(limit)
        .map_err(|_| SombraError::invalid(format!("entry list exceeds 4GiB at offset {limit}")))?;
    debug_assert!(value_pos > 0);
    Ok((u64::from(limit) << 32) | value_pos as u64)
}

const fn limit_of(packed: u64) -> usize {
    (packed >> 32) as usize
}

const fn value_pos_of(packed: u64) -> usize {
    (packed & u32::MAX as u64) as usize
}

fn check_element<E: ColumnValue>(element: &E, schema: &MetaSchema) -> Result<()> {
    if element.column_bytes().is_empty() {
        return Err(SombraError::invalid("entry column must not be empty"));
    }
    if element.column_bytes().len() > u32::MAX as usize {
        return Err(SombraError::invalid("entry column exceeds 4GiB"));
    }
    if element.entry_meta().schema() != *schema {
        return Err(SombraError::invalid(
            "entry metadata differs from the schema of the first entry",
        ));
    }
    Ok(())
}

impl EntryList {
    /// The empty list.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Packs a sized collection, allocating the arena exactly once.
    pub fn from_slice<E: ColumnValue>(elements: &[E]) -> Result<Self> {
        let Some(first) = elements.first() else {
            return Ok(Self::empty());
        };
        let schema = first.entry_meta().schema();
        let meta_len = EntryMeta::encoded_len(&schema);
        let mut data_len = 0usize;
        for element in elements {
            check_element(element, &schema)?;
            data_len += meta_len + element.column_bytes().len() + element.value_bytes().len();
        }

        let mut data = Vec::with_capacity(data_len);
        let mut positions = Vec::with_capacity(elements.len());
        for element in elements {
            element.entry_meta().write_to(&schema, &mut data)?;
            data.extend_from_slice(element.column_bytes());
            data.extend_from_slice(element.value_bytes());
            positions.push(pack(data.len(), element.column_bytes().len())?);
        }
        debug_assert_eq!(data.len(), data_len);
        Ok(Self {
            data: Bytes::from(data),
            limit_and_value_pos: positions,
            schema,
        })
    }

    /// Packs a sequence of unknown length.
    ///
    /// The arena starts at room for ten entries of fifteen bytes and at least
    /// doubles whenever it overflows. At the end the positions are trimmed to
    /// fit exactly and the arena is trimmed when more than a third of it is slack.
    pub fn from_iter_unbounded<E, I>(elements: I) -> Result<Self>
    where
        E: ColumnValue,
        I: IntoIterator<Item = E>,
    {
        let mut iter = elements.into_iter().peekable();
        if iter.peek().is_none() {
            return Ok(Self::empty());
        }
        let mut positions: Vec<u64> = Vec::with_capacity(INITIAL_POSITIONS);
        let mut data: Vec<u8> = Vec::with_capacity(INITIAL_POSITIONS * INITIAL_BYTES_PER_ENTRY);
        let mut schema: Option<MetaSchema> = None;

        for element in iter {
            let schema = schema.get_or_insert_with(|| element.entry_meta().schema());
            check_element(&element, schema)?;
            let col = element.column_bytes();
            let val = element.value_bytes();
            ensure_space(
                &mut data,
                EntryMeta::encoded_len(schema) + col.len() + val.len(),
            );
            element.entry_meta().write_to(schema, &mut data)?;
            data.extend_from_slice(col);
            data.extend_from_slice(val);

            ensure_space(&mut positions, 1);
            positions.push(pack(data.len(), col.len())?);
        }

        if data.capacity() > data.len() * 3 / 2 {
            data.shrink_to_fit();
        }
        positions.shrink_to_fit();
        Ok(Self {
            data: Bytes::from(data),
            limit_and_value_pos: positions,
            schema: schema.unwrap_or_default(),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.limit_and_value_pos.len()
    }

    /// Returns true for the empty list.
    pub fn is_empty(&self) -> bool {
        self.limit_and_value_pos.is_empty()
    }

    /// Returns true when entries carry metadata.
    pub fn has_meta(&self) -> bool {
        !self.schema.is_empty()
    }

    /// Metadata kinds stored in front of each entry.
    pub fn schema(&self) -> &MetaSchema {
        &self.schema
    }

    /// Approximate heap footprint in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len() + self.limit_and_value_pos.capacity() * 8
    }

    /// Entry at `index`, sharing the list's allocation.
    pub fn get(&self, index: usize) -> Result<Entry> {
        if index >= self.len() {
            return Err(SombraError::out_of_bounds(index, self.len()));
        }
        Ok(self.entry_at(index))
    }

    /// First entry, if any.
    pub fn first(&self) -> Option<Entry> {
        (!self.is_empty()).then(|| self.entry_at(0))
    }

    /// Last entry, if any.
    pub fn last(&self) -> Option<Entry> {
        self.len().checked_sub(1).map(|i| self.entry_at(i))
    }

    fn bounds(&self, index: usize) -> (usize, usize, usize, EntryMeta) {
        let start = match index {
            0 => 0,
            _ => limit_of(self.limit_and_value_pos[index - 1]),
        };
        let packed = self.limit_and_value_pos[index];
        let (meta, column_start) = EntryMeta::read_from(&self.schema, &self.data, start);
        (column_start, limit_of(packed), value_pos_of(packed), meta)
    }

    fn entry_at(&self, index: usize) -> Entry {
        let (start, limit, value_pos, meta) = self.bounds(index);
        let buffer = StaticFactory.build(&self.data, start..limit);
        Entry::from_parts(buffer, value_pos, meta)
    }

    /// Iterates owned entries; each shares the list's allocation.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            front: 0,
            back: self.len(),
        }
    }

    /// Single reusable cursor for one sequential pass.
    ///
    /// Each call to [`SlidingEntries::advance`] overwrites the view returned
    /// by the previous call, so no entry can outlive its iteration step.
    pub fn sliding(&self) -> SlidingEntries<'_> {
        SlidingEntries {
            list: self,
            current: SlidingEntry {
                data: &self.data,
                index: None,
                start: 0,
                limit: 0,
                value_pos: 0,
                meta: EntryMeta::EMPTY,
            },
        }
    }
}

fn ensure_space<T>(vec: &mut Vec<T>, additional: usize) {
    let needed = vec.len() + additional;
    if needed <= vec.capacity() {
        return;
    }
    let target = (vec.capacity() * 2).max(needed);
    vec.reserve_exact(target - vec.len());
}

impl PartialEq for EntryList {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.schema == other.schema
            && self.iter().zip(other.iter()).all(|(a, b)| {
                a.encoded_eq(&b) && a.meta() == b.meta()
            })
    }
}

impl Eq for EntryList {}

impl fmt::Debug for EntryList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a EntryList {
    type Item = Entry;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owned-entry iterator over an [`EntryList`].
pub struct Iter<'a> {
    list: &'a EntryList,
    front: usize,
    back: usize,
}

impl Iterator for Iter<'_> {
    type Item = Entry;

    fn next(&mut self) -> Option<Entry> {
        if self.front >= self.back {
            return None;
        }
        let entry = self.list.entry_at(self.front);
        self.front += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.back - self.front;
        (n, Some(n))
    }
}

impl DoubleEndedIterator for Iter<'_> {
    fn next_back(&mut self) -> Option<Entry> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        Some(self.list.entry_at(self.back))
    }
}

impl ExactSizeIterator for Iter<'_> {}

/// Lending cursor returned by [`EntryList::sliding`].
pub struct SlidingEntries<'a> {
    list: &'a EntryList,
    current: SlidingEntry<'a>,
}

impl<'a> SlidingEntries<'a> {
    /// Returns true while another entry follows.
    pub fn has_next(&self) -> bool {
        self.current.index.map_or(0, |i| i + 1) < self.list.len()
    }

    /// Moves to the next entry and borrows it until the next call.
    pub fn advance(&mut self) -> Option<&SlidingEntry<'a>> {
        if !self.has_next() {
            return None;
        }
        let next = self.current.index.map_or(0, |i| i + 1);
        let (start, limit, value_pos, meta) = self.list.bounds(next);
        self.current.index = Some(next);
        self.current.start = start;
        self.current.limit = limit;
        self.current.value_pos = value_pos;
        self.current.meta = meta;
        Some(&self.current)
    }
}

/// In-place view of one entry of a list during sliding iteration.
///
/// Equality and ordering are defined over the column range only, like [`Entry`].
pub struct SlidingEntry<'a> {
    data: &'a Bytes,
    index: Option<usize>,
    start: usize,
    limit: usize,
    value_pos: usize,
    meta: EntryMeta,
}

impl SlidingEntry<'_> {
    /// Position of the entry in its list.
    pub fn index(&self) -> usize {
        self.index.unwrap_or(0)
    }

    /// Offset where the value starts.
    pub fn value_position(&self) -> usize {
        self.value_pos
    }

    /// Encoded length of column plus value.
    pub fn len(&self) -> usize {
        self.limit - self.start
    }

    /// Entries always have a non-empty column.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns true when the value range is non-empty.
    pub fn has_value(&self) -> bool {
        self.value_pos < self.len()
    }

    /// Borrows the column bytes.
    pub fn column_slice(&self) -> &[u8] {
        &self.data[self.start..self.start + self.value_pos]
    }

    /// Borrows the value bytes.
    pub fn value_slice(&self) -> &[u8] {
        &self.data[self.start + self.value_pos..self.limit]
    }

    /// Converts the column through `factory`.
    pub fn column_as<T>(&self, factory: &impl BufferFactory<T>) -> T {
        factory.build(self.data, self.start..self.start + self.value_pos)
    }

    /// Converts the value through `factory`.
    pub fn value_as<T>(&self, factory: &impl BufferFactory<T>) -> T {
        factory.build(self.data, self.start + self.value_pos..self.limit)
    }

    /// Metadata parsed for this entry.
    pub fn meta(&self) -> &EntryMeta {
        &self.meta
    }

    /// Detaches the current view into an owned [`Entry`] sharing the allocation.
    pub fn to_entry(&self) -> Entry {
        Entry::from_parts(
            StaticFactory.build(self.data, self.start..self.limit),
            self.value_pos,
            self.meta,
        )
    }
}

impl PartialEq<Entry> for SlidingEntry<'_> {
    fn eq(&self, other: &Entry) -> bool {
        self.column_slice() == other.column_slice()
    }
}

impl PartialOrd<Entry> for SlidingEntry<'_> {
    fn partial_cmp(&self, other: &Entry) -> Option<core::cmp::Ordering> {
        Some(self.column_slice().cmp(other.column_slice()))
    }
}

impl fmt::Debug for SlidingEntry<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{}->0x{}",
            hex::encode_upper(self.column_slice()),
            hex::encode_upper(self.value_slice())
        )
    }
}
