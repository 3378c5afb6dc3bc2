use std::fmt;

use crate::types::{Result, SombraError};

/// An immutable reservation of `num_ids` ids for one partition and namespace.
///
/// Ids are the counters `[start, start + num_ids)` shifted left by
/// `tag_bits` with the uniqueness tag in the low bits. With a zero tag width
/// the ids are exactly contiguous.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdBlock {
    start: u64,
    num_ids: u64,
    tag_bits: u32,
    tag: u32,
}

impl IdBlock {
    pub(crate) fn new(start: u64, num_ids: u64, tag_bits: u32, tag: u32) -> Self {
        debug_assert!(num_ids > 0);
        debug_assert!(tag_bits == 0 && tag == 0 || u64::from(tag) < (1u64 << tag_bits));
        Self {
            start,
            num_ids,
            tag_bits,
            tag,
        }
    }

    /// Number of ids in the block.
    pub fn num_ids(&self) -> u64 {
        self.num_ids
    }

    /// The id at `index`; fails with [`SombraError::OutOfBounds`] outside `[0, num_ids)`.
    pub fn get_id(&self, index: u64) -> Result<u64> {
        if index >= self.num_ids {
            return Err(SombraError::out_of_bounds(
                usize::try_from(index).unwrap_or(usize::MAX),
                usize::try_from(self.num_ids).unwrap_or(usize::MAX),
            ));
        }
        Ok(((self.start + index) << self.tag_bits) | u64::from(self.tag))
    }

    /// First counter value (before tag encoding).
    pub fn start_count(&self) -> u64 {
        self.start
    }

    /// Exclusive end counter value (before tag encoding).
    pub fn end_count(&self) -> u64 {
        self.start + self.num_ids
    }

    /// Uniqueness tag stored in the low bits of every id.
    pub fn tag(&self) -> u32 {
        self.tag
    }

    /// Width of the uniqueness tag.
    pub fn tag_bits(&self) -> u32 {
        self.tag_bits
    }

    /// Every id of the block in index order.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        (self.start..self.end_count()).map(move |c| (c << self.tag_bits) | u64::from(self.tag))
    }
}

impl fmt::Display for IdBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{})", self.start, self.end_count())?;
        if self.tag_bits > 0 {
            write!(f, "/{}:{}", self.tag, self.tag_bits)?;
        }
        Ok(())
    }
}
