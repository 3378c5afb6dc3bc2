//! Per-entry metadata and its fixed-width on-array encoding.

use smallvec::SmallVec;

use crate::primitives::bytes::{INT_LEN, LONG_LEN};
use crate::types::{Result, SombraError};

/// Metadata kinds an entry may carry, in serialization order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetaKind {
    /// Time-to-live in seconds (`u32`).
    Ttl,
    /// Write timestamp (`u64`).
    Timestamp,
}

impl MetaKind {
    /// Encoded width of a value of this kind.
    pub const fn byte_len(self) -> usize {
        match self {
            MetaKind::Ttl => INT_LEN,
            MetaKind::Timestamp => LONG_LEN,
        }
    }
}

/// Optional metadata attached to an entry. Absent TTL means infinite.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct EntryMeta {
    /// Time-to-live in seconds.
    pub ttl: Option<u32>,
    /// Write timestamp.
    pub timestamp: Option<u64>,
}

/// Ordered list of metadata kinds stored in front of every entry of a list.
pub type MetaSchema = SmallVec<[MetaKind; 2]>;

impl EntryMeta {
    /// No metadata.
    pub const EMPTY: EntryMeta = EntryMeta {
        ttl: None,
        timestamp: None,
    };

    /// Returns true when no metadata is set.
    pub fn is_empty(&self) -> bool {
        self.ttl.is_none() && self.timestamp.is_none()
    }

    /// Kinds present on this value, in serialization order.
    pub fn schema(&self) -> MetaSchema {
        let mut schema = MetaSchema::new();
        if self.ttl.is_some() {
            schema.push(MetaKind::Ttl);
        }
        if self.timestamp.is_some() {
            schema.push(MetaKind::Timestamp);
        }
        schema
    }

    /// Bytes needed to encode the kinds in `schema`.
    pub(crate) fn encoded_len(schema: &[MetaKind]) -> usize {
        schema.iter().map(|k| k.byte_len()).sum()
    }

    /// Appends the values named by `schema`; fails if one is missing.
    pub(crate) fn write_to(&self, schema: &[MetaKind], out: &mut Vec<u8>) -> Result<()> {
        for kind in schema {
            match kind {
                MetaKind::Ttl => {
                    let ttl = self
                        .ttl
                        .ok_or_else(|| SombraError::invalid("entry lacks ttl required by list schema"))?;
                    out.extend_from_slice(&ttl.to_be_bytes());
                }
                MetaKind::Timestamp => {
                    let ts = self.timestamp.ok_or_else(|| {
                        SombraError::invalid("entry lacks timestamp required by list schema")
                    })?;
                    out.extend_from_slice(&ts.to_be_bytes());
                }
            }
        }
        Ok(())
    }

    /// Decodes the values named by `schema` starting at `offset`.
    ///
    /// Returns the metadata and the offset just past it. `data` must hold the
    /// encoded values; lists only call this on bytes they wrote.
    pub(crate) fn read_from(schema: &[MetaKind], data: &[u8], mut offset: usize) -> (Self, usize) {
        let mut meta = EntryMeta::EMPTY;
        for kind in schema {
            match kind {
                MetaKind::Ttl => {
                    let mut raw = [0u8; INT_LEN];
                    raw.copy_from_slice(&data[offset..offset + INT_LEN]);
                    meta.ttl = Some(u32::from_be_bytes(raw));
                }
                MetaKind::Timestamp => {
                    let mut raw = [0u8; LONG_LEN];
                    raw.copy_from_slice(&data[offset..offset + LONG_LEN]);
                    meta.timestamp = Some(u64::from_be_bytes(raw));
                }
            }
            offset += kind.byte_len();
        }
        (meta, offset)
    }
}
