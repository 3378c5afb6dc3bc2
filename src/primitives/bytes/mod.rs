#![forbid(unsafe_code)]
//! Immutable byte windows, cursors and builders shared by the storage layers.
//!
//! [`StaticBuffer`] is the unit every key, column and value travels in. It is a
//! cheap, zero-copy view over a shared allocation; sub-ranging never copies and
//! the only operation that allocates is inversion, which materializes the
//! complemented bytes.

mod buffer;
mod read;
mod write;

pub use buffer::{
    ArrayFactory, BufferFactory, BytesFactory, StaticBuffer, StaticFactory, BYTE_LEN, CHAR_LEN,
    DOUBLE_LEN, FLOAT_LEN, INT_LEN, LONG_LEN, SHORT_LEN,
};
pub use read::ReadBuffer;
pub use write::WriteBuffer;

pub mod ord {
    //! Order-preserving encoders for fixed-width keys.

    const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Big-endian encoding; byte order matches numeric order.
    pub fn u64_be(v: u64) -> [u8; U64_LEN] {
        v.to_be_bytes()
    }

    /// Descending encoding; larger values sort first under unsigned byte order.
    pub fn u64_desc(v: u64) -> [u8; U64_LEN] {
        (!v).to_be_bytes()
    }

    /// Decodes a value written by [`u64_desc`].
    pub fn decode_u64_desc(bytes: [u8; U64_LEN]) -> u64 {
        !u64::from_be_bytes(bytes)
    }

    /// Number of significant bits in `v` (zero for zero).
    pub fn unsigned_bit_length(v: u64) -> u32 {
        u64::BITS - v.leading_zeros()
    }
}
