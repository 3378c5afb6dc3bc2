use core::borrow::Borrow;
use core::cmp::Ordering;
use core::fmt;
use core::ops::Range;

use bytes::Bytes;

use super::ReadBuffer;
use crate::types::{Result, SombraError};

/// Width of an encoded `u8`.
pub const BYTE_LEN: usize = 1;
/// Width of an encoded `i16`/`u16`.
pub const SHORT_LEN: usize = 2;
/// Width of an encoded `i32`/`u32`.
pub const INT_LEN: usize = 4;
/// Width of an encoded `i64`/`u64`.
pub const LONG_LEN: usize = 8;
/// Width of an encoded UTF-16 code unit.
pub const CHAR_LEN: usize = 2;
/// Width of an encoded `f32`.
pub const FLOAT_LEN: usize = 4;
/// Width of an encoded `f64`.
pub const DOUBLE_LEN: usize = 8;

/// Converts a window of a shared allocation into some target representation.
///
/// Factories let callers pick between zero-copy views and owned copies
/// without the buffer knowing about every representation.
pub trait BufferFactory<T> {
    /// Builds a value from `source[range]`.
    fn build(&self, source: &Bytes, range: Range<usize>) -> T;
}

/// Produces an owned `Vec<u8>` copy of the window.
#[derive(Copy, Clone, Debug, Default)]
pub struct ArrayFactory;

/// Produces a zero-copy [`StaticBuffer`] over the window.
#[derive(Copy, Clone, Debug, Default)]
pub struct StaticFactory;

/// Produces a zero-copy [`Bytes`] handle over the window.
#[derive(Copy, Clone, Debug, Default)]
pub struct BytesFactory;

impl BufferFactory<Vec<u8>> for ArrayFactory {
    fn build(&self, source: &Bytes, range: Range<usize>) -> Vec<u8> {
        source[range].to_vec()
    }
}

impl BufferFactory<StaticBuffer> for StaticFactory {
    fn build(&self, source: &Bytes, range: Range<usize>) -> StaticBuffer {
        StaticBuffer {
            bytes: source.slice(range),
        }
    }
}

impl BufferFactory<Bytes> for BytesFactory {
    fn build(&self, source: &Bytes, range: Range<usize>) -> Bytes {
        source.slice(range)
    }
}

/// Immutable window over a (possibly shared) byte allocation.
///
/// Ordering is unsigned lexicographic over the window and equality follows
/// ordering. Primitive reads are big-endian and fail with
/// [`SombraError::OutOfBounds`] outside `[0, len)`.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StaticBuffer {
    bytes: Bytes,
}

impl StaticBuffer {
    /// Wraps an owned or shared allocation without copying.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Wraps a static byte slice.
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self {
            bytes: Bytes::from_static(bytes),
        }
    }

    /// Copies `bytes` into a fresh allocation.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(bytes),
        }
    }

    /// The zero-length buffer.
    pub const fn empty() -> Self {
        Self::from_static(&[])
    }

    /// A buffer of `len` zero bytes; sorts before every other buffer of that length.
    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0u8; len])
    }

    /// A buffer of `len` `0xFF` bytes; sorts after every other buffer of that length.
    pub fn ones(len: usize) -> Self {
        Self::new(vec![0xFFu8; len])
    }

    /// Big-endian concatenation of `values`.
    pub fn from_u32s(values: &[u32]) -> Self {
        let mut out = Vec::with_capacity(values.len() * INT_LEN);
        for v in values {
            out.extend_from_slice(&v.to_be_bytes());
        }
        Self::new(out)
    }

    /// Big-endian encoding of `value`.
    pub fn from_u64(value: u64) -> Self {
        Self::copy_from_slice(&value.to_be_bytes())
    }

    /// Number of bytes in the window.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true for the zero-length buffer.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrows the window as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Borrows the shared handle backing this window.
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Releases the shared handle backing this window.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    fn require(&self, position: usize, size: usize) -> Result<usize> {
        match position.checked_add(size) {
            Some(end) if end <= self.len() => Ok(position),
            _ => Err(SombraError::out_of_bounds(position, self.len())),
        }
    }

    fn read_array<const N: usize>(&self, position: usize) -> Result<[u8; N]> {
        let base = self.require(position, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.bytes[base..base + N]);
        Ok(out)
    }

    /// Reads the byte at `position`.
    pub fn get_u8(&self, position: usize) -> Result<u8> {
        let base = self.require(position, BYTE_LEN)?;
        Ok(self.bytes[base])
    }

    /// Reads a boolean; any positive signed byte is `true`.
    pub fn get_bool(&self, position: usize) -> Result<bool> {
        Ok((self.get_u8(position)? as i8) > 0)
    }

    /// Reads a big-endian `i16`.
    pub fn get_i16(&self, position: usize) -> Result<i16> {
        Ok(i16::from_be_bytes(self.read_array(position)?))
    }

    /// Reads a big-endian `u16`.
    pub fn get_u16(&self, position: usize) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array(position)?))
    }

    /// Reads a UTF-16 code unit; surrogate halves are rejected.
    pub fn get_char(&self, position: usize) -> Result<char> {
        let unit = self.get_u16(position)?;
        char::from_u32(u32::from(unit))
            .ok_or_else(|| SombraError::invalid(format!("surrogate code unit {unit:#06x}")))
    }

    /// Reads a big-endian `i32`.
    pub fn get_i32(&self, position: usize) -> Result<i32> {
        Ok(i32::from_be_bytes(self.read_array(position)?))
    }

    /// Reads a big-endian `u32`.
    pub fn get_u32(&self, position: usize) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array(position)?))
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&self, position: usize) -> Result<i64> {
        Ok(i64::from_be_bytes(self.read_array(position)?))
    }

    /// Reads a big-endian `u64`.
    pub fn get_u64(&self, position: usize) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array(position)?))
    }

    /// Reads a big-endian IEEE-754 `f32`.
    pub fn get_f32(&self, position: usize) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32(position)?))
    }

    /// Reads a big-endian IEEE-754 `f64`.
    pub fn get_f64(&self, position: usize) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64(position)?))
    }

    /// Borrows `length` bytes starting at `position`.
    pub fn get_bytes(&self, position: usize, length: usize) -> Result<&[u8]> {
        let base = self.require(position, length)?;
        Ok(&self.bytes[base..base + length])
    }

    /// Reads `count` consecutive big-endian `u32` values.
    pub fn get_u32s(&self, position: usize, count: usize) -> Result<Vec<u32>> {
        (0..count)
            .map(|i| self.get_u32(position + i * INT_LEN))
            .collect()
    }

    /// Reads `count` consecutive big-endian `u64` values.
    pub fn get_u64s(&self, position: usize, count: usize) -> Result<Vec<u64>> {
        (0..count)
            .map(|i| self.get_u64(position + i * LONG_LEN))
            .collect()
    }

    /// Zero-copy view of `[position, position + length)`.
    pub fn subrange(&self, position: usize, length: usize) -> Result<StaticBuffer> {
        let base = self.require(position, length)?;
        Ok(Self {
            bytes: self.bytes.slice(base..base + length),
        })
    }

    /// Copy of `[position, position + length)` with every byte complemented.
    pub fn subrange_inverted(&self, position: usize, length: usize) -> Result<StaticBuffer> {
        let window = self.get_bytes(position, length)?;
        Ok(Self::new(window.iter().map(|b| !b).collect::<Vec<u8>>()))
    }

    /// Bitwise complement of the whole window, reversing its sort order
    /// relative to other buffers of the same length.
    pub fn inverted(&self) -> StaticBuffer {
        Self::new(self.bytes.iter().map(|b| !b).collect::<Vec<u8>>())
    }

    /// Converts the window through `factory`.
    pub fn as_with<T>(&self, factory: &impl BufferFactory<T>) -> T {
        factory.build(&self.bytes, 0..self.len())
    }

    pub(crate) fn as_range_with<T>(
        &self,
        factory: &impl BufferFactory<T>,
        position: usize,
        length: usize,
    ) -> Result<T> {
        let base = self.require(position, length)?;
        Ok(factory.build(&self.bytes, base..base + length))
    }

    /// Owned copy of the window.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_with(&ArrayFactory)
    }

    /// Starts a sequential decode pass at position zero.
    pub fn as_read_buffer(&self) -> ReadBuffer {
        ReadBuffer::new(self.clone())
    }

    /// Compares the first `len` bytes of `self` with the first `other_len`
    /// bytes of `other`.
    pub fn cmp_prefix(&self, len: usize, other: &StaticBuffer, other_len: usize) -> Ordering {
        let ours = &self.bytes[..len.min(self.len())];
        let theirs = &other.bytes[..other_len.min(other.len())];
        ours.cmp(theirs)
    }
}

impl fmt::Debug for StaticBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode_upper(&self.bytes))
    }
}

impl fmt::Display for StaticBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl AsRef<[u8]> for StaticBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Borrow<[u8]> for StaticBuffer {
    fn borrow(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for StaticBuffer {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl From<Bytes> for StaticBuffer {
    fn from(value: Bytes) -> Self {
        Self { bytes: value }
    }
}

impl From<&'static [u8]> for StaticBuffer {
    fn from(value: &'static [u8]) -> Self {
        Self::from_static(value)
    }
}

impl From<StaticBuffer> for Bytes {
    fn from(value: StaticBuffer) -> Self {
        value.bytes
    }
}
