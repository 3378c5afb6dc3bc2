use core::fmt;

use super::{StaticBuffer, BYTE_LEN, INT_LEN, LONG_LEN, SHORT_LEN};
use crate::types::{Result, SombraError};

/// Sequential decoder over a [`StaticBuffer`].
///
/// Every typed read advances the cursor. While inverted, reads return the
/// bitwise complement of the stored bytes so descending-encoded fields decode
/// to their natural value.
#[derive(Clone)]
pub struct ReadBuffer {
    buffer: StaticBuffer,
    position: usize,
    inverted: bool,
}

impl ReadBuffer {
    /// Creates a cursor at position zero, not inverted.
    pub fn new(buffer: StaticBuffer) -> Self {
        Self {
            buffer,
            position: 0,
            inverted: false,
        }
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the cursor and the end of the window.
    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.position)
    }

    /// Returns true while at least one unread byte remains.
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Returns true when reads are complemented.
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    /// Toggles complemented reads.
    pub fn invert(&mut self) {
        self.inverted = !self.inverted;
    }

    /// Moves the cursor forward by `length` bytes.
    pub fn move_position(&mut self, length: usize) -> Result<()> {
        let target = self
            .position
            .checked_add(length)
            .ok_or_else(|| SombraError::out_of_bounds(usize::MAX, self.buffer.len()))?;
        self.move_position_to(target)
    }

    /// Places the cursor at `position`; the end of the window is allowed.
    pub fn move_position_to(&mut self, position: usize) -> Result<()> {
        if position > self.buffer.len() {
            return Err(SombraError::out_of_bounds(position, self.buffer.len()));
        }
        self.position = position;
        Ok(())
    }

    fn advance(&mut self, size: usize) -> usize {
        let at = self.position;
        self.position += size;
        at
    }

    /// Reads one byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        let v = self.buffer.get_u8(self.position)?;
        self.advance(BYTE_LEN);
        Ok(if self.inverted { !v } else { v })
    }

    /// Reads a boolean byte.
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok((self.get_u8()? as i8) > 0)
    }

    /// Reads a big-endian `u16`.
    pub fn get_u16(&mut self) -> Result<u16> {
        let v = self.buffer.get_u16(self.position)?;
        self.advance(SHORT_LEN);
        Ok(if self.inverted { !v } else { v })
    }

    /// Reads a big-endian `i16`.
    pub fn get_i16(&mut self) -> Result<i16> {
        Ok(self.get_u16()? as i16)
    }

    /// Reads a big-endian `u32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        let v = self.buffer.get_u32(self.position)?;
        self.advance(INT_LEN);
        Ok(if self.inverted { !v } else { v })
    }

    /// Reads a big-endian `i32`.
    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(self.get_u32()? as i32)
    }

    /// Reads a big-endian `u64`.
    pub fn get_u64(&mut self) -> Result<u64> {
        let v = self.buffer.get_u64(self.position)?;
        self.advance(LONG_LEN);
        Ok(if self.inverted { !v } else { v })
    }

    /// Reads a big-endian `i64`.
    pub fn get_i64(&mut self) -> Result<i64> {
        Ok(self.get_u64()? as i64)
    }

    /// Reads a big-endian `f32`.
    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    /// Reads a big-endian `f64`.
    pub fn get_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.get_u64()?))
    }

    /// Reads `length` bytes into an owned vector.
    pub fn get_bytes(&mut self, length: usize) -> Result<Vec<u8>> {
        let window = self.buffer.get_bytes(self.position, length)?;
        let out = if self.inverted {
            window.iter().map(|b| !b).collect()
        } else {
            window.to_vec()
        };
        self.advance(length);
        Ok(out)
    }

    /// Reads a fixed-width array; convenient for `ord` decoders.
    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.get_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Buffer over `[position, len)` without moving the cursor.
    ///
    /// Zero-copy unless the cursor is inverted, in which case the
    /// complemented bytes are materialized.
    pub fn as_relative(&self) -> Result<StaticBuffer> {
        let length = self.remaining();
        if self.inverted {
            self.buffer.subrange_inverted(self.position, length)
        } else {
            self.buffer.subrange(self.position, length)
        }
    }

    /// Consumes the reader, returning the underlying buffer.
    pub fn into_inner(self) -> StaticBuffer {
        self.buffer
    }
}

impl fmt::Debug for ReadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("position", &self.position)
            .field("remaining", &self.remaining())
            .field("inverted", &self.inverted)
            .finish()
    }
}
