//! Bounds-checked big-endian cursor over a byte slice.
//!
//! Every read checks the remaining length first, so a truncated blob always
//! surfaces as [`DecodeError::Corrupted`] rather than a panic.

use super::DecodeError;
use bytes::Buf;

pub struct Reader<'a> {
    buf: &'a [u8],
    consumed: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, consumed: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Byte offset from the start of the original slice.
    pub fn position(&self) -> usize {
        self.consumed
    }

    fn need(&self, n: usize, what: &str) -> Result<(), DecodeError> {
        if self.buf.len() < n {
            return Err(DecodeError::corrupted(format!(
                "truncated {} at offset {} (needed {} bytes, {} left)",
                what,
                self.consumed,
                n,
                self.buf.len()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self, what: &str) -> Result<u8, DecodeError> {
        self.need(1, what)?;
        self.consumed += 1;
        Ok(self.buf.get_u8())
    }

    pub fn i8(&mut self, what: &str) -> Result<i8, DecodeError> {
        self.need(1, what)?;
        self.consumed += 1;
        Ok(self.buf.get_i8())
    }

    pub fn u16(&mut self, what: &str) -> Result<u16, DecodeError> {
        self.need(2, what)?;
        self.consumed += 2;
        Ok(self.buf.get_u16())
    }

    pub fn i16(&mut self, what: &str) -> Result<i16, DecodeError> {
        self.need(2, what)?;
        self.consumed += 2;
        Ok(self.buf.get_i16())
    }

    pub fn u32(&mut self, what: &str) -> Result<u32, DecodeError> {
        self.need(4, what)?;
        self.consumed += 4;
        Ok(self.buf.get_u32())
    }

    pub fn i32(&mut self, what: &str) -> Result<i32, DecodeError> {
        self.need(4, what)?;
        self.consumed += 4;
        Ok(self.buf.get_i32())
    }

    pub fn i64(&mut self, what: &str) -> Result<i64, DecodeError> {
        self.need(8, what)?;
        self.consumed += 8;
        Ok(self.buf.get_i64())
    }

    pub fn f32(&mut self, what: &str) -> Result<f32, DecodeError> {
        self.need(4, what)?;
        self.consumed += 4;
        Ok(f32::from_bits(self.buf.get_u32()))
    }

    pub fn f64(&mut self, what: &str) -> Result<f64, DecodeError> {
        self.need(8, what)?;
        self.consumed += 8;
        Ok(f64::from_bits(self.buf.get_u64()))
    }

    pub fn bytes(&mut self, n: usize, what: &str) -> Result<&'a [u8], DecodeError> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        self.consumed += n;
        Ok(head)
    }

    /// Length prefix declared as a signed 32-bit count of `elem_size`-byte
    /// items. Negative counts and counts that cannot fit in the remaining
    /// input are rejected before anything is allocated.
    pub fn count(&mut self, elem_size: usize, what: &str) -> Result<usize, DecodeError> {
        let raw = self.i32(what)?;
        let n = usize::try_from(raw)
            .map_err(|_| DecodeError::corrupted(format!("negative {} ({})", what, raw)))?;
        if n.saturating_mul(elem_size) > self.buf.len() {
            return Err(DecodeError::corrupted(format!(
                "{} of {} exceeds remaining {} bytes",
                what,
                n,
                self.buf.len()
            )));
        }
        Ok(n)
    }
}
