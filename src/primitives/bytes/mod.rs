#![forbid(unsafe_code)]
//! Encoding, varint, and cursor utilities shared by the page codecs.

pub mod ord {
    //! Order-preserving encoders for integer keys.

    use core::convert::TryInto;

    const U64_LEN: usize = core::mem::size_of::<u64>();
    const SIGN_BIT: u64 = 1 << 63;

    /// Big-endian encoding for lexicographic order preservation.
    pub fn put_u64_be(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_be_bytes());
    }

    /// Decodes a big-endian u64, or `None` when `src` is not exactly 8 bytes.
    pub fn get_u64_be(src: &[u8]) -> Option<u64> {
        let bytes: [u8; U64_LEN] = src.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    /// Encodes a signed i64 with order preservation (flip sign bit for sorting).
    pub fn put_i64_be(dst: &mut [u8], v: i64) {
        put_u64_be(dst, (v as u64) ^ SIGN_BIT);
    }

    /// Decodes a signed i64 written by [`put_i64_be`].
    pub fn get_i64_be(src: &[u8]) -> Option<i64> {
        get_u64_be(src).map(|flipped| (flipped ^ SIGN_BIT) as i64)
    }
}

pub mod var {
    //! Unsigned varints (7 data bits per byte, high bit continues).

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Number of bytes [`encode_u64`] emits for `value`.
    pub fn encoded_len(mut value: u64) -> usize {
        let mut len = 1;
        while value >= 0x80 {
            value >>= 7;
            len += 1;
        }
        len
    }
}

pub mod buf {
    //! A slice-backed cursor whose reads fail instead of panicking.

    use core::fmt;

    use crate::types::{GinError, Result};

    /// A cursor for reading bytes from a slice with offset tracking.
    #[derive(Clone, Copy)]
    pub struct Cursor<'a> {
        buf: &'a [u8],
        off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }

        /// Takes the next `n` bytes without copying.
        pub fn take(&mut self, n: usize, truncated_msg: &'static str) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(GinError::Corruption("cursor offset overflow"))?;
            if end > self.buf.len() {
                return Err(GinError::Corruption(truncated_msg));
            }
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a big-endian u16.
        pub fn read_u16(&mut self, truncated_msg: &'static str) -> Result<u16> {
            let bytes = self.take(2, truncated_msg)?;
            Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
        }

        /// Reads an unsigned varint, returning `truncated_msg` if input ends early.
        pub fn read_var_u64(&mut self, truncated_msg: &'static str) -> Result<u64> {
            let mut result = 0u64;
            let mut shift = 0u32;
            for _ in 0..10 {
                let byte = *self
                    .buf
                    .get(self.off)
                    .ok_or(GinError::Corruption(truncated_msg))?;
                self.off += 1;
                result |= ((byte & 0x7f) as u64) << shift;
                if (byte & 0x80) == 0 {
                    return Ok(result);
                }
                shift += 7;
            }
            Err(GinError::Corruption("varint too long"))
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
