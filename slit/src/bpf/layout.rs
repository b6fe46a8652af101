use std::borrow::Cow;

use bytes::{Buf, BufMut};

use crate::error::DecodeError;

/// A record whose byte layout matches the struct the kernel program emits:
/// fields in declared order, little-endian, no padding between fields.
pub trait FixedLayout: Sized {
    /// Kind name used in decode errors.
    const KIND: &'static str;
    /// Exact size of the record in bytes.
    const SIZE: usize;

    /// Reads the fields from `buf`, which holds exactly `SIZE` bytes.
    fn read_fields(buf: &mut &[u8]) -> Self;

    /// Writes the fields in layout order.
    fn write_fields<B: BufMut>(&self, buf: &mut B);

    /// Decodes a raw payload. The payload must be exactly `SIZE` bytes long;
    /// anything else would silently misalign the fields.
    fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() != Self::SIZE {
            return Err(DecodeError::Length {
                kind: Self::KIND,
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut buf = data;
        Ok(Self::read_fields(&mut buf))
    }

    /// Encodes the record back into its kernel layout.
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.write_fields(&mut buf);
        buf
    }
}

/// Reads a fixed-width byte array (e.g. `char comm[32]`).
pub fn read_array<const N: usize>(buf: &mut &[u8]) -> [u8; N] {
    let mut out = [0; N];
    buf.copy_to_slice(&mut out);
    out
}

/// Returns the bytes of a C string buffer up to (not including) the first
/// NUL. A buffer without a NUL is returned whole.
pub fn trim_nul(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b == 0) {
        Some(end) => &bytes[..end],
        None => bytes,
    }
}

/// Lossy UTF-8 view of a NUL-terminated fixed buffer.
pub fn c_str(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(trim_nul(bytes))
}
