//! varint decodes the SQLite variable-length integer encoding.
//!
//! A varint is 1 to 9 bytes.  Bytes 0..=7 contribute their low 7 bits,
//! big-endian first; a set high bit marks continuation.  If the high bit of
//! byte 7 is still set, all 8 bits of byte 8 are appended.  The decoded
//! value is a 64-bit twos-complement integer.

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Varint is truncated after {0} byte(s).")]
    Truncated(usize),
}

/// Decode one varint from the front of `data`, returning the value and the
/// number of bytes consumed.  Never reads past the end of `data`; a slice
/// that ends while the continuation bit is still set is an error.
pub fn read_varint(data: &[u8]) -> Result<(i64, usize), Error> {
    let mut value: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(9) {
        if i == 8 {
            // The ninth byte contributes all 8 bits and always terminates.
            value = (value << 8) | byte as u64;
            return Ok((value as i64, 9));
        }
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok((value as i64, i + 1));
        }
    }
    Err(Error::Truncated(data.len()))
}
