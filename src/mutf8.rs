//! Modified UTF-8, the string encoding of `DataOutput.writeUTF` (JOSS 6.4.2
//! utf / long-utf).
//!
//! The encoder works per UTF-16 code unit, not per code point: U+0000 takes
//! the two-byte form (never a raw zero byte) and supplementary-plane
//! characters are written as two 3-byte surrogate encodings (6 bytes total,
//! CESU-8 style). A 4-byte standard-UTF-8 sequence never appears.

use crate::{Error, Result};

/// Encodes `s` as modified UTF-8.
pub fn encode(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for unit in s.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | ((unit >> 6) & 0x1F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | ((unit >> 12) & 0x0F) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

/// Encoded length in bytes without materializing the encoding.
pub fn encoded_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

/// Decodes modified UTF-8 back to a `String`, recombining surrogate pairs.
///
/// `base_offset` is the stream position of `bytes[0]`, used in errors. A
/// malformed sequence or an unpaired surrogate is [`Error::MalformedUtf8`];
/// Rust strings cannot hold lone surrogates, so streams relying on them are
/// rejected rather than silently altered.
pub fn decode(bytes: &[u8], base_offset: usize) -> Result<String> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b & 0x80 == 0 {
            units.push(u16::from(b));
            i += 1;
        } else if b & 0xE0 == 0xC0 {
            let b1 = continuation(bytes, i + 1, base_offset)?;
            units.push((u16::from(b & 0x1F) << 6) | u16::from(b1));
            i += 2;
        } else if b & 0xF0 == 0xE0 {
            let b1 = continuation(bytes, i + 1, base_offset)?;
            let b2 = continuation(bytes, i + 2, base_offset)?;
            units.push((u16::from(b & 0x0F) << 12) | (u16::from(b1) << 6) | u16::from(b2));
            i += 3;
        } else {
            return Err(Error::MalformedUtf8 { offset: base_offset + i });
        }
    }
    String::from_utf16(&units).map_err(|_| Error::MalformedUtf8 { offset: base_offset })
}

fn continuation(bytes: &[u8], i: usize, base_offset: usize) -> Result<u8> {
    match bytes.get(i) {
        Some(&b) if b & 0xC0 == 0x80 => Ok(b & 0x3F),
        _ => Err(Error::MalformedUtf8 { offset: base_offset + i }),
    }
}
