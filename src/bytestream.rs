//! Byte-level stream writer and reader.
//!
//! Alle Mehrbyte-Werte sind big-endian (JOSS 6.2, `DataOutput`-Konvention).
//! Der Writer führt zusätzlich die Block-Data-Maschine aus JOSS 6.2.1: im
//! aktiven Modus landen Bytes in einem Puffer, der beim Verlassen als ein
//! einzelner TC_BLOCKDATA- bzw. TC_BLOCKDATALONG-Chunk geschrieben wird.

use crate::mutf8;
use crate::protocol::{
    PrimitiveArray, TC_BLOCKDATA, TC_BLOCKDATALONG, TC_LONGSTRING, TC_STRING,
};
use crate::{Error, Result};

/// Grows a `Vec<u8>` with big-endian primitive writes and block-data mode.
#[derive(Debug, Default)]
pub struct ByteWriter {
    out: Vec<u8>,
    /// `Some` while block-data mode is active; holds the unflushed chunk.
    block: Option<Vec<u8>>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn sink(&mut self) -> &mut Vec<u8> {
        self.block.as_mut().unwrap_or(&mut self.out)
    }

    pub fn write_u8(&mut self, v: u8) {
        self.sink().push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.write_u8(v as u8);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.sink().extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i16(&mut self, v: i16) {
        self.write_u16(v as u16);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.sink().extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32(&mut self, v: i32) {
        self.write_u32(v as u32);
    }

    pub fn write_i64(&mut self, v: i64) {
        self.sink().extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.sink().extend_from_slice(&v.to_bits().to_be_bytes());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    /// Java `char` is a UTF-16 code unit.
    pub fn write_char(&mut self, v: u16) {
        self.write_u16(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.sink().extend_from_slice(bytes);
    }

    /// 2-byte length + modified UTF-8, the `writeUTF` form used for class
    /// and field names (JOSS 6.4.2 utf).
    pub fn write_utf(&mut self, s: &str) -> Result<()> {
        let encoded = mutf8::encode(s);
        let len = u16::try_from(encoded.len()).map_err(|_| Error::UtfTooLong(encoded.len()))?;
        self.write_u16(len);
        self.write_bytes(&encoded);
        Ok(())
    }

    /// A complete string element: TC_STRING + u16 length when the encoding
    /// fits, TC_LONGSTRING + u64 length otherwise (JOSS 6.4.2 newString).
    pub fn write_string(&mut self, s: &str) {
        let encoded = mutf8::encode(s);
        if encoded.len() <= usize::from(u16::MAX) {
            self.write_u8(TC_STRING);
            self.write_u16(encoded.len() as u16);
        } else {
            self.write_u8(TC_LONGSTRING);
            self.write_i64(encoded.len() as i64);
        }
        self.write_bytes(&encoded);
    }

    /// i32 element count + unpadded values, no tag (JOSS 6.4.2 newArray body).
    pub fn write_primitive_array(&mut self, values: &PrimitiveArray) {
        self.write_i32(values.len() as i32);
        match values {
            PrimitiveArray::Boolean(v) => {
                for &x in v {
                    self.write_bool(x);
                }
            }
            PrimitiveArray::Byte(v) => {
                for &x in v {
                    self.write_i8(x);
                }
            }
            PrimitiveArray::Char(v) => {
                for &x in v {
                    self.write_char(x);
                }
            }
            PrimitiveArray::Short(v) => {
                for &x in v {
                    self.write_i16(x);
                }
            }
            PrimitiveArray::Int(v) => {
                for &x in v {
                    self.write_i32(x);
                }
            }
            PrimitiveArray::Long(v) => {
                for &x in v {
                    self.write_i64(x);
                }
            }
            PrimitiveArray::Float(v) => {
                for &x in v {
                    self.write_f32(x);
                }
            }
            PrimitiveArray::Double(v) => {
                for &x in v {
                    self.write_f64(x);
                }
            }
        }
    }

    pub fn block_mode(&self) -> bool {
        self.block.is_some()
    }

    /// Switches block-data mode, returning the previous state.
    ///
    /// Activating while already active is an error (nested activation would
    /// merge unrelated chunks). Deactivating while inactive is a no-op.
    /// Deactivation flushes a non-empty buffer as one chunk: TC_BLOCKDATA
    /// with a u8 length up to 255, TC_BLOCKDATALONG with an i32 length
    /// beyond that. An empty buffer emits nothing (JOSS 6.2.1).
    pub fn set_block_mode(&mut self, active: bool) -> Result<bool> {
        match (self.block.take(), active) {
            (Some(chunk), true) => {
                self.block = Some(chunk);
                Err(Error::BlockModeAlreadyActive)
            }
            (None, true) => {
                self.block = Some(Vec::new());
                Ok(false)
            }
            (Some(chunk), false) => {
                if !chunk.is_empty() {
                    if chunk.len() <= usize::from(u8::MAX) {
                        self.out.push(TC_BLOCKDATA);
                        self.out.push(chunk.len() as u8);
                    } else {
                        self.out.push(TC_BLOCKDATALONG);
                        self.out.extend_from_slice(&(chunk.len() as i32).to_be_bytes());
                    }
                    self.out.extend_from_slice(&chunk);
                }
                Ok(true)
            }
            (None, false) => Ok(false),
        }
    }

    /// Bytes written to the main sink so far (excludes an unflushed chunk).
    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Finishes the stream. Block-data mode must have been left.
    pub fn close(self) -> Result<Vec<u8>> {
        if self.block.is_some() {
            return Err(Error::BlockModeActiveAtClose);
        }
        Ok(self.out)
    }
}

/// Offset-tracking reader over a byte slice. Failed reads do not advance.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// Consumes `n` bytes; `expected` names the grammar element for the
    /// [`Error::Truncated`] message.
    pub fn read_bytes(&mut self, n: usize, expected: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::Truncated { offset: self.pos, expected });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self, expected: &'static str) -> Result<u8> {
        Ok(self.read_bytes(1, expected)?[0])
    }

    pub fn peek_u8(&self, expected: &'static str) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(Error::Truncated { offset: self.pos, expected })
    }

    pub fn read_u16(&mut self, expected: &'static str) -> Result<u16> {
        let b = self.read_bytes(2, expected)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self, expected: &'static str) -> Result<i16> {
        Ok(self.read_u16(expected)? as i16)
    }

    pub fn read_u32(&mut self, expected: &'static str) -> Result<u32> {
        let b = self.read_bytes(4, expected)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self, expected: &'static str) -> Result<i32> {
        Ok(self.read_u32(expected)? as i32)
    }

    pub fn read_i64(&mut self, expected: &'static str) -> Result<i64> {
        let b = self.read_bytes(8, expected)?;
        Ok(i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    pub fn read_f32(&mut self, expected: &'static str) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32(expected)?))
    }

    pub fn read_f64(&mut self, expected: &'static str) -> Result<f64> {
        let b = self.read_bytes(8, expected)?;
        Ok(f64::from_bits(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])))
    }

    /// `readBoolean` semantics: any non-zero byte is `true`.
    pub fn read_bool(&mut self, expected: &'static str) -> Result<bool> {
        Ok(self.read_u8(expected)? != 0)
    }

    pub fn read_char(&mut self, expected: &'static str) -> Result<u16> {
        self.read_u16(expected)
    }

    /// u16 length + modified UTF-8 (JOSS 6.4.2 utf).
    pub fn read_utf(&mut self, expected: &'static str) -> Result<String> {
        let len = self.read_u16(expected)?;
        let base = self.pos;
        let bytes = self.read_bytes(usize::from(len), expected)?;
        mutf8::decode(bytes, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- Writer: primitive Big-Endian-Formate ---

    #[test]
    fn writes_are_big_endian() {
        let mut w = ByteWriter::new();
        w.write_u16(0xACED);
        w.write_i32(-2);
        w.write_i64(1);
        assert_eq!(
            w.close().unwrap(),
            [0xAC, 0xED, 0xFF, 0xFF, 0xFF, 0xFE, 0, 0, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn float_writes_are_ieee_bits() {
        let mut w = ByteWriter::new();
        w.write_f32(0.75);
        w.write_f64(2.0);
        assert_eq!(
            w.close().unwrap(),
            [0x3F, 0x40, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn bool_and_char() {
        let mut w = ByteWriter::new();
        w.write_bool(true);
        w.write_bool(false);
        w.write_char('a' as u16);
        assert_eq!(w.close().unwrap(), [1, 0, 0x00, 0x61]);
    }

    #[test]
    fn write_utf_prefixes_length() {
        let mut w = ByteWriter::new();
        w.write_utf("Point").unwrap();
        assert_eq!(w.close().unwrap(), [0x00, 0x05, b'P', b'o', b'i', b'n', b't']);
    }

    #[test]
    fn write_utf_counts_encoded_bytes() {
        let mut w = ByteWriter::new();
        // U+0100 encodes to 2 bytes; the prefix counts bytes, not chars.
        w.write_utf("\u{100}").unwrap();
        assert_eq!(w.close().unwrap(), [0x00, 0x02, 0xC4, 0x80]);
    }

    #[test]
    fn write_utf_rejects_oversized() {
        let mut w = ByteWriter::new();
        let big = "a".repeat(65_536);
        assert_eq!(w.write_utf(&big), Err(Error::UtfTooLong(65_536)));
    }

    #[test]
    fn short_string_element() {
        let mut w = ByteWriter::new();
        w.write_string("ab");
        assert_eq!(w.close().unwrap(), [0x74, 0x00, 0x02, b'a', b'b']);
    }

    #[test]
    fn long_string_element() {
        let mut w = ByteWriter::new();
        let s = "a".repeat(65_536);
        w.write_string(&s);
        let bytes = w.close().unwrap();
        assert_eq!(bytes[0], 0x7C);
        assert_eq!(&bytes[1..9], [0, 0, 0, 0, 0, 1, 0, 0]);
        assert_eq!(bytes.len(), 9 + 65_536);
    }

    #[test]
    fn string_length_boundary_at_u16_max() {
        let mut w = ByteWriter::new();
        w.write_string(&"a".repeat(65_535));
        let bytes = w.close().unwrap();
        assert_eq!(bytes[0], 0x74);
        assert_eq!(&bytes[1..3], [0xFF, 0xFF]);
    }

    #[test]
    fn primitive_array_int() {
        let mut w = ByteWriter::new();
        w.write_primitive_array(&PrimitiveArray::Int(vec![1, 2, 3]));
        assert_eq!(
            w.close().unwrap(),
            [0, 0, 0, 3, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]
        );
    }

    #[test]
    fn primitive_array_empty() {
        let mut w = ByteWriter::new();
        w.write_primitive_array(&PrimitiveArray::Double(vec![]));
        assert_eq!(w.close().unwrap(), [0, 0, 0, 0]);
    }

    // --- Block-Data-Maschine ---

    #[test]
    fn block_mode_buffers_and_flushes_short_chunk() {
        let mut w = ByteWriter::new();
        assert_eq!(w.set_block_mode(true), Ok(false));
        w.write_u8(5);
        w.write_bool(true);
        assert_eq!(w.set_block_mode(false), Ok(true));
        assert_eq!(w.close().unwrap(), [0x77, 0x02, 5, 1]);
    }

    #[test]
    fn block_mode_long_chunk_past_255() {
        let mut w = ByteWriter::new();
        w.set_block_mode(true).unwrap();
        w.write_bytes(&[0xAB; 300]);
        w.set_block_mode(false).unwrap();
        let bytes = w.close().unwrap();
        assert_eq!(bytes[0], 0x7A);
        assert_eq!(&bytes[1..5], [0, 0, 1, 44]);
        assert_eq!(bytes.len(), 5 + 300);
    }

    #[test]
    fn block_chunk_boundary_at_255() {
        let mut w = ByteWriter::new();
        w.set_block_mode(true).unwrap();
        w.write_bytes(&[0; 255]);
        w.set_block_mode(false).unwrap();
        let bytes = w.close().unwrap();
        assert_eq!(bytes[0], 0x77);
        assert_eq!(bytes[1], 255);
    }

    #[test]
    fn empty_block_emits_nothing() {
        let mut w = ByteWriter::new();
        w.set_block_mode(true).unwrap();
        w.set_block_mode(false).unwrap();
        assert_eq!(w.close().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn entering_active_block_mode_fails() {
        let mut w = ByteWriter::new();
        w.set_block_mode(true).unwrap();
        w.write_u8(0x2A);
        assert_eq!(w.set_block_mode(true), Err(Error::BlockModeAlreadyActive));
        // The pending chunk survives the failed activation.
        assert_eq!(w.set_block_mode(false), Ok(true));
        assert_eq!(w.close().unwrap(), [0x77, 0x01, 0x2A]);
    }

    #[test]
    fn leaving_inactive_block_mode_is_noop() {
        let mut w = ByteWriter::new();
        assert_eq!(w.set_block_mode(false), Ok(false));
        assert!(w.close().unwrap().is_empty());
    }

    #[test]
    fn close_with_active_block_fails() {
        let mut w = ByteWriter::new();
        w.set_block_mode(true).unwrap();
        assert_eq!(w.close(), Err(Error::BlockModeActiveAtClose));
    }

    // --- Reader ---

    #[test]
    fn reader_tracks_offsets() {
        let data = [0xAC, 0xED, 0x00, 0x05, 0x42];
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_u16("magic").unwrap(), 0xACED);
        assert_eq!(r.offset(), 2);
        assert_eq!(r.read_u16("version").unwrap(), 5);
        assert_eq!(r.read_u8("tag").unwrap(), 0x42);
        assert!(r.at_end());
    }

    #[test]
    fn reader_truncation_names_element() {
        let mut r = ByteReader::new(&[0x00]);
        assert_eq!(
            r.read_u32("field count"),
            Err(Error::Truncated { offset: 0, expected: "field count" })
        );
        // Failed read did not advance.
        assert_eq!(r.offset(), 0);
        assert_eq!(r.read_u8("tag").unwrap(), 0);
    }

    #[test]
    fn reader_signed_and_float() {
        let mut w = ByteWriter::new();
        w.write_i32(-7);
        w.write_i64(-1);
        w.write_f32(0.75);
        w.write_f64(-2.5);
        w.write_i16(-3);
        let data = w.close().unwrap();
        let mut r = ByteReader::new(&data);
        assert_eq!(r.read_i32("i").unwrap(), -7);
        assert_eq!(r.read_i64("l").unwrap(), -1);
        assert_eq!(r.read_f32("f").unwrap(), 0.75);
        assert_eq!(r.read_f64("d").unwrap(), -2.5);
        assert_eq!(r.read_i16("s").unwrap(), -3);
    }

    #[test]
    fn reader_bool_is_nonzero() {
        let mut r = ByteReader::new(&[0, 1, 0xFF]);
        assert!(!r.read_bool("b").unwrap());
        assert!(r.read_bool("b").unwrap());
        assert!(r.read_bool("b").unwrap());
    }

    #[test]
    fn reader_utf() {
        let mut r = ByteReader::new(&[0x00, 0x02, 0xC4, 0x80, 0x99]);
        assert_eq!(r.read_utf("class name").unwrap(), "\u{100}");
        assert_eq!(r.offset(), 4);
    }

    #[test]
    fn reader_utf_malformed_offset() {
        // Length prefix 2, then an invalid lead byte at stream offset 2.
        let mut r = ByteReader::new(&[0x00, 0x02, 0xF8, 0x80]);
        assert_eq!(r.read_utf("name"), Err(Error::MalformedUtf8 { offset: 2 }));
    }

    #[test]
    fn peek_does_not_advance() {
        let mut r = ByteReader::new(&[0x74]);
        assert_eq!(r.peek_u8("tag").unwrap(), 0x74);
        assert_eq!(r.offset(), 0);
        assert_eq!(r.read_u8("tag").unwrap(), 0x74);
        assert!(r.peek_u8("tag").is_err());
    }
}
