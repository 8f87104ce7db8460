//! Primitive field codec
//!
//! Big-endian integers, single-byte booleans and u32 length-prefixed
//! strings, blobs and arrays. Writing goes through [`bytes::BufMut`],
//! reading through a bounds-checked [`FieldReader`].

use bytes::{Buf, BufMut, Bytes};

use super::CodecError;

/// Size of every length or count prefix on the wire
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Encoded size of a string field (prefix + UTF-8 bytes)
pub fn string_len(value: &str) -> usize {
    LENGTH_PREFIX_SIZE + value.len()
}

/// Encoded size of a blob field (prefix + raw bytes)
pub fn blob_len(value: &[u8]) -> usize {
    LENGTH_PREFIX_SIZE + value.len()
}

/// TTCP field writers on top of any `BufMut`.
///
/// Lengths are written as `u32`; callers check the packet size against
/// `u32::MAX` before encoding.
pub trait PutFields: BufMut {
    fn put_bool(&mut self, value: bool) {
        self.put_u8(if value { 0x01 } else { 0x00 });
    }

    fn put_string(&mut self, value: &str) {
        self.put_blob(value.as_bytes());
    }

    fn put_blob(&mut self, value: &[u8]) {
        self.put_u32(value.len() as u32);
        self.put_slice(value);
    }

    /// Count prefix followed by each element's own encoding
    fn put_array<T, F>(&mut self, items: &[T], mut put: F)
    where
        Self: Sized,
        F: FnMut(&mut Self, &T),
    {
        self.put_u32(items.len() as u32);
        for item in items {
            put(self, item);
        }
    }
}

impl<B: BufMut + ?Sized> PutFields for B {}

/// Reads payload fields from a fully buffered packet body
pub struct FieldReader {
    buf: Bytes,
}

impl FieldReader {
    pub fn new(buf: Bytes) -> Self {
        Self { buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::TruncatedInput {
                needed,
                available: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Any non-zero byte is `true`
    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        Ok(self.read_u8()? != 0x00)
    }

    pub fn read_blob(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u32()? as usize;
        self.ensure(len)?;
        Ok(self.buf.split_to(len).to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let bytes = self.read_blob()?;
        Ok(String::from_utf8(bytes)?)
    }

    /// Reads a count prefix, then `count` elements with `read`.
    ///
    /// Capacity is capped by the remaining input so a bogus count cannot
    /// force a large allocation.
    pub fn read_array<T, F>(&mut self, mut read: F) -> Result<Vec<T>, CodecError>
    where
        F: FnMut(&mut Self) -> Result<T, CodecError>,
    {
        let count = self.read_u32()? as usize;
        let mut items = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            items.push(read(self)?);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn reader(buf: BytesMut) -> FieldReader {
        FieldReader::new(buf.freeze())
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut buf = BytesMut::new();
        buf.put_u32(0x0102_0304);
        buf.put_i64(-1024);
        assert_eq!(&buf[..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[4..], &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFC, 0x00]);

        let mut r = reader(buf);
        assert_eq!(r.read_u32().unwrap(), 0x0102_0304);
        assert_eq!(r.read_i64().unwrap(), -1024);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_bool_encoding() {
        let mut buf = BytesMut::new();
        buf.put_bool(true);
        buf.put_bool(false);
        assert_eq!(&buf[..], &[0x01, 0x00]);

        let mut r = FieldReader::new(Bytes::from_static(&[0x00, 0x01, 0x02, 0xFF]));
        assert!(!r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
        assert!(r.read_bool().unwrap());
    }

    #[test]
    fn test_string_counts_bytes_not_chars() {
        let mut buf = BytesMut::new();
        buf.put_string("Grüße");
        assert_eq!(&buf[..4], &[0, 0, 0, 7]);
        assert_eq!(buf.len(), string_len("Grüße"));

        let mut r = reader(buf);
        assert_eq!(r.read_string().unwrap(), "Grüße");
    }

    #[test]
    fn test_empty_string_and_blob() {
        let mut buf = BytesMut::new();
        buf.put_string("");
        buf.put_blob(&[]);
        assert_eq!(&buf[..], &[0, 0, 0, 0, 0, 0, 0, 0]);

        let mut r = reader(buf);
        assert_eq!(r.read_string().unwrap(), "");
        assert!(r.read_blob().unwrap().is_empty());
    }

    #[test]
    fn test_truncated_string_fails() {
        let mut buf = BytesMut::new();
        buf.put_u32(10);
        buf.put_slice(b"abcd");

        let err = reader(buf).read_string().unwrap_err();
        assert!(matches!(
            err,
            CodecError::TruncatedInput { needed: 10, available: 4 }
        ));
    }

    #[test]
    fn test_invalid_utf8_is_reported() {
        let mut buf = BytesMut::new();
        buf.put_blob(&[0xC3, 0x28]);
        let err = reader(buf).read_string().unwrap_err();
        assert!(matches!(err, CodecError::InvalidUtf8(_)));
    }

    #[test]
    fn test_arrays() {
        let mut buf = BytesMut::new();
        buf.put_array(&[3u32, 9], |b, id| b.put_u32(*id));
        buf.put_array(&["Ann".to_string(), "Bob".to_string()], |b, s| b.put_string(s));

        let mut r = reader(buf);
        assert_eq!(r.read_array(|r| r.read_u32()).unwrap(), vec![3, 9]);
        assert_eq!(r.read_array(|r| r.read_string()).unwrap(), vec!["Ann", "Bob"]);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_array_with_bogus_count() {
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        buf.put_u32(1);

        let err = reader(buf).read_array(|r| r.read_u32()).unwrap_err();
        assert!(matches!(err, CodecError::TruncatedInput { .. }));
    }
}
