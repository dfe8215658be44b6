//! Primitive codec for message bodies.
//!
//! All integers are big-endian. Strings are a 16-bit length followed by
//! UTF-8 data; a length of `-1` encodes an absent optional string. Arrays
//! are a 32-bit element count followed by the elements. UUIDs are 16 raw
//! bytes.

use std::io::{Read, Write};

use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ReadError {
    #[error("Cannot read data: {0}")]
    IO(#[from] std::io::Error),

    #[error("Overflow converting integer: {0}")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error("Malformed data: {0}")]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub trait ReadType<R>: Sized
where
    R: Read,
{
    fn read(reader: &mut R) -> Result<Self, ReadError>;
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WriteError {
    #[error("Cannot write data: {0}")]
    IO(#[from] std::io::Error),

    #[error("Overflow converting integer: {0}")]
    Overflow(#[from] std::num::TryFromIntError),

    #[error("Malformed data: {0}")]
    Malformed(#[from] Box<dyn std::error::Error + Send + Sync>),
}

pub trait WriteType<W>: Sized
where
    W: Write,
{
    fn write(&self, writer: &mut W) -> Result<(), WriteError>;
}

impl<R: Read> ReadType<R> for bool {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 1];
        reader.read_exact(&mut buf)?;
        Ok(buf[0] != 0)
    }
}

impl<W: Write> WriteType<W> for bool {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(&[u8::from(*self)])?;
        Ok(())
    }
}

macro_rules! integer_type {
    ($t:ty, $len:expr) => {
        impl<R: Read> ReadType<R> for $t {
            fn read(reader: &mut R) -> Result<Self, ReadError> {
                let mut buf = [0u8; $len];
                reader.read_exact(&mut buf)?;
                Ok(<$t>::from_be_bytes(buf))
            }
        }

        impl<W: Write> WriteType<W> for $t {
            fn write(&self, writer: &mut W) -> Result<(), WriteError> {
                writer.write_all(&self.to_be_bytes())?;
                Ok(())
            }
        }
    };
}

integer_type!(i16, 2);
integer_type!(i32, 4);
integer_type!(i64, 8);
integer_type!(u64, 8);

impl<R: Read> ReadType<R> for String {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let len = i16::read(reader)?;
        let len = usize::try_from(len).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|e| ReadError::Malformed(Box::new(e)))
    }
}

impl<W: Write> WriteType<W> for String {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        self.as_str().write(writer)
    }
}

impl<W: Write> WriteType<W> for &str {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let len = i16::try_from(self.len())?;
        len.write(writer)?;
        writer.write_all(self.as_bytes())?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for Option<String> {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let len = i16::read(reader)?;
        if len == -1 {
            return Ok(None);
        }
        let len = usize::try_from(len).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        let s = String::from_utf8(buf).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        Ok(Some(s))
    }
}

impl<W: Write> WriteType<W> for Option<String> {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        match self {
            Some(s) => s.write(writer),
            None => (-1i16).write(writer),
        }
    }
}

impl<R: Read> ReadType<R> for Uuid {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let mut buf = [0u8; 16];
        reader.read_exact(&mut buf)?;
        Ok(Uuid::from_bytes(buf))
    }
}

impl<W: Write> WriteType<W> for Uuid {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        writer.write_all(self.as_bytes())?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for Vec<u8> {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        let len = i32::read(reader)?;
        let len = usize::try_from(len).map_err(|e| ReadError::Malformed(Box::new(e)))?;
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok(buf)
    }
}

impl<W: Write> WriteType<W> for Vec<u8> {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        let len = i32::try_from(self.len())?;
        len.write(writer)?;
        writer.write_all(self)?;
        Ok(())
    }
}

impl<R: Read> ReadType<R> for Vec<i64> {
    fn read(reader: &mut R) -> Result<Self, ReadError> {
        read_array(reader)
    }
}

impl<W: Write> WriteType<W> for Vec<i64> {
    fn write(&self, writer: &mut W) -> Result<(), WriteError> {
        write_array(writer, self)
    }
}

/// Read a 32-bit count followed by that many elements.
pub fn read_array<R, T>(reader: &mut R) -> Result<Vec<T>, ReadError>
where
    R: Read,
    T: ReadType<R>,
{
    let len = i32::read(reader)?;
    let len = usize::try_from(len).map_err(|e| ReadError::Malformed(Box::new(e)))?;

    // Don't trust the length given by a peer for the initial allocation.
    let mut out = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        out.push(T::read(reader)?);
    }
    Ok(out)
}

/// Write a 32-bit count followed by the elements.
pub fn write_array<W, T>(writer: &mut W, items: &[T]) -> Result<(), WriteError>
where
    W: Write,
    T: WriteType<W>,
{
    let len = i32::try_from(items.len())?;
    len.write(writer)?;
    for item in items {
        item.write(writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn roundtrip<T>(value: T, want: &[u8])
    where
        T: for<'a> ReadType<Cursor<&'a [u8]>> + WriteType<Vec<u8>> + PartialEq + std::fmt::Debug,
    {
        let mut buf = Vec::new();
        value.write(&mut buf).unwrap();
        assert_eq!(buf.as_slice(), want);

        let mut cursor = Cursor::new(want);
        let got = T::read(&mut cursor).unwrap();
        assert_eq!(got, value);
    }

    #[test]
    fn primitives() {
        roundtrip(true, &[0x01]);
        roundtrip(false, &[0x00]);
        roundtrip(0x1234i16, &[0x12, 0x34]);
        roundtrip(0x12345678i32, &[0x12, 0x34, 0x56, 0x78]);
        roundtrip(-1i64, &[0xff; 8]);
        roundtrip(
            0x0102030405060708u64,
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        );
    }

    #[test]
    fn strings() {
        roundtrip("svc".to_string(), &[0x00, 0x03, b's', b'v', b'c']);
        roundtrip(String::new(), &[0x00, 0x00]);
        roundtrip(Some("x".to_string()), &[0x00, 0x01, b'x']);
        roundtrip(None::<String>, &[0xff, 0xff]);
    }

    #[test]
    fn string_too_long() {
        let s = "x".repeat(i16::MAX as usize + 1);
        let mut buf = Vec::new();
        assert_matches::assert_matches!(s.write(&mut buf), Err(WriteError::Overflow(_)));
    }

    #[test]
    fn uuid_bytes() {
        let id = Uuid::from_bytes([7u8; 16]);
        roundtrip(id, &[7u8; 16]);
    }

    #[test]
    fn byte_and_int_arrays() {
        roundtrip(vec![1u8, 2, 3], &[0x00, 0x00, 0x00, 0x03, 1, 2, 3]);
        roundtrip(
            vec![1i64, 2],
            &[
                0x00, 0x00, 0x00, 0x02, //
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, //
                0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
            ],
        );
    }

    #[test]
    fn malformed_string() {
        let data = [0x00u8, 0x02, 0xff, 0xff];
        let mut cursor = Cursor::new(data.as_ref());
        assert_matches::assert_matches!(String::read(&mut cursor), Err(ReadError::Malformed(_)));
    }

    #[test]
    fn truncated_array() {
        let data = [0x00u8, 0x00, 0x00, 0x05, 0x01];
        let mut cursor = Cursor::new(data.as_ref());
        assert_matches::assert_matches!(
            read_array::<_, i64>(&mut cursor),
            Err(ReadError::IO(_))
        );
    }
}
