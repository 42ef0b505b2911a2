use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};

/// Byte length of the fixed record header: two little-endian u32 lengths.
pub const HEADER_LEN: usize = 8;

/// A single key-value record as laid out in a segment file:
///
/// ```text
/// offset 0         : key_len   (u32, little-endian)
/// offset 4         : value_len (u32, little-endian)
/// offset 8         : key bytes
/// offset 8+key_len : value bytes
/// ```
///
/// There is no framing, padding or checksum between records; a segment file
/// is the plain concatenation of records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Record {
            key: key.into(),
            value: value.into(),
        }
    }

    /// On-disk length of this record: `8 + key_len + value_len`.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.key.len() + self.value.len()
    }

    /// Encodes the record into one contiguous buffer of exactly
    /// [`encoded_len`](Self::encoded_len) bytes.
    pub fn encode(&self) -> Vec<u8> {
        let key_len = self.key.len();
        let mut buf = vec![0u8; self.encoded_len()];
        LittleEndian::write_u32(&mut buf[0..4], key_len as u32);
        LittleEndian::write_u32(&mut buf[4..8], self.value.len() as u32);
        buf[HEADER_LEN..HEADER_LEN + key_len].copy_from_slice(&self.key);
        buf[HEADER_LEN + key_len..].copy_from_slice(&self.value);
        buf
    }

    /// Decodes one record from a sized buffer.
    ///
    /// Fails with [`Error::ShortHeader`] when the buffer is shorter than the
    /// 8-byte header and with [`Error::ShortBody`] when it is shorter than
    /// the full record the header announces. Trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Record> {
        if buf.len() < HEADER_LEN {
            return Err(Error::ShortHeader);
        }
        let key_len = LittleEndian::read_u32(&buf[0..4]) as usize;
        let value_len = LittleEndian::read_u32(&buf[4..8]) as usize;
        if buf.len() < HEADER_LEN + key_len + value_len {
            return Err(Error::ShortBody);
        }
        Ok(Record {
            key: buf[HEADER_LEN..HEADER_LEN + key_len].to_vec(),
            value: buf[HEADER_LEN + key_len..HEADER_LEN + key_len + value_len].to_vec(),
        })
    }

    /// Decodes one record from a sequential reader, returning the record and
    /// the number of bytes consumed so the caller can advance its offset.
    ///
    /// A reader that is exhausted before the first header byte yields
    /// [`Error::EndOfStream`], the clean termination signal for recovery
    /// scans; 1 to 7 header bytes yield [`Error::ShortHeader`] and a body cut
    /// short yields [`Error::ShortBody`].
    pub fn decode_from<R: Read>(reader: &mut R) -> Result<(Record, usize)> {
        let mut header = [0u8; HEADER_LEN];
        match read_full(reader, &mut header)? {
            0 => return Err(Error::EndOfStream),
            n if n < HEADER_LEN => return Err(Error::ShortHeader),
            _ => {}
        }
        let key_len = LittleEndian::read_u32(&header[0..4]) as usize;
        let value_len = LittleEndian::read_u32(&header[4..8]) as usize;

        let mut key = vec![0u8; key_len];
        reader.read_exact(&mut key).map_err(truncated_body)?;
        let mut value = vec![0u8; value_len];
        reader.read_exact(&mut value).map_err(truncated_body)?;

        Ok((Record { key, value }, HEADER_LEN + key_len + value_len))
    }
}

/// Reads until `buf` is full or the reader is exhausted; returns how many
/// bytes were read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn truncated_body(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::ShortBody
    } else {
        err.into()
    }
}
