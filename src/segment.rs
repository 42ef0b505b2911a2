use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, Result};
use crate::record::{Record, HEADER_LEN};

/// Identifies a segment within a store: the single writable active segment,
/// or a frozen segment by its numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentId {
    Active,
    Frozen(u64),
}

/// One log file, active or frozen. A segment owns its file handle for its
/// whole lifetime; rotation renames the file underneath the handle, which
/// keeps following the inode.
#[derive(Debug)]
pub struct Segment {
    id: SegmentId,
    file: File,
    path: PathBuf,
    size: u64,
}

impl Segment {
    /// Opens (or creates) the active segment in append/read-write mode.
    pub fn open_active(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::options()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id: SegmentId::Active,
            file,
            path,
            size,
        })
    }

    /// Opens an existing frozen segment read-only.
    pub fn open_frozen(id: u64, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            id: SegmentId::Frozen(id),
            file,
            path,
            size,
        })
    }

    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// The numeric id, for frozen segments.
    pub fn frozen_id(&self) -> Option<u64> {
        match self.id {
            SegmentId::Active => None,
            SegmentId::Frozen(id) => Some(id),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current byte length. For a frozen segment this equals the file length
    /// and never changes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Appends encoded bytes, returning the offset the write began at.
    pub fn append(&mut self, buf: &[u8]) -> Result<u64> {
        use std::io::Write;
        debug_assert_eq!(self.id, SegmentId::Active);
        let offset = self.size;
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(offset)
    }

    /// Reads exactly `len` bytes at `offset`. A premature end of file
    /// surfaces as [`Error::ShortBody`].
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(&mut buf, offset)
            .map_err(|e| truncated(e, Error::ShortBody))?;
        Ok(buf)
    }

    /// Reads the full record beginning at `offset`. Failing to read where
    /// the index claims a record lives means the index and the data have
    /// diverged, so truncation errors are surfaced, not swallowed.
    pub fn read_record_at(&self, offset: u64) -> Result<Record> {
        let mut header = [0u8; HEADER_LEN];
        self.read_exact_at(&mut header, offset)
            .map_err(|e| truncated(e, Error::ShortHeader))?;
        let key_len = LittleEndian::read_u32(&header[0..4]) as usize;
        let value_len = LittleEndian::read_u32(&header[4..8]) as usize;

        let mut buf = vec![0u8; HEADER_LEN + key_len + value_len];
        buf[..HEADER_LEN].copy_from_slice(&header);
        self.read_exact_at(&mut buf[HEADER_LEN..], offset + HEADER_LEN as u64)
            .map_err(|e| truncated(e, Error::ShortBody))?;
        Record::decode(&buf)
    }

    /// Sequential scan of every record from offset 0, over an independent
    /// reader so concurrent positional reads are unaffected.
    pub fn scan(&self) -> Result<SegmentScan> {
        let mut file = self.file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(SegmentScan {
            reader: BufReader::new(file),
            offset: 0,
        })
    }

    /// Flushes the segment file to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reassigns the just-renamed active segment its frozen identity. The
    /// open handle keeps serving reads at unchanged offsets.
    pub(crate) fn into_frozen(mut self, id: u64, path: PathBuf) -> Segment {
        self.id = SegmentId::Frozen(id);
        self.path = path;
        self
    }

    /// Drops the file handle and hands back the path, for unlinking.
    pub(crate) fn into_path(self) -> PathBuf {
        self.path
    }

    #[cfg(unix)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        use std::os::windows::fs::FileExt;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.seek_read(&mut buf[filled..], offset + filled as u64)? {
                0 => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ))
                }
                n => filled += n,
            }
        }
        Ok(())
    }
}

fn truncated(err: std::io::Error, short: Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        short
    } else {
        err.into()
    }
}

/// Lazy sequential scan over one segment, yielding each record with the
/// offset it starts at.
pub struct SegmentScan {
    reader: BufReader<File>,
    offset: u64,
}

impl Iterator for SegmentScan {
    type Item = Result<(u64, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        match Record::decode_from(&mut self.reader) {
            Ok((record, consumed)) => {
                let offset = self.offset;
                self.offset += consumed as u64;
                Some(Ok((offset, record)))
            }
            Err(Error::EndOfStream) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
