//! Random-access stream I/O.
//!
//! A stream's content is scattered across a linked sector chain. This
//! module presents that chain as one seekable byte range: the chain is
//! resolved into an ordered list of `(offset, length)` ranges, and every
//! read or write is split into the segments of those ranges it touches.
//!
//! Big-sector streams range directly into the host file. Mini-sector
//! streams range into the mini stream, and each segment is serviced by
//! reading or writing the root entry's mini stream body at the computed
//! offset, which in turn resolves through the big FAT.

use crate::error::{Error, Result};
use crate::storage::{HostFile, Storage};
use smallvec::SmallVec;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Segments of a single read or write call.
pub(crate) type Segments = SmallVec<[(u64, usize); 4]>;

/// Resolve a sector chain into `(offset, length)` ranges trimmed to the
/// logical stream size. `offset_of` maps a sector ID to the byte offset
/// of that sector within the backing space.
pub(crate) fn chain_ranges(
    chain: &[u32],
    sector_size: usize,
    size: u64,
    offset_of: impl Fn(u32) -> u64,
) -> Result<Vec<(u64, usize)>> {
    if (chain.len() as u64) * (sector_size as u64) < size {
        return Err(Error::Corrupt(format!(
            "sector chain covers {} bytes but the entry claims {size}",
            chain.len() * sector_size
        )));
    }
    let mut ranges = Vec::with_capacity(chain.len());
    let mut remaining = size;
    for &sid in chain {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(sector_size as u64) as usize;
        ranges.push((offset_of(sid), take));
        remaining -= take as u64;
    }
    Ok(ranges)
}

/// Clip a `(pos, len)` request against the range list, yielding the
/// sub-ranges it covers. The logical position maps to a range index and
/// intra-range offset by accumulated length; requests crossing range
/// boundaries are split.
pub(crate) fn clip_ranges(ranges: &[(u64, usize)], pos: u64, len: usize) -> Segments {
    let mut segments = Segments::new();
    let mut remaining = len;
    let mut cursor = 0u64;
    for &(offset, range_len) in ranges {
        if remaining == 0 {
            break;
        }
        let range_end = cursor + range_len as u64;
        if range_end <= pos {
            cursor = range_end;
            continue;
        }
        let skip = pos.saturating_sub(cursor);
        let take = ((range_len as u64 - skip) as usize).min(remaining);
        segments.push((offset + skip, take));
        remaining -= take;
        cursor = range_end;
    }
    segments
}

/// A seekable handle onto one stream of an open container.
///
/// The handle borrows the [`Storage`] exclusively for its lifetime;
/// reads are demand-driven against the host file and writes allocate
/// from the in-memory allocation tables.
pub struct Stream<'a, F: HostFile> {
    storage: &'a mut Storage<F>,
    dirent_id: u32,
    pos: u64,
}

impl<'a, F: HostFile> Stream<'a, F> {
    pub(crate) fn new(storage: &'a mut Storage<F>, dirent_id: u32) -> Self {
        Stream {
            storage,
            dirent_id,
            pos: 0,
        }
    }

    /// Current logical size of the stream in bytes.
    pub fn len(&self) -> u64 {
        self.storage.dirents()[self.dirent_id as usize].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current stream position.
    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// The ordered `(offset, length)` ranges backing this stream,
    /// trimmed to its logical size: absolute host-file offsets for a
    /// big-sector stream, mini-stream offsets for a mini-sector stream.
    pub fn ranges(&mut self) -> Result<Vec<(u64, usize)>> {
        self.storage.dirent_ranges(self.dirent_id)
    }

    /// Truncate or extend the stream to exactly `size` bytes. Extension
    /// zero-fills; both directions may reallocate the stream into the
    /// other sector tier when it crosses the mini stream cutoff.
    pub fn set_len(&mut self, size: u64) -> Result<()> {
        self.storage.dirent_resize(self.dirent_id, size)
    }

    /// Read the remainder of the stream into a vector.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).map_err(Error::from)?;
        Ok(buf)
    }
}

impl<F: HostFile> Read for Stream<'_, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .storage
            .dirent_read_at(self.dirent_id, self.pos, buf)
            .map_err(io::Error::from)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<F: HostFile> Write for Stream<'_, F> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self
            .storage
            .dirent_write_at(self.dirent_id, self.pos, buf)
            .map_err(io::Error::from)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Data sectors are written through; table and directory state is
        // buffered until the container repacks.
        Ok(())
    }
}

impl<F: HostFile> Seek for Stream<'_, F> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => add_delta(self.len(), delta),
            SeekFrom::Current(delta) => add_delta(self.pos, delta),
        };
        match target {
            Some(new_pos) => {
                self.pos = new_pos;
                Ok(new_pos)
            },
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

fn add_delta(base: u64, delta: i64) -> Option<u64> {
    if delta >= 0 {
        base.checked_add(delta as u64)
    } else {
        base.checked_sub(delta.unsigned_abs())
    }
}
