//! The container engine.
//!
//! A [`Storage`] owns its backing host file exclusively. Opening a
//! container loads the header, both allocation tables and the directory
//! tree into memory; from then on, structural mutation happens on the
//! in-memory state and only stream data sectors touch the host. Closing
//! (or an explicit [`flush`](Storage::flush)) repacks the whole
//! container into a fresh, compact image and rewrites the host.
//!
//! Load order follows the format's own dependency chain: header →
//! DIFAT (inline prefix plus linked DIFAT sectors) → big FAT →
//! directory chain → directory tree → MiniFAT. The mini stream body is
//! owned by the root entry and read on demand.

use crate::alloc::AllocationTable;
use crate::consts::*;
use crate::dirent::{Dirent, DirentKind};
use crate::error::{Error, Result};
use crate::header::Header;
use crate::repack;
use crate::stream::{self, Stream};
use std::collections::HashSet;
use std::fs;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// What a host file must support to back a container.
///
/// The engine rewrites the host in place on repack, so besides
/// `Read + Write + Seek` it needs to shrink the host when the repacked
/// image is smaller than the previous one.
pub trait HostFile: Read + Write + Seek {
    /// Truncate or extend the host to exactly `len` bytes.
    fn set_len(&mut self, len: u64) -> io::Result<()>;
}

impl HostFile for fs::File {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        fs::File::set_len(self, len)
    }
}

impl HostFile for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.get_mut().resize(len as usize, 0);
        Ok(())
    }
}

/// How to open a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Parse an existing container; closing is a no-op
    Read,
    /// Parse an existing container; closing repacks
    ReadWrite,
    /// Start a fresh empty container, creating the host if needed
    Create,
    /// Start a fresh empty container over an existing host
    Truncate,
}

/// An open compound file container.
pub struct Storage<F: HostFile> {
    /// Vacated only by `close`/`discard`, which consume the storage
    host: Option<F>,
    pub(crate) header: Header,
    pub(crate) fat: AllocationTable,
    pub(crate) minifat: AllocationTable,
    pub(crate) dirents: Vec<Dirent>,
    writable: bool,
    /// Mutations since open or the last flush
    dirty: bool,
    poisoned: bool,
}

impl Storage<fs::File> {
    /// Open the container at `path` read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_file(path, OpenMode::Read)
    }

    /// Open the container at `path` for reading and writing.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_file(path, OpenMode::ReadWrite)
    }

    /// Create a fresh container at `path`, truncating anything there.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_file(path, OpenMode::Create)
    }

    /// Open the container at `path` with explicit mode semantics:
    /// `Read`/`ReadWrite` parse what is there, `Create` makes the file
    /// if missing and starts empty, `Truncate` requires the file to
    /// exist and starts empty.
    pub fn open_file<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let mut options = fs::OpenOptions::new();
        match mode {
            OpenMode::Read => options.read(true),
            OpenMode::ReadWrite => options.read(true).write(true),
            OpenMode::Create => options.read(true).write(true).create(true).truncate(true),
            OpenMode::Truncate => options.read(true).write(true).truncate(true),
        };
        let file = options.open(path)?;
        Self::open_in(file, mode)
    }

    /// Open at `path`, run `body`, then close on success or discard on
    /// failure. The host file is released on every path out.
    pub fn with<P, T, B>(path: P, mode: OpenMode, body: B) -> Result<T>
    where
        P: AsRef<Path>,
        B: FnOnce(&mut Storage<fs::File>) -> Result<T>,
    {
        let mut storage = Self::open_file(path, mode)?;
        match body(&mut storage) {
            Ok(value) => {
                storage.close()?;
                Ok(value)
            },
            Err(err) => {
                storage.discard();
                Err(err)
            },
        }
    }
}

impl Storage<Cursor<Vec<u8>>> {
    /// Create a fresh container backed by an in-memory buffer.
    pub fn in_memory() -> Result<Self> {
        Self::open_in(Cursor::new(Vec::new()), OpenMode::Create)
    }

    /// Open a container over an in-memory image, read-write.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::open_in(Cursor::new(data), OpenMode::ReadWrite)
    }
}

impl<F: HostFile> Storage<F> {
    /// Open a container over an arbitrary host.
    pub fn open_in(host: F, mode: OpenMode) -> Result<Self> {
        match mode {
            OpenMode::Create | OpenMode::Truncate => Ok(Storage {
                host: Some(host),
                header: Header::new(),
                fat: AllocationTable::new(),
                minifat: AllocationTable::new(),
                dirents: vec![Dirent::new_root()],
                writable: true,
                dirty: false,
                poisoned: false,
            }),
            OpenMode::Read | OpenMode::ReadWrite => {
                Self::load(host, mode == OpenMode::ReadWrite)
            },
        }
    }

    fn load(mut host: F, writable: bool) -> Result<Self> {
        host.seek(SeekFrom::Start(0))?;
        let mut header_buf = [0u8; HEADER_SIZE];
        host.read_exact(&mut header_buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Corrupt("file is smaller than the 512-byte header".to_string())
            } else {
                Error::Io(e)
            }
        })?;
        let header = Header::parse(&header_buf)?;
        let sector_size = header.sector_size();

        // DIFAT: the inline prefix, then any linked DIFAT sectors. The
        // last entry of each DIFAT sector points to the next one.
        let mut fat_page_sids = Vec::new();
        for &sid in header.difat.iter() {
            if sid == FREESECT || sid == ENDOFCHAIN {
                break;
            }
            fat_page_sids.push(sid);
        }
        let mut difat_sid = header.first_difat_sector;
        if difat_sid == FREESECT {
            // Some writers use FREESECT where ENDOFCHAIN is meant.
            difat_sid = ENDOFCHAIN;
        }
        let ids_per_difat_sector = sector_size / 4 - 1;
        let mut seen_difat = HashSet::new();
        while difat_sid != ENDOFCHAIN {
            if difat_sid > MAXREGSECT {
                return Err(Error::Corrupt(format!(
                    "DIFAT chain entered reserved sector ID {difat_sid:#010x}"
                )));
            }
            if !seen_difat.insert(difat_sid) {
                return Err(Error::Corrupt("cycle in DIFAT chain".to_string()));
            }
            let page = read_sector_raw(&mut host, &header, difat_sid)?;
            for i in 0..ids_per_difat_sector {
                let sid = u32_at(&page, i * 4);
                if sid == FREESECT || sid == ENDOFCHAIN {
                    break;
                }
                fat_page_sids.push(sid);
            }
            difat_sid = u32_at(&page, sector_size - 4);
            if difat_sid == FREESECT {
                difat_sid = ENDOFCHAIN;
            }
        }

        // Big FAT: every page listed by the DIFAT, flattened.
        let entries_per_sector = sector_size / 4;
        let mut fat_entries = Vec::with_capacity(fat_page_sids.len() * entries_per_sector);
        for &sid in &fat_page_sids {
            let page = read_sector_raw(&mut host, &header, sid)?;
            for i in 0..entries_per_sector {
                fat_entries.push(u32_at(&page, i * 4));
            }
        }
        let mut fat = AllocationTable::from_entries(fat_entries);
        fat.truncate_trailing_free();
        fat.validate()?;

        // Directory chain.
        let dir_chain = fat.chain(header.first_dir_sector)?;
        let mut dir_data = Vec::with_capacity(dir_chain.len() * sector_size);
        for &sid in &dir_chain {
            dir_data.extend_from_slice(&read_sector_raw(&mut host, &header, sid)?);
        }
        let num_entries = dir_data.len() / DIRENT_SIZE;
        let mut dirents = Vec::with_capacity(num_entries);
        for i in 0..num_entries {
            dirents.push(Dirent::parse(&dir_data[i * DIRENT_SIZE..(i + 1) * DIRENT_SIZE])?);
        }
        if dirents.is_empty() || dirents[0].kind() != DirentKind::Root {
            return Err(Error::Corrupt("missing root directory entry".to_string()));
        }

        // MiniFAT: an ordinary stream in big-sector space.
        let mut minifat_start = header.first_minifat_sector;
        if minifat_start == FREESECT {
            minifat_start = ENDOFCHAIN;
        }
        let minifat = if minifat_start == ENDOFCHAIN {
            AllocationTable::new()
        } else {
            let chain = fat.chain(minifat_start)?;
            let mut entries = Vec::with_capacity(chain.len() * entries_per_sector);
            for &sid in &chain {
                let page = read_sector_raw(&mut host, &header, sid)?;
                for i in 0..entries_per_sector {
                    entries.push(u32_at(&page, i * 4));
                }
            }
            let mut table = AllocationTable::from_entries(entries);
            table.truncate_trailing_free();
            table.validate()?;
            table
        };

        let mut storage = Storage {
            host: Some(host),
            header,
            fat,
            minifat,
            dirents,
            writable,
            dirty: false,
            poisoned: false,
        };
        storage.rebuild_children()?;
        Ok(storage)
    }

    /// Flatten the on-disk sibling trees into ordered children lists,
    /// walking each storage's tree in-order (left, self, right).
    fn rebuild_children(&mut self) -> Result<()> {
        let mut visited = HashSet::new();
        visited.insert(0u32);
        let mut pending = vec![0u32];
        while let Some(parent) = pending.pop() {
            let first = self.dirents[parent as usize].child;
            let children = self.collect_siblings(first, &mut visited)?;
            for &child in &children {
                match self.dirents[child as usize].kind() {
                    DirentKind::Storage => pending.push(child),
                    DirentKind::Stream => {},
                    kind => {
                        return Err(Error::Corrupt(format!(
                            "directory tree references a {kind:?} entry"
                        )));
                    },
                }
            }
            self.dirents[parent as usize].children = children;
        }
        Ok(())
    }

    fn collect_siblings(&self, first: u32, visited: &mut HashSet<u32>) -> Result<Vec<u32>> {
        let mut out = Vec::new();
        let mut stack: Vec<u32> = Vec::new();
        let mut current = first;
        loop {
            while current != NOSTREAM {
                if current as usize >= self.dirents.len() {
                    return Err(Error::Corrupt(format!(
                        "sibling link {current} outside the directory"
                    )));
                }
                if !visited.insert(current) {
                    return Err(Error::Corrupt("cycle in directory tree".to_string()));
                }
                stack.push(current);
                current = self.dirents[current as usize].left;
            }
            let Some(sid) = stack.pop() else { break };
            out.push(sid);
            current = self.dirents[sid as usize].right;
        }
        Ok(out)
    }

    // --- Accessors ------------------------------------------------------

    /// Read-only view of the parsed header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The root entry.
    pub fn root(&self) -> &Dirent {
        &self.dirents[0]
    }

    /// The flat directory entry array. Deleted entries keep their slot
    /// until the next repack; repack renumbers the array.
    pub fn dirents(&self) -> &[Dirent] {
        &self.dirents
    }

    /// Entry by array index.
    pub fn dirent(&self, id: u32) -> Option<&Dirent> {
        self.dirents.get(id as usize)
    }

    /// Ordered children of a storage entry.
    pub fn children(&self, id: u32) -> Option<&[u32]> {
        self.dirents.get(id as usize).map(|d| d.children.as_slice())
    }

    /// Whether mutations are allowed. A container opened read-only is
    /// never writable; one that observed corruption mid-session stops
    /// being writable.
    pub fn is_writable(&self) -> bool {
        self.writable && !self.poisoned
    }

    /// Resolve a '/'-separated path from the root. Empty components are
    /// skipped, so `"/a//b"` equals `"a/b"`. Lookup is by exact name
    /// (no case folding) and returns the first match in children order;
    /// duplicate names beyond the first are reachable only by ID.
    pub fn dirent_from_path(&self, path: &str) -> Option<u32> {
        let mut current = 0u32;
        for name in path.split('/').filter(|part| !part.is_empty()) {
            current = self.dirents[current as usize]
                .children
                .iter()
                .copied()
                .find(|&child| self.dirents[child as usize].name() == name)?;
        }
        Some(current)
    }

    /// Like [`dirent_from_path`](Self::dirent_from_path), but with a
    /// `NotFound` error for missing paths.
    pub fn entry(&self, path: &str) -> Result<&Dirent> {
        let id = self
            .dirent_from_path(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(&self.dirents[id as usize])
    }

    /// Human-readable dump of the subtree under `id`.
    pub fn format_tree(&self, id: u32) -> String {
        let mut out = String::new();
        if (id as usize) < self.dirents.len() {
            self.format_tree_into(id, 0, &mut out);
        }
        out
    }

    fn format_tree_into(&self, id: u32, depth: usize, out: &mut String) {
        let dirent = &self.dirents[id as usize];
        for _ in 0..depth {
            out.push_str("  ");
        }
        if dirent.is_stream() {
            out.push_str(&format!("- {:?} ({} bytes)\n", dirent.name(), dirent.len()));
        } else {
            out.push_str(&format!("- {:?}/\n", dirent.name()));
        }
        for &child in &self.dirents[id as usize].children {
            self.format_tree_into(child, depth + 1, out);
        }
    }

    // --- Mutation -------------------------------------------------------

    /// Append a new storage or stream under `parent`.
    ///
    /// The engine does not enforce name uniqueness; creating a second
    /// child with an existing name is allowed and both are enumerable.
    pub fn new_child(&mut self, parent: u32, kind: DirentKind, name: &str) -> Result<u32> {
        self.ensure_writable()?;
        match kind {
            DirentKind::Storage | DirentKind::Stream => {},
            _ => {
                return Err(Error::Unsupported(format!(
                    "cannot create a {kind:?} entry"
                )));
            },
        }
        let parent_dirent = self
            .dirent(parent)
            .ok_or_else(|| Error::NotFound(format!("dirent {parent}")))?;
        if !parent_dirent.is_storage() {
            return Err(Error::NotDirectory(parent_dirent.name()));
        }
        let dirent = Dirent::new(kind, name)?;
        self.dirents.push(dirent);
        let id = (self.dirents.len() - 1) as u32;
        self.dirents[parent as usize].children.push(id);
        self.dirty = true;
        Ok(id)
    }

    /// Rename an entry.
    pub fn rename(&mut self, id: u32, name: &str) -> Result<()> {
        self.ensure_writable()?;
        if self.dirent(id).is_none() {
            return Err(Error::NotFound(format!("dirent {id}")));
        }
        self.dirents[id as usize].set_name(name)?;
        self.dirty = true;
        Ok(())
    }

    /// Unlink `child` from `parent` and free the chains of everything
    /// underneath it. The array slots stay until the next repack, which
    /// drops them; stale IDs must not be used afterwards.
    pub fn delete(&mut self, parent: u32, child: u32) -> Result<()> {
        self.ensure_writable()?;
        let position = self
            .dirent(parent)
            .ok_or_else(|| Error::NotFound(format!("dirent {parent}")))?
            .children
            .iter()
            .position(|&c| c == child)
            .ok_or_else(|| Error::NotFound(format!("dirent {child} under {parent}")))?;
        self.dirents[parent as usize].children.remove(position);

        // Free the whole subtree's chains so the sectors can be reused.
        let mut pending = vec![child];
        while let Some(id) = pending.pop() {
            let dirent = &self.dirents[id as usize];
            pending.extend_from_slice(&dirent.children);
            let (is_stream, size, first) = (dirent.is_stream(), dirent.len(), dirent.first_sector);
            if is_stream && size > 0 {
                let result = if size < self.header.mini_stream_cutoff as u64 {
                    self.minifat.free_chain(first)
                } else {
                    self.fat.free_chain(first)
                };
                self.note(result)?;
            }
            self.dirents[id as usize].first_sector = ENDOFCHAIN;
            self.dirents[id as usize].size = 0;
        }
        self.dirty = true;
        Ok(())
    }

    /// Create (or overwrite) a stream at `path` with the given content.
    /// Parent storages must already exist; an existing storage at the
    /// path is an `IsDirectory` error.
    pub fn create_stream(&mut self, path: &str, data: &[u8]) -> Result<u32> {
        self.ensure_writable()?;
        let (parent, name) = self.resolve_parent(path)?;
        let existing = self.find_child(parent, name);
        let id = match existing {
            Some(id) if self.dirents[id as usize].is_stream() => {
                self.dirent_resize(id, 0)?;
                id
            },
            Some(_) => return Err(Error::IsDirectory(path.to_string())),
            None => self.new_child(parent, DirentKind::Stream, name)?,
        };
        self.dirent_write_at(id, 0, data)?;
        Ok(id)
    }

    /// Create a storage at `path`. Parent storages must already exist.
    pub fn create_storage(&mut self, path: &str) -> Result<u32> {
        self.ensure_writable()?;
        let (parent, name) = self.resolve_parent(path)?;
        if self.find_child(parent, name).is_some() {
            return Err(Error::AlreadyExists(path.to_string()));
        }
        self.new_child(parent, DirentKind::Storage, name)
    }

    /// Remove the stream or empty storage at `path`.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        self.ensure_writable()?;
        let (parent, name) = self.resolve_parent(path)?;
        let id = self
            .find_child(parent, name)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let dirent = &self.dirents[id as usize];
        if dirent.is_storage() && !dirent.children.is_empty() {
            return Err(Error::NotEmpty(path.to_string()));
        }
        self.delete(parent, id)
    }

    /// Open the stream at `path` for random-access I/O.
    pub fn open_stream(&mut self, path: &str) -> Result<Stream<'_, F>> {
        let id = self
            .dirent_from_path(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.stream(id)
    }

    /// Open the stream with dirent ID `id`.
    pub fn stream(&mut self, id: u32) -> Result<Stream<'_, F>> {
        let dirent = self
            .dirent(id)
            .ok_or_else(|| Error::NotFound(format!("dirent {id}")))?;
        if !dirent.is_stream() {
            return Err(Error::IsDirectory(dirent.name()));
        }
        Ok(Stream::new(self, id))
    }

    /// Read the entire content of the stream at `path`.
    pub fn read_stream(&mut self, path: &str) -> Result<Vec<u8>> {
        let id = self
            .dirent_from_path(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let dirent = &self.dirents[id as usize];
        if !dirent.is_stream() {
            return Err(Error::IsDirectory(dirent.name()));
        }
        let size = dirent.len();
        let mut buf = vec![0u8; size as usize];
        self.dirent_read_at(id, 0, &mut buf)?;
        Ok(buf)
    }

    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(u32, &'p str)> {
        let mut parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        let name = parts
            .pop()
            .ok_or_else(|| Error::Unsupported("empty path".to_string()))?;
        let mut current = 0u32;
        for part in parts {
            let next = self
                .find_child(current, part)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
            if !self.dirents[next as usize].is_storage() {
                return Err(Error::NotDirectory(part.to_string()));
            }
            current = next;
        }
        if !self.dirents[current as usize].is_storage() {
            return Err(Error::NotDirectory(path.to_string()));
        }
        Ok((current, name))
    }

    fn find_child(&self, parent: u32, name: &str) -> Option<u32> {
        self.dirents[parent as usize]
            .children
            .iter()
            .copied()
            .find(|&child| self.dirents[child as usize].name() == name)
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Corrupt(
                "container marked corrupt; refusing further mutation".to_string(),
            ));
        }
        if self.writable {
            Ok(())
        } else {
            Err(Error::Unsupported(
                "container opened read-only".to_string(),
            ))
        }
    }

    /// Record corruption observed mid-operation; a poisoned container
    /// is no longer writable and refuses to repack, so the host file
    /// is left as it was.
    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::Corrupt(_))) {
            self.poisoned = true;
        }
        result
    }

    fn host_mut(&mut self) -> Result<&mut F> {
        self.host
            .as_mut()
            .ok_or_else(|| Error::Unsupported("container host already released".to_string()))
    }

    // --- Stream I/O plumbing -------------------------------------------

    /// True when the entry's content lives in mini sectors. The root's
    /// content is the mini stream body itself and always lives in big
    /// sectors.
    fn tier_is_mini(&self, id: u32, size: u64) -> bool {
        id != 0 && size < self.header.mini_stream_cutoff as u64
    }

    /// The `(offset, length)` ranges backing an entry's content, trimmed
    /// to its size: host-file offsets for big-sector content, mini
    /// stream offsets for mini-sector content.
    pub(crate) fn dirent_ranges(&mut self, id: u32) -> Result<Vec<(u64, usize)>> {
        let dirent = &self.dirents[id as usize];
        let (size, first) = (dirent.len(), dirent.first_sector);
        if size == 0 {
            return Ok(Vec::new());
        }
        let result = if self.tier_is_mini(id, size) {
            let mini = self.header.mini_sector_size();
            self.minifat
                .chain(first)
                .and_then(|chain| stream::chain_ranges(&chain, mini, size, |sid| {
                    sid as u64 * mini as u64
                }))
        } else {
            let header = &self.header;
            self.fat
                .chain(first)
                .and_then(|chain| stream::chain_ranges(&chain, header.sector_size(), size, |sid| {
                    header.sector_offset(sid)
                }))
        };
        self.note(result)
    }

    /// Read up to `buf.len()` bytes of entry `id` starting at `pos`.
    /// Reading past the end yields a short (possibly zero) count.
    pub(crate) fn dirent_read_at(&mut self, id: u32, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.dirents[id as usize].len();
        if pos >= size || buf.is_empty() {
            return Ok(0);
        }
        let n = (size - pos).min(buf.len() as u64) as usize;
        let is_mini = self.tier_is_mini(id, size);
        let ranges = self.dirent_ranges(id)?;
        let segments = stream::clip_ranges(&ranges, pos, n);
        let mut filled = 0;
        for (offset, len) in segments {
            if is_mini {
                // Composed I/O: a mini segment is a positioned read of
                // the root's mini stream body.
                let got = self.dirent_read_at(0, offset, &mut buf[filled..filled + len])?;
                if got < len {
                    let err = Err(Error::Corrupt(
                        "mini stream ends inside an allocated mini sector".to_string(),
                    ));
                    return self.note(err);
                }
            } else {
                let host = self.host_mut()?;
                host.seek(SeekFrom::Start(offset))?;
                host.read_exact(&mut buf[filled..filled + len])?;
            }
            filled += len;
        }
        Ok(n)
    }

    /// Write `data` into entry `id` at `pos`, extending the stream (and
    /// zero-filling any seek-past-end gap) as needed.
    pub(crate) fn dirent_write_at(&mut self, id: u32, pos: u64, data: &[u8]) -> Result<usize> {
        self.ensure_writable()?;
        if data.is_empty() {
            return Ok(0);
        }
        let end = pos
            .checked_add(data.len() as u64)
            .ok_or_else(|| Error::Unsupported("stream length overflow".to_string()))?;
        let size = self.dirents[id as usize].len();
        if end > size {
            let result = self.reserve_capacity(id, end);
            self.note(result)?;
            if pos > size {
                self.zero_fill(id, size, pos)?;
            }
        }
        let result = self.raw_write_at(id, pos, data);
        self.note(result)?;
        self.dirty = true;
        Ok(data.len())
    }

    /// Truncate or extend entry `id` to exactly `new_size` bytes.
    pub(crate) fn dirent_resize(&mut self, id: u32, new_size: u64) -> Result<()> {
        self.ensure_writable()?;
        let size = self.dirents[id as usize].len();
        if new_size == size {
            return Ok(());
        }
        let result = self.reserve_capacity(id, new_size);
        self.note(result)?;
        if new_size > size {
            self.zero_fill(id, size, new_size)?;
        }
        self.dirty = true;
        Ok(())
    }

    /// Re-chain entry `id` for a new size, moving its content between
    /// the mini and big tiers when the size crosses the cutoff. Newly
    /// covered bytes are left for the caller to fill.
    fn reserve_capacity(&mut self, id: u32, new_size: u64) -> Result<()> {
        let dirent = &self.dirents[id as usize];
        let (old_size, first) = (dirent.len(), dirent.first_sector);
        let was_mini = self.tier_is_mini(id, old_size);
        let is_mini = self.tier_is_mini(id, new_size);
        let big = self.header.sector_size();
        let mini = self.header.mini_sector_size();

        if was_mini == is_mini {
            let new_first = if is_mini {
                self.minifat.resize_chain(first, new_size, mini)?
            } else {
                self.fat.resize_chain(first, new_size, big)?
            };
            self.dirents[id as usize].first_sector = new_first;
            self.dirents[id as usize].size = new_size;
            if is_mini {
                self.ensure_ministream_capacity()?;
            }
            return Ok(());
        }

        // Crossing the cutoff: carry the surviving bytes into a fresh
        // chain in the other table.
        let keep = old_size.min(new_size);
        let mut content = vec![0u8; keep as usize];
        self.dirent_read_at(id, 0, &mut content)?;
        if was_mini {
            self.minifat.free_chain(first)?;
            let new_first = self.fat.allocate(new_size.div_ceil(big as u64) as usize)?;
            self.dirents[id as usize].first_sector = new_first;
        } else {
            self.fat.free_chain(first)?;
            let new_first = self
                .minifat
                .allocate(new_size.div_ceil(mini as u64) as usize)?;
            self.dirents[id as usize].first_sector = new_first;
            self.ensure_ministream_capacity()?;
        }
        self.dirents[id as usize].size = new_size;
        self.raw_write_at(id, 0, &content)
    }

    /// Grow the root's mini stream body to cover every mini sector the
    /// MiniFAT addresses. The body only grows between repacks; repack
    /// rebuilds it compactly.
    fn ensure_ministream_capacity(&mut self) -> Result<()> {
        let needed = self.minifat.sector_count() as u64 * self.header.mini_sector_size() as u64;
        let root_size = self.dirents[0].len();
        if needed <= root_size {
            return Ok(());
        }
        let first = self.dirents[0].first_sector;
        let new_first = self
            .fat
            .resize_chain(first, needed, self.header.sector_size())?;
        self.dirents[0].first_sector = new_first;
        self.dirents[0].size = needed;
        Ok(())
    }

    /// Write within the already-reserved extent of entry `id`.
    fn raw_write_at(&mut self, id: u32, pos: u64, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let size = self.dirents[id as usize].len();
        let is_mini = self.tier_is_mini(id, size);
        let ranges = self.dirent_ranges(id)?;
        let segments = stream::clip_ranges(&ranges, pos, data.len());
        let covered: usize = segments.iter().map(|&(_, len)| len).sum();
        if covered < data.len() {
            return Err(Error::Corrupt(format!(
                "write of {} bytes at {pos} exceeds the {size}-byte extent",
                data.len()
            )));
        }
        let mut taken = 0;
        for (offset, len) in segments {
            if is_mini {
                self.raw_write_at(0, offset, &data[taken..taken + len])?;
            } else {
                let host = self.host_mut()?;
                host.seek(SeekFrom::Start(offset))?;
                host.write_all(&data[taken..taken + len])?;
            }
            taken += len;
        }
        Ok(())
    }

    fn zero_fill(&mut self, id: u32, from: u64, to: u64) -> Result<()> {
        const CHUNK: usize = 32 * 1024;
        if from >= to {
            return Ok(());
        }
        let zeros = vec![0u8; ((to - from) as usize).min(CHUNK)];
        let mut pos = from;
        while pos < to {
            let n = ((to - pos) as usize).min(CHUNK);
            let result = self.raw_write_at(id, pos, &zeros[..n]);
            self.note(result)?;
            pos += n as u64;
        }
        Ok(())
    }

    // --- Repack ---------------------------------------------------------

    /// Repack the container into a fresh compact image and rewrite the
    /// host in place. A no-op for read-only containers; refused with
    /// `Corrupt` once corruption has been observed.
    ///
    /// The image is assembled fully in memory first, so failures before
    /// the final write leave the host untouched. Repack renumbers the
    /// dirent array (unreachable slots are dropped), invalidating any
    /// previously obtained dirent IDs.
    pub fn flush(&mut self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        if self.poisoned {
            return Err(Error::Corrupt(
                "container marked corrupt; refusing to rewrite it".to_string(),
            ));
        }
        let image = repack::build_image(self)?;
        let host = self.host_mut()?;
        host.seek(SeekFrom::Start(0))?;
        host.write_all(&image.bytes)?;
        host.set_len(image.bytes.len() as u64)?;
        host.flush()?;

        self.header = image.header;
        self.fat = image.fat;
        self.minifat = image.minifat;
        self.dirents = image.dirents;
        self.dirty = false;
        Ok(())
    }

    /// Flush (repacking if writable) and release the host.
    pub fn close(mut self) -> Result<F> {
        let flushed = self.flush();
        let host = self.discard();
        flushed?;
        Ok(host)
    }

    /// Release the host without repacking, discarding structural
    /// changes made since open.
    pub fn discard(mut self) -> F {
        // The host is vacated only here; close() routes through this
        // after flushing, and both consume the storage.
        self.host.take().unwrap()
    }
}

impl<F: HostFile> Drop for Storage<F> {
    /// Dropping a writable container that still has unflushed changes
    /// attempts one repack; errors have nowhere to be reported here, so
    /// call [`close`](Storage::close) to observe them.
    fn drop(&mut self) {
        if self.host.is_some()
            && self.writable
            && self.dirty
            && !self.poisoned
            && !std::thread::panicking()
        {
            let _ = self.flush();
        }
    }
}

fn read_sector_raw<F: HostFile>(host: &mut F, header: &Header, sid: u32) -> Result<Vec<u8>> {
    host.seek(SeekFrom::Start(header.sector_offset(sid)))?;
    let mut buf = vec![0u8; header.sector_size()];
    host.read_exact(&mut buf)?;
    Ok(buf)
}

fn u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}
