//! Directory entries.
//!
//! Each entry is a 128-byte on-disk record. On disk the entries of one
//! storage form a red-black tree threaded through the left/right sibling
//! IDs; in memory the tree is flattened into an ordered children list
//! and rebuilt when the container is repacked.

use crate::consts::*;
use crate::error::{Error, Result};
use std::cmp::Ordering;
use zerocopy::{FromBytes, IntoBytes, LE, U16, U32, U64};
use zerocopy_derive::{
    FromBytes as DeriveFromBytes, Immutable, IntoBytes as DeriveIntoBytes, KnownLayout, Unaligned,
};

/// Raw directory entry structure (128 bytes)
///
/// This represents the on-disk format of a directory entry.
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, Immutable, KnownLayout, Unaligned)]
#[repr(C)]
struct RawDirent {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    /// Entry type (1 = storage, 2 = stream, 5 = root)
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    node_color: u8,
    /// Left sibling SID
    sid_left: U32<LE>,
    /// Right sibling SID
    sid_right: U32<LE>,
    /// Child SID
    sid_child: U32<LE>,
    /// CLSID (16 bytes)
    clsid: [u8; 16],
    /// State bits
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    creation_time: U64<LE>,
    /// Modified time (FILETIME)
    modified_time: U64<LE>,
    /// Starting sector
    start_sector: U32<LE>,
    /// Stream size
    stream_size: U64<LE>,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentKind {
    /// Unallocated slot
    Empty,
    /// A storage (directory analog)
    Storage,
    /// A stream (file analog)
    Stream,
    /// The root entry; also owns the mini stream body
    Root,
}

impl DirentKind {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            STGTY_EMPTY => Some(DirentKind::Empty),
            STGTY_STORAGE => Some(DirentKind::Storage),
            STGTY_STREAM => Some(DirentKind::Stream),
            STGTY_ROOT => Some(DirentKind::Root),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DirentKind::Empty => STGTY_EMPTY,
            DirentKind::Storage => STGTY_STORAGE,
            DirentKind::Stream => STGTY_STREAM,
            DirentKind::Root => STGTY_ROOT,
        }
    }
}

/// One directory entry, plus its in-memory children list.
///
/// The raw name buffer and every fixed-width field are kept verbatim, so
/// a record that was parsed and never modified re-emits byte-identically.
#[derive(Debug, Clone)]
pub struct Dirent {
    name_raw: [u8; 64],
    name_len: u16,
    kind: DirentKind,
    pub(crate) color: u8,
    /// Left sibling in the on-disk tree; rebuilt at repack
    pub(crate) left: u32,
    /// Right sibling in the on-disk tree; rebuilt at repack
    pub(crate) right: u32,
    /// First child in the on-disk tree; rebuilt at repack
    pub(crate) child: u32,
    clsid: [u8; 16],
    state_bits: u32,
    creation_time: u64,
    modified_time: u64,
    /// First sector of the entry's content (big sectors for large
    /// streams and the root's mini stream body, mini sectors otherwise)
    pub(crate) first_sector: u32,
    /// Content size in bytes
    pub(crate) size: u64,
    /// Ordered children (dirent array indices); meaningful for the root
    /// and storages only
    pub(crate) children: Vec<u32>,
}

impl Dirent {
    /// An unallocated slot, used to pad directory sectors.
    pub(crate) fn unallocated() -> Self {
        Dirent {
            name_raw: [0; 64],
            name_len: 0,
            kind: DirentKind::Empty,
            color: COLOR_RED,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            creation_time: 0,
            modified_time: 0,
            first_sector: FREESECT,
            size: 0,
            children: Vec::new(),
        }
    }

    /// Create a fresh storage or stream entry.
    pub(crate) fn new(kind: DirentKind, name: &str) -> Result<Self> {
        let mut dirent = Dirent::unallocated();
        dirent.kind = kind;
        dirent.color = COLOR_BLACK;
        dirent.first_sector = ENDOFCHAIN;
        dirent.set_name(name)?;
        Ok(dirent)
    }

    /// Create the root entry of a fresh container.
    pub(crate) fn new_root() -> Self {
        let mut root = Dirent::unallocated();
        root.kind = DirentKind::Root;
        root.color = COLOR_BLACK;
        root.first_sector = ENDOFCHAIN;
        // The fixed root name always fits the 31-unit field.
        let encoded: Vec<u16> = ROOT_ENTRY_NAME.encode_utf16().collect();
        for (i, &unit) in encoded.iter().enumerate() {
            root.name_raw[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        root.name_len = ((encoded.len() + 1) * 2) as u16;
        root
    }

    /// Parse a single 128-byte directory record.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let raw = RawDirent::read_from_bytes(data)
            .map_err(|_| Error::Corrupt("directory entry record is not 128 bytes".to_string()))?;
        let kind = DirentKind::from_u8(raw.entry_type).ok_or_else(|| {
            Error::Corrupt(format!("unknown directory entry type {}", raw.entry_type))
        })?;

        Ok(Dirent {
            name_raw: raw.name,
            name_len: raw.name_len.get(),
            kind,
            color: raw.node_color,
            left: raw.sid_left.get(),
            right: raw.sid_right.get(),
            child: raw.sid_child.get(),
            clsid: raw.clsid,
            state_bits: raw.state_bits.get(),
            creation_time: raw.creation_time.get(),
            modified_time: raw.modified_time.get(),
            first_sector: raw.start_sector.get(),
            size: raw.stream_size.get(),
            children: Vec::new(),
        })
    }

    /// Emit the entry as a 128-byte record.
    pub(crate) fn to_bytes(&self) -> [u8; DIRENT_SIZE] {
        let raw = RawDirent {
            name: self.name_raw,
            name_len: U16::new(self.name_len),
            entry_type: self.kind.as_u8(),
            node_color: self.color,
            sid_left: U32::new(self.left),
            sid_right: U32::new(self.right),
            sid_child: U32::new(self.child),
            clsid: self.clsid,
            state_bits: U32::new(self.state_bits),
            creation_time: U64::new(self.creation_time),
            modified_time: U64::new(self.modified_time),
            start_sector: U32::new(self.first_sector),
            stream_size: U64::new(self.size),
        };
        let mut out = [0u8; DIRENT_SIZE];
        out.copy_from_slice(raw.as_bytes());
        out
    }

    /// Decoded entry name.
    ///
    /// Names are UTF-16LE on disk; lone surrogates are replaced. The
    /// engine places no further constraints on the text: duplicate names
    /// and names containing '/' are representable.
    pub fn name(&self) -> String {
        let byte_len = (self.name_len as usize).saturating_sub(2).min(64);
        let units: Vec<u16> = self.name_raw[..byte_len]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
            .trim_end_matches('\0')
            .to_string()
    }

    /// Set the entry name. Fails with `Unsupported` past 31 UTF-16 units.
    pub fn set_name(&mut self, name: &str) -> Result<()> {
        let units: Vec<u16> = name.encode_utf16().collect();
        if units.len() > 31 {
            return Err(Error::Unsupported(format!(
                "name {name:?} exceeds 31 UTF-16 units"
            )));
        }
        self.name_raw = [0; 64];
        for (i, &unit) in units.iter().enumerate() {
            self.name_raw[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        self.name_len = ((units.len() + 1) * 2) as u16;
        Ok(())
    }

    pub fn kind(&self) -> DirentKind {
        self.kind
    }

    /// True for streams.
    pub fn is_stream(&self) -> bool {
        self.kind == DirentKind::Stream
    }

    /// True for storages, including the root.
    pub fn is_storage(&self) -> bool {
        matches!(self.kind, DirentKind::Storage | DirentKind::Root)
    }

    /// Content size in bytes. For the root this is the mini stream body.
    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// First sector of the entry's content.
    pub fn first_sector(&self) -> u32 {
        self.first_sector
    }

    /// CLSID bytes of this entry.
    pub fn clsid(&self) -> &[u8; 16] {
        &self.clsid
    }

    /// Set the CLSID, e.g. on the root to tag the document type.
    pub fn set_clsid(&mut self, clsid: [u8; 16]) {
        self.clsid = clsid;
    }

    /// User-defined state bits.
    pub fn state_bits(&self) -> u32 {
        self.state_bits
    }

    /// Creation time as a raw FILETIME value.
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Modification time as a raw FILETIME value.
    pub fn modified_time(&self) -> u64 {
        self.modified_time
    }
}

/// Compare two entry names the way the directory tree orders them:
/// shorter names first, then case-folded comparison.
///
/// Case folding is restricted to ASCII letters; trees written by other
/// implementations depend on non-ASCII characters comparing verbatim.
pub fn cmp_names(a: &str, b: &str) -> Ordering {
    let a_len = a.encode_utf16().count();
    let b_len = b.encode_utf16().count();
    a_len.cmp(&b_len).then_with(|| {
        a.chars()
            .map(|c| c.to_ascii_uppercase())
            .cmp(b.chars().map(|c| c.to_ascii_uppercase()))
    })
}

/// Build a balanced red-black sibling tree from children already sorted
/// by [`cmp_names`], linking the left/right IDs and assigning colors.
/// Returns the subtree root (`NOSTREAM` for no children).
///
/// The midpoint recursion keeps every leaf within the last two levels;
/// coloring the deepest level red and everything else black then yields
/// a uniform black height with no red-red edge.
pub(crate) fn build_sibling_tree(sorted: &[u32], dirents: &mut [Dirent]) -> u32 {
    let red_depth = if sorted.len() <= 1 {
        usize::MAX
    } else {
        sorted.len().ilog2() as usize
    };
    build_subtree(sorted, 0, red_depth, dirents)
}

fn build_subtree(sorted: &[u32], depth: usize, red_depth: usize, dirents: &mut [Dirent]) -> u32 {
    if sorted.is_empty() {
        return NOSTREAM;
    }
    let mid = sorted.len() / 2;
    let left = build_subtree(&sorted[..mid], depth + 1, red_depth, dirents);
    let right = build_subtree(&sorted[mid + 1..], depth + 1, red_depth, dirents);
    let dirent = &mut dirents[sorted[mid] as usize];
    dirent.left = left;
    dirent.right = right;
    dirent.color = if depth == red_depth {
        COLOR_RED
    } else {
        COLOR_BLACK
    };
    sorted[mid]
}
