/// Magic bytes at the beginning of every compound file
pub const MAGIC: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Size of the file header in bytes
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const DIRENT_SIZE: usize = 128;

/// Number of DIFAT entries stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

// Sector IDs (from AAF specifications)
/// Maximum regular sector ID
pub const MAXREGSECT: u32 = 0xFFFFFFFA; // -6
/// Denotes a DIFAT sector in a FAT
pub const DIFSECT: u32 = 0xFFFFFFFC; // -4
/// Denotes a FAT sector in a FAT
pub const FATSECT: u32 = 0xFFFFFFFD; // -3
/// End of a virtual stream chain
pub const ENDOFCHAIN: u32 = 0xFFFFFFFE; // -2
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFFFFFF; // -1

// Directory Entry IDs (from AAF specifications)
/// Maximum directory entry ID
pub const MAXREGSID: u32 = 0xFFFFFFFA; // -6
/// Unallocated directory entry
pub const NOSTREAM: u32 = 0xFFFFFFFF; // -1

// Object types in storage (from AAF specifications)
/// Empty directory entry
pub const STGTY_EMPTY: u8 = 0;
/// Element is a storage object
pub const STGTY_STORAGE: u8 = 1;
/// Element is a stream object
pub const STGTY_STREAM: u8 = 2;
/// Element is a root storage
pub const STGTY_ROOT: u8 = 5;

// Directory entry node colors
/// Red node in the sibling tree
pub const COLOR_RED: u8 = 0;
/// Black node in the sibling tree
pub const COLOR_BLACK: u8 = 1;

/// Name of the root directory entry
pub const ROOT_ENTRY_NAME: &str = "Root Entry";

/// Byte-order mark written in every header (little-endian)
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;

/// Minor format version written in new headers
pub const MINOR_VERSION: u16 = 0x003E;

/// Default sector shift for new containers (2^9 = 512 bytes)
pub const DEFAULT_SECTOR_SHIFT: u16 = 9;

/// Default mini sector shift (2^6 = 64 bytes)
pub const DEFAULT_MINI_SECTOR_SHIFT: u16 = 6;

/// Streams smaller than this live in the mini stream
pub const MINI_STREAM_CUTOFF: u32 = 4096;
