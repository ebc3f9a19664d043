//! The 512-byte file header.
//!
//! The header carries the container geometry (sector shifts, mini stream
//! cutoff), the starting sectors of the directory, MiniFAT and DIFAT
//! chains, and the first 109 DIFAT entries inline. Everything after byte
//! offset 76 up to 512 is that inline DIFAT prefix.

use crate::consts::*;
use crate::error::{Error, Result};
use zerocopy::{FromBytes, LE, U16, U32};

/// Parsed form of the file header.
///
/// Every on-disk field is kept verbatim (including the unused CLSID and
/// the full inline DIFAT prefix) so that an unmodified header re-emits
/// byte-identically.
#[derive(Debug, Clone)]
pub struct Header {
    /// CLSID field, unused and normally zero
    pub clsid: [u8; 16],
    /// Minor format version
    pub minor_version: u16,
    /// Major format version (3 for 512-byte sectors, 4 for 4096)
    pub major_version: u16,
    /// log2 of the big sector size
    pub sector_shift: u16,
    /// log2 of the mini sector size
    pub mini_sector_shift: u16,
    /// Number of directory sectors (written as 0 for 512-byte sectors)
    pub num_dir_sectors: u32,
    /// Number of FAT sectors
    pub num_fat_sectors: u32,
    /// First sector of the directory chain
    pub first_dir_sector: u32,
    /// Transaction signature, unused
    pub transaction_signature: u32,
    /// Streams smaller than this live in the mini stream
    pub mini_stream_cutoff: u32,
    /// First sector of the MiniFAT chain
    pub first_minifat_sector: u32,
    /// Number of MiniFAT sectors
    pub num_minifat_sectors: u32,
    /// First DIFAT sector beyond the inline prefix
    pub first_difat_sector: u32,
    /// Number of DIFAT sectors beyond the inline prefix
    pub num_difat_sectors: u32,
    /// Inline DIFAT prefix: the first 109 FAT sector IDs
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

fn read_u16(data: &[u8], offset: usize) -> u16 {
    U16::<LE>::read_from_bytes(&data[offset..offset + 2])
        .map(|v| v.get())
        .unwrap_or(0)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    U32::<LE>::read_from_bytes(&data[offset..offset + 4])
        .map(|v| v.get())
        .unwrap_or(0)
}

impl Header {
    /// Create a header for a fresh, empty 512-byte-sector container.
    pub fn new() -> Self {
        Header {
            clsid: [0; 16],
            minor_version: MINOR_VERSION,
            major_version: 3,
            sector_shift: DEFAULT_SECTOR_SHIFT,
            mini_sector_shift: DEFAULT_MINI_SECTOR_SHIFT,
            num_dir_sectors: 0,
            num_fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            transaction_signature: 0,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            first_minifat_sector: ENDOFCHAIN,
            num_minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_ENTRIES],
        }
    }

    /// Parse and validate the first 512 bytes of a container.
    pub fn parse(data: &[u8; HEADER_SIZE]) -> Result<Self> {
        if &data[0..8] != MAGIC {
            return Err(Error::Corrupt("wrong magic number".to_string()));
        }

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&data[8..24]);

        let minor_version = read_u16(data, 24);
        let major_version = read_u16(data, 26);
        let byte_order = read_u16(data, 28);
        let sector_shift = read_u16(data, 30);
        let mini_sector_shift = read_u16(data, 32);

        if byte_order != BYTE_ORDER_MARK {
            return Err(Error::Corrupt(format!(
                "invalid byte order mark {byte_order:#06x}"
            )));
        }
        if major_version != 3 && major_version != 4 {
            return Err(Error::Unsupported(format!(
                "major version {major_version} is not supported"
            )));
        }
        // Big sectors must be at least 128 bytes; the upper bound keeps
        // offset arithmetic well away from overflow.
        if !(7..=20).contains(&sector_shift) {
            return Err(Error::Corrupt(format!(
                "sector shift {sector_shift} out of range"
            )));
        }
        if mini_sector_shift > sector_shift {
            return Err(Error::Corrupt(format!(
                "mini sector shift {mini_sector_shift} exceeds sector shift {sector_shift}"
            )));
        }

        let mini_stream_cutoff = read_u32(data, 56);
        if mini_stream_cutoff == 0 {
            return Err(Error::Corrupt("mini stream cutoff is zero".to_string()));
        }

        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (i, entry) in difat.iter_mut().enumerate() {
            *entry = read_u32(data, 76 + i * 4);
        }

        Ok(Header {
            clsid,
            minor_version,
            major_version,
            sector_shift,
            mini_sector_shift,
            num_dir_sectors: read_u32(data, 40),
            num_fat_sectors: read_u32(data, 44),
            first_dir_sector: read_u32(data, 48),
            transaction_signature: read_u32(data, 52),
            mini_stream_cutoff,
            first_minifat_sector: read_u32(data, 60),
            num_minifat_sectors: read_u32(data, 64),
            first_difat_sector: read_u32(data, 68),
            num_difat_sectors: read_u32(data, 72),
            difat,
        })
    }

    /// Emit the header into the first 512 bytes of `buf`.
    pub fn write(&self, buf: &mut [u8]) {
        let buf = &mut buf[..HEADER_SIZE];
        buf.fill(0);
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..24].copy_from_slice(&self.clsid);
        buf[24..26].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[26..28].copy_from_slice(&self.major_version.to_le_bytes());
        buf[28..30].copy_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
        buf[30..32].copy_from_slice(&self.sector_shift.to_le_bytes());
        buf[32..34].copy_from_slice(&self.mini_sector_shift.to_le_bytes());
        // buf[34..40] reserved, already zero

        // For 512-byte sectors the directory sector count must read 0.
        let num_dir_sectors = if self.sector_size() == 512 {
            0
        } else {
            self.num_dir_sectors
        };
        buf[40..44].copy_from_slice(&num_dir_sectors.to_le_bytes());
        buf[44..48].copy_from_slice(&self.num_fat_sectors.to_le_bytes());
        buf[48..52].copy_from_slice(&self.first_dir_sector.to_le_bytes());
        buf[52..56].copy_from_slice(&self.transaction_signature.to_le_bytes());
        buf[56..60].copy_from_slice(&self.mini_stream_cutoff.to_le_bytes());
        buf[60..64].copy_from_slice(&self.first_minifat_sector.to_le_bytes());
        buf[64..68].copy_from_slice(&self.num_minifat_sectors.to_le_bytes());
        buf[68..72].copy_from_slice(&self.first_difat_sector.to_le_bytes());
        buf[72..76].copy_from_slice(&self.num_difat_sectors.to_le_bytes());

        for (i, &sid) in self.difat.iter().enumerate() {
            let offset = 76 + i * 4;
            buf[offset..offset + 4].copy_from_slice(&sid.to_le_bytes());
        }
    }

    /// Big sector size in bytes.
    pub fn sector_size(&self) -> usize {
        1usize << self.sector_shift
    }

    /// Mini sector size in bytes.
    pub fn mini_sector_size(&self) -> usize {
        1usize << self.mini_sector_shift
    }

    /// Byte offset of a big sector within the host file.
    ///
    /// Sectors are numbered from 0 starting immediately after the header.
    pub fn sector_offset(&self, sid: u32) -> u64 {
        HEADER_SIZE as u64 + sid as u64 * self.sector_size() as u64
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}
