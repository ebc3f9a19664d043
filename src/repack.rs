//! The garbage-collecting rewrite.
//!
//! Repack snapshots the reachable directory tree and every stream's
//! bytes, then rebuilds the container from scratch: fresh allocation
//! tables, a freshly packed mini stream, a freshly serialized directory
//! with rebuilt red-black sibling trees, and a header with final counts.
//! Sector reservation order matters: stream chains first, then the
//! directory, then the MiniFAT pages, and only once everything else is
//! final the FAT's own pages and any DIFAT pages — the FAT describes
//! its own storage, so its page count is solved by fixpoint iteration.

use crate::alloc::AllocationTable;
use crate::consts::*;
use crate::dirent::{self, Dirent, DirentKind};
use crate::error::Result;
use crate::header::Header;
use crate::storage::{HostFile, Storage};
use std::collections::HashMap;

/// A fully assembled container image plus the in-memory state that
/// describes it.
pub(crate) struct Image {
    pub bytes: Vec<u8>,
    pub header: Header,
    pub fat: AllocationTable,
    pub minifat: AllocationTable,
    pub dirents: Vec<Dirent>,
}

pub(crate) fn build_image<F: HostFile>(storage: &mut Storage<F>) -> Result<Image> {
    let big = storage.header().sector_size();
    let mini = storage.header().mini_sector_size();
    let cutoff = storage.header().mini_stream_cutoff as u64;

    // Reachable entries in preorder, descending into each storage's
    // children in tree order; this becomes the new array order, so a
    // repacked container repacks to the same bytes again.
    let mut order: Vec<u32> = Vec::new();
    let mut stack = vec![0u32];
    while let Some(id) = stack.pop() {
        order.push(id);
        let mut kids: Vec<u32> = storage.dirents()[id as usize].children.clone();
        kids.sort_by(|&a, &b| {
            dirent::cmp_names(
                &storage.dirents()[a as usize].name(),
                &storage.dirents()[b as usize].name(),
            )
        });
        for &child in kids.iter().rev() {
            stack.push(child);
        }
    }
    let remap: HashMap<u32, u32> = order
        .iter()
        .enumerate()
        .map(|(new, &old)| (old, new as u32))
        .collect();

    let mut dirents: Vec<Dirent> = order
        .iter()
        .map(|&old| {
            let mut dirent = storage.dirents()[old as usize].clone();
            let children: Vec<u32> = dirent.children.iter().map(|c| remap[c]).collect();
            dirent.children = children;
            dirent.left = NOSTREAM;
            dirent.right = NOSTREAM;
            dirent.child = NOSTREAM;
            dirent
        })
        .collect();

    // Snapshot stream contents before touching anything.
    let mut contents: Vec<Option<Vec<u8>>> = vec![None; dirents.len()];
    for (new, &old) in order.iter().enumerate() {
        let (kind, size) = {
            let dirent = &storage.dirents()[old as usize];
            (dirent.kind(), dirent.len())
        };
        if kind == DirentKind::Stream && size > 0 {
            let mut buf = vec![0u8; size as usize];
            storage.dirent_read_at(old, 0, &mut buf)?;
            contents[new] = Some(buf);
        }
    }

    let mut fat = AllocationTable::new();
    let mut minifat = AllocationTable::new();

    // Large streams get their big-sector chains first, in tree order.
    for (new, dirent) in dirents.iter_mut().enumerate() {
        match &contents[new] {
            Some(data) if data.len() as u64 >= cutoff => {
                dirent.first_sector = fat.allocate(data.len().div_ceil(big))?;
            },
            Some(_) => {},
            None => {
                if dirent.kind() == DirentKind::Stream {
                    dirent.first_sector = ENDOFCHAIN;
                    dirent.size = 0;
                } else if dirent.kind() == DirentKind::Storage {
                    dirent.first_sector = 0;
                    dirent.size = 0;
                }
            },
        }
    }

    // Small streams are packed back to back into a fresh mini stream.
    let mut ministream: Vec<u8> = Vec::new();
    for (new, dirent) in dirents.iter_mut().enumerate() {
        if let Some(data) = &contents[new] {
            if (data.len() as u64) < cutoff {
                let mini_sectors = data.len().div_ceil(mini);
                let first = minifat.allocate(mini_sectors)?;
                debug_assert_eq!(ministream.len(), first as usize * mini);
                ministream.extend_from_slice(data);
                ministream.resize((first as usize + mini_sectors) * mini, 0);
                dirent.first_sector = first;
            }
        }
    }

    // The mini stream body itself lives in big sectors, owned by root.
    let ministream_start = if ministream.is_empty() {
        ENDOFCHAIN
    } else {
        fat.allocate(ministream.len().div_ceil(big))?
    };
    dirents[0].first_sector = ministream_start;
    dirents[0].size = ministream.len() as u64;
    dirents[0].color = COLOR_BLACK;

    // Rebuild each storage's sibling tree from its sorted children.
    for id in 0..dirents.len() {
        if !dirents[id].is_storage() {
            continue;
        }
        let mut kids = dirents[id].children.clone();
        kids.sort_by(|&a, &b| {
            dirent::cmp_names(&dirents[a as usize].name(), &dirents[b as usize].name())
        });
        let child = dirent::build_sibling_tree(&kids, &mut dirents);
        dirents[id].child = child;
        dirents[id].children = kids;
    }

    // Directory stream, padded to whole sectors with unallocated slots.
    let entries_per_dir_sector = big / DIRENT_SIZE;
    let slot_count = dirents.len().div_ceil(entries_per_dir_sector) * entries_per_dir_sector;
    let mut dir_data = Vec::with_capacity(slot_count * DIRENT_SIZE);
    for dirent in &dirents {
        dir_data.extend_from_slice(&dirent.to_bytes());
    }
    let padding = Dirent::unallocated().to_bytes();
    for _ in dirents.len()..slot_count {
        dir_data.extend_from_slice(&padding);
    }
    let dir_start = fat.allocate(dir_data.len().div_ceil(big))?;

    // MiniFAT pages, as an ordinary big-sector chain.
    let minifat_pages = minifat.to_sector_bytes(big);
    let minifat_start = if minifat_pages.is_empty() {
        ENDOFCHAIN
    } else {
        fat.allocate(minifat_pages.len())?
    };

    // FAT and DIFAT page counts depend on each other and on themselves;
    // iterate to the fixpoint before reserving.
    let entries_per_fat_sector = (big / 4) as u32;
    let ids_per_difat_sector = entries_per_fat_sector - 1;
    let sectors_in_use = fat.sector_count();
    let mut num_fat = 0u32;
    let mut num_difat = 0u32;
    loop {
        let total = sectors_in_use + num_fat + num_difat;
        let next_fat = total.div_ceil(entries_per_fat_sector);
        let next_difat = if next_fat > HEADER_DIFAT_ENTRIES as u32 {
            (next_fat - HEADER_DIFAT_ENTRIES as u32).div_ceil(ids_per_difat_sector)
        } else {
            0
        };
        if next_fat == num_fat && next_difat == num_difat {
            break;
        }
        num_fat = next_fat;
        num_difat = next_difat;
    }
    let difat_sids = fat.reserve_marked(num_difat as usize, DIFSECT)?;
    let fat_sids = fat.reserve_marked(num_fat as usize, FATSECT)?;

    let fat_pages = fat.to_sector_bytes(big);
    debug_assert_eq!(fat_pages.len(), num_fat as usize);

    // Header with final counts and locations.
    let mut header = storage.header().clone();
    header.first_dir_sector = dir_start;
    header.num_dir_sectors = (dir_data.len() / big) as u32;
    header.num_fat_sectors = num_fat;
    header.first_minifat_sector = minifat_start;
    header.num_minifat_sectors = minifat_pages.len() as u32;
    header.first_difat_sector = *difat_sids.first().unwrap_or(&ENDOFCHAIN);
    header.num_difat_sectors = num_difat;
    header.difat = [FREESECT; HEADER_DIFAT_ENTRIES];
    for (i, &sid) in fat_sids.iter().take(HEADER_DIFAT_ENTRIES).enumerate() {
        header.difat[i] = sid;
    }

    // DIFAT pages carry the FAT page IDs past the inline prefix; the
    // last entry of each page points to the next DIFAT page.
    let overflow = if fat_sids.len() > HEADER_DIFAT_ENTRIES {
        &fat_sids[HEADER_DIFAT_ENTRIES..]
    } else {
        &[]
    };
    let mut difat_pages: Vec<Vec<u8>> = Vec::with_capacity(num_difat as usize);
    for (page_idx, chunk) in overflow.chunks(ids_per_difat_sector as usize).enumerate() {
        let mut page = vec![0xFFu8; big];
        for (i, &sid) in chunk.iter().enumerate() {
            page[i * 4..i * 4 + 4].copy_from_slice(&sid.to_le_bytes());
        }
        let next = difat_sids.get(page_idx + 1).copied().unwrap_or(ENDOFCHAIN);
        page[big - 4..].copy_from_slice(&next.to_le_bytes());
        difat_pages.push(page);
    }
    debug_assert_eq!(difat_pages.len(), num_difat as usize);

    // Assemble the image.
    let total_sectors = fat.sector_count() as usize;
    let mut bytes = vec![0u8; HEADER_SIZE + total_sectors * big];
    header.write(&mut bytes);

    for (new, dirent) in dirents.iter().enumerate() {
        if let Some(data) = &contents[new] {
            if data.len() as u64 >= cutoff {
                place(&mut bytes, &header, &fat.chain(dirent.first_sector)?, data);
            }
        }
    }
    if ministream_start != ENDOFCHAIN {
        place(&mut bytes, &header, &fat.chain(ministream_start)?, &ministream);
    }
    place(&mut bytes, &header, &fat.chain(dir_start)?, &dir_data);
    if minifat_start != ENDOFCHAIN {
        let minifat_data: Vec<u8> = minifat_pages.concat();
        place(&mut bytes, &header, &fat.chain(minifat_start)?, &minifat_data);
    }
    for (i, &sid) in fat_sids.iter().enumerate() {
        place_sector(&mut bytes, &header, sid, &fat_pages[i]);
    }
    for (i, &sid) in difat_sids.iter().enumerate() {
        place_sector(&mut bytes, &header, sid, &difat_pages[i]);
    }

    Ok(Image {
        bytes,
        header,
        fat,
        minifat,
        dirents,
    })
}

/// Copy `data` into the image along a sector chain; trailing slack in
/// the final sector stays zero.
fn place(bytes: &mut [u8], header: &Header, chain: &[u32], data: &[u8]) {
    let big = header.sector_size();
    for (i, &sid) in chain.iter().enumerate() {
        let lo = i * big;
        if lo >= data.len() {
            break;
        }
        let hi = (lo + big).min(data.len());
        let offset = header.sector_offset(sid) as usize;
        bytes[offset..offset + (hi - lo)].copy_from_slice(&data[lo..hi]);
    }
}

fn place_sector(bytes: &mut [u8], header: &Header, sid: u32, page: &[u8]) {
    let offset = header.sector_offset(sid) as usize;
    bytes[offset..offset + page.len()].copy_from_slice(page);
}
