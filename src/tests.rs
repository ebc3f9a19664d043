//! Whole-container integration tests.
//!
//! These build containers in memory, repack them, and reopen the
//! resulting images to verify that the engine round-trips its own
//! output and that streams land in the right sector tier.

use crate::consts::*;
use crate::dirent::{cmp_names, DirentKind};
use crate::error::Error;
use crate::storage::{OpenMode, Storage};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

fn patterned(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

#[test]
fn test_create_write_reopen_mini() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/hello", b"world").unwrap();
    let image = comp.close().unwrap().into_inner();

    assert_eq!(&image[0..8], MAGIC);

    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.read_stream("/hello").unwrap(), b"world");

    // 5 bytes is far below the cutoff: the chain lives in the MiniFAT
    // and the ranges are mini-stream offsets.
    assert!(comp.header().num_minifat_sectors > 0);
    let ranges = comp.open_stream("/hello").unwrap().ranges().unwrap();
    assert_eq!(ranges, vec![(0, 5)]);
}

#[test]
fn test_mini_stream_ranges_split_per_sector() {
    let mut data = patterned(98, 3);
    data[0] = 0x01;
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/\u{1}CompObj", &data).unwrap();
    let image = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image).unwrap();
    let read = comp.read_stream("/\u{1}CompObj").unwrap();
    assert_eq!(read[0], 0x01);
    assert_eq!(read, data);

    // 98 bytes in 64-byte mini sectors: one full range, one trimmed.
    let ranges = comp.open_stream("/\u{1}CompObj").unwrap().ranges().unwrap();
    assert_eq!(ranges, vec![(0, 64), (64, 34)]);
    assert_eq!(ranges.iter().map(|&(_, len)| len).sum::<usize>(), 98);
}

#[test]
fn test_enumerate_root_in_disk_order() {
    let mut comp = Storage::in_memory().unwrap();
    for name in ["d", "b", "aa", "c"] {
        comp.create_stream(&format!("/{name}"), name.as_bytes())
            .unwrap();
    }
    // Before repack, children keep insertion order.
    let names: Vec<String> = comp.children(0).unwrap().iter()
        .map(|&id| comp.dirents()[id as usize].name())
        .collect();
    assert_eq!(names, ["d", "b", "aa", "c"]);

    let image = comp.close().unwrap().into_inner();
    let comp = Storage::from_bytes(image).unwrap();

    // After repack, the on-disk order is (length, uppercased name).
    let children = comp.children(0).unwrap();
    assert_eq!(children.len(), 4);
    let names: Vec<String> = children.iter()
        .map(|&id| comp.dirents()[id as usize].name())
        .collect();
    assert_eq!(names, ["b", "c", "d", "aa"]);
}

#[test]
fn test_large_stream_uses_big_sectors() {
    let data = patterned(100_000, 7);
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/LargeStream", &data).unwrap();
    let image = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.read_stream("/LargeStream").unwrap(), data);

    let ranges = comp.open_stream("/LargeStream").unwrap().ranges().unwrap();
    // Big-sector ranges are host-file offsets in 512-byte chunks.
    assert_eq!(ranges.len(), 100_000usize.div_ceil(512));
    assert_eq!(ranges[0].1, 512);
    assert!(ranges[0].0 >= HEADER_SIZE as u64);
}

#[test]
fn test_append_crosses_cutoff() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/grow", &vec![0xAB; 4095]).unwrap();
    {
        let mut stream = comp.open_stream("/grow").unwrap();
        stream.seek(SeekFrom::End(0)).unwrap();
        stream.write_all(&[0xCD, 0xEF]).unwrap();
    }
    // The write pushed the stream over the cutoff; it must have been
    // reallocated into big sectors already.
    {
        let mut stream = comp.open_stream("/grow").unwrap();
        assert_eq!(stream.len(), 4097);
        let ranges = stream.ranges().unwrap();
        assert_eq!(ranges[0].1, 512);
    }

    let image = comp.close().unwrap().into_inner();
    let mut comp = Storage::from_bytes(image).unwrap();
    let read = comp.read_stream("/grow").unwrap();
    assert_eq!(read.len(), 4097);
    assert!(read[..4095].iter().all(|&b| b == 0xAB));
    assert_eq!(&read[4095..], &[0xCD, 0xEF]);
    let ranges = comp.open_stream("/grow").unwrap().ranges().unwrap();
    assert_eq!(ranges[0].1, 512);
}

#[test]
fn test_truncate_drops_back_to_mini() {
    let mut comp = Storage::in_memory().unwrap();
    let data = patterned(5000, 11);
    comp.create_stream("/shrink", &data).unwrap();
    {
        let mut stream = comp.open_stream("/shrink").unwrap();
        stream.set_len(100).unwrap();
        let ranges = stream.ranges().unwrap();
        // Back under the cutoff: 64-byte mini sectors again.
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].1, 64);
    }
    let image = comp.close().unwrap().into_inner();
    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.read_stream("/shrink").unwrap(), &data[..100]);
}

#[test]
fn test_delete_and_repack_shrinks() {
    let mut comp = Storage::in_memory().unwrap();
    let small = patterned(200, 1);
    let big = patterned(5000, 2);
    comp.create_stream("/keep", &small).unwrap();
    comp.create_stream("/drop", &big).unwrap();
    let image_before = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image_before.clone()).unwrap();
    comp.remove("/drop").unwrap();
    let image_after = comp.close().unwrap().into_inner();

    assert!(image_after.len() <= image_before.len());

    let mut comp = Storage::from_bytes(image_after).unwrap();
    assert_eq!(comp.dirent_from_path("/drop"), None);
    assert!(matches!(
        comp.read_stream("/drop"),
        Err(Error::NotFound(_))
    ));
    assert_eq!(comp.read_stream("/keep").unwrap(), small);
}

#[test]
fn test_mid_session_corruption_revokes_writability() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/s", &patterned(100, 9)).unwrap();
    let mut image = comp.close().unwrap().into_inner();

    // Inflate the stream's recorded size past what its chain covers.
    // That passes load-time validation and only surfaces when the
    // chain is resolved.
    let record = (0..image.len())
        .step_by(DIRENT_SIZE)
        .find(|&offset| {
            image[offset] == b's'
                && image[offset + 1] == 0
                && u16::from_le_bytes([image[offset + 64], image[offset + 65]]) == 4
                && image[offset + 66] == STGTY_STREAM
        })
        .unwrap();
    image[record + 120..record + 128].copy_from_slice(&1000u64.to_le_bytes());

    let mut comp = Storage::from_bytes(image).unwrap();
    assert!(comp.is_writable());
    assert!(matches!(comp.read_stream("/s"), Err(Error::Corrupt(_))));

    // The corruption poisons the container: it is no longer writable,
    // every mutation is refused, and so is repacking.
    assert!(!comp.is_writable());
    assert!(matches!(
        comp.create_stream("/t", b"x"),
        Err(Error::Corrupt(_))
    ));
    assert!(matches!(
        comp.new_child(0, DirentKind::Storage, "u"),
        Err(Error::Corrupt(_))
    ));
    assert!(matches!(comp.remove("/s"), Err(Error::Corrupt(_))));
    assert!(matches!(comp.flush(), Err(Error::Corrupt(_))));
}

#[test]
fn test_drop_flushes_unsaved_changes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.ole");
    {
        let mut comp = Storage::create(&path).unwrap();
        comp.create_stream("/late", b"saved").unwrap();
        // No explicit close; dropping the storage repacks.
    }
    let mut comp = Storage::open(&path).unwrap();
    assert_eq!(comp.read_stream("/late").unwrap(), b"saved");
}

#[test]
fn test_corrupt_magic() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/x", b"x").unwrap();
    let mut image = comp.close().unwrap().into_inner();
    image[0] ^= 0xFF;
    assert!(matches!(
        Storage::from_bytes(image),
        Err(Error::Corrupt(_))
    ));
}

#[test]
fn test_repack_is_idempotent() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_storage("/a").unwrap();
    comp.create_stream("/a/small", &patterned(300, 4)).unwrap();
    comp.create_stream("/a/large", &patterned(9000, 5)).unwrap();
    comp.create_stream("/top", b"t").unwrap();
    let first = comp.close().unwrap().into_inner();

    let second = Storage::from_bytes(first.clone())
        .unwrap()
        .close()
        .unwrap()
        .into_inner();
    let third = Storage::from_bytes(second.clone())
        .unwrap()
        .close()
        .unwrap()
        .into_inner();

    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn test_reopen_preserves_tree_and_contents() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_storage("/docs").unwrap();
    comp.create_storage("/docs/inner").unwrap();
    comp.create_stream("/docs/inner/leaf", &patterned(70, 9)).unwrap();
    comp.create_stream("/docs/data", &patterned(6000, 8)).unwrap();
    comp.create_stream("/empty", b"").unwrap();
    let image = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.root().name(), ROOT_ENTRY_NAME);
    assert_eq!(comp.entry("/docs").unwrap().kind(), DirentKind::Storage);
    assert_eq!(
        comp.entry("/docs/inner/leaf").unwrap().kind(),
        DirentKind::Stream
    );
    assert_eq!(comp.entry("/empty").unwrap().len(), 0);
    assert_eq!(comp.read_stream("/empty").unwrap(), b"");
    assert_eq!(comp.read_stream("/docs/inner/leaf").unwrap(), patterned(70, 9));
    assert_eq!(comp.read_stream("/docs/data").unwrap(), patterned(6000, 8));

    let dump = comp.format_tree(0);
    assert!(dump.contains("\"docs\"/"));
    assert!(dump.contains("\"leaf\" (70 bytes)"));
}

#[test]
fn test_seek_read_consistency() {
    let data = patterned(10_000, 13);
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/s", &data).unwrap();
    let image = comp.close().unwrap().into_inner();
    let mut comp = Storage::from_bytes(image).unwrap();

    let mut stream = comp.open_stream("/s").unwrap();
    for (a, b) in [(0u64, 1usize), (511, 2), (512, 512), (4095, 2), (9999, 1), (0, 10_000)] {
        stream.seek(SeekFrom::Start(a)).unwrap();
        let mut buf = vec![0u8; b];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[a as usize..a as usize + b]);
    }

    // Reading past the end is a short read, not an error.
    stream.seek(SeekFrom::Start(9_990)).unwrap();
    let mut buf = [0u8; 64];
    assert_eq!(stream.read(&mut buf).unwrap(), 10);
    assert_eq!(stream.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_sparse_write_zero_fills() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/sparse", b"").unwrap();
    {
        let mut stream = comp.open_stream("/sparse").unwrap();
        stream.seek(SeekFrom::Start(100)).unwrap();
        stream.write_all(b"x").unwrap();
        assert_eq!(stream.len(), 101);
    }
    let image = comp.close().unwrap().into_inner();
    let mut comp = Storage::from_bytes(image).unwrap();
    let read = comp.read_stream("/sparse").unwrap();
    assert_eq!(read.len(), 101);
    assert!(read[..100].iter().all(|&b| b == 0));
    assert_eq!(read[100], b'x');
}

#[test]
fn test_seek_negative_fails() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/s", b"abc").unwrap();
    let mut stream = comp.open_stream("/s").unwrap();
    assert!(stream.seek(SeekFrom::End(-4)).is_err());
    assert!(stream.seek(SeekFrom::Current(-1)).is_err());
    assert_eq!(stream.seek(SeekFrom::End(-3)).unwrap(), 0);
}

#[test]
fn test_overwrite_existing_stream() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/v", &patterned(5000, 1)).unwrap();
    comp.create_stream("/v", b"short now").unwrap();
    let image = comp.close().unwrap().into_inner();
    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.read_stream("/v").unwrap(), b"short now");
}

#[test]
fn test_error_kinds() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_storage("/dir").unwrap();
    comp.create_stream("/dir/file", b"data").unwrap();

    assert!(matches!(
        comp.create_storage("/dir"),
        Err(Error::AlreadyExists(_))
    ));
    assert!(matches!(
        comp.create_stream("/dir", b""),
        Err(Error::IsDirectory(_))
    ));
    assert!(matches!(
        comp.open_stream("/dir"),
        Err(Error::IsDirectory(_))
    ));
    assert!(matches!(
        comp.create_stream("/dir/file/sub", b""),
        Err(Error::NotDirectory(_))
    ));
    assert!(matches!(comp.remove("/dir"), Err(Error::NotEmpty(_))));
    assert!(matches!(
        comp.read_stream("/absent"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        comp.remove("/dir/absent"),
        Err(Error::NotFound(_))
    ));

    let file_id = comp.dirent_from_path("/dir/file").unwrap();
    assert!(matches!(
        comp.new_child(file_id, DirentKind::Stream, "x"),
        Err(Error::NotDirectory(_))
    ));

    comp.remove("/dir/file").unwrap();
    comp.remove("/dir").unwrap();
    assert_eq!(comp.dirent_from_path("/dir"), None);
}

#[test]
fn test_duplicate_names_are_representable() {
    let mut comp = Storage::in_memory().unwrap();
    let first = comp.new_child(0, DirentKind::Stream, "dup").unwrap();
    let second = comp.new_child(0, DirentKind::Stream, "dup").unwrap();
    assert_ne!(first, second);
    comp.dirent_write_at(first, 0, b"one").unwrap();
    comp.dirent_write_at(second, 0, b"two").unwrap();

    // Lookup picks the first match in children order.
    assert_eq!(comp.dirent_from_path("/dup"), Some(first));

    let image = comp.close().unwrap().into_inner();
    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.children(0).unwrap().len(), 2);
    assert_eq!(comp.read_stream("/dup").unwrap(), b"one");
}

#[test]
fn test_slash_free_names_only_in_paths() {
    // Names with '/' are representable through the ID-based API even
    // though the path helpers cannot address them.
    let mut comp = Storage::in_memory().unwrap();
    let id = comp.new_child(0, DirentKind::Stream, "a/b").unwrap();
    comp.dirent_write_at(id, 0, b"slashed").unwrap();
    let image = comp.close().unwrap().into_inner();

    let comp = Storage::from_bytes(image).unwrap();
    let children = comp.children(0).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(comp.dirents()[children[0] as usize].name(), "a/b");
    assert_eq!(comp.dirent_from_path("/a/b"), None);
}

#[test]
fn test_read_only_close_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("container.ole");

    let mut comp = Storage::create(&path).unwrap();
    comp.create_stream("/data", &patterned(150, 21)).unwrap();
    comp.close().unwrap();
    let before = std::fs::read(&path).unwrap();

    let comp = Storage::open(&path).unwrap();
    assert!(!comp.is_writable());
    comp.close().unwrap();
    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);

    // Mutation on a read-only container is refused.
    let mut comp = Storage::open(&path).unwrap();
    assert!(matches!(
        comp.create_stream("/nope", b""),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_scoped_open_closes_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scoped.ole");

    Storage::with(&path, OpenMode::Create, |comp| {
        comp.create_stream("/greeting", b"hi")?;
        Ok(())
    })
    .unwrap();

    let mut comp = Storage::open(&path).unwrap();
    assert_eq!(comp.read_stream("/greeting").unwrap(), b"hi");
}

#[test]
fn test_rename() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/old", b"payload").unwrap();
    let id = comp.dirent_from_path("/old").unwrap();
    comp.rename(id, "new").unwrap();
    let image = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.dirent_from_path("/old"), None);
    assert_eq!(comp.read_stream("/new").unwrap(), b"payload");
}

#[test]
fn test_boundary_sizes_round_trip() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/JustUnder", &patterned(4095, 1)).unwrap();
    comp.create_stream("/Exactly", &patterned(4096, 2)).unwrap();
    comp.create_stream("/JustOver", &patterned(4097, 3)).unwrap();
    let image = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.read_stream("/JustUnder").unwrap(), patterned(4095, 1));
    assert_eq!(comp.read_stream("/Exactly").unwrap(), patterned(4096, 2));
    assert_eq!(comp.read_stream("/JustOver").unwrap(), patterned(4097, 3));

    // The cutoff itself belongs to the big tier.
    let under = comp.open_stream("/JustUnder").unwrap().ranges().unwrap();
    assert_eq!(under[0].1, 64);
    let exact = comp.open_stream("/Exactly").unwrap().ranges().unwrap();
    assert_eq!(exact[0].1, 512);
}

fn check_sibling_tree(comp: &Storage<Cursor<Vec<u8>>>, parent: u32) {
    fn walk(
        comp: &Storage<Cursor<Vec<u8>>>,
        sid: u32,
        parent_red: bool,
        out: &mut Vec<u32>,
    ) -> usize {
        if sid == NOSTREAM {
            return 0;
        }
        let node = &comp.dirents()[sid as usize];
        let red = node.color == COLOR_RED;
        assert!(!(parent_red && red), "red node under a red parent");
        let left = walk(comp, node.left, red, out);
        out.push(sid);
        let right = walk(comp, node.right, red, out);
        assert_eq!(left, right, "uneven black height");
        left + usize::from(!red)
    }

    let mut in_order = Vec::new();
    walk(comp, comp.dirents()[parent as usize].child, false, &mut in_order);
    assert_eq!(in_order.len(), comp.children(parent).unwrap().len());
    for pair in in_order.windows(2) {
        let a = comp.dirents()[pair[0] as usize].name();
        let b = comp.dirents()[pair[1] as usize].name();
        assert_ne!(cmp_names(&a, &b), std::cmp::Ordering::Greater);
    }
}

#[test]
fn test_serialized_trees_are_red_black() {
    for count in [1usize, 2, 3, 4, 7, 10, 16] {
        let mut comp = Storage::in_memory().unwrap();
        comp.create_storage("/dir").unwrap();
        for i in 0..count {
            comp.create_stream(&format!("/dir/s{i:02}"), &patterned(40 + i, i as u8))
                .unwrap();
            comp.create_stream(&format!("/t{i:02}"), b"x").unwrap();
        }
        let image = comp.close().unwrap().into_inner();
        let comp = Storage::from_bytes(image).unwrap();
        check_sibling_tree(&comp, 0);
        let dir = comp.dirent_from_path("/dir").unwrap();
        check_sibling_tree(&comp, dir);
    }
}

#[test]
fn test_chain_integrity_after_repack() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/a", &patterned(700, 1)).unwrap();
    comp.create_stream("/b", &patterned(12_345, 2)).unwrap();
    comp.create_stream("/a", &patterned(130, 3)).unwrap();
    let image = comp.close().unwrap().into_inner();

    let comp = Storage::from_bytes(image).unwrap();
    comp.fat.validate().unwrap();
    comp.minifat.validate().unwrap();
    for dirent in comp.dirents() {
        if !dirent.is_stream() || dirent.is_empty() {
            continue;
        }
        let (chain, sector_size) = if dirent.len() < MINI_STREAM_CUTOFF as u64 {
            (comp.minifat.chain(dirent.first_sector()).unwrap(), 64u64)
        } else {
            (comp.fat.chain(dirent.first_sector()).unwrap(), 512u64)
        };
        let covered = chain.len() as u64 * sector_size;
        assert!(covered >= dirent.len());
        assert!(covered < dirent.len() + sector_size);
    }
    // The mini stream body is a whole number of mini sectors.
    assert_eq!(comp.root().len() % 64, 0);
}

#[test]
fn test_difat_chain_for_large_containers() {
    // Big enough that the FAT needs more pages than the header's 109
    // inline DIFAT slots can name.
    let data = patterned(8 * 1024 * 1024, 17);
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/blob", &data).unwrap();
    let image = comp.close().unwrap().into_inner();

    let mut comp = Storage::from_bytes(image).unwrap();
    assert!(comp.header().num_fat_sectors > 109);
    assert!(comp.header().num_difat_sectors >= 1);
    let read = comp.read_stream("/blob").unwrap();
    assert_eq!(read.len(), data.len());
    assert_eq!(read, data);
}

#[test]
fn test_mini_sectors_reused_after_delete() {
    let mut comp = Storage::in_memory().unwrap();
    comp.create_stream("/a", &patterned(128, 1)).unwrap();
    let image = comp.close().unwrap().into_inner();
    let first_len = image.len();
    let mut comp = Storage::from_bytes(image).unwrap();

    // Replace the stream with an equal-sized one; the repacked image
    // must not grow.
    comp.remove("/a").unwrap();
    comp.create_stream("/b", &patterned(128, 2)).unwrap();
    let image = comp.close().unwrap().into_inner();
    assert_eq!(image.len(), first_len);
}

#[test]
fn test_file_backed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.ole");

    let mut comp = Storage::create(&path).unwrap();
    comp.create_storage("/Workbook").unwrap();
    comp.create_stream("/Workbook/Sheet1", &patterned(2048, 5)).unwrap();
    comp.create_stream("/Summary", &patterned(20_000, 6)).unwrap();
    comp.close().unwrap();

    let mut comp = Storage::open_rw(&path).unwrap();
    assert_eq!(comp.read_stream("/Workbook/Sheet1").unwrap(), patterned(2048, 5));
    comp.create_stream("/Workbook/Sheet2", b"fresh").unwrap();
    comp.close().unwrap();

    let mut comp = Storage::open(&path).unwrap();
    assert_eq!(comp.read_stream("/Workbook/Sheet2").unwrap(), b"fresh");
    assert_eq!(comp.read_stream("/Summary").unwrap(), patterned(20_000, 6));
}

#[test]
fn test_truncate_mode_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.ole");
    assert!(Storage::open_file(&missing, OpenMode::Truncate).is_err());

    std::fs::write(&missing, b"anything").unwrap();
    let mut comp = Storage::open_file(&missing, OpenMode::Truncate).unwrap();
    comp.create_stream("/s", b"1").unwrap();
    comp.close().unwrap();
    let mut comp = Storage::open(&missing).unwrap();
    assert_eq!(comp.read_stream("/s").unwrap(), b"1");
}

#[test]
fn test_empty_container_minimal_size() {
    let comp = Storage::in_memory().unwrap();
    let image = comp.close().unwrap().into_inner();
    // Header, one FAT sector, one directory sector.
    assert_eq!(image.len(), 1536);

    let comp = Storage::from_bytes(image).unwrap();
    assert_eq!(comp.children(0).unwrap().len(), 0);
    assert_eq!(comp.root().len(), 0);
}
