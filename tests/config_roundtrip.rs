//! §8.2 configuration store round-trip properties. Requires
//! `--no-default-features` (see `fs_invariants.rs`).

use trackerfw::config::schema::tags;
use trackerfw::config::ConfigStore;
use trackerfw::fs::FileSystem;
use trackerfw::storage::mock::MemoryFlash;
use typenum::consts::U256;

type Flash = MemoryFlash<U256>;
type Fs = FileSystem<Flash, 8, 4, 4>;

fn fresh() -> (Fs, Flash) {
    let _ = env_logger::try_init();
    let mut flash = Flash::new(8);
    let mut fs = Fs::mount(&mut flash).unwrap();
    fs.format(&mut flash).unwrap();
    (fs, flash)
}

/// §8.2.10 — every tag set before a save is readable with the same value
/// after a simulated power cycle (drop and remount).
#[test]
fn every_set_tag_survives_a_power_cycle() {
    let (mut fs, mut flash) = fresh();

    let mut store = ConfigStore::new();
    store.set(tags::LOGGING_ENABLE, &[1]).unwrap();
    store.set(tags::GPS_TRIGGER_MODE, &[2]).unwrap();
    store.set(tags::GPS_SCHEDULED_INTERVAL_S, &300u32.to_le_bytes()).unwrap();
    store.set(tags::BATTERY_LOW_THRESHOLD, &3_300u32.to_le_bytes()).unwrap();
    store.save(&mut fs, &mut flash).unwrap();
    drop(store);
    drop(fs);

    let mut fs = Fs::mount(&mut flash).unwrap();
    let restored = ConfigStore::restore(&mut fs, &mut flash).unwrap();
    assert_eq!(restored.get(tags::LOGGING_ENABLE), Ok(&[1u8][..]));
    assert_eq!(restored.get(tags::GPS_TRIGGER_MODE), Ok(&[2u8][..]));
    assert_eq!(restored.get(tags::GPS_SCHEDULED_INTERVAL_S), Ok(&300u32.to_le_bytes()[..]));
    assert_eq!(restored.get(tags::BATTERY_LOW_THRESHOLD), Ok(&3_300u32.to_le_bytes()[..]));
}

/// §8.2.11 — a schema-version bump is detected on restore rather than
/// silently misinterpreted.
#[test]
fn version_mismatch_is_detected_on_restore() {
    use trackerfw::fs::OpenMode;

    let (mut fs, mut flash) = fresh();
    // Write a blob of the right length but a format-version byte that will
    // never match `config::FORMAT_VERSION`.
    let blob = vec![0xFFu8; trackerfw::config::BLOB_SIZE];
    let h = fs.open(&mut flash, trackerfw::file_ids::CONF, OpenMode::Create, 0).unwrap();
    fs.write(&mut flash, h, &blob).unwrap();
    fs.close(&mut flash, h).unwrap();

    assert!(ConfigStore::restore(&mut fs, &mut flash).is_err());
}

/// A saved store, re-saved with a changed tag, reflects only the change.
#[test]
fn resave_overwrites_rather_than_merges() {
    let (mut fs, mut flash) = fresh();

    let mut store = ConfigStore::new();
    store.set(tags::LOGGING_ENABLE, &[1]).unwrap();
    store.save(&mut fs, &mut flash).unwrap();

    let mut store = ConfigStore::restore(&mut fs, &mut flash).unwrap();
    store.set(tags::LOGGING_ENABLE, &[0]).unwrap();
    store.save(&mut fs, &mut flash).unwrap();

    let restored = ConfigStore::restore(&mut fs, &mut flash).unwrap();
    assert_eq!(restored.get(tags::LOGGING_ENABLE), Ok(&[0u8][..]));
}
