//! The configuration store (component D): a flat `tag -> value` registry
//! backed by a static schema, persisted as a single blob to file id
//! [`file_ids::CONF`].

pub mod schema;

use crate::file_ids;
use crate::fs::{FileSystem, FsError, OpenMode};
use crate::storage::Storage;
use schema::{always_optional, schema_index, tags, GpsTriggerMode, SampleMode, Tag, MAX_TAGS, MAX_VALUE_SIZE, SCHEMA};

pub const FORMAT_VERSION: u8 = 1;

pub const fn blob_size() -> usize {
    let mut total = 1usize; // format version byte
    let mut i = 0;
    while i < SCHEMA.len() {
        total += 1 + SCHEMA[i].size; // set flag + value
        i += 1;
    }
    total
}

pub const BLOB_SIZE: usize = blob_size();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    InvalidTag,
    NotSet,
    WrongSize,
    FileVersionMismatch,
    Fs(FsError),
}

impl From<FsError> for ConfigError {
    fn from(e: FsError) -> Self {
        ConfigError::Fs(e)
    }
}

pub struct ConfigStore {
    values: [[u8; MAX_VALUE_SIZE]; MAX_TAGS],
    set_flags: [bool; MAX_TAGS],
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub const fn new() -> Self {
        Self {
            values: [[0u8; MAX_VALUE_SIZE]; MAX_TAGS],
            set_flags: [false; MAX_TAGS],
        }
    }

    /// Clears every tag back to "never written". Used by tests for
    /// isolation between cases, mirroring the teacher crate's call to reset
    /// shared state rather than re-link it per test.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn get(&self, tag: Tag) -> Result<&[u8], ConfigError> {
        let idx = schema_index(tag).ok_or(ConfigError::InvalidTag)?;
        if !self.set_flags[idx] {
            return Err(ConfigError::NotSet);
        }
        Ok(&self.values[idx][..SCHEMA[idx].size])
    }

    pub fn set(&mut self, tag: Tag, bytes: &[u8]) -> Result<(), ConfigError> {
        let idx = schema_index(tag).ok_or(ConfigError::InvalidTag)?;
        if bytes.len() != SCHEMA[idx].size {
            return Err(ConfigError::WrongSize);
        }
        self.values[idx][..bytes.len()].copy_from_slice(bytes);
        self.set_flags[idx] = true;
        Ok(())
    }

    pub fn unset(&mut self, tag: Tag) -> Result<(), ConfigError> {
        let idx = schema_index(tag).ok_or(ConfigError::InvalidTag)?;
        self.set_flags[idx] = false;
        Ok(())
    }

    pub fn is_set(&self, tag: Tag) -> bool {
        schema_index(tag).map(|idx| self.set_flags[idx]).unwrap_or(false)
    }

    /// Enumerates every *known* tag, set or not. Consumers check `is_set`
    /// separately; `cursor` starts at `0` and is advanced in place.
    pub fn iterate(&self, cursor: &mut usize) -> Option<Tag> {
        if *cursor >= MAX_TAGS {
            return None;
        }
        let tag = SCHEMA[*cursor].tag;
        *cursor += 1;
        Some(tag)
    }

    /// True iff every tag the current configuration makes relevant has been
    /// explicitly set (§4.2, §6.3).
    pub fn configuration_complete(&self) -> bool {
        SCHEMA
            .iter()
            .enumerate()
            .filter(|(_, entry)| !always_optional(entry.tag))
            .filter(|(_, entry)| !self.tag_is_irrelevant(entry.tag))
            .all(|(idx, _)| self.set_flags[idx])
    }

    fn tag_is_irrelevant(&self, tag: Tag) -> bool {
        use tags::*;

        let depends_on_logging = matches!(
            tag,
            LOGGING_DATE_TIME_STAMP_ENABLE
                | GPS_LOG_POSITION_ENABLE
                | GPS_TRIGGER_MODE
                | GPS_SCHEDULED_INTERVAL_S
                | GPS_MAX_ACQUISITION_S
                | GPS_NO_FIX_TIMEOUT_S
                | PRESSURE_MODE
                | PRESSURE_LOW_THRESHOLD
                | PRESSURE_HIGH_THRESHOLD
                | AXL_MODE
                | AXL_HIGH_THRESHOLD
                | TEMPERATURE_LOG_ENABLE
        );
        if depends_on_logging && !self.bool_tag(LOGGING_ENABLE) {
            return true;
        }

        let depends_on_gps_logging =
            matches!(tag, GPS_TRIGGER_MODE | GPS_SCHEDULED_INTERVAL_S | GPS_MAX_ACQUISITION_S | GPS_NO_FIX_TIMEOUT_S);
        if depends_on_gps_logging && !self.bool_tag(GPS_LOG_POSITION_ENABLE) {
            return true;
        }

        let depends_on_scheduled_gps =
            matches!(tag, GPS_SCHEDULED_INTERVAL_S | GPS_MAX_ACQUISITION_S | GPS_NO_FIX_TIMEOUT_S);
        if depends_on_scheduled_gps && self.gps_trigger_mode() == Some(GpsTriggerMode::SwitchTriggered) {
            return true;
        }

        if matches!(tag, PRESSURE_LOW_THRESHOLD | PRESSURE_HIGH_THRESHOLD)
            && self.sample_mode(PRESSURE_MODE) == Some(SampleMode::Periodic)
        {
            return true;
        }

        if tag == AXL_HIGH_THRESHOLD && self.sample_mode(AXL_MODE) == Some(SampleMode::Periodic) {
            return true;
        }

        false
    }

    fn bool_tag(&self, tag: Tag) -> bool {
        self.get(tag).map(|v| v[0] != 0).unwrap_or(false)
    }

    pub fn gps_trigger_mode(&self) -> Option<GpsTriggerMode> {
        self.get(tags::GPS_TRIGGER_MODE).ok().map(|v| match v[0] {
            0 => GpsTriggerMode::SwitchTriggered,
            1 => GpsTriggerMode::Scheduled,
            _ => GpsTriggerMode::Hybrid,
        })
    }

    pub fn sample_mode(&self, tag: Tag) -> Option<SampleMode> {
        self.get(tag)
            .ok()
            .map(|v| if v[0] == 0 { SampleMode::Periodic } else { SampleMode::Threshold })
    }

    fn encode(&self, buf: &mut [u8; BLOB_SIZE]) {
        buf[0] = FORMAT_VERSION;
        let mut offset = 1;
        for (idx, entry) in SCHEMA.iter().enumerate() {
            buf[offset] = self.set_flags[idx] as u8;
            offset += 1;
            buf[offset..offset + entry.size].copy_from_slice(&self.values[idx][..entry.size]);
            offset += entry.size;
        }
    }

    fn decode(buf: &[u8; BLOB_SIZE]) -> Result<Self, ConfigError> {
        if buf[0] != FORMAT_VERSION {
            return Err(ConfigError::FileVersionMismatch);
        }
        let mut store = Self::new();
        let mut offset = 1;
        for (idx, entry) in SCHEMA.iter().enumerate() {
            store.set_flags[idx] = buf[offset] != 0;
            offset += 1;
            store.values[idx][..entry.size].copy_from_slice(&buf[offset..offset + entry.size]);
            offset += entry.size;
        }
        Ok(store)
    }

    /// Persists the whole store as a single blob to [`file_ids::CONF`],
    /// replacing any previous save outright.
    pub fn save<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &self,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        device: &mut S,
    ) -> Result<(), ConfigError>
    where
        S: Storage,
    {
        let mut buf = [0u8; BLOB_SIZE];
        self.encode(&mut buf);

        match fs.delete(device, file_ids::CONF) {
            Ok(()) | Err(FsError::FileNotFound) => {}
            Err(e) => return Err(e.into()),
        }
        let h = fs.open(device, file_ids::CONF, OpenMode::Create, 0)?;
        fs.write(device, h, &buf)?;
        fs.close(device, h)?;
        Ok(())
    }

    pub fn restore<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        device: &mut S,
    ) -> Result<Self, ConfigError>
    where
        S: Storage,
    {
        let h = fs.open(device, file_ids::CONF, OpenMode::ReadOnly, 0)?;
        let mut buf = [0u8; BLOB_SIZE];
        let mut total = 0;
        loop {
            if total == buf.len() {
                break;
            }
            match fs.read(device, h, &mut buf[total..]) {
                Ok(n) => total += n,
                Err(FsError::EndOfFile) => break,
                Err(e) => {
                    let _ = fs.close(device, h);
                    return Err(e.into());
                }
            }
        }
        fs.close(device, h)?;

        if total != buf.len() {
            return Err(ConfigError::FileVersionMismatch);
        }
        Self::decode(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FileSystem;
    use crate::storage::mock::MemoryFlash;
    use typenum::consts::U256;

    type Flash = MemoryFlash<U256>;
    type Fs = FileSystem<Flash, 8, 4, 4>;

    #[test]
    fn get_unset_tag_errors_then_succeeds_after_set() {
        let mut store = ConfigStore::new();
        assert_eq!(store.get(tags::LOGGING_ENABLE), Err(ConfigError::NotSet));
        store.set(tags::LOGGING_ENABLE, &[1]).unwrap();
        assert_eq!(store.get(tags::LOGGING_ENABLE), Ok(&[1u8][..]));
    }

    #[test]
    fn wrong_size_is_rejected() {
        let mut store = ConfigStore::new();
        assert_eq!(store.set(tags::LOGGING_ENABLE, &[1, 2]), Err(ConfigError::WrongSize));
    }

    #[test]
    fn complete_respects_conditional_implications() {
        let mut store = ConfigStore::new();
        store.set(tags::LOGGING_ENABLE, &[0]).unwrap();
        // logging disabled: every logging-dependent tag becomes irrelevant.
        assert!(store.configuration_complete());

        store.set(tags::LOGGING_ENABLE, &[1]).unwrap();
        assert!(!store.configuration_complete());

        store.set(tags::LOGGING_DATE_TIME_STAMP_ENABLE, &[0]).unwrap();
        store.set(tags::GPS_LOG_POSITION_ENABLE, &[0]).unwrap();
        store.set(tags::PRESSURE_MODE, &[0]).unwrap(); // Periodic: thresholds irrelevant
        store.set(tags::AXL_MODE, &[0]).unwrap();
        store.set(tags::TEMPERATURE_LOG_ENABLE, &[0]).unwrap();
        assert!(store.configuration_complete());
    }

    #[test]
    fn save_restore_round_trips_and_detects_version_mismatch() {
        let mut flash = Flash::new(8);
        let mut fs = Fs::mount(&mut flash).unwrap();
        fs.format(&mut flash).unwrap();

        let mut store = ConfigStore::new();
        store.set(tags::LOGGING_ENABLE, &[1]).unwrap();
        store.set(tags::BATTERY_LOW_THRESHOLD, &[1, 2, 3, 4]).unwrap();
        store.save(&mut fs, &mut flash).unwrap();

        let restored = ConfigStore::restore(&mut fs, &mut flash).unwrap();
        assert_eq!(restored.get(tags::LOGGING_ENABLE), Ok(&[1u8][..]));
        assert_eq!(restored.get(tags::BATTERY_LOW_THRESHOLD), Ok(&[1u8, 2, 3, 4][..]));
    }
}
