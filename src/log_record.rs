//! Sensor log record encoding (component H): turns a sensor event into a
//! fixed-layout `{ tag, payload }` record and pushes it into the logging
//! [`RingBuffer`], optionally preceded by a `DateTime` record. Called from
//! ISR-adjacent sensor callbacks, so it never allocates and never fails loud
//! — a full ring buffer silently drops the record (§4.4.4).

use crate::ring::RingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogTag {
    DateTime = 0,
    Gps = 1,
    Pressure = 2,
    Axl = 3,
    Battery = 4,
    Saltwater = 5,
}

/// Largest single record: tag byte + payload (GPS is the biggest payload at
/// 9 bytes: lat `i32`, lon `i32`, fix quality `u8`).
pub const MAX_RECORD_SIZE: usize = 1 + 9;
/// A slot big enough for an optional `DateTime` prefix record plus one
/// sensor record, so the two stay contiguous within a single ring slot.
pub const LOG_SLOT_SIZE: usize = (1 + 4) + MAX_RECORD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpsFix {
    pub latitude_1e7_deg: i32,
    pub longitude_1e7_deg: i32,
    pub fix_quality: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxlSample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryStatus {
    pub percent: u8,
    pub millivolts: u16,
}

fn push<const SLOT_COUNT: usize>(
    ring: &mut RingBuffer<LOG_SLOT_SIZE, SLOT_COUNT>,
    timestamp_enabled: bool,
    now_unix: u32,
    tag: LogTag,
    payload: &[u8],
) {
    let slot = match ring.write_reserve() {
        Ok(s) => s,
        Err(_) => return, // buffer full: drop, non-fatal (§4.4.4)
    };

    let mut offset = 0;
    if timestamp_enabled {
        slot[offset] = LogTag::DateTime as u8;
        offset += 1;
        slot[offset..offset + 4].copy_from_slice(&now_unix.to_le_bytes());
        offset += 4;
    }
    slot[offset] = tag as u8;
    offset += 1;
    slot[offset..offset + payload.len()].copy_from_slice(payload);
    offset += payload.len();

    ring.write_commit(offset);
}

pub fn log_gps<const SLOT_COUNT: usize>(
    ring: &mut RingBuffer<LOG_SLOT_SIZE, SLOT_COUNT>,
    timestamp_enabled: bool,
    now_unix: u32,
    fix: GpsFix,
) {
    let mut payload = [0u8; 9];
    payload[0..4].copy_from_slice(&fix.latitude_1e7_deg.to_le_bytes());
    payload[4..8].copy_from_slice(&fix.longitude_1e7_deg.to_le_bytes());
    payload[8] = fix.fix_quality;
    push(ring, timestamp_enabled, now_unix, LogTag::Gps, &payload);
}

pub fn log_pressure<const SLOT_COUNT: usize>(
    ring: &mut RingBuffer<LOG_SLOT_SIZE, SLOT_COUNT>,
    timestamp_enabled: bool,
    now_unix: u32,
    pascals: u32,
) {
    push(ring, timestamp_enabled, now_unix, LogTag::Pressure, &pascals.to_le_bytes());
}

pub fn log_axl<const SLOT_COUNT: usize>(
    ring: &mut RingBuffer<LOG_SLOT_SIZE, SLOT_COUNT>,
    timestamp_enabled: bool,
    now_unix: u32,
    sample: AxlSample,
) {
    let mut payload = [0u8; 6];
    payload[0..2].copy_from_slice(&sample.x.to_le_bytes());
    payload[2..4].copy_from_slice(&sample.y.to_le_bytes());
    payload[4..6].copy_from_slice(&sample.z.to_le_bytes());
    push(ring, timestamp_enabled, now_unix, LogTag::Axl, &payload);
}

pub fn log_battery<const SLOT_COUNT: usize>(
    ring: &mut RingBuffer<LOG_SLOT_SIZE, SLOT_COUNT>,
    timestamp_enabled: bool,
    now_unix: u32,
    status: BatteryStatus,
) {
    let mut payload = [0u8; 3];
    payload[0] = status.percent;
    payload[1..3].copy_from_slice(&status.millivolts.to_le_bytes());
    push(ring, timestamp_enabled, now_unix, LogTag::Battery, &payload);
}

pub fn log_saltwater<const SLOT_COUNT: usize>(
    ring: &mut RingBuffer<LOG_SLOT_SIZE, SLOT_COUNT>,
    timestamp_enabled: bool,
    now_unix: u32,
    submerged: bool,
) {
    push(ring, timestamp_enabled, now_unix, LogTag::Saltwater, &[submerged as u8]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_without_timestamp_is_tag_then_payload() {
        let mut ring: RingBuffer<LOG_SLOT_SIZE, 2> = RingBuffer::new();
        log_saltwater(&mut ring, false, 0, true);
        let slot = ring.read_peek().unwrap();
        assert_eq!(slot, &[LogTag::Saltwater as u8, 1]);
    }

    #[test]
    fn record_with_timestamp_prefixes_datetime_contiguously() {
        let mut ring: RingBuffer<LOG_SLOT_SIZE, 2> = RingBuffer::new();
        log_pressure(&mut ring, true, 0x0102_0304, 101_325);
        let slot = ring.read_peek().unwrap();
        assert_eq!(slot[0], LogTag::DateTime as u8);
        assert_eq!(&slot[1..5], &0x0102_0304u32.to_le_bytes());
        assert_eq!(slot[5], LogTag::Pressure as u8);
        assert_eq!(&slot[6..10], &101_325u32.to_le_bytes());
    }

    #[test]
    fn full_ring_drops_the_record() {
        let mut ring: RingBuffer<LOG_SLOT_SIZE, 1> = RingBuffer::new();
        log_saltwater(&mut ring, false, 0, true);
        log_saltwater(&mut ring, false, 0, false); // dropped, ring has one slot
        let slot = ring.read_peek().unwrap();
        assert_eq!(slot, &[LogTag::Saltwater as u8, 1]); // still the first record
    }
}
