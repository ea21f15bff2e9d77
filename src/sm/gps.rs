//! The secondary GPS acquisition state machine (§4.4.5): `Asleep`,
//! `Acquiring`, `Fixed`. Driven by timer ticks and fix events from the GPS
//! driver; consulted (not commanded) by the protocol engine's bridge path so
//! a host-initiated `GpsWrite`/`GpsRead` session doesn't collide with
//! autonomous scheduling.

use crate::config::schema::{tags, GpsTriggerMode};
use crate::config::ConfigStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsState {
    Asleep,
    Acquiring { elapsed_s: u32, max_acquisition_s: u32, no_fix_timeout_s: u32 },
    Fixed,
}

impl Default for GpsState {
    fn default() -> Self {
        GpsState::Asleep
    }
}

impl GpsState {
    pub const fn new() -> Self {
        GpsState::Asleep
    }

    pub fn is_asleep(&self) -> bool {
        matches!(self, GpsState::Asleep)
    }

    pub fn sleep(&mut self) {
        *self = GpsState::Asleep;
    }

    /// Starts an acquisition. `0` in either timer means "no bound" (§4.4.2).
    pub fn wake(&mut self, max_acquisition_s: u32, no_fix_timeout_s: u32) {
        *self = GpsState::Acquiring { elapsed_s: 0, max_acquisition_s, no_fix_timeout_s };
    }

    pub fn on_fix(&mut self) {
        if matches!(self, GpsState::Acquiring { .. }) {
            *self = GpsState::Fixed;
        }
    }

    /// Called once a second by the main loop. Returns `true` if an ongoing
    /// acquisition just timed out (either bound reached) and was abandoned.
    pub fn tick_one_second(&mut self) -> bool {
        if let GpsState::Acquiring { elapsed_s, max_acquisition_s, no_fix_timeout_s } = self {
            *elapsed_s += 1;
            let maxed_out = *max_acquisition_s != 0 && *elapsed_s >= *max_acquisition_s;
            let no_fix = *no_fix_timeout_s != 0 && *elapsed_s >= *no_fix_timeout_s;
            if maxed_out || no_fix {
                *self = GpsState::Asleep;
                return true;
            }
        }
        false
    }

    /// Decides whether GPS should be armed on `Operational` entry, from the
    /// configured trigger mode and whether the device is currently above or
    /// below water (§4.4.2). A `Scheduled` interval of `0` means "always
    /// on", which this maps directly to waking immediately.
    pub fn arm_from_config(&mut self, config: &ConfigStore, above_water: bool) {
        let mode = config.gps_trigger_mode().unwrap_or(GpsTriggerMode::SwitchTriggered);
        let max_acquisition_s = read_u32(config, tags::GPS_MAX_ACQUISITION_S);
        let no_fix_timeout_s = read_u32(config, tags::GPS_NO_FIX_TIMEOUT_S);
        let scheduled_interval_s = read_u32(config, tags::GPS_SCHEDULED_INTERVAL_S);

        let should_wake = match mode {
            GpsTriggerMode::SwitchTriggered => !above_water,
            GpsTriggerMode::Scheduled => true,
            GpsTriggerMode::Hybrid => !above_water || scheduled_interval_s == 0,
        };

        if should_wake {
            self.wake(max_acquisition_s, no_fix_timeout_s);
        } else {
            self.sleep();
        }
    }
}

fn read_u32(config: &ConfigStore, tag: crate::config::schema::Tag) -> u32 {
    match config.get(tag) {
        Ok(bytes) if bytes.len() == 4 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_acquisition_timeout_returns_to_asleep() {
        let mut gps = GpsState::new();
        gps.wake(3, 0);
        assert!(!gps.tick_one_second());
        assert!(!gps.tick_one_second());
        assert!(gps.tick_one_second());
        assert!(gps.is_asleep());
    }

    #[test]
    fn zero_bound_never_times_out() {
        let mut gps = GpsState::new();
        gps.wake(0, 0);
        for _ in 0..1000 {
            assert!(!gps.tick_one_second());
        }
    }

    #[test]
    fn fix_moves_out_of_acquiring() {
        let mut gps = GpsState::new();
        gps.wake(100, 100);
        gps.on_fix();
        assert_eq!(gps, GpsState::Fixed);
    }
}
