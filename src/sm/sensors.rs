//! Pressure and accelerometer sampling arming (§4.4.2). Unlike GPS, neither
//! sensor has a driver trait this crate calls into — arming is a one-shot
//! decision computed from configuration on `Operational` entry and handed to
//! whatever tick/ISR layer the integrating firmware wires up; the decision
//! itself is what this module models and tests.

use crate::config::schema::{tags, SampleMode};
use crate::config::ConfigStore;

/// Arming decision for a threshold-driven sensor: periodic sampling has no
/// thresholds to carry (§6.3: "irrelevant" tags), threshold sampling does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorArming {
    Periodic,
    Threshold { low: u32, high: u32 },
    /// No sample mode configured; sampling stays disabled.
    Disarmed,
}

impl SensorArming {
    pub const fn disarmed() -> Self {
        SensorArming::Disarmed
    }

    pub fn is_armed(&self) -> bool {
        !matches!(self, SensorArming::Disarmed)
    }

    /// Pressure is armed from `PRESSURE_MODE`/`PRESSURE_LOW_THRESHOLD`/
    /// `PRESSURE_HIGH_THRESHOLD`; the low threshold has no accelerometer
    /// counterpart (axl is single-threshold, §6.3).
    pub fn arm_pressure(config: &ConfigStore) -> Self {
        match config.sample_mode(tags::PRESSURE_MODE) {
            Some(SampleMode::Periodic) => SensorArming::Periodic,
            Some(SampleMode::Threshold) => SensorArming::Threshold {
                low: read_u32(config, tags::PRESSURE_LOW_THRESHOLD),
                high: read_u32(config, tags::PRESSURE_HIGH_THRESHOLD),
            },
            None => SensorArming::Disarmed,
        }
    }

    /// Accelerometer is armed from `AXL_MODE`/`AXL_HIGH_THRESHOLD` only; the
    /// low field is always `0` since the schema has no axl low threshold.
    pub fn arm_axl(config: &ConfigStore) -> Self {
        match config.sample_mode(tags::AXL_MODE) {
            Some(SampleMode::Periodic) => SensorArming::Periodic,
            Some(SampleMode::Threshold) => {
                SensorArming::Threshold { low: 0, high: read_u32(config, tags::AXL_HIGH_THRESHOLD) }
            }
            None => SensorArming::Disarmed,
        }
    }
}

fn read_u32(config: &ConfigStore, tag: crate::config::schema::Tag) -> u32 {
    match config.get(tag) {
        Ok(bytes) if bytes.len() == 4 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        _ => 0,
    }
}
