//! The static configuration-tag schema: tag identifiers, their domains, and
//! fixed value sizes. A pure data table — considered out of scope as
//! *functionality* (the real descriptor table is device firmware data), but
//! a representative schema is kept here so `ConfigStore` and its tests have
//! something concrete to drive against.

pub type Tag = u16;

pub mod tags {
    use super::Tag;

    pub const LOGGING_ENABLE: Tag = 0x0001;
    pub const LOGGING_DATE_TIME_STAMP_ENABLE: Tag = 0x0002;

    pub const GPS_LOG_POSITION_ENABLE: Tag = 0x0010;
    pub const GPS_TRIGGER_MODE: Tag = 0x0011;
    pub const GPS_SCHEDULED_INTERVAL_S: Tag = 0x0012;
    pub const GPS_MAX_ACQUISITION_S: Tag = 0x0013;
    pub const GPS_NO_FIX_TIMEOUT_S: Tag = 0x0014;
    pub const GPS_LAST_KNOWN_POSITION: Tag = 0x0015;

    pub const PRESSURE_MODE: Tag = 0x0020;
    pub const PRESSURE_LOW_THRESHOLD: Tag = 0x0021;
    pub const PRESSURE_HIGH_THRESHOLD: Tag = 0x0022;

    pub const AXL_MODE: Tag = 0x0030;
    pub const AXL_HIGH_THRESHOLD: Tag = 0x0031;

    pub const TEMPERATURE_LOG_ENABLE: Tag = 0x0040;

    pub const BATTERY_LOW_THRESHOLD: Tag = 0x0050;

    pub const BLUETOOTH_ADVERTISING_INTERVAL_MS: Tag = 0x0060;
    pub const BLUETOOTH_CONNECTION_INTERVAL_MS: Tag = 0x0061;
    pub const BLUETOOTH_PHY: Tag = 0x0062;

    pub const RTC_CURRENT_DATE_TIME: Tag = 0x0070;
}

/// Periodic vs. threshold-triggered sampling, shared by pressure and axl.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SampleMode {
    Periodic = 0,
    Threshold = 1,
}

/// `gps.trigger_mode`: how GPS acquisitions are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GpsTriggerMode {
    SwitchTriggered = 0,
    Scheduled = 1,
    Hybrid = 2,
}

/// One schema row: tag identifier and the fixed size of its value in bytes.
pub struct SchemaEntry {
    pub tag: Tag,
    pub size: usize,
}

pub const SCHEMA: &[SchemaEntry] = &[
    SchemaEntry { tag: tags::LOGGING_ENABLE, size: 1 },
    SchemaEntry { tag: tags::LOGGING_DATE_TIME_STAMP_ENABLE, size: 1 },
    SchemaEntry { tag: tags::GPS_LOG_POSITION_ENABLE, size: 1 },
    SchemaEntry { tag: tags::GPS_TRIGGER_MODE, size: 1 },
    SchemaEntry { tag: tags::GPS_SCHEDULED_INTERVAL_S, size: 4 },
    SchemaEntry { tag: tags::GPS_MAX_ACQUISITION_S, size: 4 },
    SchemaEntry { tag: tags::GPS_NO_FIX_TIMEOUT_S, size: 4 },
    SchemaEntry { tag: tags::GPS_LAST_KNOWN_POSITION, size: 8 },
    SchemaEntry { tag: tags::PRESSURE_MODE, size: 1 },
    SchemaEntry { tag: tags::PRESSURE_LOW_THRESHOLD, size: 4 },
    SchemaEntry { tag: tags::PRESSURE_HIGH_THRESHOLD, size: 4 },
    SchemaEntry { tag: tags::AXL_MODE, size: 1 },
    SchemaEntry { tag: tags::AXL_HIGH_THRESHOLD, size: 4 },
    SchemaEntry { tag: tags::TEMPERATURE_LOG_ENABLE, size: 1 },
    SchemaEntry { tag: tags::BATTERY_LOW_THRESHOLD, size: 4 },
    SchemaEntry { tag: tags::BLUETOOTH_ADVERTISING_INTERVAL_MS, size: 4 },
    SchemaEntry { tag: tags::BLUETOOTH_CONNECTION_INTERVAL_MS, size: 4 },
    SchemaEntry { tag: tags::BLUETOOTH_PHY, size: 1 },
    SchemaEntry { tag: tags::RTC_CURRENT_DATE_TIME, size: 8 },
];

pub const MAX_TAGS: usize = SCHEMA.len();
pub const MAX_VALUE_SIZE: usize = 8;

pub fn schema_index(tag: Tag) -> Option<usize> {
    SCHEMA.iter().position(|e| e.tag == tag)
}

/// Tags the schema's conditional implications (§6.3) always treat as
/// optional, regardless of any other tag's value.
pub fn always_optional(tag: Tag) -> bool {
    matches!(
        tag,
        tags::GPS_LAST_KNOWN_POSITION
            | tags::BATTERY_LOW_THRESHOLD
            | tags::BLUETOOTH_ADVERTISING_INTERVAL_MS
            | tags::BLUETOOTH_CONNECTION_INTERVAL_MS
            | tags::BLUETOOTH_PHY
    )
}
