//! The bulk-transfer sub-state machine (§4.3.3): the engine is either
//! `Idle` or in one of these, each carrying its own per-command context as a
//! single tagged-union value rather than a live object.

use crate::config::schema::MAX_VALUE_SIZE;
use crate::fs::HandleId;

/// Largest a `tag || value` header-plus-value pair can be while mid-split
/// across a `CfgWriteNext` packet boundary: a `u16` tag plus the widest
/// schema value.
pub const CFG_WRITE_CARRY_CAP: usize = 2 + MAX_VALUE_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubState {
    Idle,
    CfgReadNext {
        cursor: usize,
    },
    CfgWriteNext {
        remaining: u32,
        carry: [u8; CFG_WRITE_CARRY_CAP],
        carry_len: usize,
    },
    CfgWriteError,
    GpsWriteNext {
        remaining: u32,
    },
    BleWriteNext {
        addr: u8,
        remaining: u32,
    },
    GpsReadNext {
        remaining: u32,
    },
    BleReadNext {
        addr: u8,
        remaining: u32,
    },
    LogReadNext {
        handle: HandleId,
        remaining: u32,
    },
    FwSendImageNext {
        handle: HandleId,
        file_id: u8,
        remaining: u32,
        crc: u32,
        expected_crc: u32,
    },
}

impl Default for SubState {
    fn default() -> Self {
        SubState::Idle
    }
}

impl SubState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SubState::Idle)
    }

    pub fn cfg_write_next(total_len: u32) -> Self {
        SubState::CfgWriteNext { remaining: total_len, carry: [0u8; CFG_WRITE_CARRY_CAP], carry_len: 0 }
    }
}
