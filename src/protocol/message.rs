//! Packet header, command taxonomy, and per-command wire structs (§4.3.2,
//! §6.2). All multi-byte fields are little-endian; nothing here is
//! `#[repr(packed)]` type-punned the way the original C driver reads a
//! receive buffer — every struct parses its fields explicitly off a byte
//! slice, the portable equivalent named in the redesign notes.

use core::convert::TryFrom;

pub const SYNCWORD: u32 = 0x7E7E_7E7E;
/// Firmware version reported in `StatusResp`; owned by the integrating
/// firmware image in a real build, a fixed constant here.
pub const FW_VERSION: u32 = 0x0001_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    CfgReadReq = 0x01,
    CfgReadAllReq = 0x02,
    CfgWriteReq = 0x03,
    CfgEraseReq = 0x04,
    CfgEraseAllReq = 0x05,
    CfgSaveReq = 0x06,
    CfgRestoreReq = 0x07,
    CfgProtectReq = 0x08,
    CfgUnprotectReq = 0x09,
    StatusReq = 0x10,
    BatteryStatusReq = 0x11,
    ResetReq = 0x12,
    LogCreateReq = 0x20,
    LogEraseReq = 0x21,
    LogReadReq = 0x22,
    GpsConfigReq = 0x30,
    GpsWriteReq = 0x31,
    GpsReadReq = 0x32,
    BleConfigReq = 0x40,
    BleWriteReq = 0x41,
    BleReadReq = 0x42,
    FwSendImageReq = 0x50,
    FwApplyImageReq = 0x51,
}

impl TryFrom<u8> for Command {
    type Error = ();

    fn try_from(b: u8) -> Result<Self, ()> {
        use Command::*;
        Ok(match b {
            0x01 => CfgReadReq,
            0x02 => CfgReadAllReq,
            0x03 => CfgWriteReq,
            0x04 => CfgEraseReq,
            0x05 => CfgEraseAllReq,
            0x06 => CfgSaveReq,
            0x07 => CfgRestoreReq,
            0x08 => CfgProtectReq,
            0x09 => CfgUnprotectReq,
            0x10 => StatusReq,
            0x11 => BatteryStatusReq,
            0x12 => ResetReq,
            0x20 => LogCreateReq,
            0x21 => LogEraseReq,
            0x22 => LogReadReq,
            0x30 => GpsConfigReq,
            0x31 => GpsWriteReq,
            0x32 => GpsReadReq,
            0x40 => BleConfigReq,
            0x41 => BleWriteReq,
            0x42 => BleReadReq,
            0x50 => FwSendImageReq,
            0x51 => FwApplyImageReq,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sync: u32,
    pub cmd: u8,
}

impl Header {
    pub const SIZE: usize = 5;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        let sync = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        Some(Self { sync, cmd: buf[4] })
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.sync.to_le_bytes());
        buf[4] = self.cmd;
    }

    pub fn is_valid(&self) -> bool {
        self.sync == SYNCWORD
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusResp {
    pub error: u8,
    pub stm_fw: u32,
    pub ble_fw: u32,
    pub cfg_fmt: u8,
}

impl StatusResp {
    pub const SIZE: usize = 1 + 4 + 4 + 1;

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.error;
        buf[1..5].copy_from_slice(&self.stm_fw.to_le_bytes());
        buf[5..9].copy_from_slice(&self.ble_fw.to_le_bytes());
        buf[9] = self.cfg_fmt;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgReadReq {
    pub tag: u16,
}

impl CfgReadReq {
    pub const SIZE: usize = 2;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { tag: u16::from_le_bytes([buf[0], buf[1]]) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CfgEraseReq {
    pub tag: u16,
}

impl CfgEraseReq {
    pub const SIZE: usize = 2;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { tag: u16::from_le_bytes([buf[0], buf[1]]) })
    }
}

/// Announces a bulk upload/download of `len` bytes; used by `CfgWriteReq`,
/// `GpsWriteReq`, `GpsReadReq`, `BleReadNext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LenReq {
    pub len: u32,
}

impl LenReq {
    pub const SIZE: usize = 4;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { len: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BleLenReq {
    pub addr: u8,
    pub len: u32,
}

impl BleLenReq {
    pub const SIZE: usize = 1 + 4;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { addr: buf[0], len: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCreateReq {
    pub circular: bool,
    pub sync_enable: bool,
}

impl LogCreateReq {
    pub const SIZE: usize = 2;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { circular: buf[0] != 0, sync_enable: buf[1] != 0 })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogReadReq {
    pub start_offset: u32,
    pub len: u32,
}

impl LogReadReq {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            start_offset: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            len: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogReadResp {
    pub error: u8,
    pub len: u32,
}

impl LogReadResp {
    pub const SIZE: usize = 1 + 4;

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.error;
        buf[1..5].copy_from_slice(&self.len.to_le_bytes());
    }
}

/// Enables or disables a bridge (`GpsConfigReq`/`BleConfigReq`); bridge
/// transfers are rejected with `BridgingDisabled` while off (§4.4, original
/// `syshal_gps_bridging`/`syshal_ble_bridging` flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfigReq {
    pub enable: bool,
}

impl BridgeConfigReq {
    pub const SIZE: usize = 1;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { enable: buf[0] != 0 })
    }
}

/// `FwApplyImageReq(kind)`: `kind` follows the same 0=STM32/1=BLE convention
/// as `FwSendImageReq`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwApplyImageReq {
    pub kind: u8,
}

impl FwApplyImageReq {
    pub const SIZE: usize = 1;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self { kind: buf[0] })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwSendImageReq {
    pub kind: u8,
    pub len: u32,
    pub crc32: u32,
}

impl FwSendImageReq {
    pub const SIZE: usize = 1 + 4 + 4;

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            len: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]),
            crc32: u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }
}

/// The generic acknowledgement reply used for every request above (`CfgErase`,
/// `CfgSave`, `CfgRestore`, `CfgProtect`, `CfgUnprotect`, `Reset`, `LogCreate`,
/// `LogErase`, `GpsConfig`, `BleConfig`, `FwSendImageComplete`,
/// `FwApplyImageComplete`) whether or not the request itself carries a body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub error: u8,
}

impl Ack {
    pub const SIZE: usize = 1;

    pub fn encode(&self, buf: &mut [u8]) {
        buf[0] = self.error;
    }
}
