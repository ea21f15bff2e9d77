//! The protocol engine (component F): framing, command dispatch, bulk
//! transfer sub-states, and the sole inactivity timeout that recovers a
//! stalled session (§4.3).

pub mod error;
pub mod message;
pub mod substate;

pub use error::{EngineException, ProtocolError};
pub use message::Command;
pub use substate::SubState;

use core::convert::TryFrom;

use crate::config::schema::{schema_index, SCHEMA};
use crate::config::ConfigStore;
use crate::file_ids;
use crate::fs::{FileSystem, FsError, OpenMode};
use crate::ring::RingBuffer;
use crate::storage::Storage;
use crate::transport::{Transport, TRANSPORT_PACKET_SIZE};
use message::*;

/// Bulk transfers with no inbound/outbound packet for this long force the
/// engine back to `Idle` (§4.3.4).
pub const INACTIVITY_TIMEOUT_MS: u32 = 2_000;

/// A device the host can bridge directly to through `GpsWrite`/`GpsRead`
/// (§9.1: the language-neutral equivalent of the original's weak-linked
/// driver callbacks is a capability passed in at init).
pub trait GpsBridge {
    type Err: core::fmt::Debug;
    fn send(&mut self, bytes: &[u8]) -> Result<(), Self::Err>;
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Self::Err>;
}

/// Same idea for the BLE device, which additionally prepends a one-byte SPI
/// register address to every bridged write (§4.3.3) and reports its own
/// firmware version for `StatusResp`.
pub trait BleBridge {
    type Err: core::fmt::Debug;
    fn send(&mut self, addr: u8, bytes: &[u8]) -> Result<(), Self::Err>;
    fn recv(&mut self, addr: u8, buf: &mut [u8]) -> Result<usize, Self::Err>;
    fn firmware_version(&self) -> u32;
}

/// The SPI register address `FwApplyImageReq(kind=1)` uses to stream the BLE
/// firmware image into [`BleBridge::send`], distinct from the bridge's own
/// passthrough address space.
pub const BLE_FW_UPDATE_ADDR: u8 = 0xFF;

/// The STM32 flash-programming capability supplied by the integrating
/// firmware (§4.3.6): erases and rewrites the main application from the
/// image file chain this crate streams to it one chunk at a time, then
/// resets the MCU. Must run with interrupts effectively quiesced and the
/// driver itself resident in RAM — a linker concern of the implementor, not
/// enforced here. Never implemented by this crate.
pub trait FirmwareWriter {
    type Err: core::fmt::Debug;

    /// Called once per chunk, in file order. The first call may erase the
    /// target flash region.
    fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), Self::Err>;

    /// Called once every chunk has been written. On success the driver
    /// resets the MCU and this call never returns to the caller in a real
    /// build; the `Result` return exists for the host-side test double.
    fn finish(&mut self) -> Result<(), Self::Err>;
}

pub struct ProtocolEngine {
    rx: RingBuffer<TRANSPORT_PACKET_SIZE, 1>,
    tx: RingBuffer<TRANSPORT_PACKET_SIZE, 2>,
    substate: SubState,
    last_activity_ms: u32,
    gps_bridging_enabled: bool,
    ble_bridging_enabled: bool,
}

impl Default for ProtocolEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolEngine {
    pub const fn new() -> Self {
        Self {
            rx: RingBuffer::new(),
            tx: RingBuffer::new(),
            substate: SubState::Idle,
            last_activity_ms: 0,
            gps_bridging_enabled: false,
            ble_bridging_enabled: false,
        }
    }

    pub fn reset(&mut self) {
        self.rx.reset();
        self.tx.reset();
        self.substate = SubState::Idle;
    }

    pub fn is_idle(&self) -> bool {
        self.substate.is_idle()
    }

    fn respond(&mut self, cmd: Command, payload: &[u8]) -> Result<(), EngineException> {
        let slot = self.tx.write_reserve().map_err(|_| EngineException::TxBufferFull)?;
        let header = Header { sync: SYNCWORD, cmd: cmd as u8 };
        header.encode(slot);
        slot[Header::SIZE..Header::SIZE + payload.len()].copy_from_slice(payload);
        self.tx.write_commit(Header::SIZE + payload.len());
        Ok(())
    }

    fn ack(&mut self, cmd: Command, error: ProtocolError) -> Result<(), EngineException> {
        let ack = Ack { error: error as u8 };
        let mut buf = [0u8; Ack::SIZE];
        ack.encode(&mut buf);
        self.respond(cmd, &buf)
    }

    /// Drains every queued TX slot into the transport. Called once per
    /// `iterate`, after any new work this iteration produced.
    fn drain_tx(&mut self, transport: &mut impl Transport) {
        while let Some(packet) = self.tx.read_peek() {
            if transport.send(packet).is_err() {
                break; // transport not ready; try again next iteration
            }
            self.tx.read_advance();
        }
    }

    /// Force-resets to `Idle` if nothing has moved for `INACTIVITY_TIMEOUT_MS`
    /// (§4.3.4). Closes any file handle the abandoned sub-state held open.
    fn check_inactivity<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        now_ms: u32,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    ) where
        S: Storage,
    {
        if self.substate.is_idle() {
            return;
        }
        if now_ms.wrapping_sub(self.last_activity_ms) <= INACTIVITY_TIMEOUT_MS {
            return;
        }
        log::warn!("MessageTimeout");
        self.abandon_substate(device, fs);
    }

    fn abandon_substate<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    ) where
        S: Storage,
    {
        match core::mem::replace(&mut self.substate, SubState::Idle) {
            SubState::LogReadNext { handle, .. } | SubState::FwSendImageNext { handle, .. } => {
                let _ = fs.close(device, handle);
            }
            _ => {}
        }
        self.rx.reset();
    }

    /// Runs one iteration: drains a pending RX packet (if any) into dispatch
    /// or the active sub-state, advances any outbound bulk transfer, and
    /// flushes TX. Internal (`Fs`, media) errors are caught here and turned
    /// into a log line plus a return to `Idle`, never propagated further
    /// (§4.3.5) -- the `Result` return exists for the caller's own
    /// bookkeeping, not as a retry signal.
    #[allow(clippy::too_many_arguments)]
    pub fn iterate<S, T, G, B, W, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        now_ms: u32,
        transport: &mut T,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        config: &mut ConfigStore,
        gps: &mut G,
        ble: &mut B,
        firmware_writer: &mut W,
    ) where
        S: Storage,
        T: Transport,
        G: GpsBridge,
        B: BleBridge,
        W: FirmwareWriter,
    {
        self.check_inactivity(now_ms, device, fs);

        if self.rx.is_empty() {
            if let Ok(slot) = self.rx.write_reserve() {
                if let Ok(Some(n)) = transport.poll_receive(slot) {
                    self.rx.write_commit(n);
                    self.last_activity_ms = now_ms;
                }
            }
        }

        let result = self.run_one_step(transport, device, fs, config, gps, ble, firmware_writer);
        if let Err(e) = result {
            log::error!("protocol engine exception: {:?}", e);
            self.abandon_substate(device, fs);
        }

        if let Err(e) = self.poll_cfg_read_next(config) {
            log::error!("protocol engine exception: {:?}", e);
        }
        if let Err(e) = self.poll_gps_read_next(gps) {
            log::error!("protocol engine exception: {:?}", e);
            self.substate = SubState::Idle;
        }
        if let Err(e) = self.poll_ble_read_next(ble) {
            log::error!("protocol engine exception: {:?}", e);
            self.substate = SubState::Idle;
        }
        self.drive_outbound_substate(device, fs);
        self.drain_tx(transport);
        if !self.tx.is_empty() || !self.rx.is_empty() {
            self.last_activity_ms = now_ms;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_one_step<S, T, G, B, W, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        transport: &mut T,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        config: &mut ConfigStore,
        gps: &mut G,
        ble: &mut B,
        firmware_writer: &mut W,
    ) -> Result<(), EngineException>
    where
        S: Storage,
        T: Transport,
        G: GpsBridge,
        B: BleBridge,
        W: FirmwareWriter,
    {
        // Copied out of the RX slot up front: every dispatch_* helper below
        // takes `&mut self`, which would otherwise alias the `&self.rx`
        // borrow `read_peek` hands back.
        let mut buf = [0u8; TRANSPORT_PACKET_SIZE];
        let len = match self.rx.read_peek() {
            Some(p) => {
                buf[..p.len()].copy_from_slice(p);
                p.len()
            }
            None => return Ok(()),
        };
        let packet = &buf[..len];

        match self.substate {
            SubState::Idle => self.dispatch_idle(packet, transport, device, fs, config, ble, firmware_writer)?,
            SubState::CfgWriteNext { .. } | SubState::CfgWriteError => self.dispatch_cfg_write(packet, config)?,
            SubState::GpsWriteNext { .. } => self.dispatch_gps_write(packet, gps)?,
            SubState::BleWriteNext { .. } => self.dispatch_ble_write(packet, ble)?,
            SubState::FwSendImageNext { .. } => self.dispatch_fw_send_image(packet, device, fs)?,
            // Outbound bulk sub-states don't consume RX packets.
            SubState::CfgReadNext { .. }
            | SubState::GpsReadNext { .. }
            | SubState::BleReadNext { .. }
            | SubState::LogReadNext { .. } => return Ok(()),
        }

        self.rx.read_advance();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_idle<S, T, B, W, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        packet: &[u8],
        transport: &mut T,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        config: &mut ConfigStore,
        ble: &mut B,
        firmware_writer: &mut W,
    ) -> Result<(), EngineException>
    where
        S: Storage,
        T: Transport,
        W: FirmwareWriter,
        B: BleBridge,
    {
        let header = Header::decode(packet).ok_or(EngineException::PacketWrongSize)?;
        if !header.is_valid() {
            return Err(EngineException::PacketWrongSize);
        }
        let cmd = match Command::try_from(header.cmd) {
            Ok(c) => c,
            Err(()) => return Ok(()), // unknown command: silently ignored, like an oversize/garbled one
        };
        let body = &packet[Header::SIZE..];

        match cmd {
            Command::StatusReq => {
                let resp = StatusResp { error: ProtocolError::NoError as u8, stm_fw: FW_VERSION, ble_fw: ble.firmware_version(), cfg_fmt: crate::config::FORMAT_VERSION };
                let mut buf = [0u8; StatusResp::SIZE];
                resp.encode(&mut buf);
                self.respond(Command::StatusReq, &buf)
            }
            Command::BatteryStatusReq => self.ack(cmd, ProtocolError::NoError),
            Command::ResetReq => self.ack(cmd, ProtocolError::NoError),

            Command::CfgReadReq => {
                let req = CfgReadReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                match (schema_index(req.tag), config.get(req.tag)) {
                    (Some(idx), Ok(value)) => {
                        let mut buf = [0u8; 2 + crate::config::schema::MAX_VALUE_SIZE];
                        buf[0..2].copy_from_slice(&req.tag.to_le_bytes());
                        buf[2..2 + value.len()].copy_from_slice(value);
                        let _ = idx;
                        self.respond(cmd, &buf[..2 + value.len()])
                    }
                    (None, _) => self.ack(cmd, ProtocolError::InvalidConfigTag),
                    (Some(_), Err(_)) => self.ack(cmd, ProtocolError::ConfigTagNotSet),
                }
            }
            Command::CfgReadAllReq => {
                self.substate = SubState::CfgReadNext { cursor: 0 };
                Ok(())
            }
            Command::CfgWriteReq => {
                let req = LenReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.substate = SubState::cfg_write_next(req.len);
                Ok(())
            }
            Command::CfgEraseReq => {
                let req = CfgEraseReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                match config.unset(req.tag) {
                    // The source has a documented bug here (success path
                    // reports InvalidConfigTag); corrected to NoError.
                    Ok(()) => self.ack(cmd, ProtocolError::NoError),
                    Err(_) => self.ack(cmd, ProtocolError::InvalidConfigTag),
                }
            }
            Command::CfgEraseAllReq => {
                config.reset();
                self.ack(cmd, ProtocolError::NoError)
            }
            Command::CfgSaveReq => match config.save(fs, device) {
                Ok(()) => self.ack(cmd, ProtocolError::NoError),
                Err(e) => self.ack(cmd, e.into()),
            },
            Command::CfgRestoreReq => match ConfigStore::restore(fs, device) {
                Ok(restored) => {
                    *config = restored;
                    self.ack(cmd, ProtocolError::NoError)
                }
                Err(e) => self.ack(cmd, e.into()),
            },
            Command::CfgProtectReq => match fs.protect(device, file_ids::CONF) {
                Ok(()) => self.ack(cmd, ProtocolError::NoError),
                Err(e) => self.ack(cmd, e.into()),
            },
            Command::CfgUnprotectReq => match fs.unprotect(device, file_ids::CONF) {
                Ok(()) => self.ack(cmd, ProtocolError::NoError),
                Err(e) => self.ack(cmd, e.into()),
            },

            Command::LogCreateReq => {
                let req = LogCreateReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                let mode = if req.circular { OpenMode::CreateCircular } else { OpenMode::Create };
                match fs.open(device, file_ids::LOG, mode, 0) {
                    Ok(h) => {
                        let _ = fs.close(device, h);
                        self.ack(cmd, ProtocolError::NoError)
                    }
                    Err(e) => self.ack(cmd, e.into()),
                }
            }
            Command::LogEraseReq => match fs.delete(device, file_ids::LOG) {
                Ok(()) => self.ack(cmd, ProtocolError::NoError),
                Err(e) => self.ack(cmd, e.into()),
            },
            Command::LogReadReq => {
                let req = LogReadReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                match fs.open(device, file_ids::LOG, OpenMode::ReadOnly, 0) {
                    Ok(handle) => {
                        let mut skip = req.start_offset;
                        let mut scratch = [0u8; 64];
                        while skip > 0 {
                            let n = core::cmp::min(scratch.len() as u32, skip) as usize;
                            match fs.read(device, handle, &mut scratch[..n]) {
                                Ok(read) if read > 0 => skip -= read as u32,
                                _ => break,
                            }
                        }
                        let resp = LogReadResp { error: ProtocolError::NoError as u8, len: req.len };
                        let mut buf = [0u8; LogReadResp::SIZE];
                        resp.encode(&mut buf);
                        self.respond(cmd, &buf)?;
                        self.substate = SubState::LogReadNext { handle, remaining: req.len };
                        Ok(())
                    }
                    Err(e) => self.ack(cmd, e.into()),
                }
            }

            Command::GpsConfigReq => {
                let req = BridgeConfigReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.gps_bridging_enabled = req.enable;
                self.ack(cmd, ProtocolError::NoError)
            }
            Command::GpsWriteReq => {
                if !self.gps_bridging_enabled {
                    return self.ack(cmd, ProtocolError::BridgingDisabled);
                }
                let req = LenReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.substate = SubState::GpsWriteNext { remaining: req.len };
                Ok(())
            }
            Command::GpsReadReq => {
                if !self.gps_bridging_enabled {
                    return self.ack(cmd, ProtocolError::BridgingDisabled);
                }
                let req = LenReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.substate = SubState::GpsReadNext { remaining: req.len };
                Ok(())
            }

            Command::BleConfigReq => {
                let req = BridgeConfigReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.ble_bridging_enabled = req.enable;
                self.ack(cmd, ProtocolError::NoError)
            }
            Command::BleWriteReq => {
                if !self.ble_bridging_enabled {
                    return self.ack(cmd, ProtocolError::BridgingDisabled);
                }
                let req = BleLenReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.substate = SubState::BleWriteNext { addr: req.addr, remaining: req.len };
                Ok(())
            }
            Command::BleReadReq => {
                if !self.ble_bridging_enabled {
                    return self.ack(cmd, ProtocolError::BridgingDisabled);
                }
                let req = BleLenReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                self.substate = SubState::BleReadNext { addr: req.addr, remaining: req.len };
                Ok(())
            }

            Command::FwSendImageReq => {
                let req = FwSendImageReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                let file_id = match req.kind {
                    0 => file_ids::STM32_IMAGE,
                    1 => file_ids::BLE_IMAGE,
                    _ => return self.ack(cmd, ProtocolError::InvalidFwImageType),
                };
                let _ = fs.delete(device, file_id);
                match fs.open(device, file_id, OpenMode::Create, 0) {
                    Ok(handle) => {
                        self.substate = SubState::FwSendImageNext { handle, file_id, remaining: req.len, crc: 0, expected_crc: req.crc32 };
                        Ok(())
                    }
                    Err(e) => self.ack(cmd, e.into()),
                }
            }
            Command::FwApplyImageReq => {
                let req = FwApplyImageReq::decode(body).ok_or(EngineException::ReqWrongSize)?;
                match req.kind {
                    0 => {
                        // Acked up front: a successful write_chunk/finish cycle
                        // resets the MCU and never returns to this call site.
                        self.ack(cmd, ProtocolError::NoError)?;
                        self.drain_tx(transport);
                        self.apply_stm32_image(device, fs, firmware_writer)
                    }
                    1 => self.apply_ble_image(cmd, device, fs, ble),
                    _ => self.ack(cmd, ProtocolError::InvalidFwImageType),
                }
            }
        }
    }

    /// Streams `file_ids::STM32_IMAGE` into the flash-programming capability
    /// one transport-sized chunk at a time (§4.3.6). The image file is left
    /// in place; a driver that resets the MCU on success never comes back to
    /// delete it, and a failed write is worth re-inspecting rather than
    /// silently discarding.
    fn apply_stm32_image<S, W, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        firmware_writer: &mut W,
    ) -> Result<(), EngineException>
    where
        S: Storage,
        W: FirmwareWriter,
    {
        let handle = fs.open(device, file_ids::STM32_IMAGE, OpenMode::ReadOnly, 0)?;
        let mut scratch = [0u8; TRANSPORT_PACKET_SIZE];
        loop {
            match fs.read(device, handle, &mut scratch) {
                Ok(n) => {
                    if firmware_writer.write_chunk(&scratch[..n]).is_err() {
                        log::error!("stm32 firmware writer rejected a chunk");
                        let _ = fs.close(device, handle);
                        return Ok(());
                    }
                }
                Err(FsError::EndOfFile) => break,
                Err(e) => {
                    let _ = fs.close(device, handle);
                    return Err(e.into());
                }
            }
        }
        let _ = fs.close(device, handle);
        if firmware_writer.finish().is_err() {
            log::error!("stm32 firmware writer failed to finish");
        }
        Ok(())
    }

    /// Streams `file_ids::BLE_IMAGE` into the BLE bridge's firmware-update
    /// address (§4.3.6), deleting the image once every chunk has gone out.
    fn apply_ble_image<S, B, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        cmd: Command,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        ble: &mut B,
    ) -> Result<(), EngineException>
    where
        S: Storage,
        B: BleBridge,
    {
        let handle = match fs.open(device, file_ids::BLE_IMAGE, OpenMode::ReadOnly, 0) {
            Ok(h) => h,
            Err(e) => return self.ack(cmd, e.into()),
        };
        let mut scratch = [0u8; TRANSPORT_PACKET_SIZE];
        loop {
            match fs.read(device, handle, &mut scratch) {
                Ok(n) => {
                    if ble.send(BLE_FW_UPDATE_ADDR, &scratch[..n]).is_err() {
                        let _ = fs.close(device, handle);
                        return self.ack(cmd, ProtocolError::Unknown);
                    }
                }
                Err(FsError::EndOfFile) => break,
                Err(e) => {
                    let _ = fs.close(device, handle);
                    return self.ack(cmd, e.into());
                }
            }
        }
        let _ = fs.close(device, handle);
        let _ = fs.delete(device, file_ids::BLE_IMAGE);
        self.ack(cmd, ProtocolError::NoError)
    }

    fn dispatch_cfg_write(&mut self, packet: &[u8], config: &mut ConfigStore) -> Result<(), EngineException> {
        if matches!(self.substate, SubState::CfgWriteError) {
            self.substate = SubState::Idle;
            return Ok(());
        }

        let mut scratch = [0u8; substate::CFG_WRITE_CARRY_CAP + TRANSPORT_PACKET_SIZE];
        let mut len;
        {
            let (remaining, carry, carry_len) = match &mut self.substate {
                SubState::CfgWriteNext { remaining, carry, carry_len } => (remaining, carry, carry_len),
                _ => unreachable!(),
            };
            if packet.len() as u32 > *remaining {
                self.substate = SubState::Idle;
                return self.ack(Command::CfgWriteReq, ProtocolError::DataOversize);
            }
            len = *carry_len;
            scratch[..len].copy_from_slice(&carry[..len]);
            scratch[len..len + packet.len()].copy_from_slice(packet);
            len += packet.len();
            *remaining -= packet.len() as u32;
        }

        let mut consumed = 0usize;
        loop {
            if consumed + 2 > len {
                break;
            }
            let tag = u16::from_le_bytes([scratch[consumed], scratch[consumed + 1]]);
            let value_size = match schema_index(tag) {
                Some(idx) => SCHEMA[idx].size,
                None => {
                    self.substate = SubState::CfgWriteError;
                    return self.ack(Command::CfgWriteReq, ProtocolError::InvalidConfigTag);
                }
            };
            if consumed + 2 + value_size > len {
                break; // header+value split across the next packet
            }
            let _ = config.set(tag, &scratch[consumed + 2..consumed + 2 + value_size]);
            consumed += 2 + value_size;
        }

        let leftover = len - consumed;
        let done = match &mut self.substate {
            SubState::CfgWriteNext { carry, carry_len, remaining } => {
                carry[..leftover].copy_from_slice(&scratch[consumed..len]);
                *carry_len = leftover;
                *remaining == 0 && leftover == 0
            }
            _ => false,
        };
        if done {
            self.substate = SubState::Idle;
            self.ack(Command::CfgWriteReq, ProtocolError::NoError)?;
        }
        Ok(())
    }

    fn dispatch_gps_write<G: GpsBridge>(&mut self, packet: &[u8], gps: &mut G) -> Result<(), EngineException> {
        let remaining = match &mut self.substate {
            SubState::GpsWriteNext { remaining } => remaining,
            _ => unreachable!(),
        };
        gps.send(packet).map_err(|_| EngineException::GpsSendError)?;
        *remaining = remaining.saturating_sub(packet.len() as u32);
        if *remaining == 0 {
            self.substate = SubState::Idle;
        }
        Ok(())
    }

    fn dispatch_ble_write<B: BleBridge>(&mut self, packet: &[u8], ble: &mut B) -> Result<(), EngineException> {
        let (addr, remaining) = match &mut self.substate {
            SubState::BleWriteNext { addr, remaining } => (*addr, remaining),
            _ => unreachable!(),
        };
        ble.send(addr, packet).map_err(|_| EngineException::SpiError)?;
        *remaining = remaining.saturating_sub(packet.len() as u32);
        if *remaining == 0 {
            self.substate = SubState::Idle;
        }
        Ok(())
    }

    fn dispatch_fw_send_image<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        packet: &[u8],
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    ) -> Result<(), EngineException>
    where
        S: Storage,
    {
        let (handle, file_id, remaining, crc, expected_crc) = match &mut self.substate {
            SubState::FwSendImageNext { handle, file_id, remaining, crc, expected_crc } => (*handle, *file_id, remaining, crc, *expected_crc),
            _ => unreachable!(),
        };

        let take = core::cmp::min(packet.len() as u32, *remaining) as usize;
        fs.write(device, handle, &packet[..take])?;
        *remaining -= take as u32;
        *crc = crc::crc32::update(*crc, crc::crc32::IEEE, &packet[..take]);

        if *remaining == 0 {
            let _ = fs.close(device, handle);
            let ok = *crc == expected_crc;
            if !ok {
                let _ = fs.delete(device, file_id);
            }
            let error = if ok { ProtocolError::NoError } else { ProtocolError::ImageCrcMismatch };
            self.substate = SubState::Idle;
            self.ack(Command::FwSendImageReq, error)?;
        }
        Ok(())
    }

    /// Advances an *outbound* bulk sub-state by one packet, if the TX ring
    /// has room. Unlike inbound sub-states this isn't triggered by an RX
    /// packet: the device is the one producing data.
    fn drive_outbound_substate<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    ) where
        S: Storage,
    {
        if self.tx.is_full() {
            return;
        }
        if let SubState::LogReadNext { .. } = self.substate {
            self.drive_log_read_next(device, fs);
        }
        // `CfgReadNext` needs the `ConfigStore`, which this helper doesn't
        // take (non-config outbound sub-states stay cheap to drive); the
        // caller advances it separately via `poll_cfg_read_next`.
    }

    /// Packs the next batch of set tags into one TX packet.
    pub fn poll_cfg_read_next(&mut self, config: &ConfigStore) -> Result<(), EngineException> {
        let cursor = match &mut self.substate {
            SubState::CfgReadNext { cursor } => cursor,
            _ => return Ok(()),
        };
        if self.tx.is_full() {
            return Ok(());
        }

        let slot = self.tx.write_reserve().map_err(|_| EngineException::TxBufferFull)?;
        let header = Header { sync: SYNCWORD, cmd: Command::CfgReadAllReq as u8 };
        header.encode(slot);
        let mut offset = Header::SIZE;

        let mut local_cursor = *cursor;
        while local_cursor < SCHEMA.len() {
            let entry = &SCHEMA[local_cursor];
            if !config.is_set(entry.tag) {
                local_cursor += 1;
                continue;
            }
            let needed = 2 + entry.size;
            if offset + needed > TRANSPORT_PACKET_SIZE {
                break; // tag deferred to the next packet
            }
            slot[offset..offset + 2].copy_from_slice(&entry.tag.to_le_bytes());
            offset += 2;
            if let Ok(value) = config.get(entry.tag) {
                slot[offset..offset + value.len()].copy_from_slice(value);
                offset += value.len();
            }
            local_cursor += 1;
        }
        self.tx.write_commit(offset);
        *cursor = local_cursor;

        if local_cursor >= SCHEMA.len() {
            self.substate = SubState::Idle;
        }
        Ok(())
    }

    /// Pulls the next chunk from the GPS bridge into the TX ring.
    pub fn poll_gps_read_next<G: GpsBridge>(&mut self, gps: &mut G) -> Result<(), EngineException> {
        let remaining = match &mut self.substate {
            SubState::GpsReadNext { remaining } => remaining,
            _ => return Ok(()),
        };
        if self.tx.is_full() {
            return Ok(());
        }
        let slot = self.tx.write_reserve().map_err(|_| EngineException::TxBufferFull)?;
        let take = core::cmp::min(*remaining as usize, slot.len());
        let n = gps.recv(&mut slot[..take]).map_err(|_| EngineException::GpsSendError)?;
        self.tx.write_commit(n);
        *remaining = remaining.saturating_sub(n as u32);
        if *remaining == 0 || n == 0 {
            self.substate = SubState::Idle;
        }
        Ok(())
    }

    /// Pulls the next chunk from the BLE bridge into the TX ring.
    pub fn poll_ble_read_next<B: BleBridge>(&mut self, ble: &mut B) -> Result<(), EngineException> {
        let (addr, remaining) = match &mut self.substate {
            SubState::BleReadNext { addr, remaining } => (*addr, remaining),
            _ => return Ok(()),
        };
        if self.tx.is_full() {
            return Ok(());
        }
        let slot = self.tx.write_reserve().map_err(|_| EngineException::TxBufferFull)?;
        let take = core::cmp::min(*remaining as usize, slot.len());
        let n = ble.recv(addr, &mut slot[..take]).map_err(|_| EngineException::SpiError)?;
        self.tx.write_commit(n);
        *remaining = remaining.saturating_sub(n as u32);
        if *remaining == 0 || n == 0 {
            self.substate = SubState::Idle;
        }
        Ok(())
    }

    fn drive_log_read_next<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    ) where
        S: Storage,
    {
        let (handle, remaining) = match &mut self.substate {
            SubState::LogReadNext { handle, remaining } => (*handle, remaining),
            _ => return,
        };
        if *remaining == 0 {
            let _ = fs.close(device, handle);
            self.substate = SubState::Idle;
            return;
        }

        let slot = match self.tx.write_reserve() {
            Ok(s) => s,
            Err(_) => return,
        };
        let take = core::cmp::min(*remaining as usize, TRANSPORT_PACKET_SIZE);
        match fs.read(device, handle, &mut slot[..take]) {
            Ok(n) => {
                self.tx.write_commit(n);
                *remaining -= n as u32;
                if *remaining == 0 {
                    let _ = fs.close(device, handle);
                    self.substate = SubState::Idle;
                }
            }
            Err(FsError::EndOfFile) => {
                let _ = fs.close(device, handle);
                self.substate = SubState::Idle;
            }
            Err(_) => {
                let _ = fs.close(device, handle);
                self.substate = SubState::Idle;
            }
        }
    }
}
