//! The top-level operational state machine (component G): battery/charging
//! gating, provisioning, and the `Operational` mode that drives log
//! flushing and GPS/pressure/accelerometer scheduling (§4.4).

pub mod gps;
pub mod sensors;

pub use gps::GpsState;
pub use sensors::SensorArming;

use crate::config::schema::tags;
use crate::config::ConfigStore;
use crate::file_ids;
use crate::fs::{FileSystem, FsError, HandleId, OpenMode};
use crate::ring::RingBuffer;
use crate::storage::Storage;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopState {
    Boot,
    BatteryCharging,
    BatteryLevelLow,
    LogFileFull,
    ProvisioningNeeded,
    Provisioning,
    Operational,
}

/// The third of the three failure taxonomies (§7): a condition this crate
/// cannot recover from in place. The integrating firmware supplies the
/// actual reset mechanism (e.g. `NVIC_SystemReset`); never implemented here.
pub trait SystemReset {
    fn reset(&mut self, fault: FatalFault) -> !;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FatalFault {
    LogFileOpenFailed,
}

/// Externally-observed conditions the state machine evaluates every
/// iteration (§4.4.1); all come from outside this crate (ADC, GPIO, the
/// transport's connection state).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inputs {
    pub vusb_asserted: bool,
    pub battery_millivolts: u32,
    pub transport_connected: bool,
    pub above_water: bool,
}

/// Period of the periodic log-flush timer armed on `Operational` entry.
pub const LOG_FLUSH_PERIOD_SECONDS: u32 = 86_340;

/// Budget `BatteryCharging` entry gives the USB transport to enumerate
/// before giving up on it (§4.4.1).
pub const USB_ENUMERATION_BUDGET_MS: u32 = 10_000;

pub struct StateMachine {
    current: TopState,
    previous: TopState,
    just_entered: bool,
    log_handle: Option<HandleId>,
    gps: GpsState,
    pressure: SensorArming,
    axl: SensorArming,
    flush_timer_s: u32,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            current: TopState::Boot,
            previous: TopState::Boot,
            just_entered: true,
            log_handle: None,
            gps: GpsState::new(),
            pressure: SensorArming::disarmed(),
            axl: SensorArming::disarmed(),
            flush_timer_s: 0,
        }
    }

    pub fn current(&self) -> TopState {
        self.current
    }

    pub fn previous(&self) -> TopState {
        self.previous
    }

    /// True for exactly the one `iterate` call on which this state was
    /// entered (§4.4: "state objects expose `is_first_entry`").
    pub fn is_first_entry(&self) -> bool {
        self.just_entered
    }

    pub fn gps(&self) -> GpsState {
        self.gps
    }

    pub fn pressure(&self) -> SensorArming {
        self.pressure
    }

    pub fn axl(&self) -> SensorArming {
        self.axl
    }

    fn battery_low(&self, config: &ConfigStore, inputs: &Inputs) -> bool {
        match config.get(tags::BATTERY_LOW_THRESHOLD) {
            Ok(bytes) if bytes.len() == 4 => {
                let threshold = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                inputs.battery_millivolts <= threshold
            }
            // Unset: the tag is documented optional, and with no threshold
            // configured there is nothing to compare against.
            _ => false,
        }
    }

    fn next_state<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &self,
        inputs: &Inputs,
        config: &ConfigStore,
        fs: &FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        log_full: bool,
    ) -> TopState
    where
        S: Storage,
    {
        if inputs.vusb_asserted {
            return TopState::BatteryCharging;
        }
        if self.battery_low(config, inputs) {
            return TopState::BatteryLevelLow;
        }
        if inputs.transport_connected {
            return TopState::Provisioning;
        }
        if self.current == TopState::Operational && log_full {
            return TopState::LogFileFull;
        }
        let log_exists = fs.stat(file_ids::LOG).is_ok();
        if config.configuration_complete() && log_exists {
            return TopState::Operational;
        }
        TopState::ProvisioningNeeded
    }

    /// Runs one iteration of the priority-ordered transition rule (§4.4.1),
    /// firing exit actions for the state being left and entry actions for
    /// the state being entered whenever the two differ.
    #[allow(clippy::too_many_arguments)]
    pub fn iterate<
        S,
        R,
        T,
        const N_SECTORS: usize,
        const NUM_WRITE_SESSIONS: usize,
        const MAX_HANDLES: usize,
        const LOG_SLOT_SIZE: usize,
        const LOG_SLOT_COUNT: usize,
    >(
        &mut self,
        inputs: &Inputs,
        config: &ConfigStore,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        reset: &mut R,
        transport: &mut T,
        log_ring: &mut RingBuffer<LOG_SLOT_SIZE, LOG_SLOT_COUNT>,
        log_full: bool,
    ) where
        S: Storage,
        R: SystemReset,
        T: Transport,
    {
        let next = self.next_state(inputs, config, fs, log_full);

        if next != self.current {
            self.exit_current(device, fs);
            self.previous = self.current;
            self.current = next;
            self.just_entered = true;
            self.enter_current(inputs, config, device, fs, reset, transport, log_ring);
        } else {
            self.just_entered = false;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn enter_current<
        S,
        R,
        T,
        const N_SECTORS: usize,
        const NUM_WRITE_SESSIONS: usize,
        const MAX_HANDLES: usize,
        const LOG_SLOT_SIZE: usize,
        const LOG_SLOT_COUNT: usize,
    >(
        &mut self,
        inputs: &Inputs,
        config: &ConfigStore,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        reset: &mut R,
        transport: &mut T,
        log_ring: &mut RingBuffer<LOG_SLOT_SIZE, LOG_SLOT_COUNT>,
    ) where
        S: Storage,
        R: SystemReset,
        T: Transport,
    {
        match self.current {
            TopState::Operational => {
                let opened = fs
                    .open(device, file_ids::LOG, OpenMode::WriteOnly, 0)
                    .or_else(|_| fs.open(device, file_ids::LOG, OpenMode::Create, 0));
                match opened {
                    Ok(h) => self.log_handle = Some(h),
                    Err(_) => reset.reset(FatalFault::LogFileOpenFailed),
                }
                log_ring.reset();
                self.flush_timer_s = 0;
                self.gps.sleep();
                self.gps.arm_from_config(config, inputs.above_water);
                self.pressure = SensorArming::arm_pressure(config);
                self.axl = SensorArming::arm_axl(config);
            }
            TopState::BatteryCharging => {
                if !transport.enumerate(USB_ENUMERATION_BUDGET_MS) {
                    transport.disconnect();
                }
            }
            _ => {}
        }
    }

    fn exit_current<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    ) where
        S: Storage,
    {
        if self.current == TopState::Operational {
            if let Some(h) = self.log_handle.take() {
                let _ = fs.close(device, h);
            }
            self.gps.sleep();
        }
    }

    /// Advances the periodic log-flush timer by one second; returns `true`
    /// once `LOG_FLUSH_PERIOD_SECONDS` has elapsed, at which point the timer
    /// rearms itself automatically.
    pub fn tick_flush_timer(&mut self) -> bool {
        if self.current != TopState::Operational {
            return false;
        }
        self.flush_timer_s += 1;
        if self.flush_timer_s >= LOG_FLUSH_PERIOD_SECONDS {
            self.flush_timer_s = 0;
            return true;
        }
        false
    }

    /// Drains the sensor-log ring into the log file in FIFO order (§4.4.4).
    /// Returns `true` on the first `FileSystemFull`, the signal the caller
    /// feeds back into the next `iterate` as `log_full`.
    pub fn drain_log_ring<S, const SLOT_SIZE: usize, const SLOT_COUNT: usize, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>(
        &mut self,
        device: &mut S,
        fs: &mut FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
        ring: &mut RingBuffer<SLOT_SIZE, SLOT_COUNT>,
    ) -> bool
    where
        S: Storage,
    {
        let handle = match self.log_handle {
            Some(h) => h,
            None => return false,
        };
        while let Some(record) = ring.read_peek() {
            match fs.write(device, handle, record) {
                Ok(_) => ring.read_advance(),
                Err(FsError::FileSystemFull) => return true,
                Err(_) => ring.read_advance(),
            }
        }
        false
    }
}
