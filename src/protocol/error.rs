//! Two of the protocol engine's three independent failure taxonomies
//! (§7): wire-level `ProtocolError`s carried in a response's `error_code`
//! field, and internal `EngineException`s caught at the iteration boundary.
//! The third (fatal faults) is [`crate::sm::SystemReset`].

/// Reported in a response's `error_code` field. Never logged: the host is
/// expected to retry or surface it to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[non_exhaustive]
pub enum ProtocolError {
    NoError = 0,
    InvalidConfigTag,
    ConfigTagNotSet,
    ConfigProtected,
    FileNotFound,
    FileAlreadyExists,
    FileIncompatible,
    InvalidParameter,
    InvalidFwImageType,
    ImageCrcMismatch,
    DataOversize,
    BridgingDisabled,
    Unknown,
}

impl From<crate::fs::FsError> for ProtocolError {
    fn from(e: crate::fs::FsError) -> Self {
        use crate::fs::FsError::*;
        match e {
            FileNotFound => ProtocolError::FileNotFound,
            FileAlreadyExists => ProtocolError::FileAlreadyExists,
            FileProtected => ProtocolError::ConfigProtected,
            FileVersionMismatch => ProtocolError::FileIncompatible,
            _ => ProtocolError::Unknown,
        }
    }
}

impl From<crate::config::ConfigError> for ProtocolError {
    fn from(e: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError::*;
        match e {
            InvalidTag => ProtocolError::InvalidConfigTag,
            NotSet => ProtocolError::ConfigTagNotSet,
            WrongSize => ProtocolError::InvalidParameter,
            FileVersionMismatch => ProtocolError::FileIncompatible,
            Fs(fs_err) => fs_err.into(),
        }
    }
}

/// Caught at the main-loop iteration boundary: abandons the current
/// sub-state, cleans up buffers, returns the engine to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum EngineException {
    /// A fixed-size request arrived with the wrong length; dropped silently
    /// (no response), per §4.3.2.
    ReqWrongSize,
    RespTxPending,
    TxBufferFull,
    TxBusy,
    RxBufferFull,
    PacketWrongSize,
    GpsSendError,
    SpiError,
    LogBufferFull,
    BadSysConfigErrorCondition,
    Fs(crate::fs::FsError),
}

impl From<crate::fs::FsError> for EngineException {
    fn from(e: crate::fs::FsError) -> Self {
        EngineException::Fs(e)
    }
}
