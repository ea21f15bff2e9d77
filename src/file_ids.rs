//! Reserved file identifiers (§6.4). Anything else up to `254` is free for
//! application use; `0xFF` is `fs::sector::NONE_FILE_ID`.

pub const CONF: u8 = 0;
pub const STM32_IMAGE: u8 = 1;
pub const BLE_IMAGE: u8 = 2;
pub const LOG: u8 = 4;
