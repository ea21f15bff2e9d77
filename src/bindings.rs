//! C ABI surface: the file system core and configuration store exposed to
//! the C boot glue and driver layer this crate is staticlib-linked into.
//!
//! The protocol engine and top-level state machine are deliberately left
//! off this surface: both take Rust trait objects (`Transport`, `GpsBridge`,
//! `BleBridge`, `SystemReset`) that the integrating firmware implements
//! directly against this crate rather than through an FFI boundary, the
//! same way the teacher crate bound only its storage layer to C and left
//! higher-level assembly to the Rust side.
//!
//! `Tracker` is not `#[repr(C)]`: its layout depends on the const generics
//! below, which C cannot see. The caller allocates `tracker_size()` bytes
//! (aligned to `tracker_align()`) — typically a static buffer sized at
//! build time — and this module initialises it in place.

use core::mem::{align_of, size_of};
use core::ptr;

use typenum::consts::U4096;

use crate::config::schema::Tag;
use crate::config::ConfigStore;
use crate::fs::{FileSystem, FsError, HandleId, OpenMode};
use crate::storage::{EraseError, ReadError, Storage, WriteError};

const N_SECTORS: usize = 16;
const NUM_WRITE_SESSIONS: usize = 64;
const MAX_HANDLES: usize = 4;

type SectorSize = U4096;

/// The platform QSPI/SPI flash driver, implemented in C and linked in
/// separately. Mirrors the teacher's `eDisk_*` extern block.
extern "C" {
    fn qspi_flash_read(offset: u32, buf: *mut u8, len: u32) -> i32;
    fn qspi_flash_write(offset: u32, buf: *const u8, len: u32) -> i32;
    fn qspi_flash_erase_sector(sector_idx: u32) -> i32;
    fn qspi_flash_sector_count() -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError(pub i32);

pub struct QspiFlash;

impl Storage for QspiFlash {
    type SECTOR_SIZE = SectorSize;
    type ReadErr = DriverError;
    type WriteErr = DriverError;
    type EraseErr = DriverError;

    fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadError<Self::ReadErr>> {
        let rc = unsafe { qspi_flash_read(offset as u32, buffer.as_mut_ptr(), buffer.len() as u32) };
        if rc == 0 {
            Ok(())
        } else {
            Err(ReadError::Other(DriverError(rc)))
        }
    }

    fn write_bytes(&mut self, offset: usize, buffer: &[u8]) -> Result<(), WriteError<Self::WriteErr>> {
        let rc = unsafe { qspi_flash_write(offset as u32, buffer.as_ptr(), buffer.len() as u32) };
        if rc == 0 {
            Ok(())
        } else {
            Err(WriteError::Other(DriverError(rc)))
        }
    }

    fn erase_sector(&mut self, sector_idx: usize) -> Result<(), EraseError<Self::WriteErr, Self::EraseErr>> {
        let rc = unsafe { qspi_flash_erase_sector(sector_idx as u32) };
        if rc == 0 {
            Ok(())
        } else {
            Err(EraseError::Other(DriverError(rc)))
        }
    }

    fn sector_count(&self) -> usize {
        unsafe { qspi_flash_sector_count() as usize }
    }
}

pub struct Tracker {
    flash: QspiFlash,
    fs: FileSystem<QspiFlash, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>,
    config: ConfigStore,
}

#[no_mangle]
pub extern "C" fn tracker_size() -> usize {
    size_of::<Tracker>()
}

#[no_mangle]
pub extern "C" fn tracker_align() -> usize {
    align_of::<Tracker>()
}

/// Initialises a `Tracker` in place at `out` (which must be at least
/// `tracker_size()` bytes, aligned to `tracker_align()`), mounting the
/// existing file system or formatting a fresh one if none parses, then
/// restoring the configuration store from flash. Returns `0` on success.
///
/// # Safety
/// `out` must be valid for writes of `tracker_size()` bytes and properly
/// aligned; this function takes ownership of that memory as a `Tracker`.
#[no_mangle]
pub unsafe extern "C" fn tracker_init(out: *mut Tracker) -> i32 {
    let mut flash = QspiFlash;
    let mut fs = match FileSystem::mount(&mut flash) {
        Ok(fs) => fs,
        Err(_) => return -1,
    };
    let config = ConfigStore::restore(&mut fs, &mut flash).unwrap_or_default();
    ptr::write(out, Tracker { flash, fs, config });
    0
}

/// # Safety
/// `tracker` must point at a `Tracker` previously initialised by
/// `tracker_init` and not concurrently accessed elsewhere.
#[no_mangle]
pub unsafe extern "C" fn tracker_format(tracker: *mut Tracker) -> i32 {
    let t = &mut *tracker;
    match t.fs.format(&mut t.flash) {
        Ok(()) => 0,
        Err(e) => fs_error_code(e),
    }
}

/// # Safety
/// Same contract as `tracker_format`.
#[no_mangle]
pub unsafe extern "C" fn tracker_open(tracker: *mut Tracker, file_id: u8, mode: u8, app_flags: u8) -> i64 {
    let t = &mut *tracker;
    let mode = match mode {
        0 => OpenMode::Create,
        1 => OpenMode::CreateCircular,
        2 => OpenMode::WriteOnly,
        _ => OpenMode::ReadOnly,
    };
    match t.fs.open(&mut t.flash, file_id, mode, app_flags) {
        Ok(handle) => handle_to_raw(handle),
        Err(e) => -(fs_error_code(e) as i64),
    }
}

/// # Safety
/// `buf` must be valid for writes of `len` bytes. Same contract otherwise.
#[no_mangle]
pub unsafe extern "C" fn tracker_read(tracker: *mut Tracker, handle: i64, buf: *mut u8, len: u32) -> i32 {
    let t = &mut *tracker;
    let handle = raw_to_handle(handle);
    let slice = core::slice::from_raw_parts_mut(buf, len as usize);
    match t.fs.read(&mut t.flash, handle, slice) {
        Ok(n) => n as i32,
        Err(e) => -(fs_error_code(e)),
    }
}

/// # Safety
/// `buf` must be valid for reads of `len` bytes. Same contract otherwise.
#[no_mangle]
pub unsafe extern "C" fn tracker_write(tracker: *mut Tracker, handle: i64, buf: *const u8, len: u32) -> i32 {
    let t = &mut *tracker;
    let handle = raw_to_handle(handle);
    let slice = core::slice::from_raw_parts(buf, len as usize);
    match t.fs.write(&mut t.flash, handle, slice) {
        Ok(n) => n as i32,
        Err(e) => -(fs_error_code(e)),
    }
}

/// # Safety
/// Same contract as `tracker_format`.
#[no_mangle]
pub unsafe extern "C" fn tracker_close(tracker: *mut Tracker, handle: i64) -> i32 {
    let t = &mut *tracker;
    match t.fs.close(&mut t.flash, raw_to_handle(handle)) {
        Ok(()) => 0,
        Err(e) => fs_error_code(e),
    }
}

/// # Safety
/// Same contract as `tracker_format`.
#[no_mangle]
pub unsafe extern "C" fn tracker_cfg_get(tracker: *mut Tracker, tag: u16, buf: *mut u8, buf_len: u32) -> i32 {
    let t = &mut *tracker;
    match t.config.get(tag as Tag) {
        Ok(value) if value.len() as u32 <= buf_len => {
            ptr::copy_nonoverlapping(value.as_ptr(), buf, value.len());
            value.len() as i32
        }
        Ok(_) => -1,
        Err(_) => -2,
    }
}

/// # Safety
/// `buf` must be valid for reads of `buf_len` bytes. Same contract otherwise.
#[no_mangle]
pub unsafe extern "C" fn tracker_cfg_set(tracker: *mut Tracker, tag: u16, buf: *const u8, buf_len: u32) -> i32 {
    let t = &mut *tracker;
    let slice = core::slice::from_raw_parts(buf, buf_len as usize);
    match t.config.set(tag as Tag, slice) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// # Safety
/// Same contract as `tracker_format`.
#[no_mangle]
pub unsafe extern "C" fn tracker_cfg_save(tracker: *mut Tracker) -> i32 {
    let t = &mut *tracker;
    match t.config.save(&mut t.fs, &mut t.flash) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn fs_error_code(e: FsError) -> i32 {
    use FsError::*;
    match e {
        BadDevice => 1,
        FileNotFound => 2,
        FileAlreadyExists => 3,
        FileProtected => 4,
        NoFreeHandle => 5,
        FileSystemFull => 6,
        EndOfFile => 7,
        FileVersionMismatch => 8,
        FlashMedia => 9,
        _ => 99,
    }
}

/// `HandleId` wraps a plain index; the C side only ever round-trips it.
fn handle_to_raw(h: HandleId) -> i64 {
    h.0 as i64
}

fn raw_to_handle(raw: i64) -> HandleId {
    HandleId(raw as usize)
}
