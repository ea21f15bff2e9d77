//! The `Storage` trait: an abstraction over a NOR-flash backed block device.
//!
//! This is the boundary named component A in the system overview — the flash
//! driver itself is external (platform-specific SPI/QSPI glue); this crate
//! only ever talks to it through this trait, so the file system core can be
//! exercised against an in-memory mock in tests.

use core::fmt::Debug;

use generic_array::{ArrayLength, GenericArray};
use typenum::marker_traits::Unsigned;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ReadError<T> {
    /// `offset` (or `offset / SECTOR_SIZE` for `read_sector`) is beyond the
    /// end of the device.
    OutOfRange { requested_offset: usize },
    Other(T),
}

impl<T> From<T> for ReadError<T> {
    fn from(other: T) -> Self {
        ReadError::Other(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum WriteError<T> {
    OutOfRange { requested_offset: usize },
    /// The device reported it wrote fewer bytes than requested.
    ShortWrite { requested: usize, actual: usize },
    Other(T),
}

impl<T> From<T> for WriteError<T> {
    fn from(other: T) -> Self {
        WriteError::Other(other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EraseError<W, T> {
    OutOfRange { requested_sector: usize },
    ErrorInIndividualErase(WriteError<W>),
    Other(T),
}

impl<W, T> From<T> for EraseError<W, T> {
    fn from(other: T) -> Self {
        EraseError::Other(other)
    }
}

/// Implementors provide sector-aligned read/write/erase access to a raw NOR
/// flash device. There is no notion of a sub-sector erase: `erase_sector`
/// resets an entire erase block back to all-`1`s, which is the only thing
/// that can clear a bit once programmed.
pub trait Storage {
    #[allow(non_camel_case_types)]
    type SECTOR_SIZE: ArrayLength<u8>;

    type ReadErr: Debug;
    type WriteErr: Debug;
    type EraseErr: Debug;

    /// Reads a run of bytes with no particular alignment requirement.
    fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadError<Self::ReadErr>>;

    /// Reads one full sector. Has a default impl in terms of `read_bytes`;
    /// override it if the underlying device has a faster whole-sector path.
    #[inline]
    fn read_sector(
        &mut self,
        sector_idx: usize,
        buffer: &mut GenericArray<u8, Self::SECTOR_SIZE>,
    ) -> Result<(), ReadError<Self::ReadErr>> {
        self.read_bytes(sector_idx * Self::SECTOR_SIZE::to_usize(), buffer.as_mut_slice())
    }

    /// Writes a run of bytes with no particular alignment requirement. Only
    /// bits that are currently `1` may be programmed to `0`; callers must
    /// have erased the destination first.
    fn write_bytes(&mut self, offset: usize, buffer: &[u8]) -> Result<(), WriteError<Self::WriteErr>>;

    /// Writes one full sector.
    #[inline]
    fn write_sector(
        &mut self,
        sector_idx: usize,
        buffer: &GenericArray<u8, Self::SECTOR_SIZE>,
    ) -> Result<(), WriteError<Self::WriteErr>> {
        self.write_bytes(sector_idx * Self::SECTOR_SIZE::to_usize(), buffer.as_slice())
    }

    /// Erases one sector-aligned erase block back to all-`1`s.
    fn erase_sector(&mut self, sector_idx: usize) -> Result<(), EraseError<Self::WriteErr, Self::EraseErr>>;

    /// Number of sectors on the device.
    fn sector_count(&self) -> usize;

    /// One greater than the largest valid byte offset.
    fn byte_count(&self) -> usize {
        self.sector_count() * Self::SECTOR_SIZE::to_usize()
    }
}

#[cfg(any(test, not(feature = "no_std")))]
pub mod mock {
    //! An in-memory `Storage` impl used by tests and benches, analogous to
    //! the teacher's file-backed `Storage` impl but modelling NOR erase
    //! semantics (erase-to-`0xFF`, program-only-clears-bits) rather than
    //! unconstrained random-access writes.

    use super::*;
    extern crate std;
    use std::vec::Vec;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MockErr;

    /// Flash backed by a `Vec<u8>`. `SS` is the sector size (as a `typenum`
    /// unsigned), matching how `Storage::SECTOR_SIZE` is expressed.
    pub struct MemoryFlash<SS: ArrayLength<u8>> {
        bytes: Vec<u8>,
        _ss: core::marker::PhantomData<SS>,
    }

    impl<SS: ArrayLength<u8>> MemoryFlash<SS> {
        pub fn new(sector_count: usize) -> Self {
            Self {
                bytes: std::vec![0xFFu8; sector_count * SS::to_usize()],
                _ss: core::marker::PhantomData,
            }
        }

        pub fn raw(&self) -> &[u8] {
            &self.bytes
        }
    }

    impl<SS: ArrayLength<u8>> Storage for MemoryFlash<SS> {
        type SECTOR_SIZE = SS;
        type ReadErr = MockErr;
        type WriteErr = MockErr;
        type EraseErr = MockErr;

        fn read_bytes(&mut self, offset: usize, buffer: &mut [u8]) -> Result<(), ReadError<Self::ReadErr>> {
            let end = offset + buffer.len();
            if end > self.bytes.len() {
                return Err(ReadError::OutOfRange { requested_offset: offset });
            }
            buffer.copy_from_slice(&self.bytes[offset..end]);
            Ok(())
        }

        fn write_bytes(&mut self, offset: usize, buffer: &[u8]) -> Result<(), WriteError<Self::WriteErr>> {
            let end = offset + buffer.len();
            if end > self.bytes.len() {
                return Err(WriteError::OutOfRange { requested_offset: offset });
            }
            // NOR semantics: a program can only clear bits.
            for (dst, src) in self.bytes[offset..end].iter_mut().zip(buffer) {
                *dst &= *src;
            }
            Ok(())
        }

        fn erase_sector(&mut self, sector_idx: usize) -> Result<(), EraseError<Self::WriteErr, Self::EraseErr>> {
            if sector_idx >= self.sector_count() {
                return Err(EraseError::OutOfRange { requested_sector: sector_idx });
            }
            let ss = SS::to_usize();
            let start = sector_idx * ss;
            for b in &mut self.bytes[start..start + ss] {
                *b = 0xFF;
            }
            Ok(())
        }

        fn sector_count(&self) -> usize {
            self.bytes.len() / SS::to_usize()
        }
    }
}
