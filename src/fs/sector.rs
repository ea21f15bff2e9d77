//! Bit-exact encode/decode for the header that begins every flash sector:
//! `{ file_id, user_flags, next_sector, reserved, allocation_counter,
//! session_records[..] }`, followed by user data. See the crate's external
//! interface notes for the byte layout; offsets below must stay in sync
//! with it.

use crate::util::Bits;
use core::convert::TryInto;

pub const FREE_FILE_ID: u8 = 0xFF;
pub const NONE_FILE_ID: u8 = 0xFF;
pub const END_OF_CHAIN: u8 = 0xFF;
const RESERVED_BYTE: u8 = 0xFF;
const UNUSED_SESSION_RECORD: u8 = 0xFF;

/// `user_flags` bit 7: `0` = file is circular, `1` (erased default) = it is not.
const CIRCULAR_BIT: u32 = 7;
/// `user_flags` bit 6: `0` = file is protected, `1` (erased default) = it is not.
///
/// NOR flash can only clear bits on a program; a freshly erased sector reads
/// all-`1`s, so "normal" is encoded as `1` and the feature being active as
/// `0`. Turning a feature back off therefore always requires relocating the
/// header to a freshly erased sector (`fs::protect`/`fs::unprotect`).
const PROTECTED_BIT: u32 = 6;
/// Mask of the bits available to the application (bits 5..0).
pub const APP_FLAGS_MASK: u8 = 0x3F;

const FILE_ID_OFFSET: usize = 0;
const USER_FLAGS_OFFSET: usize = 1;
const NEXT_SECTOR_OFFSET: usize = 2;
const RESERVED_OFFSET: usize = 3;
const ALLOC_COUNTER_OFFSET: usize = 4;
const SESSION_RECORDS_OFFSET: usize = 8;

/// The sector header, decoded into memory. Generic over the number of
/// write-session slots a sector carries (a compile-time platform constant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader<const NUM_WRITE_SESSIONS: usize> {
    pub file_id: u8,
    pub user_flags: u8,
    pub next_sector: u8,
    pub allocation_counter: u32,
    pub session_records: [u8; NUM_WRITE_SESSIONS],
}

impl<const N: usize> SectorHeader<N> {
    /// Total header size in bytes, including the session-record table.
    pub const SIZE: usize = SESSION_RECORDS_OFFSET + N;

    /// Builds the header for a newly erased, free sector. `allocation_counter`
    /// must already reflect the erase that just happened (i.e. it has been
    /// incremented).
    pub fn free(allocation_counter: u32) -> Self {
        Self {
            file_id: FREE_FILE_ID,
            user_flags: 0xFF,
            next_sector: END_OF_CHAIN,
            allocation_counter,
            session_records: [UNUSED_SESSION_RECORD; N],
        }
    }

    /// Builds the header for a sector newly allocated to `file_id`.
    pub fn new_for_file(
        file_id: u8,
        app_flags: u8,
        circular: bool,
        protected: bool,
        allocation_counter: u32,
    ) -> Self {
        let mut flags: u8 = (app_flags & APP_FLAGS_MASK) | 0b1100_0000;
        flags.set_bit(CIRCULAR_BIT, !circular);
        flags.set_bit(PROTECTED_BIT, !protected);

        Self {
            file_id,
            user_flags: flags,
            next_sector: END_OF_CHAIN,
            allocation_counter,
            session_records: [UNUSED_SESSION_RECORD; N],
        }
    }

    pub fn is_free(&self) -> bool {
        self.file_id == FREE_FILE_ID
    }

    pub fn is_end_of_chain(&self) -> bool {
        self.next_sector == END_OF_CHAIN
    }

    pub fn is_circular(&self) -> bool {
        !self.user_flags.bit(CIRCULAR_BIT)
    }

    pub fn is_protected(&self) -> bool {
        !self.user_flags.bit(PROTECTED_BIT)
    }

    pub fn app_flags(&self) -> u8 {
        self.user_flags & APP_FLAGS_MASK
    }

    pub fn set_protected(&mut self, protected: bool) {
        self.user_flags.set_bit(PROTECTED_BIT, !protected);
    }

    /// Highest valid (not "unused") session record: the committed, live
    /// length of user data in this sector. `0` if no session was ever
    /// flushed here.
    pub fn live_length(&self) -> usize {
        self.session_records
            .iter()
            .rev()
            .find(|&&b| b != UNUSED_SESSION_RECORD)
            .map(|&b| b as usize)
            .unwrap_or(0)
    }

    /// Index of the first unused session slot, if the sector has room for
    /// another `flush`.
    pub fn next_free_session_slot(&self) -> Option<usize> {
        self.session_records.iter().position(|&b| b == UNUSED_SESSION_RECORD)
    }

    /// Byte offset (from the start of the sector) of a given session slot.
    pub fn record_byte_offset(slot: usize) -> usize {
        SESSION_RECORDS_OFFSET + slot
    }

    pub fn decode(sector: &[u8]) -> Self {
        debug_assert!(sector.len() >= Self::SIZE);

        let mut session_records = [UNUSED_SESSION_RECORD; N];
        session_records.copy_from_slice(&sector[SESSION_RECORDS_OFFSET..SESSION_RECORDS_OFFSET + N]);

        Self {
            file_id: sector[FILE_ID_OFFSET],
            user_flags: sector[USER_FLAGS_OFFSET],
            next_sector: sector[NEXT_SECTOR_OFFSET],
            allocation_counter: u32::from_le_bytes(
                sector[ALLOC_COUNTER_OFFSET..ALLOC_COUNTER_OFFSET + 4].try_into().unwrap(),
            ),
            session_records,
        }
    }

    pub fn encode(&self, sector: &mut [u8]) {
        debug_assert!(sector.len() >= Self::SIZE);

        sector[FILE_ID_OFFSET] = self.file_id;
        sector[USER_FLAGS_OFFSET] = self.user_flags;
        sector[NEXT_SECTOR_OFFSET] = self.next_sector;
        sector[RESERVED_OFFSET] = RESERVED_BYTE;
        sector[ALLOC_COUNTER_OFFSET..ALLOC_COUNTER_OFFSET + 4]
            .copy_from_slice(&self.allocation_counter.to_le_bytes());
        sector[SESSION_RECORDS_OFFSET..SESSION_RECORDS_OFFSET + N]
            .copy_from_slice(&self.session_records);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_bytes() {
        let h: SectorHeader<4> = SectorHeader::new_for_file(3, 0x05, true, false, 7);
        let mut buf = [0u8; 64];
        h.encode(&mut buf);
        let back = SectorHeader::<4>::decode(&buf);
        assert_eq!(h, back);
        assert!(back.is_circular());
        assert!(!back.is_protected());
        assert_eq!(back.app_flags(), 0x05);
    }

    #[test]
    fn live_length_is_highest_valid_record() {
        let mut h: SectorHeader<4> = SectorHeader::free(1);
        h.file_id = 1;
        assert_eq!(h.live_length(), 0);
        h.session_records = [10, 20, 0xFF, 0xFF];
        assert_eq!(h.live_length(), 20);
        assert_eq!(h.next_free_session_slot(), Some(2));
    }

    #[test]
    fn freshly_erased_sector_is_free_and_unprotected() {
        let h: SectorHeader<4> = SectorHeader::free(3);
        assert!(h.is_free());
        assert!(h.is_end_of_chain());
        assert!(!h.is_protected());
        assert!(!h.is_circular());
    }
}
