//! The flash file system core (component C): a wear-levelled, crash-consistent
//! store of named files, each a chain of sectors, on top of a raw `Storage`.
//!
//! A `FileSystem` keeps a full in-memory index of every sector's decoded
//! header (one per physical sector) so that lookups, wear-level selection and
//! chain walks never touch flash; only the user-data reads/writes and the
//! handful of header read/writes that `mount`/`format`/allocation need to do
//! actually go to the device.

pub mod alloc;
pub mod error;
pub mod handle;
pub mod sector;

pub use error::FsError;
pub use handle::{Handle, HandleId, OpenMode};
pub use sector::SectorHeader;

use core::marker::PhantomData;
use generic_array::GenericArray;
use typenum::marker_traits::Unsigned;

use crate::storage::Storage;
use sector::NONE_FILE_ID;

/// Chunk size used whenever this module needs to copy user data from one
/// sector to another (relocations, not a limit on file size).
const COPY_CHUNK: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Total live (flushed) bytes across the whole file, or free capacity in
    /// bytes when queried for `NONE_FILE_ID`.
    pub size: usize,
    pub app_flags: u8,
    pub is_circular: bool,
    pub is_protected: bool,
}

pub struct FileSystem<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>
where
    S: Storage,
{
    headers: [SectorHeader<NUM_WRITE_SESSIONS>; N_SECTORS],
    handles: [Option<Handle>; MAX_HANDLES],
    _device: PhantomData<S>,
}

impl<S, const N_SECTORS: usize, const NUM_WRITE_SESSIONS: usize, const MAX_HANDLES: usize>
    FileSystem<S, N_SECTORS, NUM_WRITE_SESSIONS, MAX_HANDLES>
where
    S: Storage,
{
    const HEADER_SIZE: usize = SectorHeader::<NUM_WRITE_SESSIONS>::SIZE;

    pub fn sector_size() -> usize {
        <S::SECTOR_SIZE as Unsigned>::to_usize()
    }

    /// Bytes of file payload a single sector in this file's chain can hold,
    /// after the sector header.
    pub fn usable_bytes_per_sector() -> usize {
        Self::sector_size() - Self::HEADER_SIZE
    }

    /// Reads every sector's header off the device and builds the in-memory
    /// index. Does not format or otherwise touch sectors whose header
    /// doesn't parse as free or as belonging to a file; an unrecognised
    /// sector is simply indexed as-is (mount never writes to the device).
    pub fn mount(device: &mut S) -> Result<Self, FsError> {
        debug_assert!(
            Self::usable_bytes_per_sector() <= u8::MAX as usize,
            "a sector's data region must fit a single-byte session record"
        );

        let mut headers: [SectorHeader<NUM_WRITE_SESSIONS>; N_SECTORS] = [SectorHeader::free(0); N_SECTORS];
        let mut buf = GenericArray::<u8, S::SECTOR_SIZE>::default();
        for (idx, header) in headers.iter_mut().enumerate() {
            device
                .read_bytes(idx * Self::sector_size(), &mut buf[..Self::HEADER_SIZE])
                .map_err(|_| FsError::FlashMedia)?;
            *header = SectorHeader::decode(&buf[..Self::HEADER_SIZE]);
        }

        Ok(Self {
            headers,
            handles: [None; MAX_HANDLES],
            _device: PhantomData,
        })
    }

    /// Erases every sector and rebuilds it as free, preserving each sector's
    /// wear-level allocation counter.
    pub fn format(&mut self, device: &mut S) -> Result<(), FsError> {
        for idx in 0..N_SECTORS {
            let counter = self.headers[idx].allocation_counter;
            device.erase_sector(idx).map_err(|_| FsError::FlashMedia)?;
            let fresh = SectorHeader::free(counter.wrapping_add(1));
            self.write_header(device, idx, &fresh)?;
            self.headers[idx] = fresh;
        }
        self.handles = [None; MAX_HANDLES];
        Ok(())
    }

    fn write_header(
        &self,
        device: &mut S,
        sector: usize,
        header: &SectorHeader<NUM_WRITE_SESSIONS>,
    ) -> Result<(), FsError> {
        let mut buf = GenericArray::<u8, S::SECTOR_SIZE>::default();
        header.encode(&mut buf[..Self::HEADER_SIZE]);
        device
            .write_bytes(sector * Self::sector_size(), &buf[..Self::HEADER_SIZE])
            .map_err(|_| FsError::FlashMedia)
    }

    fn next_in_chain(&self, sector: usize) -> Option<usize> {
        let header = &self.headers[sector];
        if header.is_end_of_chain() {
            None
        } else {
            Some(header.next_sector as usize)
        }
    }

    fn tail_sector(&self, root: usize) -> usize {
        let mut cur = root;
        while let Some(next) = self.next_in_chain(cur) {
            cur = next;
        }
        cur
    }

    /// The sector holding `file_id`'s chain head: the one sector with this
    /// `file_id` that no other same-file sector's `next_sector` points at.
    fn find_root_sector(&self, file_id: u8) -> Option<usize> {
        (0..N_SECTORS)
            .filter(|&i| self.headers[i].file_id == file_id)
            .find(|&i| {
                !(0..N_SECTORS).any(|j| {
                    j != i && self.headers[j].file_id == file_id && self.headers[j].next_sector as usize == i
                })
            })
    }

    fn pick_free_sector(&self) -> Option<usize> {
        alloc::pick_free_sector(&self.headers)
    }

    fn handle(&self, h: HandleId) -> Result<&Handle, FsError> {
        self.handles.get(h.0).and_then(|o| o.as_ref()).ok_or(FsError::BadDevice)
    }

    fn handle_mut(&mut self, h: HandleId) -> Result<&mut Handle, FsError> {
        self.handles.get_mut(h.0).and_then(|o| o.as_mut()).ok_or(FsError::BadDevice)
    }

    pub fn open(&mut self, device: &mut S, file_id: u8, mode: OpenMode, app_flags: u8) -> Result<HandleId, FsError> {
        if file_id == NONE_FILE_ID {
            return Err(FsError::FileNotFound);
        }

        let slot = self.handles.iter().position(|h| h.is_none()).ok_or(FsError::NoFreeHandle)?;
        let existing_root = self.find_root_sector(file_id);

        let (root_sector, current_sector, offset) = match mode {
            OpenMode::Create | OpenMode::CreateCircular => {
                if existing_root.is_some() {
                    return Err(FsError::FileAlreadyExists);
                }
                let free = self.pick_free_sector().ok_or(FsError::FileSystemFull)?;
                let counter = self.headers[free].allocation_counter;
                device.erase_sector(free).map_err(|_| FsError::FlashMedia)?;
                let circular = matches!(mode, OpenMode::CreateCircular);
                let header = SectorHeader::new_for_file(file_id, app_flags, circular, false, counter.wrapping_add(1));
                self.write_header(device, free, &header)?;
                self.headers[free] = header;
                (free, free, 0)
            }
            OpenMode::WriteOnly => {
                let root = existing_root.ok_or(FsError::FileNotFound)?;
                if self.headers[root].is_protected() {
                    return Err(FsError::FileProtected);
                }
                let tail = self.tail_sector(root);
                let off = self.headers[tail].live_length();
                (root, tail, off)
            }
            OpenMode::ReadOnly => {
                let root = existing_root.ok_or(FsError::FileNotFound)?;
                (root, root, 0)
            }
        };

        self.handles[slot] = Some(Handle {
            file_id,
            mode,
            root_sector,
            current_sector,
            offset,
            bytes_since_flush: 0,
            dirty: false,
        });

        Ok(HandleId(slot))
    }

    pub fn read(&mut self, device: &mut S, h: HandleId, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut written = 0;
        while written < buf.len() {
            let (cur, off) = {
                let hd = self.handle(h)?;
                (hd.current_sector, hd.offset)
            };
            let live = self.headers[cur].live_length();

            if off >= live {
                match self.next_in_chain(cur) {
                    Some(next) => {
                        let hd = self.handle_mut(h)?;
                        hd.current_sector = next;
                        hd.offset = 0;
                        continue;
                    }
                    None => break,
                }
            }

            let to_copy = core::cmp::min(buf.len() - written, live - off);
            device
                .read_bytes(cur * Self::sector_size() + Self::HEADER_SIZE + off, &mut buf[written..written + to_copy])
                .map_err(|_| FsError::FlashMedia)?;
            written += to_copy;
            self.handle_mut(h)?.offset += to_copy;
        }

        if written == 0 && !buf.is_empty() {
            return Err(FsError::EndOfFile);
        }
        Ok(written)
    }

    pub fn write(&mut self, device: &mut S, h: HandleId, buf: &[u8]) -> Result<usize, FsError> {
        let mut written = 0;
        while written < buf.len() {
            let (cur, off) = {
                let hd = self.handle(h)?;
                (hd.current_sector, hd.offset)
            };
            let usable = Self::usable_bytes_per_sector();

            if off >= usable {
                self.extend_chain(device, h)?;
                continue;
            }

            let to_copy = core::cmp::min(buf.len() - written, usable - off);
            device
                .write_bytes(cur * Self::sector_size() + Self::HEADER_SIZE + off, &buf[written..written + to_copy])
                .map_err(|_| FsError::FlashMedia)?;
            written += to_copy;

            let hd = self.handle_mut(h)?;
            hd.offset += to_copy;
            hd.bytes_since_flush += to_copy;
            hd.dirty = true;
        }
        Ok(written)
    }

    /// Writes a session record capturing the bytes written since the last
    /// flush. A no-op if nothing has been written, so polling `flush` never
    /// burns through a sector's session-record budget.
    pub fn flush(&mut self, device: &mut S, h: HandleId) -> Result<(), FsError> {
        let (sector, pending) = {
            let hd = self.handle(h)?;
            (hd.current_sector, hd.bytes_since_flush)
        };
        if pending == 0 {
            return Ok(());
        }

        let mut header = self.headers[sector];
        let new_len = header.live_length() + pending;

        match header.next_free_session_slot() {
            Some(slot) => {
                debug_assert!(
                    new_len <= u8::MAX as usize,
                    "sector data region too large for a single-byte session record"
                );
                let offset = sector * Self::sector_size() + SectorHeader::<NUM_WRITE_SESSIONS>::record_byte_offset(slot);
                device.write_bytes(offset, &[new_len as u8]).map_err(|_| FsError::FlashMedia)?;
                header.session_records[slot] = new_len as u8;
                self.headers[sector] = header;

                let hd = self.handle_mut(h)?;
                hd.bytes_since_flush = 0;
                hd.dirty = false;
                Ok(())
            }
            // Every session slot in this sector is used: seal it as-is and
            // carry the not-yet-recorded tail forward into a fresh sector,
            // even though this one may not be byte-full.
            None => self.seal_and_carry_forward(device, h),
        }
    }

    fn seal_and_carry_forward(&mut self, device: &mut S, h: HandleId) -> Result<(), FsError> {
        let (current_sector, pending) = {
            let hd = self.handle(h)?;
            (hd.current_sector, hd.bytes_since_flush)
        };
        let last_flushed_len = self.headers[current_sector].live_length();

        let new_sector = self.allocate_and_chain(device, h)?;

        let carried = if new_sector == current_sector {
            // The only sector we could copy out of was itself reclaimed to
            // make room. Those bytes never had a session record, so per the
            // crash-consistency rule they were never durably "there".
            0
        } else {
            let mut chunk = [0u8; COPY_CHUNK];
            let mut copied = 0usize;
            while copied < pending {
                let n = core::cmp::min(COPY_CHUNK, pending - copied);
                device
                    .read_bytes(current_sector * Self::sector_size() + Self::HEADER_SIZE + last_flushed_len + copied, &mut chunk[..n])
                    .map_err(|_| FsError::FlashMedia)?;
                device
                    .write_bytes(new_sector * Self::sector_size() + Self::HEADER_SIZE + copied, &chunk[..n])
                    .map_err(|_| FsError::FlashMedia)?;
                copied += n;
            }
            pending
        };

        let hd = self.handle_mut(h)?;
        hd.current_sector = new_sector;
        hd.offset = carried;
        hd.bytes_since_flush = carried;
        Ok(())
    }

    /// Flushes, then allocates and chains a fresh sector because the current
    /// one is byte-full.
    fn extend_chain(&mut self, device: &mut S, h: HandleId) -> Result<(), FsError> {
        self.flush(device, h)?;
        let new_sector = self.allocate_and_chain(device, h)?;
        let hd = self.handle_mut(h)?;
        hd.current_sector = new_sector;
        hd.offset = 0;
        Ok(())
    }

    /// Picks a sector for `h`'s file to continue into (wear-levelled if one
    /// is free; reclaiming this file's own head sector if it's circular and
    /// the device has none free), writes its header and links the previous
    /// tail to it. Does not move the handle's cursor.
    fn allocate_and_chain(&mut self, device: &mut S, h: HandleId) -> Result<usize, FsError> {
        let (file_id, root_sector, current_sector) = {
            let hd = self.handle(h)?;
            (hd.file_id, hd.root_sector, hd.current_sector)
        };
        let root_header = self.headers[root_sector];
        let is_circular = root_header.is_circular();

        let new_sector = if let Some(free) = self.pick_free_sector() {
            free
        } else if is_circular {
            let new_root = self.next_in_chain(root_sector).ok_or(FsError::FileSystemFull)?;
            self.handle_mut(h)?.root_sector = new_root;
            root_sector
        } else {
            return Err(FsError::FileSystemFull);
        };

        let counter = self.headers[new_sector].allocation_counter;
        device.erase_sector(new_sector).map_err(|_| FsError::FlashMedia)?;
        let header = SectorHeader::new_for_file(
            file_id,
            root_header.app_flags(),
            is_circular,
            root_header.is_protected(),
            counter.wrapping_add(1),
        );
        self.write_header(device, new_sector, &header)?;
        self.headers[new_sector] = header;

        if current_sector != new_sector {
            let mut old_tail = self.headers[current_sector];
            old_tail.next_sector = new_sector as u8;
            self.write_header(device, current_sector, &old_tail)?;
            self.headers[current_sector] = old_tail;
        }

        Ok(new_sector)
    }

    pub fn close(&mut self, device: &mut S, h: HandleId) -> Result<(), FsError> {
        self.flush(device, h)?;
        self.handles[h.0] = None;
        Ok(())
    }

    pub fn delete(&mut self, device: &mut S, file_id: u8) -> Result<(), FsError> {
        let root = self.find_root_sector(file_id).ok_or(FsError::FileNotFound)?;
        if self.headers[root].is_protected() {
            return Err(FsError::FileProtected);
        }

        let mut cur = Some(root);
        while let Some(s) = cur {
            cur = self.next_in_chain(s);
            let counter = self.headers[s].allocation_counter;
            device.erase_sector(s).map_err(|_| FsError::FlashMedia)?;
            let fresh = SectorHeader::free(counter.wrapping_add(1));
            self.write_header(device, s, &fresh)?;
            self.headers[s] = fresh;
        }
        Ok(())
    }

    /// Sets the protected flag. A pure bit clear (`1` -> `0`), legal to do
    /// in place on NOR flash.
    pub fn protect(&mut self, device: &mut S, file_id: u8) -> Result<(), FsError> {
        let root = self.find_root_sector(file_id).ok_or(FsError::FileNotFound)?;
        if self.headers[root].is_protected() {
            return Ok(());
        }
        let mut header = self.headers[root];
        header.set_protected(true);
        self.write_header(device, root, &header)?;
        self.headers[root] = header;
        Ok(())
    }

    /// Clears the protected flag. Since that means setting a bit back to `1`,
    /// the header (and its sector's live data) must be relocated to a freshly
    /// erased sector.
    pub fn unprotect(&mut self, device: &mut S, file_id: u8) -> Result<(), FsError> {
        let root = self.find_root_sector(file_id).ok_or(FsError::FileNotFound)?;
        let old_header = self.headers[root];
        if !old_header.is_protected() {
            return Ok(());
        }
        let live = old_header.live_length();

        let new_sector = self.pick_free_sector().ok_or(FsError::FileSystemFull)?;
        let counter = self.headers[new_sector].allocation_counter;
        device.erase_sector(new_sector).map_err(|_| FsError::FlashMedia)?;

        let mut relocated =
            SectorHeader::new_for_file(file_id, old_header.app_flags(), old_header.is_circular(), false, counter.wrapping_add(1));
        relocated.next_sector = old_header.next_sector;
        self.write_header(device, new_sector, &relocated)?;

        let mut chunk = [0u8; COPY_CHUNK];
        let mut copied = 0usize;
        while copied < live {
            let n = core::cmp::min(COPY_CHUNK, live - copied);
            device
                .read_bytes(root * Self::sector_size() + Self::HEADER_SIZE + copied, &mut chunk[..n])
                .map_err(|_| FsError::FlashMedia)?;
            device
                .write_bytes(new_sector * Self::sector_size() + Self::HEADER_SIZE + copied, &chunk[..n])
                .map_err(|_| FsError::FlashMedia)?;
            copied += n;
        }
        if live > 0 {
            let offset = new_sector * Self::sector_size() + SectorHeader::<NUM_WRITE_SESSIONS>::record_byte_offset(0);
            device.write_bytes(offset, &[live as u8]).map_err(|_| FsError::FlashMedia)?;
            relocated.session_records[0] = live as u8;
        }
        self.headers[new_sector] = relocated;

        let old_counter = old_header.allocation_counter;
        device.erase_sector(root).map_err(|_| FsError::FlashMedia)?;
        let fresh = SectorHeader::free(old_counter.wrapping_add(1));
        self.write_header(device, root, &fresh)?;
        self.headers[root] = fresh;

        for slot in self.handles.iter_mut().flatten() {
            if slot.file_id == file_id {
                if slot.root_sector == root {
                    slot.root_sector = new_sector;
                }
                if slot.current_sector == root {
                    slot.current_sector = new_sector;
                }
            }
        }
        Ok(())
    }

    pub fn stat(&self, file_id: u8) -> Result<Stat, FsError> {
        if file_id == NONE_FILE_ID {
            let free_sectors = self.headers.iter().filter(|h| h.is_free()).count();
            return Ok(Stat {
                size: free_sectors * Self::usable_bytes_per_sector(),
                app_flags: 0,
                is_circular: false,
                is_protected: false,
            });
        }

        let root = self.find_root_sector(file_id).ok_or(FsError::FileNotFound)?;
        let mut size = 0usize;
        let mut cur = Some(root);
        while let Some(s) = cur {
            size += self.headers[s].live_length();
            cur = self.next_in_chain(s);
        }
        let header = &self.headers[root];
        Ok(Stat {
            size,
            app_flags: header.app_flags(),
            is_circular: header.is_circular(),
            is_protected: header.is_protected(),
        })
    }
}
