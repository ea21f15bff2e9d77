//! Open file handles: a fixed pool, one slot per concurrently open file.

/// How a file was opened; fixes which operations are legal on the handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create a new, non-circular file. Fails if the file already exists.
    Create,
    /// Create a new circular file. Fails if the file already exists.
    CreateCircular,
    /// Append to an existing file, starting after its current live data.
    WriteOnly,
    ReadOnly,
}

#[derive(Debug, Clone, Copy)]
pub struct Handle {
    pub file_id: u8,
    pub mode: OpenMode,
    /// Sector holding the file's current header chain head.
    pub root_sector: usize,
    /// Sector the next read/write will touch.
    pub current_sector: usize,
    /// Byte offset into `current_sector`'s data region.
    pub offset: usize,
    /// Bytes written since the handle's last successful `flush`.
    pub bytes_since_flush: usize,
    pub dirty: bool,
}

/// Opaque index into a `FileSystem`'s handle pool, returned by `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleId(pub(crate) usize);
