//! The file system's failure taxonomy.
//!
//! `NoError` is a wire-protocol concept, not a value of this type: every
//! fallible file system operation returns a plain `Result`, never a sentinel
//! success variant.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FsError {
    /// The underlying `Storage` rejected an offset or sector index that this
    /// layer believed was valid, or a handle was used after being closed.
    BadDevice,
    FileNotFound,
    FileAlreadyExists,
    FileProtected,
    NoFreeHandle,
    FileSystemFull,
    EndOfFile,
    FileVersionMismatch,
    FlashMedia,
}
