// =============================================================================
// Cinder — File-System Seam
// =============================================================================
//
// The kernel does not implement a file system. It consumes one through three
// traits and keeps only the per-process bookkeeping on its side:
//
//   FileSystem : path-level operations (open, open_dir, mkdir, unlink)
//   FileHandle : one open file (read, write, seek, size, close)
//   DirHandle  : one open directory (next entry, close)
//
//   file.rs: open-file objects, descriptors, the per-process table
//   path.rs: resolving a user path against the working directory
//   ops.rs : the kernel operations the file system calls are built on
// =============================================================================

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

use bitflags::bitflags;

pub mod file;
pub mod ops;
pub mod path;

pub use file::{Descriptor, FileTable, OpenDir, OpenFile};
pub use path::resolve;

/// Failure reported by the file-system collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    Exists,
    NotDirectory,
    IsDirectory,
    InvalidPath,
    Io,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FsError::NotFound => "not found",
            FsError::Exists => "exists",
            FsError::NotDirectory => "not a directory",
            FsError::IsDirectory => "is a directory",
            FsError::InvalidPath => "invalid path",
            FsError::Io => "i/o error",
        };
        f.write_str(text)
    }
}

bitflags! {
    /// Mode bits passed to `open`. Values are part of the syscall ABI.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ   = 1 << 0;
        const WRITE  = 1 << 1;
        /// Create the file if it does not exist.
        const CREATE = 1 << 2;
        /// Every write goes to the current end of file.
        const APPEND = 1 << 3;
        /// Cut an existing file to zero length on open.
        const TRUNC  = 1 << 4;
    }
}

/// Origin of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

impl Whence {
    /// Decodes the ABI value (0, 1, 2).
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Whence::Start),
            1 => Some(Whence::Current),
            2 => Some(Whence::End),
            _ => None,
        }
    }
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// An open file inside the collaborator.
pub trait FileHandle: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, data: &[u8]) -> Result<usize, FsError>;
    /// Moves the cursor and returns its new absolute position.
    fn seek(&mut self, offset: i64, whence: Whence) -> Result<u64, FsError>;
    fn size(&self) -> u64;
    /// Called exactly once, when the last descriptor referring to the file
    /// goes away.
    fn close(&mut self) {}
}

/// An open directory inside the collaborator.
pub trait DirHandle: Send {
    /// The next entry, or `None` once the listing is exhausted.
    fn next_entry(&mut self) -> Result<Option<DirEntry>, FsError>;
    fn close(&mut self) {}
}

/// The file system the kernel mounts. Paths are absolute and normalised.
pub trait FileSystem: Send + Sync {
    fn open(&self, path: &str, flags: OpenFlags) -> Result<Box<dyn FileHandle>, FsError>;
    fn open_dir(&self, path: &str) -> Result<Box<dyn DirHandle>, FsError>;
    fn mkdir(&self, path: &str) -> Result<(), FsError>;
    fn unlink(&self, path: &str) -> Result<(), FsError>;
    fn is_dir(&self, path: &str) -> bool;
}
