//! Recoverable kernel errors.
//!
//! Anything that is the caller's fault (a bad descriptor, a full table, an
//! unmapped user pointer) is a [`SysError`] and travels back to user space as
//! a negative integer. Broken kernel invariants are not errors: they panic.

use core::fmt;

use crate::fs::FsError;
use crate::loader::LoadError;
use crate::memory::pmm::OutOfMemory;
use crate::memory::vmm::{Fault, MapError};

/// Failure of a system call or of a kernel operation on its behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysError {
    /// No such file or directory.
    NoEntry,
    /// Descriptor number not open, or open as the wrong kind.
    BadDescriptor,
    /// Every descriptor slot of the process is in use.
    NoDescriptors,
    /// Malformed argument.
    InvalidArgument,
    /// User pointer not mapped or not user-accessible.
    BadAddress,
    /// `wait` with no children.
    NoChildren,
    /// No live process with that pid.
    NoProcess,
    /// Process table (or another kernel table) is full.
    TableFull,
    /// Physical memory exhausted.
    OutOfMemory,
    /// The calling process was killed while blocked.
    Killed,
    /// Target already exists.
    Exists,
    /// A path component is not a directory.
    NotDirectory,
    /// A directory where a file was required.
    IsDirectory,
    /// Nothing available and the call does not block.
    WouldBlock,
    /// Unknown system call.
    NotSupported,
    /// The collaborator behind a descriptor failed.
    Io,
}

pub type SysResult<T> = Result<T, SysError>;

impl SysError {
    /// Errno-style magnitude.
    pub const fn code(self) -> i64 {
        match self {
            SysError::NoProcess => 3,
            SysError::Killed => 4,
            SysError::Io => 5,
            SysError::NoEntry => 2,
            SysError::BadDescriptor => 9,
            SysError::NoChildren => 10,
            SysError::WouldBlock => 11,
            SysError::OutOfMemory => 12,
            SysError::BadAddress => 14,
            SysError::Exists => 17,
            SysError::NotDirectory => 20,
            SysError::IsDirectory => 21,
            SysError::InvalidArgument => 22,
            SysError::TableFull => 23,
            SysError::NoDescriptors => 24,
            SysError::NotSupported => 38,
        }
    }

    /// Value placed in the caller's return register.
    pub const fn as_return(self) -> i64 {
        -self.code()
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SysError::NoEntry => "no such file or directory",
            SysError::BadDescriptor => "bad descriptor",
            SysError::NoDescriptors => "too many open files",
            SysError::InvalidArgument => "invalid argument",
            SysError::BadAddress => "bad address",
            SysError::NoChildren => "no children",
            SysError::NoProcess => "no such process",
            SysError::TableFull => "table full",
            SysError::OutOfMemory => "out of memory",
            SysError::Killed => "killed",
            SysError::Exists => "already exists",
            SysError::NotDirectory => "not a directory",
            SysError::IsDirectory => "is a directory",
            SysError::WouldBlock => "would block",
            SysError::NotSupported => "not supported",
            SysError::Io => "i/o error",
        };
        f.write_str(text)
    }
}

impl From<OutOfMemory> for SysError {
    fn from(_: OutOfMemory) -> Self {
        SysError::OutOfMemory
    }
}

impl From<MapError> for SysError {
    fn from(err: MapError) -> Self {
        match err {
            MapError::OutOfMemory => SysError::OutOfMemory,
        }
    }
}

impl From<Fault> for SysError {
    fn from(_: Fault) -> Self {
        SysError::BadAddress
    }
}

impl From<FsError> for SysError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound => SysError::NoEntry,
            FsError::Exists => SysError::Exists,
            FsError::NotDirectory => SysError::NotDirectory,
            FsError::IsDirectory => SysError::IsDirectory,
            FsError::InvalidPath => SysError::InvalidArgument,
            FsError::Io => SysError::Io,
        }
    }
}

impl From<LoadError> for SysError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::NotFound => SysError::NoEntry,
            LoadError::BadFormat | LoadError::OutOfRange => SysError::InvalidArgument,
            LoadError::OutOfMemory => SysError::OutOfMemory,
            LoadError::Io => SysError::Io,
        }
    }
}
