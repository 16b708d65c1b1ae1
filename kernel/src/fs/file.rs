//! Open files and the per-process descriptor table.
//!
//! Descriptors are reference-counted: `fork` and `dup` clone the `Arc`, and
//! the collaborator's `close` runs when the last clone is dropped.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::{DirHandle, FileHandle, OpenFlags};
use crate::error::{SysError, SysResult};
use crate::sync::SleepLock;

/// A file opened through the collaborator.
pub struct OpenFile {
    pub(crate) handle: SleepLock<Box<dyn FileHandle>>,
    flags: OpenFlags,
}

impl OpenFile {
    pub fn new(handle: Box<dyn FileHandle>, flags: OpenFlags) -> Self {
        Self {
            handle: SleepLock::new(handle),
            flags,
        }
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub fn readable(&self) -> bool {
        self.flags.contains(OpenFlags::READ)
    }

    pub fn writable(&self) -> bool {
        self.flags.intersects(OpenFlags::WRITE | OpenFlags::APPEND)
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        self.handle.get_mut().close();
    }
}

/// A directory listing in progress.
pub struct OpenDir {
    pub(crate) handle: SleepLock<Box<dyn DirHandle>>,
}

impl OpenDir {
    pub fn new(handle: Box<dyn DirHandle>) -> Self {
        Self {
            handle: SleepLock::new(handle),
        }
    }
}

impl Drop for OpenDir {
    fn drop(&mut self) {
        self.handle.get_mut().close();
    }
}

/// What a descriptor number refers to.
#[derive(Clone)]
pub enum Descriptor {
    /// The console collaborator.
    Console,
    File(Arc<OpenFile>),
    Dir(Arc<OpenDir>),
}

impl core::fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Descriptor::Console => f.write_str("Console"),
            Descriptor::File(file) => write!(f, "File({:?})", file.flags()),
            Descriptor::Dir(_) => f.write_str("Dir"),
        }
    }
}

/// Fixed-capacity descriptor table; the lowest free number is handed out
/// first.
#[derive(Clone, Debug, Default)]
pub struct FileTable {
    slots: Vec<Option<Descriptor>>,
}

impl FileTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Table with standard input, output and error on the console.
    pub fn with_console(capacity: usize) -> Self {
        let mut table = Self::new(capacity);
        for slot in table.slots.iter_mut().take(3) {
            *slot = Some(Descriptor::Console);
        }
        table
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Stores `desc` under the lowest free number.
    pub fn install(&mut self, desc: Descriptor) -> SysResult<usize> {
        let fd = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SysError::NoDescriptors)?;
        self.slots[fd] = Some(desc);
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> SysResult<&Descriptor> {
        self.slots
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(SysError::BadDescriptor)
    }

    /// Removes `fd` and hands back what it referred to.
    pub fn take(&mut self, fd: usize) -> SysResult<Descriptor> {
        self.slots
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(SysError::BadDescriptor)
    }

    /// Second descriptor for the same object.
    pub fn dup(&mut self, fd: usize) -> SysResult<usize> {
        let desc = self.get(fd)?.clone();
        self.install(desc)
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Empties the table. Dropping the result closes whatever was only
    /// referenced from here.
    pub fn drain(&mut self) -> Vec<Descriptor> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}
