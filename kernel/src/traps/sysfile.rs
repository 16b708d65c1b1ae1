//! Descriptor and path system calls.
//!
//! Thin wrappers: fetch the arguments, copy buffers across the user
//! boundary, call the matching operation in `fs::ops`.

use alloc::vec;

use super::syscall::MAX_IO;
use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::fs::{DirEntry, OpenFlags, Whence};

/// Bytes of name in a `readdir` record, NUL padding included.
pub const DIRENT_NAME: usize = 64;
/// `name[64]`, then `size` and `is_dir` as little-endian u64s.
pub const DIRENT_RECORD: usize = DIRENT_NAME + 16;

fn dirent_bytes(entry: &DirEntry) -> [u8; DIRENT_RECORD] {
    let mut out = [0u8; DIRENT_RECORD];
    let name = entry.name.as_bytes();
    let n = name.len().min(DIRENT_NAME - 1);
    out[..n].copy_from_slice(&name[..n]);
    out[DIRENT_NAME..DIRENT_NAME + 8].copy_from_slice(&entry.size.to_le_bytes());
    out[DIRENT_NAME + 8..].copy_from_slice(&u64::from(entry.is_dir).to_le_bytes());
    out
}

impl Kernel {
    fn arg_path(&self, n: usize) -> SysResult<alloc::string::String> {
        self.arg_str(n, self.config.max_path)
    }

    pub(super) fn sys_open(&self) -> SysResult<u64> {
        let path = self.arg_path(0)?;
        let raw = u32::try_from(self.arg(1)?).map_err(|_| SysError::InvalidArgument)?;
        let flags = OpenFlags::from_bits(raw).ok_or(SysError::InvalidArgument)?;
        Ok(self.open(&path, flags)? as u64)
    }

    pub(super) fn sys_close(&self) -> SysResult<u64> {
        self.close(self.arg_index(0)?)?;
        Ok(0)
    }

    pub(super) fn sys_read(&self) -> SysResult<u64> {
        let fd = self.arg_index(0)?;
        let (va, len) = self.arg_buf(1, MAX_IO)?;
        let mut buf = vec![0u8; len];
        let n = self.read(fd, &mut buf)?;
        self.copy_to_user(va, &buf[..n])?;
        Ok(n as u64)
    }

    pub(super) fn sys_write(&self) -> SysResult<u64> {
        let fd = self.arg_index(0)?;
        let (va, len) = self.arg_buf(1, MAX_IO)?;
        let data = self.copy_from_user(va, len)?;
        Ok(self.write(fd, &data)? as u64)
    }

    pub(super) fn sys_lseek(&self) -> SysResult<u64> {
        let fd = self.arg_index(0)?;
        let offset = self.arg_int(1)?;
        let whence = Whence::from_raw(self.arg(2)?).ok_or(SysError::InvalidArgument)?;
        self.lseek(fd, offset, whence)
    }

    pub(super) fn sys_fsize(&self) -> SysResult<u64> {
        self.fsize(self.arg_index(0)?)
    }

    pub(super) fn sys_dup(&self) -> SysResult<u64> {
        Ok(self.dup(self.arg_index(0)?)? as u64)
    }

    pub(super) fn sys_opendir(&self) -> SysResult<u64> {
        let path = self.arg_path(0)?;
        Ok(self.opendir(&path)? as u64)
    }

    pub(super) fn sys_readdir(&self) -> SysResult<u64> {
        let fd = self.arg_index(0)?;
        let record = self.arg(1)?;
        match self.readdir(fd)? {
            Some(entry) => {
                self.copy_to_user(record, &dirent_bytes(&entry))?;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    pub(super) fn sys_closedir(&self) -> SysResult<u64> {
        self.closedir(self.arg_index(0)?)?;
        Ok(0)
    }

    pub(super) fn sys_mkdir(&self) -> SysResult<u64> {
        let path = self.arg_path(0)?;
        self.mkdir(&path)?;
        Ok(0)
    }

    pub(super) fn sys_unlink(&self) -> SysResult<u64> {
        let path = self.arg_path(0)?;
        self.unlink(&path)?;
        Ok(0)
    }

    pub(super) fn sys_chdir(&self) -> SysResult<u64> {
        let path = self.arg_path(0)?;
        self.chdir(&path)?;
        Ok(0)
    }

    /// `getcwd(buf, len)`: the buffer must hold the path and its NUL.
    pub(super) fn sys_getcwd(&self) -> SysResult<u64> {
        let va = self.arg(0)?;
        let len = self.arg_index(1)?;
        let cwd = self.getcwd()?;
        if cwd.len() + 1 > len {
            return Err(SysError::InvalidArgument);
        }
        let mut out = cwd.into_bytes();
        out.push(0);
        self.copy_to_user(va, &out)?;
        Ok(out.len() as u64 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::layout::STACK_TOP;
    use crate::testing;
    use crate::traps::syscall::nr::*;

    const SCRATCH: u64 = STACK_TOP - 2048;
    const BUF: u64 = STACK_TOP - 1024;

    #[test]
    fn console_write_copies_from_user_memory() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        testing::poke(&kernel, 0, BUF, b"hi there");
        assert_eq!(testing::syscall(&kernel, SYS_WRITE, &[1, BUF, 2]), 2);
        assert_eq!(testing::console_output(), b"hi");
    }

    #[test]
    fn open_and_read_into_user_memory() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        testing::add_file("/motd", b"welcome");
        testing::poke(&kernel, 0, SCRATCH, b"/motd\0");
        let read = OpenFlags::READ.bits() as u64;
        assert_eq!(testing::syscall(&kernel, SYS_OPEN, &[SCRATCH, read]), 3);
        assert_eq!(testing::syscall(&kernel, SYS_READ, &[3, BUF, 100]), 7);
        assert_eq!(testing::peek_user(&kernel, 0, BUF, 7), b"welcome");
        assert_eq!(testing::syscall(&kernel, SYS_FSIZE, &[3]), 7);
        assert_eq!(
            testing::syscall(&kernel, SYS_LSEEK, &[3, 0, 7]),
            SysError::InvalidArgument.as_return()
        );
        assert_eq!(
            testing::syscall(&kernel, SYS_OPEN, &[SCRATCH, 1 << 9]),
            SysError::InvalidArgument.as_return()
        );
    }

    #[test]
    fn readdir_writes_one_record_per_entry() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        kernel.mkdir("/etc").unwrap();
        testing::add_file("/etc/motd", b"hello");
        testing::poke(&kernel, 0, SCRATCH, b"/etc\0");
        let fd = testing::syscall(&kernel, SYS_OPENDIR, &[SCRATCH]);
        assert_eq!(fd, 3);

        assert_eq!(testing::syscall(&kernel, SYS_READDIR, &[3, BUF]), 1);
        let record = testing::peek_user(&kernel, 0, BUF, DIRENT_RECORD);
        assert_eq!(&record[..5], b"motd\0");
        assert_eq!(&record[DIRENT_NAME..DIRENT_NAME + 8], &5u64.to_le_bytes());
        assert_eq!(&record[DIRENT_NAME + 8..], &0u64.to_le_bytes());
        assert_eq!(testing::syscall(&kernel, SYS_READDIR, &[3, BUF]), 0);
        assert_eq!(testing::syscall(&kernel, SYS_CLOSEDIR, &[3]), 0);
    }

    #[test]
    fn getcwd_needs_room_for_the_terminator() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        assert_eq!(
            testing::syscall(&kernel, SYS_GETCWD, &[BUF, 1]),
            SysError::InvalidArgument.as_return()
        );
        assert_eq!(testing::syscall(&kernel, SYS_GETCWD, &[BUF, 16]), 1);
        assert_eq!(testing::peek_user(&kernel, 0, BUF, 2), b"/\0");
    }

    #[test]
    fn long_names_are_cut_to_fit_the_record() {
        let entry = DirEntry {
            name: "x".repeat(100),
            size: 1,
            is_dir: true,
        };
        let record = dirent_bytes(&entry);
        assert_eq!(record[DIRENT_NAME - 2], b'x');
        assert_eq!(record[DIRENT_NAME - 1], 0);
        assert_eq!(&record[DIRENT_NAME + 8..], &1u64.to_le_bytes());
    }
}
