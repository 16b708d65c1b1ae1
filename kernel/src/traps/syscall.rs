//! System call numbers, argument fetching and dispatch.
//!
//! The call number arrives in `rax`. Arguments are 64-bit words on the user
//! stack, the first one word above the stack pointer. Every argument is read
//! through the process's page table, so a bad pointer is an error for the
//! caller and never a kernel fault.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::memory::AddressSpace;

/// Syscall numbers. Part of the user ABI; never renumber.
pub mod nr {
    /// `fork()`: duplicate the caller; 0 in the child, child pid in the parent.
    pub const SYS_FORK: u64 = 1;
    /// `exit(status)`: terminate the caller.
    pub const SYS_EXIT: u64 = 2;
    /// `wait(status_ptr)`: reap a child; returns its pid.
    pub const SYS_WAIT: u64 = 3;
    /// `kill(pid)`.
    pub const SYS_KILL: u64 = 4;
    pub const SYS_GETPID: u64 = 5;
    pub const SYS_GETPPID: u64 = 6;
    /// `sbrk(delta)`: grow or shrink the heap; returns the old break.
    pub const SYS_SBRK: u64 = 7;
    /// `sleep(ticks)`.
    pub const SYS_SLEEP: u64 = 8;
    /// `uptime()`: ticks since boot.
    pub const SYS_UPTIME: u64 = 9;
    /// `exec(path, argv)`: `argv` is a NULL-terminated pointer array.
    pub const SYS_EXEC: u64 = 10;
    /// `open(path, flags)`.
    pub const SYS_OPEN: u64 = 11;
    pub const SYS_CLOSE: u64 = 12;
    /// `read(fd, buf, len)`.
    pub const SYS_READ: u64 = 13;
    /// `write(fd, buf, len)`.
    pub const SYS_WRITE: u64 = 14;
    /// `lseek(fd, offset, whence)`.
    pub const SYS_LSEEK: u64 = 15;
    pub const SYS_FSIZE: u64 = 16;
    pub const SYS_DUP: u64 = 17;
    pub const SYS_OPENDIR: u64 = 18;
    /// `readdir(fd, record_ptr)`: 1 with a record written, 0 at the end.
    pub const SYS_READDIR: u64 = 19;
    pub const SYS_CLOSEDIR: u64 = 20;
    pub const SYS_MKDIR: u64 = 21;
    pub const SYS_UNLINK: u64 = 22;
    pub const SYS_CHDIR: u64 = 23;
    /// `getcwd(buf, len)`: returns the path length.
    pub const SYS_GETCWD: u64 = 24;
    /// `kcall(name, arg)`: call a driver-registered kernel operation.
    pub const SYS_KCALL: u64 = 25;
    /// `msgsend(pid, buf, len)`.
    pub const SYS_MSGSEND: u64 = 26;
    /// `msgrecv(buf, len, sender_ptr)`: returns the message size.
    pub const SYS_MSGRECV: u64 = 27;
    pub const SYS_MSGWAIT: u64 = 28;
    pub const SYS_PTY_CREATE: u64 = 29;
    /// `pty_read(id, buf, len)`.
    pub const SYS_PTY_READ: u64 = 30;
    /// `pty_write(id, buf, len)`.
    pub const SYS_PTY_WRITE: u64 = 31;
    pub const SYS_PTY_CLOSE: u64 = 32;
    /// `pty_switch(id)`: a negative id hands console input back to the console.
    pub const SYS_PTY_SWITCH: u64 = 33;
    /// `proc_status(pid)`: 0 running, 1 exited, 2 no such process.
    pub const SYS_PROC_STATUS: u64 = 34;
    pub const SYS_YIELD: u64 = 35;
    pub const SYS_SETNAME: u64 = 36;
    /// `dlgrow(delta)`: resize the library region; returns its old end.
    pub const SYS_DLGROW: u64 = 37;
    /// `stackgrow(pages)`: returns the new lowest stack address.
    pub const SYS_STACKGROW: u64 = 38;
    /// `freemem()`: free physical memory in bytes.
    pub const SYS_FREEMEM: u64 = 39;
    /// `procinfo(index, record_ptr)`.
    pub const SYS_PROCINFO: u64 = 40;
    /// `log(buf, len)`: one line into the kernel log.
    pub const SYS_LOG: u64 = 41;
}

/// Most bytes moved by one `read` or `write`; longer requests come back
/// short.
pub const MAX_IO: usize = 64 * 1024;

impl Kernel {
    /// Runs system call `nr` for the current process. Returns the value for
    /// `rax`: the result, or a negative error code.
    pub(crate) fn syscall(&self, nr: u64) -> i64 {
        use self::nr::*;

        let result = match nr {
            SYS_FORK => self.sys_fork(),
            SYS_EXIT => self.sys_exit(),
            SYS_WAIT => self.sys_wait(),
            SYS_KILL => self.sys_kill(),
            SYS_GETPID => self.sys_getpid(),
            SYS_GETPPID => self.sys_getppid(),
            SYS_SBRK => self.sys_sbrk(),
            SYS_SLEEP => self.sys_sleep(),
            SYS_UPTIME => Ok(self.uptime()),
            SYS_EXEC => self.sys_exec(),
            SYS_OPEN => self.sys_open(),
            SYS_CLOSE => self.sys_close(),
            SYS_READ => self.sys_read(),
            SYS_WRITE => self.sys_write(),
            SYS_LSEEK => self.sys_lseek(),
            SYS_FSIZE => self.sys_fsize(),
            SYS_DUP => self.sys_dup(),
            SYS_OPENDIR => self.sys_opendir(),
            SYS_READDIR => self.sys_readdir(),
            SYS_CLOSEDIR => self.sys_closedir(),
            SYS_MKDIR => self.sys_mkdir(),
            SYS_UNLINK => self.sys_unlink(),
            SYS_CHDIR => self.sys_chdir(),
            SYS_GETCWD => self.sys_getcwd(),
            SYS_KCALL => self.sys_kcall(),
            SYS_MSGSEND => self.sys_msgsend(),
            SYS_MSGRECV => self.sys_msgrecv(),
            SYS_MSGWAIT => self.wait_message().map(|()| 0),
            SYS_PTY_CREATE => self.pty_create().map(|id| id as u64),
            SYS_PTY_READ => self.sys_pty_read(),
            SYS_PTY_WRITE => self.sys_pty_write(),
            SYS_PTY_CLOSE => self.sys_pty_close(),
            SYS_PTY_SWITCH => self.sys_pty_switch(),
            SYS_PROC_STATUS => self.sys_proc_status(),
            SYS_YIELD => {
                self.yield_now();
                Ok(0)
            }
            SYS_SETNAME => self.sys_setname(),
            SYS_DLGROW => self.sys_dlgrow(),
            SYS_STACKGROW => self.sys_stackgrow(),
            SYS_FREEMEM => Ok(self.frames.free_count() as u64 * crate::memory::PAGE_SIZE),
            SYS_PROCINFO => self.sys_procinfo(),
            SYS_LOG => self.sys_log(),
            _ => {
                log::warn!("pid {:?}: unknown system call {nr}", self.current_pid());
                Err(SysError::NotSupported)
            }
        };
        match result {
            Ok(value) => value as i64,
            Err(err) => err.as_return(),
        }
    }

    // ── Argument fetching ───────────────────────────────────────

    fn user_space(&self) -> SysResult<&AddressSpace> {
        self.current_data()?
            .space
            .as_ref()
            .ok_or(SysError::NoProcess)
    }

    /// Raw argument word `n`.
    pub(super) fn arg(&self, n: usize) -> SysResult<u64> {
        let data = self.current_data()?;
        if data.trap_frame.is_null() {
            return Err(SysError::BadAddress);
        }
        let sp = unsafe { (*data.trap_frame).rsp };
        let va = (n as u64 + 1)
            .checked_mul(8)
            .and_then(|offset| sp.checked_add(offset))
            .ok_or(SysError::BadAddress)?;
        let mut word = [0u8; 8];
        self.user_space()?.copy_in(&self.frames, &mut word, va)?;
        Ok(u64::from_le_bytes(word))
    }

    pub(super) fn arg_int(&self, n: usize) -> SysResult<i64> {
        Ok(self.arg(n)? as i64)
    }

    /// Argument `n` as a descriptor, pty id or similar small index.
    pub(super) fn arg_index(&self, n: usize) -> SysResult<usize> {
        usize::try_from(self.arg(n)?).map_err(|_| SysError::InvalidArgument)
    }

    /// NUL-terminated UTF-8 string at the address in argument `n`.
    pub(super) fn arg_str(&self, n: usize, max: usize) -> SysResult<String> {
        let va = self.arg(n)?;
        self.read_user_str(va, max)
    }

    pub(super) fn read_user_str(&self, va: u64, max: usize) -> SysResult<String> {
        let bytes = self.user_space()?.read_cstr(&self.frames, va, max)?;
        String::from_utf8(bytes).map_err(|_| SysError::InvalidArgument)
    }

    /// Raw bytes of a NUL-terminated string, not checked for UTF-8.
    pub(super) fn read_user_cstr(&self, va: u64, max: usize) -> SysResult<Vec<u8>> {
        Ok(self.user_space()?.read_cstr(&self.frames, va, max)?)
    }

    /// Copies `len` bytes in from user address `va`.
    pub(super) fn copy_from_user(&self, va: u64, len: usize) -> SysResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.user_space()?.copy_in(&self.frames, &mut buf, va)?;
        Ok(buf)
    }

    pub(super) fn copy_to_user(&self, va: u64, data: &[u8]) -> SysResult<()> {
        Ok(self.user_space()?.copy_out(&self.frames, va, data)?)
    }

    /// `(address, length)` from arguments `n` and `n + 1`, with the length
    /// clamped to `limit`.
    pub(super) fn arg_buf(&self, n: usize, limit: usize) -> SysResult<(u64, usize)> {
        let va = self.arg(n)?;
        let len = self.arg_index(n + 1)?.min(limit);
        Ok((va, len))
    }
}
