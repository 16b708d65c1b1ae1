//! Messages, pseudo-terminals and named kernel calls.

use alloc::vec;

use super::syscall::MAX_IO;
use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::kcall::MAX_NAME;

impl Kernel {
    /// `kcall(name, arg)`.
    pub(super) fn sys_kcall(&self) -> SysResult<u64> {
        let name = self.arg_str(0, MAX_NAME)?;
        let arg = self.arg(1)?;
        self.kcall(&name, arg)
    }

    /// `msgsend(pid, buf, len)`. Oversized messages are refused, not cut.
    pub(super) fn sys_msgsend(&self) -> SysResult<u64> {
        let to = self.arg(0)?;
        let va = self.arg(1)?;
        let len = self.arg_index(2)?;
        if len > self.config.max_message_size {
            return Err(SysError::InvalidArgument);
        }
        let data = self.copy_from_user(va, len)?;
        self.send_message(to, &data)?;
        Ok(0)
    }

    /// `msgrecv(buf, len, sender_ptr)`. Never blocks; see `msgwait`. A
    /// message that cannot be copied out stays queued.
    pub(super) fn sys_msgrecv(&self) -> SysResult<u64> {
        let (va, len) = self.arg_buf(0, self.config.max_message_size)?;
        let sender_ptr = self.arg(2)?;
        self.take_message(|sender, payload| {
            self.copy_to_user(va, &payload[..payload.len().min(len)])?;
            if sender_ptr != 0 {
                self.copy_to_user(sender_ptr, &sender.to_le_bytes())?;
            }
            Ok(payload.len() as u64)
        })
    }

    pub(super) fn sys_pty_read(&self) -> SysResult<u64> {
        let id = self.arg_index(0)?;
        let (va, len) = self.arg_buf(1, MAX_IO)?;
        let mut buf = vec![0u8; len];
        let n = self.pty_read(id, &mut buf)?;
        self.copy_to_user(va, &buf[..n])?;
        Ok(n as u64)
    }

    pub(super) fn sys_pty_write(&self) -> SysResult<u64> {
        let id = self.arg_index(0)?;
        let (va, len) = self.arg_buf(1, MAX_IO)?;
        let data = self.copy_from_user(va, len)?;
        Ok(self.pty_write(id, &data)? as u64)
    }

    pub(super) fn sys_pty_close(&self) -> SysResult<u64> {
        self.pty_close(self.arg_index(0)?)?;
        Ok(0)
    }

    pub(super) fn sys_pty_switch(&self) -> SysResult<u64> {
        let raw = self.arg_int(0)?;
        let id = if raw < 0 { None } else { Some(raw as usize) };
        self.pty_switch(id)?;
        Ok(0)
    }
}
