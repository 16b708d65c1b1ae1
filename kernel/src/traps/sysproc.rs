//! Process and memory system calls.

use alloc::string::String;
use alloc::vec::Vec;

use crate::Kernel;
use crate::error::{SysError, SysResult};
use crate::memory::PAGE_SIZE;

/// Longest line `log` takes from user space.
const MAX_LOG_LINE: usize = 256;

impl Kernel {
    pub(super) fn sys_fork(&self) -> SysResult<u64> {
        self.fork()
    }

    pub(super) fn sys_exit(&self) -> SysResult<u64> {
        let status = self.arg_int(0)? as i32;
        self.exit(status)
    }

    /// `wait(status_ptr)`. A null pointer discards the status.
    pub(super) fn sys_wait(&self) -> SysResult<u64> {
        let status_ptr = self.arg(0)?;
        let (pid, status) = self.wait()?;
        if status_ptr != 0 {
            self.copy_to_user(status_ptr, &status.to_le_bytes())?;
        }
        Ok(pid)
    }

    pub(super) fn sys_kill(&self) -> SysResult<u64> {
        self.kill(self.arg(0)?)?;
        Ok(0)
    }

    pub(super) fn sys_getpid(&self) -> SysResult<u64> {
        self.current_pid().ok_or(SysError::NoProcess)
    }

    pub(super) fn sys_getppid(&self) -> SysResult<u64> {
        self.parent_pid()
    }

    pub(super) fn sys_sbrk(&self) -> SysResult<u64> {
        self.grow_heap(self.arg_int(0)?)
    }

    pub(super) fn sys_sleep(&self) -> SysResult<u64> {
        self.sleep_ticks(self.arg(0)?)?;
        Ok(0)
    }

    /// `exec(path, argv)`. `argv` may be null for an empty vector.
    pub(super) fn sys_exec(&self) -> SysResult<u64> {
        let path = self.arg_str(0, self.config.max_path)?;
        let table = self.arg(1)?;
        let mut argv: Vec<Vec<u8>> = Vec::new();
        if table != 0 {
            loop {
                if argv.len() > self.config.max_args {
                    return Err(SysError::InvalidArgument);
                }
                let va = table
                    .checked_add(8 * argv.len() as u64)
                    .ok_or(SysError::BadAddress)?;
                let word = self.copy_from_user(va, 8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&word);
                let ptr = u64::from_le_bytes(raw);
                if ptr == 0 {
                    break;
                }
                argv.push(self.read_user_cstr(ptr, PAGE_SIZE as usize)?);
            }
        }
        self.exec(&path, &argv)
    }

    pub(super) fn sys_proc_status(&self) -> SysResult<u64> {
        Ok(self.proc_status(self.arg(0)?) as u64)
    }

    pub(super) fn sys_setname(&self) -> SysResult<u64> {
        let name = self.arg_str(0, self.config.max_path)?;
        self.set_name(&name)?;
        Ok(0)
    }

    pub(super) fn sys_dlgrow(&self) -> SysResult<u64> {
        self.grow_dylib(self.arg_int(0)?)
    }

    pub(super) fn sys_stackgrow(&self) -> SysResult<u64> {
        self.grow_stack(self.arg(0)?)
    }

    /// `procinfo(index, record_ptr)`: one table slot in the `ProcInfo`
    /// record layout.
    pub(super) fn sys_procinfo(&self) -> SysResult<u64> {
        let index = self.arg_index(0)?;
        let record = self.arg(1)?;
        let info = self.proc_info(index)?;
        self.copy_to_user(record, &info.to_bytes())?;
        Ok(0)
    }

    pub(super) fn sys_log(&self) -> SysResult<u64> {
        let (va, len) = self.arg_buf(0, MAX_LOG_LINE)?;
        let bytes = self.copy_from_user(va, len)?;
        let line = String::from_utf8_lossy(&bytes);
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        let (pid, name) = {
            let table = self.procs.lock();
            (table.procs[slot].pid, table.procs[slot].name)
        };
        log::info!("[{pid} {name}] {}", line.trim_end());
        Ok(len as u64)
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::layout::{HEAP_BASE, STACK_TOP};
    use crate::task::lifecycle::STATUS_EXITED;
    use crate::testing;
    use crate::traps::syscall::nr::*;

    #[test]
    fn sbrk_returns_the_old_break_and_procinfo_fills_a_record() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        assert_eq!(testing::syscall(&kernel, SYS_SBRK, &[4096]), HEAP_BASE as i64);
        assert_eq!(
            testing::syscall(&kernel, SYS_SBRK, &[0]),
            (HEAP_BASE + 4096) as i64
        );
        assert_eq!(testing::syscall(&kernel, SYS_PROCINFO, &[0, HEAP_BASE]), 0);
        assert_eq!(testing::peek_user(&kernel, 0, HEAP_BASE, 8), 1u64.to_le_bytes());
        assert_eq!(testing::peek_user(&kernel, 0, HEAP_BASE + 32, 5), b"init\0");
    }

    #[test]
    fn wait_stores_the_exit_status() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let child = kernel.fork().unwrap();
        testing::exit_child(&kernel, child, 9);
        assert_eq!(kernel.proc_status(child), STATUS_EXITED);
        let status_at = STACK_TOP - 512;
        assert_eq!(testing::syscall(&kernel, SYS_WAIT, &[status_at]), child as i64);
        assert_eq!(testing::peek_user(&kernel, 0, status_at, 4), 9i32.to_le_bytes());
    }

    #[test]
    fn exec_reads_a_null_terminated_argument_table() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        testing::add_file("/echo", b"\xc3");
        let path = STACK_TOP - 1024;
        let arg0 = STACK_TOP - 1008;
        let table = STACK_TOP - 2048;
        testing::poke(&kernel, 0, path, b"/echo\0");
        testing::poke(&kernel, 0, arg0, b"echo\0");
        let mut words = arg0.to_le_bytes().to_vec();
        words.extend_from_slice(&0u64.to_le_bytes());
        testing::poke(&kernel, 0, table, &words);

        assert_eq!(testing::syscall(&kernel, SYS_EXEC, &[path, table]), 1);
        let frame = unsafe { *kernel.procs.data(0).trap_frame };
        assert_eq!(frame.rdi, 1);
        assert_eq!(kernel.proc_info(0).unwrap().name.as_str(), "echo");
    }

    #[test]
    fn child_sees_its_parent() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        let child = testing::fork_child(&kernel);
        testing::switch_to(&kernel, 1);
        assert_eq!(testing::syscall(&kernel, SYS_GETPID, &[]), child as i64);
        assert_eq!(testing::syscall(&kernel, SYS_GETPPID, &[]), init as i64);
    }
}
