// =============================================================================
// Cinder — Trap Dispatch
// =============================================================================
//
// Every vector lands in `Kernel::trap` with the frame the entry stub built on
// the kernel stack. Vector map:
//
//   0..=31    CPU exceptions
//   32        timer (IRQ 0)
//   33..=47   device IRQs 1..15
//   0x80      system call (the only gate user mode may invoke)
//   0xFF      spurious
//
// A process killed while in the kernel exits here, on its way back to user
// mode, and never earlier.
//
//   syscall.rs : call numbers, argument fetching, the dispatch table
//   sysproc.rs : process and memory calls
//   sysfile.rs : descriptor and path calls
//   sysipc.rs  : messages, pseudo-terminals, kernel calls
// =============================================================================

pub mod syscall;
mod sysfile;
mod sysipc;
mod sysproc;

use crate::Kernel;
use crate::arch::TrapFrame;
use crate::devices::IRQ_LINES;
use crate::task::ProcState;

pub const T_TIMER: u64 = 32;
pub const T_IRQ_BASE: u64 = 32;
pub const T_SYSCALL: u64 = 0x80;
pub const T_SPURIOUS: u64 = 0xFF;

/// What the entry stub does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return to the interrupted code.
    Resume,
    /// The process was killed; it must exit instead of returning to user mode.
    Exit,
}

impl Kernel {
    /// Entry point for the trap stubs. Exits the current process if it was
    /// killed; otherwise returns to the stub.
    pub fn handle_trap(&self, tf: &mut TrapFrame) {
        if self.trap(tf) == TrapOutcome::Exit {
            self.exit(-1);
        }
    }

    /// Dispatches one trap by vector.
    pub fn trap(&self, tf: &mut TrapFrame) -> TrapOutcome {
        match tf.trapno {
            T_SYSCALL => {
                if self.killed() {
                    return TrapOutcome::Exit;
                }
                let Ok(data) = self.current_data() else {
                    panic!("system call with no current process");
                };
                data.trap_frame = &raw mut *tf;
                let ret = self.syscall(tf.rax);
                // `exec` may have rewritten the frame; only rax is ours to set.
                tf.rax = ret as u64;
            }
            T_TIMER => {
                if crate::arch::cpu_id() == self.config.timekeeper_cpu {
                    self.tick();
                }
                self.interrupts.end_of_interrupt(0);
                if self.current_is_running() {
                    self.yield_now();
                }
            }
            vector if (T_IRQ_BASE + 1..T_IRQ_BASE + IRQ_LINES as u64).contains(&vector) => {
                self.device_interrupt((vector - T_IRQ_BASE) as u8);
            }
            T_SPURIOUS => {}
            vector if !tf.from_user() => {
                panic!(
                    "trap {vector} (err {:#x}) in kernel mode at rip {:#x}",
                    tf.err, tf.rip
                );
            }
            vector => {
                self.kill_current(vector, tf);
            }
        }
        if tf.from_user() && self.killed() {
            TrapOutcome::Exit
        } else {
            TrapOutcome::Resume
        }
    }

    fn current_is_running(&self) -> bool {
        match self.current_slot() {
            Some(slot) => self.procs.lock().procs[slot].state == ProcState::Running,
            None => false,
        }
    }

    /// An exception raised by user code kills the process, not the kernel.
    fn kill_current(&self, vector: u64, tf: &TrapFrame) {
        let Some(slot) = self.current_slot() else {
            panic!("trap {vector} from user mode with no current process");
        };
        let mut table = self.procs.lock();
        let entry = &mut table.procs[slot];
        log::warn!(
            "pid {} ({}): trap {vector} err {:#x} at rip {:#x}; killed",
            entry.pid,
            entry.name,
            tf.err,
            tf.rip
        );
        entry.killed = true;
    }
}
