//! Kernel-thread context switch.
//!
//! `switch_context(save, load)` pushes the callee-saved registers, stores
//! the stack pointer through `save`, adopts `load` as the new stack pointer,
//! pops the registers found there and returns into whatever `rip` that stack
//! holds. The caller-saved registers are the compiler's problem: from its
//! point of view this is an ordinary call.
//!
//! A new process's kernel stack is prepared so the first switch into it
//! `ret`s into `cinder_first_run`, which finishes the scheduler's half of the
//! switch and falls into `trap_return` with the process's trap frame.

use core::arch::global_asm;

global_asm!(
    ".global cinder_switch_context",
    "cinder_switch_context:",
    // rdi = where to save the old rsp, rsi = rsp to resume
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
    "",
    ".global cinder_first_run",
    "cinder_first_run:",
    // rsp now points at the trap frame, 16-byte aligned.
    "call cinder_finish_first_switch",
    "jmp cinder_trap_return",
);

unsafe extern "C" {
    fn cinder_switch_context(save_rsp: *mut u64, load_rsp: u64);
    fn cinder_first_run();
}

/// Suspends the current kernel thread and resumes the one whose saved
/// stack pointer is `load_rsp`.
///
/// # Safety
/// `load_rsp` must point at a [`Context`](crate::arch::Context) laid down
/// by a previous switch or by `prepare_first_run`, on a stack that stays
/// alive until it is switched away from again.
pub unsafe fn switch_context(save_rsp: *mut u64, load_rsp: u64) {
    unsafe { cinder_switch_context(save_rsp, load_rsp) }
}

/// Where a new process's context first returns to.
pub fn first_run_entry() -> u64 {
    cinder_first_run as unsafe extern "C" fn() as usize as u64
}

#[unsafe(no_mangle)]
extern "C" fn cinder_finish_first_switch() {
    crate::global().finish_first_switch();
}
