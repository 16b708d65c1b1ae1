//! Register layouts shared with the assembly stubs.
//!
//! Both structs are read and written by hand-written assembly, so field
//! order is part of the ABI. Do not reorder.

/// Ring-0 code selector.
pub const KERNEL_CS: u64 = 0x08;
/// Ring-3 data/stack selector (GDT slot 3, RPL 3).
pub const USER_DS: u64 = 0x18 | 3;
/// Ring-3 code selector (GDT slot 4, RPL 3).
pub const USER_CS: u64 = 0x20 | 3;
/// Interrupt-enable bit in RFLAGS.
pub const RFLAGS_IF: u64 = 1 << 9;

/// Processor state captured on every trap.
///
/// ```text
///   low address                                          high address
///   r15 … rax │ gs fs es ds │ trapno err │ rip cs rflags rsp ss
///   (pushed by alltraps)     (vector stub) (pushed by the CPU)
/// ```
///
/// In long mode the CPU always pushes `rsp`/`ss`, so the frame is a fixed
/// 208 bytes whatever ring the trap came from.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rax: u64,

    pub gs: u64,
    pub fs: u64,
    pub es: u64,
    pub ds: u64,

    pub trapno: u64,
    pub err: u64,

    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// Frame that enters ring 3 at `entry` with stack pointer `stack`.
    pub const fn user(entry: u64, stack: u64) -> Self {
        Self {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rdi: 0,
            rsi: 0,
            rbp: 0,
            rbx: 0,
            rdx: 0,
            rcx: 0,
            rax: 0,
            gs: USER_DS,
            fs: USER_DS,
            es: USER_DS,
            ds: USER_DS,
            trapno: 0,
            err: 0,
            rip: entry,
            cs: USER_CS,
            rflags: RFLAGS_IF,
            rsp: stack,
            ss: USER_DS,
        }
    }

    /// True when the trap interrupted ring 3.
    pub const fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }
}

/// Offset of `cs` from the stack pointer when `alltraps` starts, with only
/// the vector stub's two words pushed.
pub const CS_AT_ENTRY: usize =
    core::mem::offset_of!(TrapFrame, cs) - core::mem::offset_of!(TrapFrame, trapno);
/// Offset of `cs` from the stack pointer in `trap_return` once the general
/// registers are popped.
pub const CS_AT_RETURN: usize =
    core::mem::offset_of!(TrapFrame, cs) - core::mem::offset_of!(TrapFrame, gs);

/// Callee-saved registers of a suspended kernel thread.
///
/// Lives at the saved stack pointer of whoever is switched out; the switch
/// routine pops it in this order and `ret`s into `rip`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbx: u64,
    pub rbp: u64,
    pub rip: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn trap_frame_matches_stub_offsets() {
        assert_eq!(size_of::<TrapFrame>(), 208);
        assert_eq!(offset_of!(TrapFrame, rax), 112);
        assert_eq!(offset_of!(TrapFrame, gs), 120);
        assert_eq!(offset_of!(TrapFrame, ds), 144);
        assert_eq!(offset_of!(TrapFrame, trapno), 152);
        assert_eq!(offset_of!(TrapFrame, rip), 168);
        assert_eq!(offset_of!(TrapFrame, ss), 200);
    }

    #[test]
    fn swapgs_checks_find_the_code_selector() {
        assert_eq!(CS_AT_ENTRY, 24);
        assert_eq!(CS_AT_RETURN, 56);
    }

    #[test]
    fn context_is_seven_words_ending_in_rip() {
        assert_eq!(size_of::<Context>(), 56);
        assert_eq!(offset_of!(Context, rip), 48);
    }

    #[test]
    fn user_frame_runs_in_ring_three_with_interrupts_on() {
        let tf = TrapFrame::user(0x1000, 0x6000_0000);
        assert!(tf.from_user());
        assert_eq!(tf.rflags & RFLAGS_IF, RFLAGS_IF);
        assert_eq!(tf.ss & 3, 3);
    }
}
