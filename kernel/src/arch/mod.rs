// =============================================================================
// Cinder — Architecture Seam
// =============================================================================
//
// Everything above this module calls one small surface:
//
//   cpu_id / core_local        : which core am I, and its nesting record
//   interrupts_enabled / disable_interrupts / enable_interrupts
//   wait_for_interrupt         : idle until something happens
//   switch_context             : save callee-saved state, resume another stack
//   load_page_table            : install a root table (CR3)
//   set_kernel_stack           : where the next user→kernel trap lands (RSP0)
//   backtrace / halt_forever   : the fatal path
//
// Two backends provide it. `x86_64` is the real thing and only builds for a
// bare-metal target. `hosted` simulates one core per OS thread so the rest of
// the kernel can be exercised by ordinary unit tests.
// =============================================================================

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

mod frame;

pub use frame::{
    CS_AT_ENTRY, CS_AT_RETURN, Context, KERNEL_CS, RFLAGS_IF, TrapFrame, USER_CS, USER_DS,
};

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86_64;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use self::x86_64::{
    backtrace, core_local, cpu_id, disable_interrupts, enable_interrupts, first_run_entry,
    halt_forever, interrupts_enabled, load_page_table, set_kernel_stack, switch_context,
    wait_for_interrupt,
};

#[cfg(not(target_os = "none"))]
pub mod hosted;

#[cfg(not(target_os = "none"))]
pub use hosted::{
    backtrace, core_local, cpu_id, disable_interrupts, enable_interrupts, first_run_entry,
    halt_forever, interrupts_enabled, load_page_table, set_kernel_stack, switch_context,
    wait_for_interrupt,
};

/// Per-core bookkeeping the lock layer needs before anything else exists.
///
/// `id` sits at offset 0: the bare-metal backend reads it with a single
/// `gs:[0]` load.
#[repr(C)]
pub struct CoreLocal {
    id: AtomicUsize,
    /// Depth of `push_off` nesting on this core.
    nesting: AtomicU32,
    /// Whether interrupts were enabled before the outermost `push_off`.
    saved_intena: AtomicBool,
}

// Only the owning core touches its record, so Relaxed is enough throughout.
impl CoreLocal {
    pub const fn new(id: usize) -> Self {
        Self {
            id: AtomicUsize::new(id),
            nesting: AtomicU32::new(0),
            saved_intena: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> usize {
        self.id.load(Ordering::Relaxed)
    }

    pub(crate) fn set_id(&self, id: usize) {
        self.id.store(id, Ordering::Relaxed);
    }

    pub fn nesting(&self) -> u32 {
        self.nesting.load(Ordering::Relaxed)
    }

    pub(crate) fn set_nesting(&self, depth: u32) {
        self.nesting.store(depth, Ordering::Relaxed);
    }

    pub fn saved_intena(&self) -> bool {
        self.saved_intena.load(Ordering::Relaxed)
    }

    pub(crate) fn set_saved_intena(&self, enabled: bool) {
        self.saved_intena.store(enabled, Ordering::Relaxed);
    }
}
