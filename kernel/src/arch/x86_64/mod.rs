// =============================================================================
// Cinder — x86_64 Backend
// =============================================================================
//
//   cpu.rs         : privileged instructions, CR3, rbp-chain backtrace
//   descriptors.rs : per-core GDT + TSS, the shared IDT
//   entry.rs       : 256 vector stubs, alltraps, trap_return
//   switch.rs      : callee-saved context switch, first-run trampoline
//
// Each core's `CoreLocal` is reached through GS base, so `cpu_id()` is one
// load and is safe to call with interrupts on or off. User mode runs with
// the two GS bases swapped (see entry.rs).
// =============================================================================

pub mod cpu;
pub mod descriptors;
pub mod entry;
pub mod switch;

pub use cpu::{
    backtrace, disable_interrupts, enable_interrupts, halt_forever, interrupts_enabled,
    load_page_table, wait_for_interrupt,
};
pub use descriptors::set_kernel_stack;
pub use switch::{first_run_entry, switch_context};

use super::CoreLocal;

/// Most cores the backend can bring up.
pub const MAX_CORES: usize = 8;

const IA32_GS_BASE: u32 = 0xC000_0101;
const IA32_KERNEL_GS_BASE: u32 = 0xC000_0102;

static CORES: [CoreLocal; MAX_CORES] = {
    const IDLE: CoreLocal = CoreLocal::new(0);
    [IDLE; MAX_CORES]
};

/// Brings the calling core to the point where it can run the scheduler:
/// GS base, descriptor tables, IDT.
///
/// # Safety
/// Call exactly once per core, with interrupts disabled, before any lock is
/// taken on that core. `id` must be unique and below [`MAX_CORES`].
pub unsafe fn init_core(id: usize) {
    assert!(id < MAX_CORES, "core id {id} out of range");
    let core = &CORES[id];
    core.set_id(id);
    unsafe {
        cpu::write_msr(IA32_GS_BASE, core as *const CoreLocal as u64);
        // What `swapgs` hands user mode.
        cpu::write_msr(IA32_KERNEL_GS_BASE, 0);
        descriptors::load_for_core(id);
    }
    log::info!("core {id} online");
}

/// Index of the executing core.
#[inline]
pub fn cpu_id() -> usize {
    let id: usize;
    unsafe {
        core::arch::asm!("mov {}, gs:[0]", out(reg) id, options(nostack, readonly, preserves_flags));
    }
    id
}

pub fn core_local() -> &'static CoreLocal {
    &CORES[cpu_id()]
}
