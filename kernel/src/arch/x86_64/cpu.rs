// =============================================================================
// Cinder — x86_64 CPU Primitives
// =============================================================================
//
// Thin wrappers over the privileged instructions the kernel needs. Anything
// that touches a control register or the interrupt flag goes through here.
// =============================================================================

use x86_64::PhysAddr;
use x86_64::registers::control::{Cr3, Cr3Flags};
use x86_64::registers::rflags::{self, RFlags};
use x86_64::structures::paging::PhysFrame;

/// Halts until the next interrupt arrives.
#[inline(always)]
pub fn wait_for_interrupt() {
    unsafe {
        core::arch::asm!("hlt", options(nomem, nostack));
    }
}

/// Disables interrupts and halts forever.
#[inline(always)]
pub fn halt_forever() -> ! {
    loop {
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
    }
}

/// Reads IF from RFLAGS.
#[inline]
pub fn interrupts_enabled() -> bool {
    rflags::read().contains(RFlags::INTERRUPT_FLAG)
}

#[inline]
pub fn disable_interrupts() {
    unsafe {
        core::arch::asm!("cli", options(nomem, nostack));
    }
}

#[inline]
pub fn enable_interrupts() {
    unsafe {
        core::arch::asm!("sti", options(nomem, nostack));
    }
}

/// Reads CR2: the faulting address of the most recent page fault.
#[inline]
pub fn read_cr2() -> u64 {
    let value: u64;
    unsafe {
        core::arch::asm!(
            "mov {}, cr2",
            out(reg) value,
            options(nomem, nostack, preserves_flags)
        );
    }
    value
}

/// Installs `root` as the active PML4.
///
/// # Safety
/// `root` must be the physical address of a valid PML4 that maps the code
/// currently executing and the current stack.
pub unsafe fn load_page_table(root: u64) {
    let frame = PhysFrame::containing_address(PhysAddr::new(root));
    unsafe {
        Cr3::write(frame, Cr3Flags::empty());
    }
}

/// Walks the rbp chain, storing return addresses into `frames`.
///
/// Stops at a null or misaligned frame pointer. Returns how many entries
/// were written.
pub fn backtrace(frames: &mut [u64]) -> usize {
    let mut rbp: u64;
    unsafe {
        core::arch::asm!("mov {}, rbp", out(reg) rbp, options(nomem, nostack, preserves_flags));
    }
    let mut depth = 0;
    while depth < frames.len() && rbp != 0 && rbp % 8 == 0 {
        // [rbp] = caller's rbp, [rbp + 8] = return address.
        let (next, ret) = unsafe {
            let ptr = rbp as *const u64;
            (ptr.read(), ptr.add(1).read())
        };
        if ret == 0 {
            break;
        }
        frames[depth] = ret;
        depth += 1;
        if next <= rbp {
            break;
        }
        rbp = next;
    }
    depth
}

/// Writes a model-specific register.
///
/// # Safety
/// Writing an MSR can change global processor state.
#[inline]
pub unsafe fn write_msr(msr: u32, value: u64) {
    let low = value as u32;
    let high = (value >> 32) as u32;
    unsafe {
        core::arch::asm!(
            "wrmsr",
            in("ecx") msr,
            in("eax") low,
            in("edx") high,
            options(nomem, nostack)
        );
    }
}
