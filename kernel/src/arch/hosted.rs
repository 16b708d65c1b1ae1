//! Simulated hardware for hosted builds.
//!
//! Each OS thread is one core. The interrupt flag is a thread-local bool and
//! a context switch is recorded rather than performed: `switch_context`
//! returns straight back to its caller, optionally after running a hook the
//! test installed. That is enough to drive every lock, table and scheduling
//! transition from a unit test and to observe the kernel at its switch
//! points.

use std::boxed::Box;
use std::cell::{Cell, RefCell};
use std::thread;

use super::CoreLocal;

std::thread_local! {
    static CORE: &'static CoreLocal = Box::leak(Box::new(CoreLocal::new(0)));
    static INTERRUPTS: Cell<bool> = const { Cell::new(false) };
    static SWITCHES: Cell<u64> = const { Cell::new(0) };
    static PAGE_TABLE: Cell<u64> = const { Cell::new(0) };
    static KERNEL_STACK: Cell<u64> = const { Cell::new(0) };
    static SWITCH_HOOK: RefCell<Option<Box<dyn FnMut()>>> = const { RefCell::new(None) };
}

/// Makes the calling thread pretend to be core `id`.
pub fn bind_cpu(id: usize) {
    CORE.with(|core| core.set_id(id));
}

pub fn cpu_id() -> usize {
    CORE.with(|core| core.id())
}

pub fn core_local() -> &'static CoreLocal {
    CORE.with(|core| *core)
}

pub fn interrupts_enabled() -> bool {
    INTERRUPTS.with(Cell::get)
}

pub fn disable_interrupts() {
    INTERRUPTS.with(|flag| flag.set(false));
}

pub fn enable_interrupts() {
    INTERRUPTS.with(|flag| flag.set(true));
}

pub fn wait_for_interrupt() {
    thread::yield_now();
}

/// Records the switch and runs the installed hook, if any.
///
/// # Safety
/// Mirrors the bare-metal contract; the hosted version touches neither
/// pointer.
pub unsafe fn switch_context(_save_rsp: *mut u64, _load_rsp: u64) {
    SWITCHES.with(|count| count.set(count.get() + 1));
    let hook = SWITCH_HOOK.with(|slot| slot.borrow_mut().take());
    if let Some(mut hook) = hook {
        hook();
        SWITCH_HOOK.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_none() {
                *slot = Some(hook);
            }
        });
    }
}

/// Number of context switches this thread has performed.
pub fn switch_count() -> u64 {
    SWITCHES.with(Cell::get)
}

/// Runs `hook` at every subsequent switch on this thread.
pub fn on_switch(hook: impl FnMut() + 'static) {
    SWITCH_HOOK.with(|slot| *slot.borrow_mut() = Some(Box::new(hook)));
}

pub fn clear_switch_hook() {
    SWITCH_HOOK.with(|slot| *slot.borrow_mut() = None);
}

/// # Safety
/// Hosted builds only record the root.
pub unsafe fn load_page_table(root: u64) {
    PAGE_TABLE.with(|cell| cell.set(root));
}

/// Root most recently passed to [`load_page_table`] on this thread.
pub fn loaded_page_table() -> u64 {
    PAGE_TABLE.with(Cell::get)
}

pub fn set_kernel_stack(top: u64) {
    KERNEL_STACK.with(|cell| cell.set(top));
}

/// Stack top most recently passed to [`set_kernel_stack`] on this thread.
pub fn kernel_stack() -> u64 {
    KERNEL_STACK.with(Cell::get)
}

pub fn backtrace(_frames: &mut [u64]) -> usize {
    0
}

pub fn halt_forever() -> ! {
    loop {
        thread::park();
    }
}

/// There is no user mode to return to.
pub fn first_run_entry() -> u64 {
    0
}
