// =============================================================================
// Cinder — Scheduler, Context Switch, Sleep/Wakeup
// =============================================================================
//
// Every core runs `scheduler` forever: scan the table, switch into the first
// RUNNABLE process, and come back here when it gives the core up. A process
// gives the core up only through `sched`, always with the table lock held:
//
//   scheduler ──lock──► dispatch ──switch──► process … sched ──switch──► back
//
// The lock is taken on one side of the switch and released on the other. A
// process switched in for the first time has no `sched` frame to return
// through; `finish_first_switch` releases the lock for it instead.
//
// Round robin by table order. No priorities.
// =============================================================================

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

use super::process::{Pid, ProcData, ProcState, Slot, Table};
use crate::Kernel;
use crate::arch;
use crate::error::{SysError, SysResult};
use crate::sync::{Channel, InterruptGuard, SpinLockGuard};
use crate::util::panic::panicked;

const NO_PROC: usize = usize::MAX;

/// Per-core scheduling state.
pub struct Cpu {
    apic_id: usize,
    current: AtomicUsize,
    /// Stack pointer of this core's scheduler loop while a process runs.
    scheduler_sp: UnsafeCell<u64>,
}

// `scheduler_sp` is only touched by the owning core.
unsafe impl Sync for Cpu {}

impl Cpu {
    pub fn new(apic_id: usize) -> Self {
        Self {
            apic_id,
            current: AtomicUsize::new(NO_PROC),
            scheduler_sp: UnsafeCell::new(0),
        }
    }

    pub fn apic_id(&self) -> usize {
        self.apic_id
    }

    /// Slot of the process running on this core.
    pub fn current(&self) -> Option<Slot> {
        match self.current.load(Ordering::Relaxed) {
            NO_PROC => None,
            slot => Some(slot),
        }
    }

    fn set_current(&self, slot: Option<Slot>) {
        self.current.store(slot.unwrap_or(NO_PROC), Ordering::Relaxed);
    }
}

impl Kernel {
    fn cpu(&self) -> &Cpu {
        let id = arch::cpu_id();
        match self.cpus.get(id) {
            Some(cpu) => cpu,
            None => panic!("cpu {id} beyond the configured {}", self.cpus.len()),
        }
    }

    /// Slot of the process running on the calling core.
    pub fn current_slot(&self) -> Option<Slot> {
        let _guard = InterruptGuard::new();
        self.cpu().current()
    }

    /// The unlocked half of the calling process.
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn current_data(&self) -> SysResult<&mut ProcData> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        Ok(unsafe { self.procs.data(slot) })
    }

    pub fn current_pid(&self) -> Option<Pid> {
        let slot = self.current_slot()?;
        Some(self.procs.lock().procs[slot].pid)
    }

    /// Slots the process table says each core is running. Diagnostic.
    pub fn running_on(&self) -> impl Iterator<Item = (usize, Slot)> + '_ {
        self.cpus
            .iter()
            .enumerate()
            .filter_map(|(id, cpu)| cpu.current().map(|slot| (id, slot)))
    }

    // ── Scheduler loop ──────────────────────────────────────────

    /// Per-core scheduler. Never returns.
    pub fn scheduler(&self) -> ! {
        log::info!("cpu {} scheduling", arch::cpu_id());
        loop {
            arch::enable_interrupts();
            if panicked() {
                arch::halt_forever();
            }
            if !self.schedule_once() {
                arch::wait_for_interrupt();
            }
        }
    }

    /// One pass over the table, running every RUNNABLE process found.
    /// Returns whether anything ran.
    pub fn schedule_once(&self) -> bool {
        let mut table = self.procs.lock();
        let mut ran = false;
        for slot in 0..table.procs.len() {
            if table.procs[slot].state != ProcState::Runnable {
                continue;
            }
            self.dispatch(&mut table, slot);
            ran = true;
        }
        ran
    }

    /// Switches into `slot` and returns once it gives the core back.
    fn dispatch(&self, table: &mut SpinLockGuard<'_, Table>, slot: Slot) {
        let cpu = self.cpu();
        let data = unsafe { self.procs.data(slot) };
        let (Some(space), Some(kstack)) = (data.space.as_ref(), data.kstack.as_ref()) else {
            panic!("dispatch: slot {slot} has no address space or kernel stack");
        };

        cpu.set_current(Some(slot));
        arch::set_kernel_stack(kstack.top());
        unsafe { arch::load_page_table(space.root().as_u64()) };
        table.procs[slot].state = ProcState::Running;

        unsafe { arch::switch_context(cpu.scheduler_sp.get(), data.context) };

        unsafe { arch::load_page_table(self.kernel_space.root().as_u64()) };
        cpu.set_current(None);
    }

    // ── Giving up the core ──────────────────────────────────────

    /// Switches from the current process back to this core's scheduler.
    ///
    /// The caller holds the table lock and nothing else, and has already
    /// moved the process out of RUNNING. The guard is handed back once the
    /// process is switched in again, possibly on another core.
    pub(crate) fn sched<'a>(&'a self, table: SpinLockGuard<'a, Table>) -> SpinLockGuard<'a, Table> {
        let core = arch::core_local();
        if core.nesting() != 1 {
            panic!("sched: {} locks held", core.nesting());
        }
        let Some(slot) = self.cpu().current() else {
            panic!("sched: no current process");
        };
        if table.procs[slot].state == ProcState::Running {
            panic!("sched: pid {} still running", table.procs[slot].pid);
        }
        if arch::interrupts_enabled() {
            panic!("sched: interruptible");
        }

        let intena = core.saved_intena();
        let data = unsafe { self.procs.data(slot) };
        let scheduler_sp = unsafe { *self.cpu().scheduler_sp.get() };
        unsafe { arch::switch_context(&mut data.context, scheduler_sp) };
        arch::core_local().set_saved_intena(intena);
        table
    }

    /// Gives up the core for one scheduling round.
    pub fn yield_now(&self) {
        let Some(slot) = self.current_slot() else {
            return;
        };
        let mut table = self.procs.lock();
        table.procs[slot].state = ProcState::Runnable;
        drop(self.sched(table));
    }

    /// Tail of the first switch into a new process: releases the table lock
    /// the scheduler took, then falls through to the trap return path.
    pub fn finish_first_switch(&self) {
        unsafe { self.procs.table.force_unlock() };
    }

    // ── Sleep / wakeup ──────────────────────────────────────────

    /// Atomically releases `guard`'s lock and sleeps on `chan`; reacquires
    /// the lock before returning.
    ///
    /// The table lock is taken before `guard` is released, and `wakeup`
    /// needs the table lock, so a wakeup cannot slip in between. Callers
    /// re-check their condition: wakeups are broadcast.
    ///
    /// `guard` must not be the table lock itself; see [`Self::sleep_locked`].
    pub fn sleep<'a, T>(&'a self, chan: Channel, guard: SpinLockGuard<'a, T>) -> SpinLockGuard<'a, T> {
        let table = self.procs.lock();
        let lock = SpinLockGuard::unlock(guard);
        let table = self.sleep_locked(chan, table);
        drop(table);
        lock.lock()
    }

    /// [`Self::sleep`] for callers that already hold the table lock.
    pub(crate) fn sleep_locked<'a>(
        &'a self,
        chan: Channel,
        mut table: SpinLockGuard<'a, Table>,
    ) -> SpinLockGuard<'a, Table> {
        let Some(slot) = self.cpu().current() else {
            panic!("sleep: no current process");
        };
        table.procs[slot].chan = Some(chan);
        table.procs[slot].state = ProcState::Sleeping;
        let mut table = self.sched(table);
        table.procs[slot].chan = None;
        table
    }

    /// Wakes every process sleeping on `chan`.
    pub fn wakeup(&self, chan: Channel) {
        self.procs.lock().wakeup(chan);
    }

    /// Timer tick on the timekeeping core.
    pub(crate) fn tick(&self) {
        let mut ticks = self.ticks.lock();
        *ticks += 1;
        drop(ticks);
        self.wakeup(Channel::Ticks);
    }

    pub fn uptime(&self) -> u64 {
        *self.ticks.lock()
    }

    /// Sleeps for `n` ticks. A kill cuts the wait short.
    pub fn sleep_ticks(&self, n: u64) -> SysResult<()> {
        let mut ticks = self.ticks.lock();
        let start = *ticks;
        while *ticks - start < n {
            if self.killed() {
                return Err(SysError::Killed);
            }
            ticks = self.sleep(Channel::Ticks, ticks);
        }
        Ok(())
    }
}

#[cfg(test)]
impl Kernel {
    /// Makes `slot` the process running on this core, as if the scheduler
    /// had just switched into it.
    pub(crate) fn enter(&self, slot: Slot) {
        let mut table = self.procs.lock();
        assert_eq!(table.procs[slot].state, ProcState::Runnable, "enter: slot {slot}");
        table.procs[slot].state = ProcState::Running;
        let data = unsafe { self.procs.data(slot) };
        if let Some(space) = data.space.as_ref() {
            unsafe { arch::load_page_table(space.root().as_u64()) };
        }
        self.cpu().set_current(Some(slot));
    }

    /// Undoes [`Self::enter`]: the process stops running on this core.
    pub(crate) fn leave(&self) {
        let Some(slot) = self.cpu().current() else {
            return;
        };
        let mut table = self.procs.lock();
        if table.procs[slot].state == ProcState::Running {
            table.procs[slot].state = ProcState::Runnable;
        }
        self.cpu().set_current(None);
    }

    /// Puts `pid` to sleep on `chan` without running it.
    pub(crate) fn force_sleep(&self, pid: Pid, chan: Channel) {
        let mut table = self.procs.lock();
        let Some(slot) = table.slot_of(pid) else {
            panic!("force_sleep: no pid {pid}");
        };
        table.procs[slot].state = ProcState::Sleeping;
        table.procs[slot].chan = Some(chan);
    }

    pub(crate) fn state_of_pid(&self, pid: Pid) -> Option<ProcState> {
        let table = self.procs.lock();
        table.slot_of(pid).map(|slot| table.procs[slot].state)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::arch::hosted;
    use crate::sync::SpinLock;
    use crate::testing;

    #[test]
    fn yield_passes_through_sched_with_one_lock_and_interrupts_off() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        let kernel_ptr: *const Kernel = &kernel;
        let seen = Rc::new(Cell::new(None));
        let record = seen.clone();
        hosted::on_switch(move || {
            let core = arch::core_local();
            let entry = unsafe { (&*kernel_ptr).procs.peek(0) };
            record.set(Some((core.nesting(), arch::interrupts_enabled(), entry.state)));
            // Picked again by the scheduler.
            entry.state = ProcState::Running;
        });
        let before = hosted::switch_count();
        kernel.yield_now();
        hosted::clear_switch_hook();
        assert_eq!(hosted::switch_count(), before + 1);
        assert_eq!(seen.get(), Some((1, false, ProcState::Runnable)));
        assert_eq!(kernel.state_of_pid(init), Some(ProcState::Running));
        assert!(!kernel.procs.table.holding());
    }

    #[test]
    #[should_panic(expected = "sched: 2 locks held")]
    fn sched_with_an_extra_lock_is_fatal() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let other = SpinLock::new("other", ());
        let _held = other.lock();
        kernel.yield_now();
    }

    #[test]
    #[should_panic(expected = "still running")]
    fn sched_while_running_is_fatal() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let table = kernel.procs.lock();
        drop(kernel.sched(table));
    }

    #[test]
    fn sleep_releases_the_lock_atomically_and_reacquires_it() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        let lock = SpinLock::new("cond", 0u32);
        let kernel_ptr: *const Kernel = &kernel;
        let lock_ptr: *const SpinLock<u32> = &lock;
        let seen = Rc::new(Cell::new(None));
        let record = seen.clone();
        hosted::on_switch(move || {
            let kernel = unsafe { &*kernel_ptr };
            let lock = unsafe { &*lock_ptr };
            let table = unsafe { &mut *kernel.procs.table.data_ptr() };
            let entry = &table.procs[0];
            record.set(Some((entry.state, entry.chan, lock.holding())));
            // Another core's wakeup, then the scheduler picks it again.
            table.wakeup(Channel::Ticks);
            assert_eq!(table.procs[0].state, ProcState::Runnable);
            table.procs[0].state = ProcState::Running;
        });
        let guard = lock.lock();
        let guard = kernel.sleep(Channel::Ticks, guard);
        hosted::clear_switch_hook();
        assert!(lock.holding());
        drop(guard);
        assert_eq!(
            seen.get(),
            Some((ProcState::Sleeping, Some(Channel::Ticks), false))
        );
        assert_eq!(kernel.state_of_pid(init), Some(ProcState::Running));
        assert_eq!(unsafe { kernel.procs.peek(0) }.chan, None);
    }

    #[test]
    fn dispatch_installs_the_process_then_restores_the_kernel() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        kernel.leave();
        let kernel_ptr: *const Kernel = &kernel;
        let seen = Rc::new(Cell::new(None));
        let record = seen.clone();
        hosted::on_switch(move || {
            let kernel = unsafe { &*kernel_ptr };
            let entry = unsafe { kernel.procs.peek(0) };
            let running: Vec<_> = kernel.running_on().collect();
            record.set(Some((entry.state, running == [(0, 0)], hosted::loaded_page_table())));
            // The process yields straight back.
            entry.state = ProcState::Runnable;
        });
        assert!(kernel.schedule_once());
        hosted::clear_switch_hook();
        let root = unsafe { kernel.procs.data(0) }.space.as_ref().map(|s| s.root().as_u64());
        assert_eq!(seen.get(), Some((ProcState::Running, true, root.unwrap())));
        assert_eq!(kernel.running_on().count(), 0);
        assert_eq!(hosted::loaded_page_table(), kernel.kernel_space.root().as_u64());
        assert_eq!(kernel.state_of_pid(init), Some(ProcState::Runnable));
        assert!(!kernel.procs.table.holding());
    }

    #[test]
    fn a_running_process_is_skipped_by_other_cores() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        kernel.leave();
        let kernel_ptr: *const Kernel = &kernel;
        let seen = Rc::new(Cell::new(None));
        let record = seen.clone();
        hosted::on_switch(move || {
            let kernel = unsafe { &*kernel_ptr };
            // Running on core 0, the process drops the lock it inherited.
            unsafe { kernel.procs.table.force_unlock() };
            let second = std::thread::scope(|scope| {
                scope
                    .spawn(|| {
                        hosted::bind_cpu(1);
                        let ran = kernel.schedule_once();
                        (ran, hosted::switch_count(), kernel.running_on().count())
                    })
                    .join()
                    .unwrap()
            });
            record.set(Some(second));
            // Back into core 0's scheduler with the lock held again.
            let mut table = kernel.procs.table.lock();
            table.procs[0].state = ProcState::Runnable;
            core::mem::forget(table);
        });
        assert!(kernel.schedule_once());
        hosted::clear_switch_hook();
        assert_eq!(seen.get(), Some((false, 0, 1)));
        assert_eq!(kernel.running_on().count(), 0);
        assert_eq!(kernel.state_of_pid(init), Some(ProcState::Runnable));
        assert!(!kernel.procs.table.holding());
    }

    #[test]
    fn ticks_wake_tick_sleepers() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        kernel.force_sleep(init, Channel::Ticks);
        kernel.tick();
        assert_eq!(kernel.uptime(), 1);
        assert_eq!(kernel.state_of_pid(init), Some(ProcState::Runnable));
        assert_eq!(kernel.sleep_ticks(0), Ok(()));
    }
}
