//! Process creation and teardown.
//!
//! ```text
//!   UNUSED ─alloc_proc─► EMBRYO ─setup done─► RUNNABLE ⇄ RUNNING ─exit─► ZOMBIE
//!      ▲                                          ▲          │              │
//!      │                                          └─wakeup─ SLEEPING         │
//!      └───────────────────────── wait (parent or init) ─────────────────────┘
//! ```
//!
//! A process never frees its own kernel stack or page table: it is still
//! running on them while it exits. Its reaper does that.

use alloc::string::String;
use alloc::vec::Vec;

use super::mailbox::Message;
use super::process::{KernelStack, NAME_LEN, Pid, ProcName, ProcState, Slot, Table};
use crate::Kernel;
use crate::arch::TrapFrame;
use crate::error::{SysError, SysResult};
use crate::fs::{Descriptor, FileTable};
use crate::memory::address::page_round_up;
use crate::memory::layout::{RegionKind, STACK_TOP};
use crate::memory::{AddressSpace, PAGE_SIZE, PageTableFlags, Regions};
use crate::sync::{Channel, SpinLockGuard};

/// `proc_status` answers.
pub const STATUS_RUNNING: i64 = 0;
pub const STATUS_EXITED: i64 = 1;
pub const STATUS_NOT_EXIST: i64 = 2;

/// Result of one scan for exited children.
enum Reap {
    Reaped(Pid, i32, Remains),
    Pending,
    NoChildren,
}

/// What a reaped slot leaves behind, released after the table lock is
/// dropped.
struct Remains {
    space: Option<AddressSpace>,
    kstack: Option<KernelStack>,
    files: Vec<Descriptor>,
    messages: Vec<Message>,
}

/// One row of `procinfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub ppid: Pid,
    pub state: ProcState,
    /// Bytes of user memory.
    pub size: u64,
    pub name: ProcName,
}

impl ProcInfo {
    /// Size of the user-visible record.
    pub const RECORD: usize = 32 + NAME_LEN;

    /// `pid, ppid, state, size` as little-endian u64s, then the name.
    pub fn to_bytes(&self) -> [u8; Self::RECORD] {
        let mut out = [0u8; Self::RECORD];
        out[0..8].copy_from_slice(&self.pid.to_le_bytes());
        out[8..16].copy_from_slice(&self.ppid.to_le_bytes());
        out[16..24].copy_from_slice(&self.state.code().to_le_bytes());
        out[24..32].copy_from_slice(&self.size.to_le_bytes());
        out[32..].copy_from_slice(&self.name.raw());
        out
    }
}

impl Kernel {
    // ── Creation ────────────────────────────────────────────────

    /// Claims an UNUSED slot and gives it a pid, an empty address space and
    /// a kernel stack prepared for its first switch. The slot is left
    /// EMBRYO; the caller finishes setup and marks it RUNNABLE.
    pub(crate) fn alloc_proc(&self) -> SysResult<Slot> {
        let mut table = self.procs.lock();
        let Some(slot) = table.procs.iter().position(|p| p.state == ProcState::Unused) else {
            log::warn!("process table full ({} slots)", table.procs.len());
            return Err(SysError::TableFull);
        };
        let pid = table.next_pid;
        table.next_pid += 1;
        let entry = &mut table.procs[slot];
        entry.state = ProcState::Embryo;
        entry.pid = pid;
        drop(table);

        let data = unsafe { self.procs.data(slot) };
        let space = match AddressSpace::new(&self.frames, &self.kernel_space) {
            Ok(space) => space,
            Err(err) => {
                self.discard_embryo(slot);
                return Err(err.into());
            }
        };
        let mut kstack = KernelStack::new(self.config.kernel_stack_size);
        data.context = kstack.prepare_first_run();
        data.trap_frame = kstack.trap_frame();
        data.kstack = Some(kstack);
        data.space = Some(space);
        data.regions = Regions::default();
        data.files = FileTable::new(self.config.max_open_files);
        data.cwd = String::from("/");
        Ok(slot)
    }

    /// Hands an EMBRYO slot back to the table, releasing what it had.
    fn discard_embryo(&self, slot: Slot) {
        let data = unsafe { self.procs.data(slot) };
        if let Some(space) = data.space.take() {
            space.free(&self.frames);
        }
        data.kstack = None;
        data.files.drain();
        data.regions = Regions::default();
        data.trap_frame = core::ptr::null_mut();
        let mut table = self.procs.lock();
        let messages = table.procs[slot].mailbox.drain();
        table.procs[slot].clear();
        drop(table);
        for msg in messages {
            self.frames.free_page(msg.page);
        }
    }

    /// Creates the first process from a flat image loaded at address 0.
    pub fn user_init(&self, initcode: &[u8]) -> SysResult<Pid> {
        let slot = self.alloc_proc()?;
        let data = unsafe { self.procs.data(slot) };
        let stack = self.config.user_stack_pages as u64 * PAGE_SIZE;
        let image = page_round_up(initcode.len() as u64).max(PAGE_SIZE);
        let setup = match data.space.as_mut() {
            Some(space) => self.load_initcode(space, initcode, image, stack),
            None => Err(SysError::OutOfMemory),
        };
        if let Err(err) = setup {
            self.discard_embryo(slot);
            return Err(err);
        }
        data.regions = Regions {
            image,
            stack,
            ..Regions::default()
        };
        unsafe { data.trap_frame.write(TrapFrame::user(0, STACK_TOP)) };
        data.files = FileTable::with_console(self.config.max_open_files);

        let mut table = self.procs.lock();
        let entry = &mut table.procs[slot];
        entry.name = ProcName::new("init");
        entry.state = ProcState::Runnable;
        let pid = entry.pid;
        table.init = Some(slot);
        drop(table);
        log::info!("init is pid {pid} ({} byte image)", initcode.len());
        Ok(pid)
    }

    fn load_initcode(
        &self,
        space: &mut AddressSpace,
        initcode: &[u8],
        image: u64,
        stack: u64,
    ) -> SysResult<()> {
        space.alloc_range(&self.frames, 0, image, PageTableFlags::USER_RW)?;
        space.grow(&self.frames, RegionKind::Stack, 0, stack)?;
        space.copy_out(&self.frames, 0, initcode)?;
        Ok(())
    }

    /// Duplicates the calling process. The parent gets the child's pid; the
    /// child resumes from the same trap frame with 0 in `rax`.
    pub fn fork(&self) -> SysResult<Pid> {
        let parent = self.current_slot().ok_or(SysError::NoProcess)?;
        let child = self.alloc_proc()?;
        let (pdata, cdata) = unsafe { (self.procs.data(parent), self.procs.data(child)) };

        let copied = match (pdata.space.as_ref(), cdata.space.as_mut()) {
            (Some(from), Some(to)) => RegionKind::ALL.iter().try_for_each(|&kind| {
                let (start, end) = kind.span(pdata.regions.get(kind));
                if end > start {
                    from.copy_range(&self.frames, to, start, end)
                } else {
                    Ok(())
                }
            }),
            _ => panic!("fork: process without an address space"),
        };
        if let Err(err) = copied {
            log::warn!("fork: out of memory copying the address space");
            self.discard_embryo(child);
            return Err(err.into());
        }
        cdata.regions = pdata.regions;
        unsafe {
            let mut frame = *pdata.trap_frame;
            frame.rax = 0;
            cdata.trap_frame.write(frame);
        }
        cdata.files = pdata.files.clone();
        cdata.cwd = pdata.cwd.clone();

        let mut table = self.procs.lock();
        let name = table.procs[parent].name;
        let entry = &mut table.procs[child];
        entry.name = name;
        entry.parent = Some(parent);
        entry.state = ProcState::Runnable;
        let pid = entry.pid;
        drop(table);
        log::debug!("fork: pid {pid} ({name})");
        Ok(pid)
    }

    // ── Exit ────────────────────────────────────────────────────

    /// Terminates the calling process. Never returns.
    pub fn exit(&self, status: i32) -> ! {
        let table = self.become_zombie(status);
        let _table = self.sched(table);
        panic!("zombie exit");
    }

    /// Everything `exit` does before giving up the core. Returns with the
    /// table lock held and the caller marked ZOMBIE.
    fn become_zombie(&self, status: i32) -> SpinLockGuard<'_, Table> {
        let Some(slot) = self.current_slot() else {
            panic!("exit: no current process");
        };
        let data = unsafe { self.procs.data(slot) };
        drop(data.files.drain());
        data.cwd.clear();

        let mut table = self.procs.lock();
        if table.init == Some(slot) {
            panic!("init exiting");
        }
        self.orphan_children(&mut table, slot);
        let parent = table.procs[slot].parent;
        if let Some(parent) = parent {
            table.wakeup(Channel::Proc(parent));
        }
        let entry = &mut table.procs[slot];
        entry.exit_status = status;
        entry.state = ProcState::Zombie;
        log::debug!("pid {} ({}) exited with {status}", entry.pid, entry.name);
        table
    }

    /// Hands every child of `slot` to init, waking init if one of them has
    /// already exited.
    fn orphan_children(&self, table: &mut Table, slot: Slot) {
        let init = table.init;
        let mut zombie = false;
        for p in table.procs.iter_mut() {
            if p.state != ProcState::Unused && p.parent == Some(slot) {
                p.parent = init;
                zombie |= p.state == ProcState::Zombie;
            }
        }
        if let (true, Some(init)) = (zombie, init) {
            table.wakeup(Channel::Proc(init));
        }
    }

    // ── Wait ────────────────────────────────────────────────────

    /// Waits for a child to exit and reaps it. Returns its pid and status.
    pub fn wait(&self) -> SysResult<(Pid, i32)> {
        let me = self.current_slot().ok_or(SysError::NoProcess)?;
        let mut table = self.procs.lock();
        loop {
            match self.reap_child(&mut table, me) {
                Reap::Reaped(pid, status, remains) => {
                    drop(table);
                    self.release(remains);
                    return Ok((pid, status));
                }
                Reap::NoChildren => return Err(SysError::NoChildren),
                Reap::Pending => {}
            }
            if table.procs[me].killed {
                return Err(SysError::Killed);
            }
            table = self.sleep_locked(Channel::Proc(me), table);
        }
    }

    /// Non-blocking half of `wait`.
    fn reap_child(&self, table: &mut Table, parent: Slot) -> Reap {
        let mut children = false;
        for slot in 0..table.procs.len() {
            let p = &table.procs[slot];
            if p.state == ProcState::Unused || p.parent != Some(parent) {
                continue;
            }
            children = true;
            if p.state == ProcState::Zombie {
                let (pid, status) = (p.pid, p.exit_status);
                let remains = self.reap(table, slot);
                return Reap::Reaped(pid, status, remains);
            }
        }
        if children { Reap::Pending } else { Reap::NoChildren }
    }

    /// Takes a ZOMBIE slot's resources and frees the slot.
    fn reap(&self, table: &mut Table, slot: Slot) -> Remains {
        let data = unsafe { self.procs.data(slot) };
        let remains = Remains {
            space: data.space.take(),
            kstack: data.kstack.take(),
            files: data.files.drain(),
            messages: table.procs[slot].mailbox.drain(),
        };
        data.regions = Regions::default();
        data.trap_frame = core::ptr::null_mut();
        data.cwd = String::new();
        table.procs[slot].clear();
        remains
    }

    fn release(&self, remains: Remains) {
        if let Some(space) = remains.space {
            space.free(&self.frames);
        }
        drop(remains.kstack);
        drop(remains.files);
        for msg in remains.messages {
            self.frames.free_page(msg.page);
        }
    }

    // ── Kill ────────────────────────────────────────────────────

    /// Marks `pid` killed.
    ///
    /// A target that is not on a core right now (RUNNABLE or SLEEPING) is
    /// made a ZOMBIE on the spot with status -1, and its parent is woken to
    /// reap it. A RUNNING target only gets the flag and exits itself at its
    /// next return to user mode.
    pub fn kill(&self, pid: Pid) -> SysResult<()> {
        let mut table = self.procs.lock();
        let slot = table.slot_of(pid).ok_or(SysError::NoProcess)?;
        if table.init == Some(slot) {
            return Err(SysError::InvalidArgument);
        }
        let state = table.procs[slot].state;
        if state == ProcState::Zombie {
            return Err(SysError::NoProcess);
        }
        table.procs[slot].killed = true;
        if matches!(state, ProcState::Runnable | ProcState::Sleeping) {
            self.orphan_children(&mut table, slot);
            let entry = &mut table.procs[slot];
            entry.state = ProcState::Zombie;
            entry.chan = None;
            entry.exit_status = -1;
            let parent = entry.parent;
            if let Some(parent) = parent {
                table.wakeup(Channel::Proc(parent));
            }
        }
        log::info!("pid {pid} killed ({state:?})");
        Ok(())
    }

    /// Whether the calling process has been killed.
    pub fn killed(&self) -> bool {
        match self.current_slot() {
            Some(slot) => self.procs.lock().procs[slot].killed,
            None => false,
        }
    }

    // ── Memory regions ──────────────────────────────────────────

    /// Resizes region `kind` of the calling process by `delta` bytes.
    /// Returns the old size.
    fn resize_region(&self, kind: RegionKind, delta: i64) -> SysResult<u64> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        let data = unsafe { self.procs.data(slot) };
        let old = data.regions.get(kind);
        let new = old
            .checked_add_signed(delta)
            .ok_or(SysError::InvalidArgument)?;
        if new > kind.limit() {
            return Err(SysError::OutOfMemory);
        }
        let Some(space) = data.space.as_mut() else {
            return Err(SysError::NoProcess);
        };
        if new > old {
            space.grow(&self.frames, kind, old, new)?;
        } else {
            space.shrink(&self.frames, kind, old, new);
        }
        data.regions.set(kind, new);
        Ok(old)
    }

    /// `sbrk`: returns the previous break.
    pub fn grow_heap(&self, delta: i64) -> SysResult<u64> {
        let (start, _) = RegionKind::Heap.span(0);
        Ok(start + self.resize_region(RegionKind::Heap, delta)?)
    }

    /// Extends the stack by `pages`; returns the new lowest stack address.
    pub fn grow_stack(&self, pages: u64) -> SysResult<u64> {
        let delta = pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| i64::try_from(bytes).ok())
            .ok_or(SysError::InvalidArgument)?;
        let old = self.resize_region(RegionKind::Stack, delta)?;
        Ok(RegionKind::Stack.span(old + delta as u64).0)
    }

    /// Resizes the dynamic-library region; returns its previous end.
    pub fn grow_dylib(&self, delta: i64) -> SysResult<u64> {
        let (start, _) = RegionKind::Dylib.span(0);
        Ok(start + self.resize_region(RegionKind::Dylib, delta)?)
    }

    // ── Queries ─────────────────────────────────────────────────

    pub fn proc_status(&self, pid: Pid) -> i64 {
        let table = self.procs.lock();
        match table.slot_of(pid).map(|slot| table.procs[slot].state) {
            Some(ProcState::Zombie) => STATUS_EXITED,
            Some(_) => STATUS_RUNNING,
            None => STATUS_NOT_EXIST,
        }
    }

    pub fn parent_pid(&self) -> SysResult<Pid> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        let table = self.procs.lock();
        Ok(table.procs[slot].parent.map_or(0, |parent| table.procs[parent].pid))
    }

    /// Snapshot of table slot `index`.
    pub fn proc_info(&self, index: usize) -> SysResult<ProcInfo> {
        let table = self.procs.lock();
        let p = table.procs.get(index).ok_or(SysError::InvalidArgument)?;
        if p.state == ProcState::Unused {
            return Err(SysError::NoProcess);
        }
        let size = match p.state {
            // The regions of a process on another core may be changing;
            // only report them for ourselves and for parked processes.
            ProcState::Running if self.current_slot() != Some(index) => 0,
            ProcState::Embryo => 0,
            _ => unsafe { self.procs.data(index) }.regions.total(),
        };
        Ok(ProcInfo {
            pid: p.pid,
            ppid: p.parent.map_or(0, |parent| table.procs[parent].pid),
            state: p.state,
            size,
            name: p.name,
        })
    }

    pub fn set_name(&self, name: &str) -> SysResult<()> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        self.procs.lock().procs[slot].name = ProcName::new(name);
        Ok(())
    }

    /// Bytes of memory the calling process's regions occupy.
    pub fn memory_size(&self) -> SysResult<u64> {
        let slot = self.current_slot().ok_or(SysError::NoProcess)?;
        Ok(unsafe { self.procs.data(slot) }.regions.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn init_starts_with_console_descriptors_and_a_stack() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        assert_eq!(init, 1);
        let data = unsafe { kernel.procs.data(0) };
        assert_eq!(data.files.open_count(), 3);
        assert_eq!(data.cwd, "/");
        assert_eq!(data.regions.stack, PAGE_SIZE);
        let frame = unsafe { *data.trap_frame };
        assert_eq!(frame.rsp, STACK_TOP);
        assert!(frame.from_user());
        assert_eq!(kernel.proc_info(0).unwrap().name.as_str(), "init");
    }

    #[test]
    fn fork_then_wait_returns_every_child_and_frees_every_slot() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let free_frames = kernel.frames().free_count();
        let unused = kernel.procs.lock().count(ProcState::Unused);

        let mut children: Vec<Pid> = (0..5).map(|_| kernel.fork().unwrap()).collect();
        for &child in &children {
            testing::exit_child(&kernel, child, child as i32);
        }
        let mut reaped = Vec::new();
        for _ in 0..5 {
            let (pid, status) = kernel.wait().unwrap();
            assert_eq!(status, pid as i32);
            reaped.push(pid);
        }
        reaped.sort_unstable();
        children.sort_unstable();
        assert_eq!(reaped, children);
        assert_eq!(kernel.wait(), Err(SysError::NoChildren));
        assert_eq!(kernel.procs.lock().count(ProcState::Unused), unused);
        assert_eq!(kernel.frames().free_count(), free_frames);
    }

    #[test]
    fn fork_copies_memory_without_sharing_it() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        kernel.grow_heap(PAGE_SIZE as i64).unwrap();
        let heap = RegionKind::Heap.span(0).0;
        testing::poke(&kernel, 0, heap, b"parent");
        testing::poke(&kernel, 0, STACK_TOP - 8, b"stack");

        let child = kernel.fork().unwrap();
        let slot = kernel.procs.lock().slot_of(child).unwrap();
        assert_eq!(testing::peek_user(&kernel, slot, heap, 6), b"parent");
        assert_eq!(testing::peek_user(&kernel, slot, STACK_TOP - 8, 5), b"stack");
        let child_frame = unsafe { *kernel.procs.data(slot).trap_frame };
        assert_eq!(child_frame.rax, 0);

        testing::poke(&kernel, slot, heap, b"child!");
        assert_eq!(testing::peek_user(&kernel, 0, heap, 6), b"parent");
        assert_eq!(testing::peek_user(&kernel, slot, heap, 6), b"child!");
    }

    #[test]
    fn fork_fails_cleanly_when_the_table_is_full() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        for _ in 1..64 {
            kernel.fork().unwrap();
        }
        let free_frames = kernel.frames().free_count();
        let next_pid = kernel.procs.lock().next_pid;
        assert_eq!(kernel.fork(), Err(SysError::TableFull));
        assert_eq!(kernel.procs.lock().count(ProcState::Unused), 0);
        assert_eq!(kernel.procs.lock().next_pid, next_pid);
        assert_eq!(kernel.frames().free_count(), free_frames);
    }

    #[test]
    fn fork_rolls_back_when_memory_runs_out() {
        let kernel = testing::boot_with_frames(|_| {}, 24);
        testing::run_init(&kernel);
        kernel.grow_heap(8 * PAGE_SIZE as i64).unwrap();
        let free_frames = kernel.frames().free_count();
        let unused = kernel.procs.lock().count(ProcState::Unused);
        assert_eq!(kernel.fork(), Err(SysError::OutOfMemory));
        assert_eq!(kernel.frames().free_count(), free_frames);
        assert_eq!(kernel.procs.lock().count(ProcState::Unused), unused);
    }

    #[test]
    #[should_panic(expected = "init exiting")]
    fn init_may_not_exit() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let _ = kernel.become_zombie(0);
    }

    #[test]
    fn exit_reparents_to_init_and_wakes_it_for_zombies() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        let child = kernel.fork().unwrap();
        let child_slot = kernel.procs.lock().slot_of(child).unwrap();
        kernel.leave();
        kernel.enter(child_slot);
        let grandchild = kernel.fork().unwrap();
        testing::exit_child(&kernel, grandchild, 7);
        kernel.force_sleep(init, Channel::Proc(0));

        let table = kernel.become_zombie(3);
        let gc_slot = table.slot_of(grandchild).unwrap();
        assert_eq!(table.procs[gc_slot].parent, Some(0));
        assert_eq!(table.procs[child_slot].state, ProcState::Zombie);
        assert_eq!(table.procs[0].state, ProcState::Runnable);
        drop(table);
        assert!(unsafe { kernel.procs.data(child_slot) }.files.open_count() == 0);

        testing::switch_to(&kernel, 0);
        let mut reaped = [kernel.wait().unwrap(), kernel.wait().unwrap()];
        reaped.sort_unstable();
        assert_eq!(reaped, [(child, 3), (grandchild, 7)]);
        assert_eq!(kernel.state_of_pid(init), Some(ProcState::Running));
    }

    #[test]
    fn kill_zombifies_parked_processes_and_flags_running_ones() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        let sleeper = kernel.fork().unwrap();
        kernel.force_sleep(sleeper, Channel::Ticks);
        kernel.kill(sleeper).unwrap();
        assert_eq!(kernel.proc_status(sleeper), STATUS_EXITED);
        assert_eq!(kernel.wait(), Ok((sleeper, -1)));
        assert_eq!(kernel.proc_status(sleeper), STATUS_NOT_EXIST);

        assert_eq!(kernel.kill(init), Err(SysError::InvalidArgument));
        assert_eq!(kernel.kill(4242), Err(SysError::NoProcess));

        let child = kernel.fork().unwrap();
        let slot = kernel.procs.lock().slot_of(child).unwrap();
        kernel.leave();
        kernel.enter(slot);
        kernel.kill(child).unwrap();
        assert!(kernel.killed());
        assert_eq!(kernel.proc_status(child), STATUS_RUNNING);
    }

    #[test]
    fn kill_hands_orphans_to_init_and_wakes_it() {
        let kernel = testing::boot();
        let init = testing::run_init(&kernel);
        let child = kernel.fork().unwrap();
        testing::switch_to(&kernel, 1);
        let victim = kernel.fork().unwrap();
        testing::switch_to(&kernel, 2);
        let dead = kernel.fork().unwrap();
        let live = kernel.fork().unwrap();
        testing::exit_child(&kernel, dead, 9);
        kernel.leave();
        kernel.force_sleep(init, Channel::Proc(0));
        kernel.force_sleep(child, Channel::Proc(1));

        kernel.kill(victim).unwrap();
        let table = kernel.procs.lock();
        for orphan in [dead, live] {
            let slot = table.slot_of(orphan).unwrap();
            assert_eq!(table.procs[slot].parent, Some(0));
        }
        assert_eq!(table.procs[2].state, ProcState::Zombie);
        assert_eq!(table.procs[2].exit_status, -1);
        // The victim's parent, and init for the orphaned zombie.
        assert_eq!(table.procs[1].state, ProcState::Runnable);
        assert_eq!(table.procs[0].state, ProcState::Runnable);
        drop(table);

        kernel.enter(0);
        assert_eq!(kernel.wait(), Ok((dead, 9)));
        assert_eq!(kernel.state_of_pid(live), Some(ProcState::Runnable));
    }

    #[test]
    fn heap_growth_and_shrink_leave_the_allocator_as_it_was() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let before = kernel.frames().snapshot();
        let base = kernel.grow_heap(5 * PAGE_SIZE as i64).unwrap();
        assert_eq!(base, RegionKind::Heap.span(0).0);
        assert_eq!(
            kernel.grow_heap(-5 * PAGE_SIZE as i64).unwrap(),
            base + 5 * PAGE_SIZE
        );
        assert_eq!(kernel.frames().snapshot(), before);
        assert_eq!(kernel.grow_heap(-1), Err(SysError::InvalidArgument));
    }

    #[test]
    fn stack_and_library_regions_grow_independently() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        let bottom = kernel.grow_stack(2).unwrap();
        assert_eq!(bottom, STACK_TOP - 3 * PAGE_SIZE);
        let end = kernel.grow_dylib(PAGE_SIZE as i64).unwrap();
        assert_eq!(end, RegionKind::Dylib.span(0).0);
        let size = kernel.memory_size().unwrap();
        assert_eq!(size, 5 * PAGE_SIZE);
    }

    #[test]
    fn proc_info_record_layout() {
        let kernel = testing::boot();
        testing::run_init(&kernel);
        kernel.set_name("shell").unwrap();
        let info = kernel.proc_info(0).unwrap();
        let bytes = info.to_bytes();
        assert_eq!(&bytes[0..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[16..24], &ProcState::Running.code().to_le_bytes());
        assert_eq!(&bytes[32..37], b"shell");
        assert_eq!(kernel.proc_info(1), Err(SysError::NoProcess));
        assert_eq!(kernel.proc_info(64), Err(SysError::InvalidArgument));
    }
}
