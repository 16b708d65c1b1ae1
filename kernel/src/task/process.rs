//! The process table.
//!
//! Every process lives in one of a fixed number of slots. A slot is split in
//! two halves with different rules:
//!
//! - [`ProcEntry`]: state, pid, parent link, wait channel, killed flag, exit
//!   status, mailbox. Lives under the table's spin lock; anything that reads
//!   or writes it holds that lock.
//! - [`ProcData`]: address space, kernel stack, saved context, open files,
//!   working directory. Owned by the process itself and touched without a
//!   lock, only by the process while it runs or by whoever holds it in
//!   EMBRYO or ZOMBIE (its creator, its reaper).
//!
//! Processes refer to each other by slot index, never by pointer.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;
use core::mem::size_of;

use super::mailbox::Mailbox;
use crate::arch::{self, Context, TrapFrame};
use crate::fs::FileTable;
use crate::memory::{AddressSpace, Regions};
use crate::sync::{Channel, SpinLock};

// ── Identifiers ─────────────────────────────────────────────────

/// Process id. Unique among live processes, never reused.
pub type Pid = u64;

/// Index into the process table.
pub type Slot = usize;

/// Lifecycle state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    /// Allocated, still being set up by its creator.
    Embryo,
    Sleeping,
    Runnable,
    Running,
    /// Exited; waiting for its parent to collect the status.
    Zombie,
}

impl ProcState {
    /// Numeric code reported by `procinfo`.
    pub const fn code(self) -> u64 {
        match self {
            ProcState::Unused => 0,
            ProcState::Embryo => 1,
            ProcState::Sleeping => 2,
            ProcState::Runnable => 3,
            ProcState::Running => 4,
            ProcState::Zombie => 5,
        }
    }

    /// Alive and not yet exited.
    pub const fn is_live(self) -> bool {
        !matches!(self, ProcState::Unused | ProcState::Zombie)
    }
}

// ── Names ───────────────────────────────────────────────────────

pub const NAME_LEN: usize = 16;

/// Fixed-size process name; longer names are cut at a char boundary.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct ProcName {
    bytes: [u8; NAME_LEN],
    len: u8,
}

impl ProcName {
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0; NAME_LEN];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("?")
    }

    /// NUL-padded bytes, as copied into a `procinfo` record.
    pub fn raw(&self) -> [u8; NAME_LEN] {
        self.bytes
    }
}

impl fmt::Debug for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for ProcName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Kernel stack ────────────────────────────────────────────────

/// A process's kernel stack.
///
/// The top holds the process's trap frame. Below it a freshly prepared stack
/// holds one [`Context`] whose return address is the first-run trampoline,
/// so the first switch into the process "returns" into user mode.
pub struct KernelStack {
    mem: *mut [u128],
}

// The stack is plain memory owned by exactly one process.
unsafe impl Send for KernelStack {}

impl KernelStack {
    pub fn new(size: usize) -> Self {
        let words = size.div_ceil(size_of::<u128>()).max(
            (size_of::<TrapFrame>() + size_of::<Context>()).div_ceil(size_of::<u128>()),
        );
        let mem = vec![0u128; words].into_boxed_slice();
        Self {
            mem: Box::into_raw(mem),
        }
    }

    fn base(&self) -> u64 {
        self.mem as *mut u128 as u64
    }

    pub fn top(&self) -> u64 {
        self.base() + (self.mem.len() * size_of::<u128>()) as u64
    }

    /// Where the trap frame sits: the very top of the stack.
    pub fn trap_frame(&self) -> *mut TrapFrame {
        (self.top() - size_of::<TrapFrame>() as u64) as *mut TrapFrame
    }

    /// Lays out an empty trap frame and a first-run context under it.
    /// Returns the stack pointer to switch to.
    pub fn prepare_first_run(&mut self) -> u64 {
        let frame = self.trap_frame();
        let context = (frame as u64 - size_of::<Context>() as u64) as *mut Context;
        unsafe {
            frame.write(TrapFrame::default());
            context.write(Context {
                rip: arch::first_run_entry(),
                ..Context::default()
            });
        }
        context as u64
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        drop(unsafe { Box::from_raw(self.mem) });
    }
}

// ── Process control block ───────────────────────────────────────

/// The locked half of a slot.
#[derive(Debug)]
pub struct ProcEntry {
    pub state: ProcState,
    pub pid: Pid,
    pub parent: Option<Slot>,
    pub name: ProcName,
    /// Set while SLEEPING, `None` otherwise.
    pub chan: Option<Channel>,
    pub killed: bool,
    /// Valid once ZOMBIE.
    pub exit_status: i32,
    pub mailbox: Mailbox,
}

impl ProcEntry {
    fn new(mailbox_slots: usize) -> Self {
        Self {
            state: ProcState::Unused,
            pid: 0,
            parent: None,
            name: ProcName::default(),
            chan: None,
            killed: false,
            exit_status: 0,
            mailbox: Mailbox::new(mailbox_slots),
        }
    }

    /// Back to UNUSED. The mailbox must already be drained.
    pub(crate) fn clear(&mut self) {
        debug_assert!(self.mailbox.is_empty());
        self.state = ProcState::Unused;
        self.pid = 0;
        self.parent = None;
        self.name = ProcName::default();
        self.chan = None;
        self.killed = false;
        self.exit_status = 0;
    }
}

/// The unlocked half of a slot.
pub struct ProcData {
    pub space: Option<AddressSpace>,
    pub regions: Regions,
    pub kstack: Option<KernelStack>,
    /// Saved kernel stack pointer while switched out.
    pub context: u64,
    /// Trap frame of the current trap; valid while RUNNING.
    pub trap_frame: *mut TrapFrame,
    pub files: FileTable,
    pub cwd: String,
}

impl ProcData {
    fn new() -> Self {
        Self {
            space: None,
            regions: Regions::default(),
            kstack: None,
            context: 0,
            trap_frame: core::ptr::null_mut(),
            files: FileTable::default(),
            cwd: String::new(),
        }
    }
}

struct ProcCell(UnsafeCell<ProcData>);

// Access is serialized by the state machine: see `ProcTable::data`.
unsafe impl Sync for ProcCell {}
unsafe impl Send for ProcCell {}

/// Everything under the table lock.
pub struct Table {
    pub procs: Vec<ProcEntry>,
    pub(crate) next_pid: Pid,
    /// Slot of the first process; orphans are reparented to it.
    pub init: Option<Slot>,
}

impl Table {
    /// Slot of the process with `pid`, if it has not been reaped.
    pub fn slot_of(&self, pid: Pid) -> Option<Slot> {
        if pid == 0 {
            return None;
        }
        self.procs
            .iter()
            .position(|p| p.pid == pid && p.state != ProcState::Unused)
    }

    /// Makes every process sleeping on `chan` runnable.
    pub fn wakeup(&mut self, chan: Channel) {
        for p in self.procs.iter_mut() {
            if p.state == ProcState::Sleeping && p.chan == Some(chan) {
                p.state = ProcState::Runnable;
            }
        }
    }

    pub fn count(&self, state: ProcState) -> usize {
        self.procs.iter().filter(|p| p.state == state).count()
    }

    pub fn has_children(&self, parent: Slot) -> bool {
        self.procs
            .iter()
            .any(|p| p.state != ProcState::Unused && p.parent == Some(parent))
    }
}

/// The process table.
pub struct ProcTable {
    pub(crate) table: SpinLock<Table>,
    cells: Box<[ProcCell]>,
}

impl ProcTable {
    pub fn new(capacity: usize, mailbox_slots: usize) -> Self {
        let procs = (0..capacity).map(|_| ProcEntry::new(mailbox_slots)).collect();
        let cells = (0..capacity)
            .map(|_| ProcCell(UnsafeCell::new(ProcData::new())))
            .collect();
        Self {
            table: SpinLock::new(
                "proc",
                Table {
                    procs,
                    next_pid: 1,
                    init: None,
                },
            ),
            cells,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    pub fn lock(&self) -> crate::sync::SpinLockGuard<'_, Table> {
        self.table.lock()
    }

    /// The unlocked half of `slot`.
    ///
    /// # Safety
    /// The caller must be the only party touching that data: the process
    /// itself while it runs, its creator while it is EMBRYO, or its reaper
    /// while it is ZOMBIE and the table lock is held. No other reference
    /// returned by this function for the same slot may be live.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn data(&self, slot: Slot) -> &mut ProcData {
        unsafe { &mut *self.cells[slot].0.get() }
    }

    /// The locked half of `slot`, bypassing the lock. Test-only, for
    /// observing the table from inside a simulated switch while the
    /// switching core holds the lock.
    ///
    /// # Safety
    /// No live reference into the entry may exist.
    #[cfg(test)]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn peek(&self, slot: Slot) -> &mut ProcEntry {
        unsafe { &mut (&mut (*self.table.data_ptr()).procs)[slot] }
    }
}
