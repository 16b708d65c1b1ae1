// =============================================================================
// Cinder — Kernel Synchronization Primitives
// =============================================================================
//
//   intr.rs      : nested interrupt disabling (push_off / pop_off)
//   spinlock.rs  : busy-wait mutual exclusion, interrupts off while held
//   sleeplock.rs : blocking mutual exclusion built on sleep/wakeup
//
// Lock ordering (acquire outer before inner, never the reverse):
//   Level 1 (innermost): frame pool free list
//   Level 2: process table
//   Level 3 (outermost): tick counter, pty table and console line buffer,
//                        sleep-lock state
//
// `sleep` takes the process table while a level-3 lock is still held and
// only then drops the level-3 lock. That hand-over is what makes
// sleep/wakeup free of lost wakeups.
// =============================================================================

pub mod intr;
pub mod sleeplock;
pub mod spinlock;

pub use intr::{InterruptGuard, pop_off, push_off};
pub use sleeplock::{SleepLock, SleepLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};

use crate::task::process::Slot;

/// What a sleeping process waits for.
///
/// `wakeup` is a broadcast over every process sleeping on an equal key.
/// Typed keys keep unrelated waiters from aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// A process waiting for one of its children to exit.
    Proc(Slot),
    /// The global tick counter advanced.
    Ticks,
    /// A message arrived in this process's mailbox.
    Mailbox(Slot),
    /// A line of console input arrived.
    Console,
    /// Data or hang-up on a pseudo-terminal.
    Pty(usize),
    /// A sleep lock was released.
    SleepLock(u64),
}
