//! Blocking mutual exclusion.
//!
//! A sleep lock is for data held across operations that may themselves
//! block (file I/O through a collaborator, for instance). Contenders sleep
//! on the lock's channel instead of spinning, so interrupts stay on while
//! the lock is held.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use super::{Channel, SpinLock};
use crate::Kernel;
use crate::task::process::Pid;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Holder {
    locked: bool,
    pid: Pid,
}

pub struct SleepLock<T> {
    state: SpinLock<Holder>,
    id: u64,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SleepLock<T> {}
unsafe impl<T: Send> Send for SleepLock<T> {}

impl<T> SleepLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            state: SpinLock::new("sleeplock", Holder { locked: false, pid: 0 }),
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            data: UnsafeCell::new(data),
        }
    }

    fn channel(&self) -> Channel {
        Channel::SleepLock(self.id)
    }

    /// Acquires the lock, sleeping while another process holds it.
    pub fn lock<'a>(&'a self, kernel: &'a Kernel) -> SleepLockGuard<'a, T> {
        let mut state = self.state.lock();
        while state.locked {
            state = kernel.sleep(self.channel(), state);
        }
        state.locked = true;
        state.pid = kernel.current_pid().unwrap_or(0);
        drop(state);
        SleepLockGuard { lock: self, kernel }
    }

    /// Whether the calling process holds the lock.
    pub fn holding(&self, kernel: &Kernel) -> bool {
        let state = self.state.lock();
        state.locked && state.pid == kernel.current_pid().unwrap_or(0)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    kernel: &'a Kernel,
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.lock.state.lock();
        state.locked = false;
        state.pid = 0;
        self.kernel.wakeup(self.lock.channel());
    }
}
