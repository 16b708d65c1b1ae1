// =============================================================================
// Cinder — Spin Lock
// =============================================================================
//
// Busy-wait mutual exclusion for data shared between cores.
//
// HOW IT WORKS:
//   - One flag. To lock: disable interrupts (nested), then atomically swap
//     `true` into the flag until the old value comes back `false`.
//   - The owning core id is recorded after acquisition, so the lock can tell
//     a self-deadlock from ordinary contention.
//   - To unlock: clear the owner, store `false`, pop the interrupt nesting.
//
// IRQ SAFETY:
//   Interrupts stay off on the holding core for as long as the lock is held.
//   Otherwise an interrupt handler that wants the same lock would spin
//   forever on a core whose holder can never run again.
//
// FATAL MISUSE:
//   Acquiring a lock this core already holds, and releasing one it does not
//   hold, are kernel bugs. Both panic.
// =============================================================================

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::intr::{pop_off, push_off};
use crate::arch;

const NO_OWNER: usize = usize::MAX;

/// Mutual exclusion with interrupts disabled while held.
pub struct SpinLock<T> {
    name: &'static str,
    locked: AtomicBool,
    owner: AtomicUsize,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for SpinLock<T> {}
unsafe impl<T: Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            name,
            locked: AtomicBool::new(false),
            owner: AtomicUsize::new(NO_OWNER),
            data: UnsafeCell::new(data),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Spins until the lock is ours.
    ///
    /// # Panics
    /// If this core already holds the lock.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        push_off();
        if self.holding() {
            panic!("spinlock {}: re-acquired", self.name);
        }
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        self.owner.store(arch::cpu_id(), Ordering::Relaxed);
        SpinLockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Whether the calling core holds this lock.
    ///
    /// Must be called with interrupts off, or the answer may be stale by the
    /// time it is used.
    pub fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner.load(Ordering::Relaxed) == arch::cpu_id()
    }

    fn release(&self) {
        if !self.holding() {
            panic!("spinlock {}: released without holding", self.name);
        }
        self.owner.store(NO_OWNER, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        pop_off();
    }

    /// Releases a lock whose guard was given up across a context switch.
    ///
    /// # Safety
    /// The guard that acquired the lock must have been forgotten, so it will
    /// never be dropped.
    pub unsafe fn force_unlock(&self) {
        self.release();
    }

    /// Exclusive access without locking; `&mut self` proves no one else can
    /// hold it.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Raw pointer to the protected data, for diagnostics that must not block.
    pub fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

/// Holds a [`SpinLock`]; releases it on drop.
///
/// Not `Send`: the lock belongs to the core that took it.
pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _not_send: PhantomData<*const ()>,
}

impl<'a, T> SpinLockGuard<'a, T> {
    /// Releases the lock, returning it so the caller can re-acquire later.
    pub fn unlock(guard: Self) -> &'a SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }

    /// The lock this guard holds.
    pub fn lock_ref(guard: &Self) -> &'a SpinLock<T> {
        guard.lock
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_masks_interrupts_until_release() {
        arch::enable_interrupts();
        let lock = SpinLock::new("test", 5u32);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(!arch::interrupts_enabled());
            assert!(lock.holding());
        }
        assert!(arch::interrupts_enabled());
        assert!(!lock.holding());
        assert_eq!(*lock.lock(), 6);
    }

    #[test]
    fn nested_locks_restore_interrupts_once() {
        arch::enable_interrupts();
        let outer = SpinLock::new("outer", ());
        let inner = SpinLock::new("inner", ());
        let a = outer.lock();
        let b = inner.lock();
        drop(b);
        assert!(!arch::interrupts_enabled());
        drop(a);
        assert!(arch::interrupts_enabled());
    }

    #[test]
    #[should_panic(expected = "spinlock twice: re-acquired")]
    fn relocking_on_same_core_is_fatal() {
        let lock = SpinLock::new("twice", ());
        let _a = lock.lock();
        let _b = lock.lock();
    }

    #[test]
    #[should_panic(expected = "released without holding")]
    fn releasing_unheld_lock_is_fatal() {
        let lock = SpinLock::new("idle", ());
        unsafe { lock.force_unlock() };
    }

    #[test]
    fn another_core_does_not_count_as_holder() {
        let lock = Arc::new(SpinLock::new("shared", ()));
        let guard = lock.lock();
        let other = Arc::clone(&lock);
        let seen = thread::spawn(move || {
            arch::hosted::bind_cpu(1);
            other.holding()
        })
        .join()
        .unwrap();
        assert!(!seen);
        drop(guard);
    }

    #[test]
    fn cores_serialize_on_the_lock() {
        let lock = Arc::new(SpinLock::new("counter", 0u64));
        let workers: Vec<_> = (0..4)
            .map(|id| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    arch::hosted::bind_cpu(id);
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }

    #[test]
    fn unlock_hands_back_the_lock() {
        let lock = SpinLock::new("relock", 1);
        let guard = lock.lock();
        let again = SpinLockGuard::unlock(guard);
        assert!(!again.holding());
        assert_eq!(*again.lock(), 1);
    }
}
