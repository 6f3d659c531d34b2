//! Interrupt-safe spin lock. `acquire` disables interrupts on the local
//! hart before spinning so that an interrupt handler can never deadlock by
//! trying to retake a lock its own hart already holds; nesting is counted
//! per hart (see [`crate::proc::Cpu`]) so only the outermost release
//! restores the prior interrupt-enable state.
use crate::proc::{IntrLock, CPUS};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

pub struct Mutex<T: ?Sized> {
    locked: AtomicBool,
    name: &'static str,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}

pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    // Held for the guard's whole lifetime: interrupts stay disabled on
    // this hart for as long as the lock is held, and are only restored
    // (if this was the outermost acquisition) when the guard drops.
    _intr_lock: IntrLock<'a>,
}

unsafe impl<T: ?Sized + Sync> Sync for MutexGuard<'_, T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T, name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            name,
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    pub fn lock(&self) -> MutexGuard<'_, T> {
        // Disable interrupts before spinning: an interrupt handler that
        // fired on this hart while we spin could itself try to acquire
        // this lock and deadlock forever.
        let intr_lock = CPUS.intr_lock();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }

        MutexGuard {
            mutex: self,
            _intr_lock: intr_lock,
        }
    }

    fn raw_unlock(&self) {
        assert!(self.locked.load(Ordering::Relaxed), "release: {}", self.name);
        self.locked.store(false, Ordering::Release);
    }

    /// Release `guard` without reacquiring, returning the underlying lock
    /// so the caller can relock it later (used by `sleep`, which must drop
    /// the caller's lock before suspending and retake it on wakeup).
    pub fn unlock(guard: MutexGuard<'_, T>) -> &'_ Mutex<T> {
        let mutex = guard.mutex;
        drop(guard);
        mutex
    }

    /// Clear the lock state without holding a guard. Used only by a fork
    /// child's first scheduling: it inherits the parent's held lock across
    /// the context switch but never called `lock()` itself in this thread,
    /// so it has no `MutexGuard` to drop.
    pub unsafe fn force_unlock(&self) {
        self.raw_unlock();
        CPUS.intr_unlock();
    }

    /// Bypass the lock entirely. Used only for read-only debugging output
    /// (`procdump`) where taking the lock could wedge an already-stuck
    /// machine further.
    pub unsafe fn get_mut(&self) -> &mut T {
        &mut *self.data.get()
    }
}

impl<T: ?Sized> MutexGuard<'_, T> {
    pub fn holding(&self) -> bool {
        self.mutex.locked.load(Ordering::Relaxed)
    }
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.raw_unlock();
    }
}
