//! Generic lock machinery.
//!
//! Grounded in the teacher kernel's `lock` module: a `RawLock` trait captures
//! the acquire/release/holding contract, and `Lock<R, T>` is a single generic
//! wrapper that owns both the raw lock and the data it protects. `Spinlock<T>`
//! and `Sleeplock<T>` are both just `Lock<R, T>` instantiated over a different
//! `R`. Dropped relative to the teacher: the `Pin`-based `RemoteLock` and
//! lifetime-branded lock families, which exist there to let multiple locks
//! share one `RawLock` or to statically pair a guard with its lock; this
//! kernel's per-slot/per-process locking never needs either, so the simpler
//! shape is kept (see DESIGN.md).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// The operations a raw (data-free) lock must provide.
pub trait RawLock {
    fn new() -> Self;

    /// Acquires the lock, blocking (by whatever means `Self` blocks) until held.
    fn acquire(&self);

    /// Releases the lock.
    ///
    /// # Safety
    ///
    /// The caller must currently be holding the lock.
    unsafe fn release(&self);

    /// Returns whether the *current* CPU/thread of control holds the lock.
    fn holding(&self) -> bool;
}

/// A lock that owns a `RawLock` and the data it protects.
pub struct Lock<R: RawLock, T> {
    raw: R,
    data: UnsafeCell<T>,
}

unsafe impl<R: RawLock + Send, T: Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    pub const fn new(raw: R, data: T) -> Self {
        Self {
            raw,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self) -> Guard<'_, R, T> {
        self.raw.acquire();
        Guard { lock: self }
    }

    /// Returns a raw pointer to the protected data, bypassing the lock.
    ///
    /// # Safety
    ///
    /// The caller must ensure this does not race with a concurrent access.
    pub fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    pub fn holding(&self) -> bool {
        self.raw.holding()
    }

    /// Releases the lock without running `Guard::drop`.
    ///
    /// # Safety
    ///
    /// The caller must currently be holding the lock (typically via a
    /// `mem::forget`-ed `Guard`).
    pub unsafe fn unlock(&self) {
        unsafe { self.raw.release() };
    }
}

/// A guard granting exclusive access to a `Lock<R, T>`'s data until dropped.
pub struct Guard<'s, R: RawLock, T> {
    pub(crate) lock: &'s Lock<R, T>,
}

impl<R: RawLock, T> Guard<'_, R, T> {
    /// Temporarily releases the lock for the duration of `f`, then reacquires it.
    ///
    /// Grounded in the teacher's `WaitChannel::sleep`, which releases the
    /// caller's guard around the scheduler switch and restores it on wake.
    pub fn reacquire_after<F, U>(&mut self, f: F) -> U
    where
        F: FnOnce() -> U,
    {
        unsafe { self.lock.raw.release() };
        let result = f();
        self.lock.raw.acquire();
        result
    }
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        unsafe { self.lock.raw.release() };
    }
}
