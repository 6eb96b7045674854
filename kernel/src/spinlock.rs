//! Spinlocks: mutual exclusion that busy-waits with interrupts disabled.
//!
//! Grounded in the teacher kernel's `lock::spinlock::RawSpinlock`: the lock
//! word is the current holder's `Cpu` pointer (null when free), swapped in
//! with an acquire/release atomic so ordinary loads need no extra fence.
//! `push_off`/`pop_off` nest per-CPU exactly as the teacher's.

use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::cpu::Cpu;
use crate::kernel::kernel;
use crate::lock::{Lock, RawLock};

pub struct RawSpinlock {
    locked: AtomicPtr<Cpu>,
}

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = crate::lock::Guard<'s, RawSpinlock, T>;

impl<T> Spinlock<T> {
    pub const fn new(data: T) -> Self {
        Lock::new(RawSpinlock::new(), data)
    }
}

impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl RawLock for RawSpinlock {
    fn new() -> Self {
        RawSpinlock::new()
    }

    fn acquire(&self) {
        unsafe { push_off() };
        assert!(!self.holding(), "acquire: already held by this cpu");

        while self
            .locked
            .compare_exchange(
                ptr::null_mut(),
                kernel().current_cpu(),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_err()
        {
            spin_loop();
        }
    }

    unsafe fn release(&self) {
        assert!(self.holding(), "release: not held by this cpu");
        self.locked.store(ptr::null_mut(), Ordering::Release);
        unsafe { pop_off() };
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == kernel().current_cpu()
    }
}

/// Disables interrupts and bumps this CPU's `push_off` nesting depth.
///
/// Matched with `pop_off`; two `pop_off`s are needed to undo two `push_off`s.
/// If interrupts were already off, `push_off`/`pop_off` leaves them off.
///
/// # Safety
///
/// Must be paired with a later call to `pop_off` on the same CPU.
pub unsafe fn push_off() {
    let old = crate::riscv::intr_get();
    unsafe { crate::riscv::intr_off() };

    let cpu = kernel().current_cpu();
    unsafe {
        if (*cpu).noff() == 0 {
            (*cpu).set_interrupt_enabled(old);
        }
        (*cpu).bump_noff(1);
    }
}

/// # Safety
///
/// Must be paired with an earlier call to `push_off` on the same CPU.
pub unsafe fn pop_off() {
    let cpu = kernel().current_cpu();
    assert!(!crate::riscv::intr_get(), "pop_off: interruptible");
    unsafe {
        assert!((*cpu).noff() >= 1, "pop_off: unbalanced");
        (*cpu).bump_noff(-1);
        if (*cpu).noff() == 0 && (*cpu).interrupt_enabled() {
            crate::riscv::intr_on();
        }
    }
}
