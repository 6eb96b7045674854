//! Sleep/wakeup: `sleep(chan, lock)` and `wakeup(chan)` match by the
//! identity of an opaque channel address (§5 GLOSSARY: "sleep channel").
//!
//! Grounded in the teacher kernel's `proc::WaitChannel`: a non-zero-sized
//! marker so two distinct channels never alias to the same address, which
//! would wake the wrong sleeper.

use crate::lock::{Guard, RawLock};

pub struct WaitChannel {
    _non_zero_sized: u8,
}

impl WaitChannel {
    pub const fn new() -> Self {
        Self {
            _non_zero_sized: 0,
        }
    }

    /// Releases `guard`'s lock, calls `resched` (expected to switch away to
    /// some other runnable kernel thread and only return once this caller has
    /// been scheduled again), then reacquires the lock.
    ///
    /// Matches §5: "`sleep(chan, lock)` (drops `lock`, marks KT TSLEEPING,
    /// reschedules, reacquires `lock` on wake)". Marking the state transition
    /// itself is the caller's job, performed on `guard`'s data before calling
    /// this function.
    pub fn sleep<R: RawLock, T>(&self, guard: &mut Guard<'_, R, T>, resched: impl FnOnce()) {
        guard.reacquire_after(resched);
    }
}

impl Default for WaitChannel {
    fn default() -> Self {
        Self::new()
    }
}
