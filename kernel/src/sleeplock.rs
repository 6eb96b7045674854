//! Sleeplocks: mutual exclusion for critical sections long enough that
//! busy-waiting (as `Spinlock` does) would waste a hart better spent running
//! some other KT.
//!
//! Grounded in the teacher kernel's `lock::sleeplock::RawSleeplock`: an
//! owner field (`-1` unlocked, else the holder's pid) protected by a short
//! spinlock. The teacher blocks a contended acquirer with its
//! `Sleepablelock`/`WaitChannel` sleep-wakeup pair; this core's `WaitChannel`
//! has no matching broadcast `wakeup`, so a contended acquirer here yields
//! the calling KT in a loop instead of being woken by the releaser, the same
//! simplification `sys_sleep` makes for the ticks channel.

use crate::lock::{Lock, RawLock};
use crate::proc::{current_kthread, scheduler_yield};
use crate::spinlock::RawSpinlock;

pub struct RawSleeplock {
    owner: Lock<RawSpinlock, i32>,
}

pub type Sleeplock<T> = Lock<RawSleeplock, T>;
pub type SleeplockGuard<'s, T> = crate::lock::Guard<'s, RawSleeplock, T>;

impl<T> Sleeplock<T> {
    pub const fn new(data: T) -> Self {
        Lock::new(RawSleeplock::new(), data)
    }
}

impl RawSleeplock {
    pub const fn new() -> Self {
        Self {
            owner: Lock::new(RawSpinlock::new(), -1),
        }
    }

    fn current_pid() -> i32 {
        match unsafe { current_kthread() } {
            Some(kt) => unsafe { (*kt).proc() }.pid(),
            None => -1,
        }
    }
}

impl RawLock for RawSleeplock {
    fn new() -> Self {
        RawSleeplock::new()
    }

    fn acquire(&self) {
        loop {
            let mut owner = self.owner.lock();
            if *owner == -1 {
                *owner = Self::current_pid();
                return;
            }
            let kt = unsafe { current_kthread() };
            drop(owner);
            if let Some(kt) = kt {
                unsafe { scheduler_yield((*kt).slot_index()) };
            }
        }
    }

    unsafe fn release(&self) {
        *self.owner.lock() = -1;
    }

    fn holding(&self) -> bool {
        *self.owner.lock() == Self::current_pid() && Self::current_pid() != -1
    }
}
