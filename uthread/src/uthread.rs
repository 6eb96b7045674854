//! The fixed-size user-thread table and its cooperative scheduler (§4.5).
//!
//! Grounded in `original_source/user/uthread.c`: `uthreads[MAX_UTHREADS]`,
//! `uscheduler`, `uthread_create`/`uthread_yield`/`uthread_exit`/
//! `uthread_set_priority`/`uthread_get_priority`/`uthread_start_all`/
//! `uthread_self`. Two resolved ambiguities from the source, recorded here
//! rather than in §9 (which only lists the defects the spec calls out by
//! name) and in DESIGN.md:
//!
//! - `uthread_start_all` there calls `uswtch(&t->context, ...)` on a `t`
//!   that is never assigned — undefined behavior on the very first switch.
//!   This module gives the "caller of `uthread_start_all`" a real context
//!   (`MAIN_CTX`) to switch from and, symmetrically, back into once no UT
//!   is left runnable, the same role the kernel's per-hart `Cpu::context`
//!   plays for `scheduler()` in `kernel::proc`.
//! - `new_thread->context.sp = &ustack + STACK_SIZE - 1 //maybe without -1`:
//!   the source itself flags this as unresolved. §4.5 fixes it without the
//!   `- 1`.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::context::{uswtch, Context};
use crate::param::{MAX_UTHREADS, STACK_SIZE};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UthreadState {
    Free,
    Runnable,
    Running,
}

/// Total order over thread priorities (§4.5, §6): declaration order is
/// significant, `High > Medium > Low`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[repr(align(16))]
struct UStack([u8; STACK_SIZE]);

impl UStack {
    const fn new() -> Self {
        Self([0; STACK_SIZE])
    }
}

/// One user-thread slot (§3). `ustack` is embedded (not heap-allocated):
/// the whole table is a fixed-size array, exactly as `uthreads` is in the
/// source.
pub struct UThread {
    pub state: UthreadState,
    pub priority: Priority,
    pub context: Context,
    ustack: UStack,
}

impl UThread {
    const fn new() -> Self {
        Self {
            state: UthreadState::Free,
            priority: Priority::Low,
            context: Context::new(),
            ustack: UStack::new(),
        }
    }

    fn stack_top(&mut self) -> usize {
        &mut self.ustack as *mut UStack as usize + STACK_SIZE
    }
}

struct Table(UnsafeCell<[UThread; MAX_UTHREADS]>);

// SAFETY: this library is cooperative and single-threaded by construction
// (§1 GLOSSARY: "scheduled entirely in user mode within one KT"); every
// entry point below either runs on behalf of the one currently-running UT
// or, for `uthread_create`, is only ever called from that same UT before
// any second KT of this process could plausibly be running this library's
// code (kernel threads are an orthogonal, external axis of concurrency the
// UT library never touches). No lock is needed for the same reason the
// original C globals needed none.
unsafe impl Sync for Table {}

static TABLE: Table = Table(UnsafeCell::new(array_macro::array![_ => UThread::new(); MAX_UTHREADS]));

/// Slot index of the currently running UT, or `MAX_UTHREADS` (sentinel for
/// "none", so this can live in an `AtomicUsize` without an `Option` CAS
/// dance; nothing here is actually accessed from more than one hart, see
/// `Table`'s safety comment).
static CURRENT: AtomicUsize = AtomicUsize::new(MAX_UTHREADS);

/// Set once `uthread_create` has been called at least once (§4.5:
/// `uthread_start_all` "is legal only after at least one `create`").
static EVER_CREATED: AtomicBool = AtomicBool::new(false);

/// The context of whoever calls `uthread_start_all` (ordinarily the KT's
/// `main`). `uthread_start_all` switches away from it into the first UT;
/// the library switches back into it once no UT remains runnable, giving
/// `uthread_start_all` a real return path instead of the source's
/// undefined-behavior `uswtch(&t->context, ...)` on an unset `t`.
static mut MAIN_CTX: Context = Context::new();

#[allow(clippy::mut_from_ref)]
fn table_mut() -> &'static mut [UThread; MAX_UTHREADS] {
    // SAFETY: see `Table`'s safety comment.
    unsafe { &mut *TABLE.0.get() }
}

fn current_slot() -> Option<usize> {
    match CURRENT.load(Ordering::Relaxed) {
        i if i < MAX_UTHREADS => Some(i),
        _ => None,
    }
}

fn set_current(slot: Option<usize>) {
    CURRENT.store(slot.unwrap_or(MAX_UTHREADS), Ordering::Relaxed);
}

/// §4.5 `uscheduler`, fixed: the source seeds `max_prio` at `0` and leaves
/// `max_prio_t` uninitialized when nothing qualifies, which is undefined
/// behavior the instant every slot is `FREE`. This scans explicitly through
/// an `Option` and only ever returns `None` when no slot is `RUNNABLE`.
/// Because the currently-`RUNNING` slot is (by definition) not `RUNNABLE`,
/// it is automatically excluded from selection — which is exactly §4.5's
/// "the running UT is ineligible to be selected unless no other is
/// RUNNABLE": when no slot is `RUNNABLE`, callers fall back to keeping the
/// current UT running (or, at the very first switch / on a fully drained
/// table, to `MAIN_CTX`).
fn pick_best_runnable() -> Option<usize> {
    let table = table_mut();
    let mut best: Option<usize> = None;
    for (i, ut) in table.iter().enumerate() {
        if ut.state != UthreadState::Runnable {
            continue;
        }
        best = match best {
            Some(b) if table[b].priority >= ut.priority => Some(b),
            _ => Some(i),
        };
    }
    best
}

fn find_free_slot() -> Option<usize> {
    table_mut()
        .iter()
        .position(|ut| ut.state == UthreadState::Free)
}

/// §4.5 `uthread_create`: installs `context.ra = start`,
/// `context.sp = &ustack + STACK_SIZE` (§4.5's fixed semantics, no `- 1`),
/// state `RUNNABLE`. Returns `-1` if every slot is in use.
pub fn uthread_create(start: extern "C" fn(), priority: Priority) -> i32 {
    let slot = match find_free_slot() {
        Some(i) => i,
        None => return -1,
    };
    EVER_CREATED.store(true, Ordering::Relaxed);
    let ut = &mut table_mut()[slot];
    let top = ut.stack_top();
    ut.context = Context::new();
    ut.context.ra = start as usize;
    ut.context.sp = top;
    ut.priority = priority;
    ut.state = UthreadState::Runnable;
    slot as i32
}

/// §4.5 `uthread_yield`: switches to the `RUNNABLE` UT with the greatest
/// priority (ties: lowest index). If none is `RUNNABLE`, the calling UT
/// simply keeps running — no switch is performed.
pub fn uthread_yield() {
    let cur = match current_slot() {
        Some(i) => i,
        None => return, // called from `MAIN_CTX`'s side; nothing to yield from
    };
    let next = match pick_best_runnable() {
        Some(i) => i,
        None => return,
    };
    let table = table_mut();
    table[cur].state = UthreadState::Runnable;
    table[next].state = UthreadState::Running;
    set_current(Some(next));
    let cur_ctx = &mut table[cur].context as *mut Context;
    let next_ctx = &mut table[next].context as *mut Context;
    unsafe { uswtch(cur_ctx, next_ctx) };
}

/// §4.5 `uthread_exit`: frees the calling UT's slot and yields. Unlike
/// plain `uthread_yield`, a freed slot can never be switched back into, so
/// when no other UT is `RUNNABLE` this falls back to `MAIN_CTX` rather than
/// "keeping the current UT running".
pub fn uthread_exit() -> ! {
    let cur = current_slot().expect("uthread_exit: no uthread currently running");
    table_mut()[cur].state = UthreadState::Free;
    match pick_best_runnable() {
        Some(next) => {
            let table = table_mut();
            table[next].state = UthreadState::Running;
            set_current(Some(next));
            let cur_ctx = &mut table[cur].context as *mut Context;
            let next_ctx = &mut table[next].context as *mut Context;
            unsafe { uswtch(cur_ctx, next_ctx) };
        }
        None => {
            set_current(None);
            let cur_ctx = &mut table_mut()[cur].context as *mut Context;
            unsafe { uswtch(cur_ctx, core::ptr::addr_of_mut!(MAIN_CTX)) };
        }
    }
    unreachable!("uthread_exit: scheduler resumed a freed uthread slot")
}

/// §4.5 `uthread_set_priority`: returns the previous priority.
pub fn uthread_set_priority(priority: Priority) -> Priority {
    let cur = current_slot().expect("uthread_set_priority: no uthread currently running");
    let ut = &mut table_mut()[cur];
    let prev = ut.priority;
    ut.priority = priority;
    prev
}

/// §4.5 `uthread_get_priority`.
pub fn uthread_get_priority() -> Priority {
    let cur = current_slot().expect("uthread_get_priority: no uthread currently running");
    table_mut()[cur].priority
}

/// §4.5 `uthread_self`: returns the currently running UT, or `None` if
/// called outside any UT's execution (e.g. before `uthread_start_all`).
pub fn uthread_self() -> Option<&'static UThread> {
    current_slot().map(|i| &table_mut()[i])
}

/// §4.5 `uthread_start_all`: legal only after at least one `uthread_create`.
/// Hands control to the highest-priority `RUNNABLE` UT and does not return
/// until every UT has exited (at which point control returns here via the
/// `MAIN_CTX` fallback in `uthread_exit`/`uthread_yield`'s callers).
pub fn uthread_start_all() -> i32 {
    if !EVER_CREATED.load(Ordering::Relaxed) {
        return -1;
    }
    let next = match pick_best_runnable() {
        Some(i) => i,
        None => return -1,
    };
    let table = table_mut();
    table[next].state = UthreadState::Running;
    set_current(Some(next));
    let next_ctx = &mut table[next].context as *mut Context;
    unsafe { uswtch(core::ptr::addr_of_mut!(MAIN_CTX), next_ctx) };
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    // These tests exercise only the pure scheduling-policy logic
    // (`pick_best_runnable`'s priority/tie-break rule); `uthread_create`'s
    // real stack/context wiring and the `uswtch`-driven switches are
    // exercised end to end under QEMU, out of reach here (mirrors
    // `kernel::vm`'s test module split).

    fn reset() {
        let table = table_mut();
        for ut in table.iter_mut() {
            *ut = UThread::new();
        }
        set_current(None);
        EVER_CREATED.store(false, Ordering::Relaxed);
    }

    #[test]
    fn picks_strictly_greatest_priority_breaking_ties_by_lowest_index() {
        reset();
        let table = table_mut();
        table[0].state = UthreadState::Runnable;
        table[0].priority = Priority::Medium;
        table[1].state = UthreadState::Runnable;
        table[1].priority = Priority::High;
        table[2].state = UthreadState::Runnable;
        table[2].priority = Priority::High;
        assert_eq!(pick_best_runnable(), Some(1));
    }

    #[test]
    fn running_slot_is_ineligible_unless_nothing_else_is_runnable() {
        reset();
        let table = table_mut();
        table[0].state = UthreadState::Running;
        table[0].priority = Priority::High;
        assert_eq!(pick_best_runnable(), None);

        table[1].state = UthreadState::Runnable;
        table[1].priority = Priority::Low;
        assert_eq!(pick_best_runnable(), Some(1));
    }

    #[test]
    fn create_claims_first_free_slot_and_sets_up_the_stack_pointer() {
        reset();
        extern "C" fn entry() {}
        let slot = uthread_create(entry, Priority::High);
        assert_eq!(slot, 0);
        let table = table_mut();
        assert_eq!(table[0].state, UthreadState::Runnable);
        assert_eq!(table[0].context.ra, entry as usize);
        let base = &mut table[0].ustack as *mut UStack as usize;
        assert_eq!(table[0].context.sp, base + STACK_SIZE);
    }

    #[test]
    fn create_fails_once_every_slot_is_used() {
        reset();
        extern "C" fn entry() {}
        for _ in 0..MAX_UTHREADS {
            assert_ne!(uthread_create(entry, Priority::Low), -1);
        }
        assert_eq!(uthread_create(entry, Priority::Low), -1);
    }

    #[test]
    fn start_all_rejects_when_nothing_was_ever_created() {
        reset();
        assert_eq!(uthread_start_all(), -1);
    }
}
