//! Kernel threads (KT) and the per-process `Proc` table.
//!
//! Grounded in the teacher kernel's `proc.rs`/`proc/procs.rs` split (the
//! process pool, per-process locking, `sched`/`scheduler`, `WaitChannel`) and
//! in `original_source/kernel/proc.c`'s `kthread_*` family for the exact
//! state machine and failure semantics this module implements instead of the
//! teacher's original single-thread-per-process model.

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::addr::{pgrounddown, pgroundup, Addr, UVAddr, PGSIZE};
use crate::cpu::{swtch, Context, Cpu};
use crate::kernel::kernel;
use crate::memlayout::kstack as kstack_addr;
use crate::page::Page;
use crate::param::{KTHREAD_STACK_SIZE, MAXPROCNAME, NKT};
use crate::spinlock::Spinlock;
use crate::swap::{self, SwapState};
use crate::trapframe::TrapFrame;
use crate::vm::{PageTable, PteFlags};
use crate::waitchannel::WaitChannel;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ProcState {
    Unused,
    Used,
    Zombie,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TState {
    TUnused,
    TUsed,
    TSleeping,
    TRunnable,
    TRunning,
    TZombie,
}

/// Fields of a `KThread` slot mutated only while its own `lock` is held
/// (§5: "Each KT slot's fields are mutated only under its own lock").
pub struct KThreadInner {
    pub tstate: TState,
    pub thread_id: u32,
    pub killed: bool,
    pub xstate: i32,
    pub context: Context,
}

impl KThreadInner {
    const fn new() -> Self {
        Self {
            tstate: TState::TUnused,
            thread_id: 0,
            killed: false,
            xstate: 0,
            context: Context::new(),
        }
    }
}

/// One kernel-thread slot. `kstack` and `trapframe` are deterministic
/// functions of `(proc_index, slot_index)` and never change after
/// `kthreadinit` (§3 invariant, §8 testable property 3).
pub struct KThread {
    pub lock: Spinlock<KThreadInner>,
    proc_index: usize,
    slot_index: usize,
    kstack: usize,
    trapframe: *mut TrapFrame,
    /// The channel a joiner sleeps on until this slot reaches `TZombie`.
    pub chan: WaitChannel,
}

// SAFETY: `proc_index`/`slot_index`/`kstack` are set once in `kthreadinit`
// and read-only afterwards; `trapframe` points into a page owned by this
// slot's `Proc` for the lifetime of the process.
unsafe impl Sync for KThread {}

impl KThread {
    const fn new() -> Self {
        Self {
            lock: Spinlock::new(KThreadInner::new()),
            proc_index: 0,
            slot_index: 0,
            kstack: 0,
            trapframe: ptr::null_mut(),
            chan: WaitChannel::new(),
        }
    }

    pub fn slot_index(&self) -> usize {
        self.slot_index
    }

    pub fn kstack(&self) -> usize {
        self.kstack
    }

    pub fn trapframe(&self) -> *mut TrapFrame {
        self.trapframe
    }

    pub fn proc(&self) -> &'static Proc {
        &kernel().procs()[self.proc_index]
    }

    pub fn killed(&self) -> bool {
        self.lock.lock().killed
    }
}

/// Fields of a `Proc` mutated only under `lock` (or while single-threaded,
/// e.g. during `exec`), matching §5's shared-resource discipline.
pub struct ProcInner {
    pub state: ProcState,
    pub pid: i32,
    pub sz: usize,
    pub exit_status: i32,
    pub page_table: Option<PageTable<UVAddr>>,
    pub swap: SwapState,
    pub name: [u8; MAXPROCNAME],

    /// Only the getter/setter surface of a CFS-like scheduler is modeled
    /// here (§6); no scheduling decision actually reads these.
    pub ps_priority: i32,
    pub cfs_priority: i32,
    pub rtime: u32,
    pub stime: u32,
    pub retime: u32,
}

impl ProcInner {
    fn new() -> Self {
        Self {
            state: ProcState::Unused,
            pid: 0,
            sz: 0,
            exit_status: 0,
            page_table: None,
            swap: SwapState::new(),
            name: [0; MAXPROCNAME],
            ps_priority: 0,
            cfs_priority: 0,
            rtime: 0,
            stime: 0,
            retime: 0,
        }
    }
}

pub struct Proc {
    index: usize,

    pub lock: Spinlock<ProcInner>,

    /// Guards `next_thread_id` only (lock hierarchy level 3).
    thread_id_lock: Spinlock<u32>,

    /// Index of this process's parent slot, or `None` for the root. Weak:
    /// lookup-only, never used to extend the parent's lifetime beyond the
    /// process table itself.
    parent: Spinlock<Option<usize>>,

    killed: AtomicBool,

    pub kthreads: [KThread; NKT],

    /// Physical address of the page holding `NKT` `TrapFrame`s, one per slot.
    base_trapframes: AtomicI32,

    next_thread_id_raw: AtomicU32,
}

// SAFETY: `index` is fixed at table-construction time; all other fields are
// independently lock-protected or atomic.
unsafe impl Sync for Proc {}

impl Proc {
    pub fn new() -> Self {
        Self {
            index: 0,
            lock: Spinlock::new(ProcInner::new()),
            thread_id_lock: Spinlock::new(0),
            parent: Spinlock::new(None),
            killed: AtomicBool::new(false),
            kthreads: array_macro::array![_ => KThread::new(); NKT],
            base_trapframes: AtomicI32::new(0),
            next_thread_id_raw: AtomicU32::new(0),
        }
    }

    pub fn pid(&self) -> i32 {
        self.lock.lock().pid
    }

    pub fn kill(&self) {
        self.killed.store(true, Ordering::Release);
    }

    pub fn killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn base_trapframes(&self) -> *mut TrapFrame {
        self.base_trapframes.load(Ordering::Relaxed) as usize as *mut TrapFrame
    }

    /// Installs the page holding this process's trap frames. Called once,
    /// by whatever external `fork`/`exec` collaborator allocates a fresh
    /// `Proc` slot (out of scope here; see §1).
    pub fn set_trapframes_page(&self, page: &mut Page) {
        self.base_trapframes
            .store(page.as_mut_ptr() as usize as i32, Ordering::Relaxed);
    }

    /// §4.2 `Proc::grow`: extends the address space from its current `sz`
    /// to `newsz` one page at a time, registering each newly mapped page
    /// with `SwapManager::grow` when swap applies to this process (pid > 2).
    /// Rolls back every page it mapped (both the mapping and any swap
    /// bookkeeping) if an allocation fails partway through.
    pub fn grow(&self, newsz: usize, xperm: PteFlags) -> Option<usize> {
        let mut inner = self.lock.lock();
        let oldsz = inner.sz;
        if newsz < oldsz {
            return Some(oldsz);
        }
        let pid = inner.pid;
        let ok = {
            let ProcInner { page_table, swap, .. } = &mut *inner;
            let pt = page_table.as_mut()?;
            let mut a = pgroundup(oldsz);
            let mut ok = true;
            while a < newsz {
                if pt.uvmalloc(a, a + PGSIZE, xperm).is_none() {
                    if swap::active(pid) {
                        let mut b = pgroundup(oldsz);
                        while b < a {
                            swap::drop_va(swap, b.into());
                            b += PGSIZE;
                        }
                    }
                    pt.uvmdealloc(a, oldsz);
                    ok = false;
                    break;
                }
                if swap::active(pid) {
                    swap::grow(pt, swap, a.into());
                }
                a += PGSIZE;
            }
            ok
        };
        if ok {
            inner.sz = newsz;
            Some(newsz)
        } else {
            None
        }
    }

    /// §4.2 `Proc::shrink`: the inverse of `grow`. Drops swap bookkeeping
    /// (freeing any retained swap frame) for every page about to be
    /// unmapped before handing off to `PageTable::uvmdealloc`.
    pub fn shrink(&self, newsz: usize) -> usize {
        let mut inner = self.lock.lock();
        let oldsz = inner.sz;
        if newsz >= oldsz {
            return oldsz;
        }
        let pid = inner.pid;
        {
            let ProcInner { page_table, swap, .. } = &mut *inner;
            if let Some(pt) = page_table.as_mut() {
                if swap::active(pid) {
                    let mut a = pgroundup(newsz);
                    while a < pgroundup(oldsz) {
                        swap::drop_va(swap, a.into());
                        a += PGSIZE;
                    }
                }
                pt.uvmdealloc(oldsz, newsz);
            }
        }
        inner.sz = newsz;
        newsz
    }

    /// General unmap wrapper used outside the `grow`/`shrink` size-tracked
    /// path (e.g. `exec`'s stack-guard-page teardown): drops swap
    /// bookkeeping for `[va, va + n * PGSIZE)` before unmapping it.
    pub fn unmap(&self, va: UVAddr, n: usize, do_free: bool) {
        let mut inner = self.lock.lock();
        let pid = inner.pid;
        let ProcInner { page_table, swap, .. } = &mut *inner;
        let pt = match page_table.as_mut() {
            Some(pt) => pt,
            None => return,
        };
        if swap::active(pid) {
            let mut a = va.into_usize();
            let end = a + n * PGSIZE;
            while a < end {
                swap::drop_va(swap, a.into());
                a += PGSIZE;
            }
        }
        pt.uvmunmap(va, n, do_free);
    }

    /// §4.2/§7 page-fault entry point, called from the trap handler on a
    /// store/load/instruction page fault at `va`. Returns `true` if this
    /// was a paged-out page successfully serviced by `swap::fault_in`;
    /// `false` means the fault is a genuine segmentation violation and the
    /// caller must kill the faulting KT (`ProcessFault`, §7).
    pub fn page_fault(&self, va: usize) -> bool {
        let mut inner = self.lock.lock();
        let pid = inner.pid;
        if !swap::active(pid) {
            return false;
        }
        let ProcInner { page_table, swap, .. } = &mut *inner;
        let pt = match page_table.as_mut() {
            Some(pt) => pt,
            None => return false,
        };
        let va: UVAddr = pgrounddown(va).into();
        let paged_out = match pt.walk(va, false) {
            Some(pte) => pte.is_paged_out() && !pte.is_valid(),
            None => false,
        };
        if !paged_out {
            return false;
        }
        swap::fault_in(pt, swap, va);
        true
    }

    /// §4.4 `kthreadinit`: initializes every slot's immutable identity
    /// (`kstack`, `trapframe`, back-reference) exactly once.
    pub fn kthreadinit(&mut self, proc_index: usize) {
        self.index = proc_index;
        for (slot_index, kt) in self.kthreads.iter_mut().enumerate() {
            kt.proc_index = proc_index;
            kt.slot_index = slot_index;
            kt.kstack = kstack_addr(proc_index * NKT + slot_index);
            kt.trapframe =
                unsafe { self.base_trapframes().add(slot_index) };
            // SAFETY: single-threaded initialization, no guard needed.
            unsafe { (*kt.lock.get_mut_raw()).tstate = TState::TUnused };
        }
    }

    /// §4.4 `alloctid`: atomic post-increment under `thread_id_lock`.
    /// Monotone and unique within the lifetime of `self`.
    pub fn alloctid(&self) -> u32 {
        let mut next = self.thread_id_lock.lock();
        let tid = *next;
        *next = next.wrapping_add(1);
        tid
    }

    /// §4.4 `allocthread`: claims the first `TUnused` slot. Returns the slot
    /// index with its lock held, or `None` if every slot is in use.
    pub fn allocthread(&self) -> Option<usize> {
        for (i, kt) in self.kthreads.iter().enumerate() {
            let mut guard = kt.lock.lock();
            if guard.tstate == TState::TUnused {
                let tid = self.alloctid();
                guard.thread_id = tid;
                guard.tstate = TState::TUsed;
                guard.killed = false;
                guard.xstate = 0;
                guard.context = Context::new();
                guard.context.ra = forkret as usize;
                guard.context.sp = kt.kstack + PGSIZE;
                core::mem::forget(guard);
                return Some(i);
            }
        }
        None
    }

    /// §4.4 `kthread_create`. `stack_ptr`/`stack_size` describe the caller's
    /// already-allocated user stack; `stack_size` must equal
    /// `KTHREAD_STACK_SIZE` or this fails.
    pub fn kthread_create(&self, start: usize, stack_ptr: usize, stack_size: usize) -> i32 {
        if stack_size != KTHREAD_STACK_SIZE {
            return -1;
        }
        let slot = match self.allocthread() {
            Some(i) => i,
            None => return -1,
        };
        let kt = &self.kthreads[slot];
        // SAFETY: `allocthread` returned with this slot's lock held (and
        // then `mem::forget`-ed the guard), so we may access it here and
        // must release it ourselves before returning (§9 known-defect fix:
        // always release before return).
        let tid = unsafe {
            let inner = &mut *kt.lock.get_mut_raw();
            let tf = &mut *kt.trapframe;
            tf.sp = stack_ptr + stack_size;
            tf.epc = start;
            inner.tstate = TState::TRunnable;
            let tid = inner.thread_id;
            kt.lock.unlock();
            tid
        };
        tid as i32
    }

    /// §4.4 `kthread_kill`.
    pub fn kthread_kill(&self, ktid: i32) -> i32 {
        for kt in &self.kthreads {
            let mut guard = kt.lock.lock();
            if guard.tstate != TState::TUnused && guard.thread_id == ktid as u32 {
                guard.killed = true;
                if guard.tstate == TState::TSleeping {
                    guard.tstate = TState::TRunnable;
                }
                return 0;
            }
        }
        -1
    }

    /// §4.4 `kill_all_other_threads`: used on the `exec`/`exit` paths.
    pub fn kill_all_other_threads(&self, except_slot: usize) {
        for i in 0..self.kthreads.len() {
            if i == except_slot {
                continue;
            }
            let tid = {
                let mut guard = self.kthreads[i].lock.lock();
                if guard.tstate == TState::TUnused {
                    continue;
                }
                guard.killed = true;
                if guard.tstate == TState::TSleeping {
                    guard.tstate = TState::TRunnable;
                }
                guard.thread_id as i32
            };
            self.kthread_join(i, tid, &mut 0);
        }
    }

    /// §4.4 `kthread_exit`. `caller_slot` identifies the exiting KT.
    /// Control never returns (mirrors the teacher's `sched()`-terminated
    /// exit paths), modeled here by panicking if the scheduler switch ever
    /// comes back without this slot being runnable again, which cannot
    /// happen while `tstate == TZombie`.
    pub fn kthread_exit(&self, caller_slot: usize, status: i32) -> ! {
        let last = self.is_last_active_thread(caller_slot);
        if last {
            self.exit_process(status);
        }
        let kt = &self.kthreads[caller_slot];
        // SAFETY: `caller_slot` is the *currently running* KT, whose slot
        // lock `scheduler()`'s own un-dropped guard is still holding for
        // this KT's entire run (the same invariant `kthread_create` respects
        // via `get_mut_raw()`, proc.rs:396-409); `kt.lock.lock()` here would
        // re-acquire our own lock and trip `RawSpinlock::acquire`'s
        // `assert!(!self.holding())`.
        unsafe {
            let inner = &mut *kt.lock.get_mut_raw();
            inner.xstate = status;
            inner.tstate = TState::TZombie;
            // §9 known-defect fix: `Proc.state` is left untouched here.
        }
        kt.chan.wakeup_from(self, caller_slot);
        unsafe { scheduler_yield(caller_slot) };
        unreachable!("kthread_exit: scheduler resumed a zombie thread")
    }

    fn is_last_active_thread(&self, caller_slot: usize) -> bool {
        self.kthreads.iter().enumerate().all(|(i, kt)| {
            if i == caller_slot {
                return true;
            }
            let guard = kt.lock.lock();
            matches!(guard.tstate, TState::TUnused | TState::TZombie)
        })
    }

    /// Delegate for when the exiting KT is the last one standing. A full
    /// multi-process `exit()`/`wait()` protocol is an external collaborator
    /// (§1); this core only guarantees the process is marked `Zombie`.
    fn exit_process(&self, status: i32) -> ! {
        {
            let mut info = self.lock.lock();
            info.state = ProcState::Zombie;
            info.exit_status = status;
        }
        unsafe { scheduler_yield(usize::MAX) }
        unreachable!("exit_process: scheduler resumed a zombie process")
    }

    /// §4.4 `kthread_join`. Self-join is rejected. Returns `-1` on any
    /// failure, `0` on success with `*status_out` holding the exit status.
    pub fn kthread_join(&self, ktid_slot_hint: usize, ktid: i32, status_out: &mut i32) -> i32 {
        let cur = unsafe { current_kthread() }.expect("kthread_join: no current kthread");
        let cur_slot = unsafe { (*cur).slot_index() };
        if unsafe { (*cur).thread_id_of(self) } == ktid as u32 {
            return -1;
        }

        let slot = {
            let _proc_guard = self.lock.lock();
            self.kthreads.iter().enumerate().position(|(i, kt)| {
                if i == cur_slot {
                    // SAFETY: this is the joiner's own currently-running
                    // slot, whose lock `scheduler()`'s own un-dropped guard
                    // already holds for this KT's entire run (see
                    // `kthread_exit`/`clockintr`); `kt.lock.lock()` here
                    // would re-acquire it and trip `RawSpinlock::acquire`'s
                    // `assert!(!self.holding())`.
                    unsafe { (*kt.lock.get_mut_raw()).thread_id == ktid as u32 }
                } else {
                    kt.lock.lock().thread_id == ktid as u32
                }
            })
        };
        let slot = match slot.or(Some(ktid_slot_hint).filter(|&i| i < self.kthreads.len())) {
            Some(i) => i,
            None => return -1,
        };
        let kt = &self.kthreads[slot];

        let mut guard = kt.lock.lock();
        if guard.tstate == TState::TUnused {
            return -1;
        }
        loop {
            if guard.tstate == TState::TZombie {
                break;
            }
            // SAFETY: see above — the joiner's own slot lock is already
            // held by `scheduler()`, so its fields are reached via
            // `get_mut_raw()`, never `.lock()`.
            let joiner = unsafe { &mut *(*cur).lock.get_mut_raw() };
            if joiner.killed {
                return -1;
            }
            joiner.tstate = TState::TSleeping;
            kt.chan.sleep(&mut guard, || unsafe { scheduler_yield(usize::MAX) });
        }
        *status_out = guard.xstate;
        self.freekthread(&mut guard);
        0
    }

    /// §4.4 `freekthread`: resets transient fields. `kstack` is
    /// slot-invariant and must NEVER be cleared (§9 known-defect fix).
    fn freekthread(&self, guard: &mut crate::lock::Guard<'_, crate::spinlock::RawSpinlock, KThreadInner>) {
        guard.tstate = TState::TUnused;
        guard.thread_id = 0;
        guard.killed = false;
        guard.xstate = 0;
        guard.context = Context::new();
    }
}

impl KThread {
    /// # Safety
    ///
    /// Must only be called on the currently running `KThread`, whose slot
    /// lock `scheduler()`'s own un-dropped guard already holds for this KT's
    /// entire run (see `kthread_exit`/`clockintr`); a `.lock()` here would
    /// re-acquire it and trip `RawSpinlock::acquire`'s
    /// `assert!(!self.holding())`.
    unsafe fn thread_id_of(&self, proc: &Proc) -> u32 {
        debug_assert!(ptr::eq(proc, self.proc()));
        unsafe { (*self.lock.get_mut_raw()).thread_id }
    }
}

impl WaitChannel {
    /// Wakes every `KThread` slot of `proc` sleeping on `self` other than
    /// `skip_slot`. A thin specialization of the generic `WaitChannel`:
    /// KT join channels are per-slot, so in practice at most one other slot
    /// is ever sleeping on a given instance, but scanning costs nothing on
    /// a table this small.
    fn wakeup_from(&self, proc: &Proc, skip_slot: usize) {
        for (i, kt) in proc.kthreads.iter().enumerate() {
            if i == skip_slot {
                continue;
            }
            // Each `KThread` owns exactly one join channel (itself), so
            // identity comparison against `self` only matters because the
            // generic `WaitChannel` type allows multiple instances; here we
            // rely on the caller having passed `kt.chan`, i.e. joiners sleep
            // on the *target's own* channel.
            if ptr::eq(&kt.chan, self) {
                let mut guard = kt.lock.lock();
                if guard.tstate == TState::TSleeping {
                    guard.tstate = TState::TRunnable;
                }
            }
        }
    }
}

/// A freshly `allocthread`-ed KT's very first scheduling by `scheduler()`
/// `swtch`es here (`allocthread` sets `context.ra = forkret as usize`,
/// §4.4). Releases the slot lock `scheduler()`'s own un-dropped guard is
/// still holding across the switch — the same situation `kthread_create`
/// resolves via `get_mut_raw()`/`unlock()` (proc.rs:396-409), since
/// reacquiring it here would trip `RawSpinlock::acquire`'s
/// `assert!(!self.holding())` — then enters user mode at the trap frame's
/// `epc`/`sp`, already populated by `kthread_create` (proc.rs:403-404).
unsafe fn forkret() -> ! {
    let kt = unsafe { current_kthread() }.expect("forkret: no current kthread");
    unsafe { (*kt).lock.unlock() };
    unsafe { crate::trap::usertrapret(kt) }
}

/// Returns the `KThread` currently running on this hart, or `None`.
///
/// # Safety
///
/// Must be called with interrupts disabled (e.g. inside `push_off`, or
/// while already holding a spinlock).
pub unsafe fn current_kthread() -> Option<*mut KThread> {
    let cpu = unsafe { kernel().current_cpu() };
    let kt = unsafe { (*cpu).kthread() };
    if kt.is_null() {
        None
    } else {
        Some(kt)
    }
}

/// Switches away from the calling kernel thread back into this hart's
/// scheduler loop. `caller_slot` is accepted for documentation/testing
/// purposes only; the actual target is whatever `scheduler()` picks next.
///
/// # Safety
///
/// Must be called with the calling KT's own slot lock held and interrupts
/// disabled, exactly like the teacher's `ProcGuard::sched`.
pub unsafe fn scheduler_yield(_caller_slot: usize) {
    let cpu = unsafe { kernel().current_cpu() };
    debug_assert_eq!(unsafe { (*cpu).noff() }, 1, "scheduler_yield: locks held");
    let interrupt_enabled = unsafe { (*cpu).interrupt_enabled() };
    let kt = unsafe { (*cpu).kthread() };
    let context = if kt.is_null() {
        ptr::null_mut()
    } else {
        unsafe { &mut (*(*kt).lock.get_mut_raw()).context as *mut Context }
    };
    unsafe { swtch(context, (*cpu).context_raw_mut()) };
    let cpu = unsafe { kernel().current_cpu() };
    unsafe { (*cpu).set_interrupt_enabled(interrupt_enabled) };
}

/// Per-hart scheduler loop. Grounded in the teacher's `Procs::scheduler`:
/// scans every process's KT slots for one that is `TRunnable`, switches to
/// it, and loops. Never returns.
pub unsafe fn scheduler() -> ! {
    let cpu = unsafe { kernel().current_cpu() };
    unsafe { (*cpu).set_kthread(ptr::null_mut()) };
    loop {
        unsafe { crate::riscv::intr_on() };
        for proc in kernel().procs() {
            for kt in &proc.kthreads {
                let mut guard = kt.lock.lock();
                if guard.tstate == TState::TRunnable {
                    guard.tstate = TState::TRunning;
                    unsafe { (*cpu).set_kthread(kt as *const KThread as *mut KThread) };
                    unsafe {
                        swtch(
                            (*cpu).context_raw_mut(),
                            &mut guard.context as *mut Context,
                        )
                    };
                    unsafe { (*cpu).set_kthread(ptr::null_mut()) };
                }
            }
        }
    }
}
