//! The kernel-wide singleton.
//!
//! Grounded in the teacher kernel's `kernel.rs` `KernelBuilder`/`kernel()`
//! pair, but built over `spin::Once` (as the teacher already does for its
//! on-disk superblocks) instead of a `static mut` + manual `Pin` projection:
//! this core has no `!Unpin` fields analogous to the teacher's `bcache`, so
//! the simpler shape suffices (DESIGN.md).

use spin::Once;

use crate::cpu::{Cpu, Cpus};
use crate::kalloc::Kmem;
use crate::page::Page;
use crate::param::NPROC;
use crate::proc::Proc;
use crate::spinlock::Spinlock;

pub struct Kernel {
    /// The process table: `NPROC` fixed slots, indexed by `proc_index`.
    procs: [Proc; NPROC],

    cpus: Cpus,

    kmem: Spinlock<Kmem>,

    /// Timer ticks since boot, and the channel `sys_sleep` waits on.
    ticks: Spinlock<u32>,

    /// The global "wait/process-global lock" at the top of §5's hierarchy.
    pub wait_lock: Spinlock<()>,

    /// SW's process-wide monotone `creationTime` counter (§9).
    creation_time: Spinlock<u32>,
}

static KERNEL: Once<Kernel> = Once::new();

/// Initializes the kernel singleton.
///
/// # Safety
///
/// Must be called exactly once, before any other CPU calls `kernel()`, and
/// the physical frame allocator must not yet have been used.
pub unsafe fn init() {
    KERNEL.call_once(|| {
        let mut kmem = Kmem::new();
        unsafe { kmem.init() };
        Kernel {
            procs: array_macro::array![_ => Proc::new(); NPROC],
            cpus: Cpus::new(),
            kmem: Spinlock::new(kmem),
            ticks: Spinlock::new(0),
            wait_lock: Spinlock::new(()),
            creation_time: Spinlock::new(0),
        }
    });
}

/// Returns the kernel singleton.
///
/// # Panics
///
/// Panics if `init()` has not yet run.
pub fn kernel() -> &'static Kernel {
    KERNEL.get().expect("kernel singleton not initialized")
}

impl Kernel {
    pub fn procs(&self) -> &[Proc; NPROC] {
        &self.procs
    }

    /// Returns a pointer to the calling hart's `Cpu` record.
    ///
    /// # Safety
    ///
    /// See `Cpus::current`.
    pub unsafe fn current_cpu(&self) -> *mut Cpu {
        unsafe { self.cpus.current() }
    }

    pub fn alloc(&self) -> Option<Page> {
        self.kmem.lock().alloc()
    }

    pub fn free(&self, page: Page) {
        self.kmem.lock().free(page);
    }

    pub fn ticks(&self) -> &Spinlock<u32> {
        &self.ticks
    }

    /// Advances the tick counter by one and returns the new value. Called
    /// once per hart per timer interrupt by `clockintr`.
    pub fn tick(&self) -> u32 {
        let mut ticks = self.ticks.lock();
        *ticks = ticks.wrapping_add(1);
        *ticks
    }

    /// Returns the next value of SW's monotone `creationTime` counter
    /// (§9: "initialized lazily on first call" — satisfied here by the
    /// surrounding `Once`-guarded singleton itself).
    pub fn next_creation_time(&self) -> u32 {
        let mut t = self.creation_time.lock();
        *t = t.wrapping_add(1);
        *t
    }
}
