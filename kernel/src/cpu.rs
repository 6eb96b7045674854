//! Per-hart state: which `KThread` (if any) is running here, and the
//! `push_off`/`pop_off` nesting depth used to keep interrupts off across a
//! held spinlock.
//!
//! `current_cpu`/`mykthread` are only ever reached from contexts that
//! already hold a spinlock or have interrupts off by construction (the
//! `push_off`/`pop_off` discipline), so no extra type-level proof of that
//! fact is threaded through the API (see DESIGN.md).

use core::ptr;

use array_macro::array;

use crate::param::NCPU;
use crate::proc::KThread;

pub struct Cpu {
    /// The kernel thread running on this hart, or null.
    kthread: *mut KThread,

    /// `swtch()` here to enter the scheduler loop.
    context: Context,

    /// Depth of `push_off` nesting.
    noff: i32,

    /// Were interrupts enabled before the outermost `push_off`?
    interrupt_enabled: bool,
}

/// Callee-saved register save area for `swtch`.
///
/// Grounded in the teacher kernel's `Context`/`swtch.S` ABI: `swtch` is
/// irreducibly assembly, so it is exposed here as an opaque `extern "C"` call
/// that saves/restores callee-saved registers and swaps stack pointers.
#[repr(C)]
#[derive(Default)]
pub struct Context {
    pub ra: usize,
    pub sp: usize,

    // callee-saved
    pub s0: usize,
    pub s1: usize,
    pub s2: usize,
    pub s3: usize,
    pub s4: usize,
    pub s5: usize,
    pub s6: usize,
    pub s7: usize,
    pub s8: usize,
    pub s9: usize,
    pub s10: usize,
    pub s11: usize,
}

impl Context {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
        }
    }
}

extern "C" {
    /// Saves the caller's callee-saved registers into `*old`, restores them
    /// from `*new`, and resumes execution on `new`'s stack. Defined in
    /// `swtch.S`.
    pub fn swtch(old: *mut Context, new: *mut Context);
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            kthread: ptr::null_mut(),
            context: Context::new(),
            noff: 0,
            interrupt_enabled: false,
        }
    }

    pub fn kthread(&self) -> *mut KThread {
        self.kthread
    }

    pub fn set_kthread(&mut self, kt: *mut KThread) {
        self.kthread = kt;
    }

    pub fn context_raw_mut(&mut self) -> *mut Context {
        &mut self.context as *mut Context
    }

    pub fn noff(&self) -> i32 {
        self.noff
    }

    pub fn bump_noff(&mut self, delta: i32) {
        self.noff += delta;
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.interrupt_enabled
    }

    pub fn set_interrupt_enabled(&mut self, enabled: bool) {
        self.interrupt_enabled = enabled;
    }
}

pub struct Cpus([core::cell::UnsafeCell<Cpu>; NCPU]);

// SAFETY: each hart only ever accesses its own slot (indexed by `cpuid()`),
// and all other accesses go through `push_off`/`pop_off` + spinlocks.
unsafe impl Sync for Cpus {}

impl Cpus {
    pub const fn new() -> Self {
        Self(array![_ => core::cell::UnsafeCell::new(Cpu::new()); NCPU])
    }

    /// Returns a pointer to the calling hart's `Cpu` record.
    ///
    /// # Safety
    ///
    /// The returned pointer may stop referring to the current hart the
    /// moment interrupts are reenabled and the owning kernel thread migrates
    /// (see §5); callers must hold `push_off` (or a spinlock, which implies
    /// it) while the pointer is live.
    pub unsafe fn current(&self) -> *mut Cpu {
        self.0[crate::riscv::cpuid()].get()
    }
}
