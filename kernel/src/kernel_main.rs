//! Supervisor-mode entry point, reached once per hart via `start::start`'s
//! `mret`.
//!
//! Grounded in the teacher kernel's `kernel_main.rs`/`main.rs`: hart 0 brings
//! up the shared singletons (console, physical allocator, kernel state)
//! while every other hart spins until hart 0 publishes readiness, then every
//! hart falls into its own copy of the per-hart scheduler loop (§5: "one
//! logical CPU per hardware thread").

use core::sync::atomic::{AtomicBool, Ordering};

use crate::{kernel, println, proc, riscv, uart};

static INITED: AtomicBool = AtomicBool::new(false);

/// `start()` sets `mepc` to this function and `mret`s into it.
///
/// # Safety
///
/// Must only be reached via `start::start`, once per hart, with `tp` already
/// holding this hart's index.
pub unsafe fn main() -> ! {
    if riscv::cpuid() == 0 {
        unsafe { uart::init() };
        println!();
        println!("rv6 kernel booting");
        unsafe { kernel::init() };
        INITED.store(true, Ordering::Release);
    } else {
        while !INITED.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        println!("hart {} starting", riscv::cpuid());
    }

    unsafe { proc::scheduler() }
}
