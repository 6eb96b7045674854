//! Minimum surface needed to drive KT scheduling from timer and page-fault
//! traps (§4.6).
//!
//! Grounded in the teacher kernel's `trap.rs`/`arch/riscv/trap.rs` split
//! between the architecture-independent dispatch (`usertrap`/`kerneltrap`)
//! and the RISC-V-specific `scause` decoding; collapsed into one module the
//! same way `riscv.rs` collapses the teacher's HAL trait, since this core
//! targets RISC-V only (§1). `uservec`/`userret`/`kernelvec`/`trampoline`
//! are, like `swtch`, irreducibly assembly and not reproduced here; this
//! module is the landing site those routines call into.

use crate::addr::PGSIZE;
use crate::kernel::kernel;
use crate::memlayout::TRAPFRAME;
use crate::proc::{current_kthread, scheduler_yield, KThread};
use crate::riscv::{
    self, make_satp, EXCEPTION_INSTRUCTION_PAGE_FAULT, EXCEPTION_LOAD_PAGE_FAULT,
    EXCEPTION_STORE_PAGE_FAULT, EXCEPTION_SYSCALL, SCAUSE_INTERRUPT_BIT, SCAUSE_TIMER,
};
use crate::swap;

extern "C" {
    /// Defined in the unshipped `trampoline.S`: switches to the user page
    /// table, restores the trap frame at `TRAPFRAME`, and `sret`s to user
    /// mode.
    fn userret(trapframe: usize, satp: usize) -> !;
}

enum TrapType {
    Syscall,
    PageFault(usize),
    Timer,
    BadTrap,
}

fn classify(scause: usize, stval: usize) -> TrapType {
    if scause & SCAUSE_INTERRUPT_BIT != 0 {
        if scause & !SCAUSE_INTERRUPT_BIT == SCAUSE_TIMER {
            TrapType::Timer
        } else {
            TrapType::BadTrap
        }
    } else if scause == EXCEPTION_SYSCALL {
        TrapType::Syscall
    } else if matches!(
        scause,
        EXCEPTION_LOAD_PAGE_FAULT | EXCEPTION_STORE_PAGE_FAULT | EXCEPTION_INSTRUCTION_PAGE_FAULT
    ) {
        TrapType::PageFault(stval)
    } else {
        TrapType::BadTrap
    }
}

/// Handles an interrupt, exception, or system call raised while running in
/// user mode. Reached only via the (unshipped) `uservec` trampoline, on the
/// faulting KT's own trap frame.
///
/// # Safety
///
/// Must only be called from `uservec`, with the calling KT's trap frame
/// already populated and `sepc` saved into it.
#[no_mangle]
pub unsafe extern "C" fn usertrap() -> ! {
    assert!(
        !riscv::Sstatus::read().contains(riscv::Sstatus::SPP),
        "usertrap: not from user mode"
    );

    let kt = unsafe { current_kthread() }.expect("usertrap: no current kthread");
    let proc = unsafe { (*kt).proc() };

    let scause = riscv::r_scause();
    let sepc = riscv::r_sepc();
    let stval = riscv::r_stval();
    let trap_type = classify(scause, stval);

    if let TrapType::Syscall = trap_type {
        unsafe { (*(*kt).trapframe()).epc = sepc + 4 };
        unsafe { riscv::intr_on() };
        let syscall_no = unsafe { (*(*kt).trapframe()).a7 as i32 };
        let ret = crate::syscall::dispatch(syscall_no);
        unsafe { (*(*kt).trapframe()).set_ret(ret as usize) };
    } else {
        unsafe { (*(*kt).trapframe()).epc = sepc };
        handle_trap(proc, &trap_type);
    }

    unsafe { usertrapret(kt) }
}

/// Interrupts and exceptions raised while already running in supervisor
/// mode. Reached via the (unshipped) `kernelvec`.
///
/// # Safety
///
/// Must only be called from `kernelvec`, with interrupts disabled.
#[no_mangle]
pub unsafe extern "C" fn kerneltrap() {
    assert!(!riscv::intr_get(), "kerneltrap: interrupts enabled");
    let scause = riscv::r_scause();
    let stval = riscv::r_stval();
    let trap_type = classify(scause, stval);

    match trap_type {
        TrapType::Timer => clockintr(),
        TrapType::PageFault(_) | TrapType::Syscall | TrapType::BadTrap => {
            panic!("kerneltrap: unexpected trap scause={:#x}", scause)
        }
    }
}

/// Dispatches a non-timer, non-syscall user trap: page faults are serviced
/// or turned into a kill, anything else is a `BadTrap`.
fn handle_trap(proc: &crate::proc::Proc, trap_type: &TrapType) {
    match trap_type {
        TrapType::PageFault(va) => {
            if !proc.page_fault(*va) {
                proc.kill();
            }
        }
        TrapType::Timer => clockintr(),
        TrapType::Syscall => unreachable!("handle_trap: syscalls are dispatched in usertrap"),
        TrapType::BadTrap => proc.kill(),
    }
}

/// Runs once per hart per timer interrupt (§4.6 `clockintr`): advances the
/// global tick counter, sweeps every swap-active `Proc`'s resident pages for
/// the accessed-bit-driven policies, and yields the currently running KT.
fn clockintr() {
    if riscv::cpuid() == 0 {
        kernel().tick();
        swap::on_tick();
    }
    if let Some(kt) = unsafe { current_kthread() } {
        let slot = unsafe { (*kt).slot_index() };
        // SAFETY: `kt` is the currently running KT; its slot lock is
        // already held by `scheduler()`'s own un-dropped guard for this
        // KT's entire run (see `Proc::kthread_exit`), so `.lock()` here
        // would re-acquire it and trip `RawSpinlock::acquire`'s
        // `assert!(!self.holding())`.
        let inner = unsafe { &mut *(*kt).lock.get_mut_raw() };
        if inner.tstate == crate::proc::TState::TRunning {
            inner.tstate = crate::proc::TState::TRunnable;
            unsafe { scheduler_yield(slot) };
        }
    }
}

/// The kernel-to-user-mode return path (§4.4/§4.6): reached from `forkret`
/// on a KT's first scheduling, and from the bottom of `usertrap` once a
/// trap has been serviced. Turns traps back over to `usertrap` and `sret`s
/// into user mode at the trap frame's `epc`.
///
/// # Safety
///
/// `kt` must be the currently running `KThread`, with its trap frame's
/// `epc`/`sp` already populated (by `kthread_create` or a prior trap).
pub unsafe fn usertrapret(kt: *mut KThread) -> ! {
    riscv::intr_off();

    let tf = unsafe { &mut *(*kt).trapframe() };
    tf.kernel_satp = riscv::r_satp();
    tf.kernel_sp = unsafe { (*kt).kstack() } + PGSIZE;
    tf.kernel_trap = usertrap as usize;
    tf.kernel_hartid = riscv::r_tp();

    let mut status = riscv::Sstatus::read();
    status.remove(riscv::Sstatus::SPP);
    status.insert(riscv::Sstatus::SPIE);
    unsafe { status.write() };

    unsafe { riscv::w_sepc(tf.epc) };

    let proc = unsafe { (*kt).proc() };
    let satp = {
        let inner = proc.lock.lock();
        let pt = inner
            .page_table
            .as_ref()
            .expect("usertrapret: process has no page table");
        make_satp(pt.as_paddr())
    };

    unsafe { userret(TRAPFRAME, satp) }
}
