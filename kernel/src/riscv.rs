//! RISC-V Sv39 register and CSR access.
//!
//! Grounded in the teacher kernel's `arch/riscv/asm.rs`. This core targets
//! RISC-V exclusively (§1), so the teacher's `arch::interface` HAL trait
//! split across RISC-V/AArch64 backends collapses to direct calls into this
//! single module (noted as a dropped generalization in DESIGN.md).

#![allow(dead_code)]

use core::arch::asm;

use bitflags::bitflags;

use crate::addr::{PAddr, PGSIZE};

bitflags! {
    /// Supervisor Status Register.
    pub struct Sstatus: usize {
        /// Previous mode, 1 = supervisor, 0 = user.
        const SPP = 1 << 8;
        /// Supervisor previous interrupt enable.
        const SPIE = 1 << 5;
        /// Supervisor interrupt enable.
        const SIE = 1 << 1;
    }
}

impl Sstatus {
    #[inline]
    pub fn read() -> Self {
        let x: usize;
        unsafe { asm!("csrr {x}, sstatus", x = out(reg) x) };
        Self::from_bits_truncate(x)
    }

    /// # Safety
    ///
    /// The caller must ensure the resulting privilege/interrupt state is
    /// consistent with what the rest of the kernel expects.
    #[inline]
    pub unsafe fn write(self) {
        unsafe { asm!("csrw sstatus, {x}", x = in(reg) self.bits()) };
    }
}

bitflags! {
    /// Supervisor Interrupt Enable register.
    pub struct Sie: usize {
        /// External.
        const SEIE = 1 << 9;
        /// Timer.
        const STIE = 1 << 5;
        /// Software.
        const SSIE = 1 << 1;
    }
}

impl Sie {
    #[inline]
    pub fn read() -> Self {
        let x: usize;
        unsafe { asm!("csrr {x}, sie", x = out(reg) x) };
        Self::from_bits_truncate(x)
    }

    /// # Safety
    ///
    /// See `Sstatus::write`.
    #[inline]
    pub unsafe fn write(self) {
        unsafe { asm!("csrw sie, {x}", x = in(reg) self.bits()) };
    }
}

/// Machine-mode interrupt delegation exception codes used by `scause`.
pub const SCAUSE_INTERRUPT_BIT: usize = 1 << 63;
pub const SCAUSE_TIMER: usize = 5;
pub const EXCEPTION_SYSCALL: usize = 8;
pub const EXCEPTION_LOAD_PAGE_FAULT: usize = 13;
pub const EXCEPTION_STORE_PAGE_FAULT: usize = 15;
pub const EXCEPTION_INSTRUCTION_PAGE_FAULT: usize = 12;

#[inline]
pub fn r_scause() -> usize {
    let x: usize;
    unsafe { asm!("csrr {x}, scause", x = out(reg) x) };
    x
}

#[inline]
pub fn r_sepc() -> usize {
    let x: usize;
    unsafe { asm!("csrr {x}, sepc", x = out(reg) x) };
    x
}

/// # Safety
///
/// See `Sstatus::write`.
#[inline]
pub unsafe fn w_sepc(x: usize) {
    unsafe { asm!("csrw sepc, {x}", x = in(reg) x) };
}

#[inline]
pub fn r_stval() -> usize {
    let x: usize;
    unsafe { asm!("csrr {x}, stval", x = out(reg) x) };
    x
}

/// Supervisor address translation and protection register: mode | asid | ppn.
pub const SATP_SV39: usize = 8 << 60;

pub const fn make_satp(pagetable: PAddr) -> usize {
    SATP_SV39 | (pagetable.into_usize() >> PGSIZE.trailing_zeros() as usize)
}

#[inline]
pub fn r_satp() -> usize {
    let x: usize;
    unsafe { asm!("csrr {x}, satp", x = out(reg) x) };
    x
}

/// # Safety
///
/// Changes the active page table; the caller must `sfence_vma` afterwards
/// and must ensure the new table maps the code currently executing.
#[inline]
pub unsafe fn w_satp(x: usize) {
    unsafe { asm!("csrw satp, {x}", x = in(reg) x) };
}

#[inline]
pub fn sfence_vma() {
    unsafe { asm!("sfence.vma zero, zero") };
}

#[inline]
pub fn r_tp() -> usize {
    let x: usize;
    unsafe { asm!("mv {x}, tp", x = out(reg) x) };
    x
}

/// # Safety
///
/// `x` must be this hart's index into the `Cpus` array, set once at boot.
#[inline]
pub unsafe fn w_tp(x: usize) {
    unsafe { asm!("mv tp, {x}", x = in(reg) x) };
}

/// Index into `Cpus` for the calling hart.
#[inline]
pub fn cpuid() -> usize {
    r_tp()
}

/// Enables device and timer interrupts on this hart.
///
/// # Safety
///
/// Must only be called with a valid trap vector installed.
#[inline]
pub unsafe fn intr_on() {
    let mut x = Sstatus::read();
    x.insert(Sstatus::SIE);
    unsafe { x.write() };
}

#[inline]
pub fn intr_off() {
    let mut x = Sstatus::read();
    x.remove(Sstatus::SIE);
    unsafe { x.write() };
}

#[inline]
pub fn intr_get() -> bool {
    Sstatus::read().contains(Sstatus::SIE)
}
