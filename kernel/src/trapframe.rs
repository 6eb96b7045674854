//! The per-kernel-thread trap frame: the page where `trampoline.S` saves and
//! restores user registers on the way in and out of the kernel.
//!
//! Grounded field-for-field in the teacher kernel's `arch/riscv/proc.rs`
//! `TrapFrame`. One lives at `base_trapframes + slot_index` pages for every
//! `KThread` slot of a `Proc` (§3, §4.4).

#[repr(C)]
#[derive(Default, Clone, Copy)]
pub struct TrapFrame {
    /// Kernel page table, installed by `trampoline.S` on the way in.
    pub kernel_satp: usize,
    /// Top of this kernel thread's kernel stack.
    pub kernel_sp: usize,
    /// Address of `usertrap()`.
    pub kernel_trap: usize,
    /// Saved user program counter.
    pub epc: usize,
    /// Saved kernel `tp` (hart index).
    pub kernel_hartid: usize,

    pub ra: usize,
    pub sp: usize,
    pub gp: usize,
    pub tp: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub s0: usize,
    pub s1: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
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
    pub t3: usize,
    pub t4: usize,
    pub t5: usize,
    pub t6: usize,
}

impl TrapFrame {
    pub const fn zeroed() -> Self {
        Self {
            kernel_satp: 0,
            kernel_sp: 0,
            kernel_trap: 0,
            epc: 0,
            kernel_hartid: 0,
            ra: 0,
            sp: 0,
            gp: 0,
            tp: 0,
            t0: 0,
            t1: 0,
            t2: 0,
            s0: 0,
            s1: 0,
            a0: 0,
            a1: 0,
            a2: 0,
            a3: 0,
            a4: 0,
            a5: 0,
            a6: 0,
            a7: 0,
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
            t3: 0,
            t4: 0,
            t5: 0,
            t6: 0,
        }
    }

    /// Returns the `n`-th syscall argument register (`a0..=a5`), matching the
    /// teacher's `RegNum` convention used by the syscall dispatch surface.
    pub fn arg(&self, n: usize) -> usize {
        match n {
            0 => self.a0,
            1 => self.a1,
            2 => self.a2,
            3 => self.a3,
            4 => self.a4,
            5 => self.a5,
            _ => panic!("TrapFrame::arg: out of range"),
        }
    }

    pub fn set_ret(&mut self, value: usize) {
        self.a0 = value;
    }
}
