//! Low-level driver for the 16550a UART (register layout: <http://byterunner.com/16550.html>).
//!
//! Grounded in the teacher kernel's `uart.rs`, trimmed to the synchronous
//! `putc_sync`/init path: this core has no `sys_read`/`sys_write` on a
//! console file descriptor, so the teacher's interrupt-driven TX ring buffer
//! and line-editing RX path (backspace, kill-line, ^D) have no caller and
//! are dropped (DESIGN.md). `intr` is kept as the landing site PLIC dispatch
//! would call, logging received bytes for diagnostic visibility only.

use core::ptr;

use crate::memlayout::UART0;
use crate::spinlock::{pop_off, push_off};

enum Reg {
    Rbr,
    Thr,
    Ier,
    Fcr,
    Lcr,
    Lsr,
}

impl Reg {
    fn addr(self) -> *mut u8 {
        let off = match self {
            Reg::Rbr | Reg::Thr => 0,
            Reg::Ier => 1,
            Reg::Fcr => 2,
            Reg::Lcr => 3,
            Reg::Lsr => 5,
        };
        (UART0 + off) as *mut u8
    }

    fn read(self) -> u8 {
        unsafe { ptr::read_volatile(self.addr()) }
    }

    fn write(self, v: u8) {
        unsafe { ptr::write_volatile(self.addr(), v) }
    }
}

const LCR_BAUD_LATCH: u8 = 1 << 7;
const LCR_EIGHT_BITS: u8 = 3;
const FCR_FIFO_ENABLE: u8 = 1;
const FCR_FIFO_CLEAR: u8 = 3 << 1;
const IER_TX_ENABLE: u8 = 1 << 1;
const IER_RX_ENABLE: u8 = 1;
const LSR_TX_IDLE: u8 = 1 << 5;
const LSR_RX_READY: u8 = 1;

/// Brings up the UART at 38.4K baud, 8N1, with FIFOs enabled.
///
/// # Safety
///
/// Must run once, before any hart calls `putc_sync`.
pub unsafe fn init() {
    Reg::Ier.write(0x00);
    Reg::Lcr.write(LCR_BAUD_LATCH);
    Reg::Rbr.write(0x03);
    Reg::Ier.write(0x00);
    Reg::Lcr.write(LCR_EIGHT_BITS);
    Reg::Fcr.write(FCR_FIFO_ENABLE | FCR_FIFO_CLEAR);
    Reg::Ier.write(IER_TX_ENABLE | IER_RX_ENABLE);
}

/// Sends one byte, spinning until the transmit holding register is empty.
/// Safe to call from an interrupt or panic context: it never sleeps.
pub fn putc_sync(c: u8) {
    unsafe { push_off() };
    while Reg::Lsr.read() & LSR_TX_IDLE == 0 {
        core::hint::spin_loop();
    }
    Reg::Thr.write(c);
    unsafe { pop_off() };
}

/// Drains any bytes waiting in the receive buffer. There is no reader in
/// this core's syscall surface; bytes are discarded after being read so the
/// UART does not wedge on a full RX FIFO.
pub fn intr() {
    while Reg::Lsr.read() & LSR_RX_READY != 0 {
        let _ = Reg::Rbr.read();
    }
}
