//! Binary entry for the rv6 kernel image.
//!
//! The reset vector (`_entry`) and the linker script that places `STACK0`
//! and jumps here are the unshipped boot glue (§4.6 supplement: `swtch`,
//! `uswtch`, `kernelvec`, `trampoline` are the same kind of irreducibly
//! assembly, documented rather than reproduced). This binary crate exists so
//! `cargo build --bin kernel` links every module in the `kernel` lib crate
//! into one image; the lib crate itself, built as a staticlib, is what a
//! real boot image links against.

#![no_std]
#![no_main]
#![allow(clippy::missing_safety_doc)]

use kernel::start;

/// Reached by `_entry` once per hart, already running on a per-hart slice of
/// `start::STACK0` in machine mode.
///
/// # Safety
///
/// Must only be reached via `_entry`, once per hart, before any other
/// machine-mode or supervisor-mode code has run on that hart.
#[no_mangle]
pub unsafe extern "C" fn _start() -> ! {
    unsafe { start::start() }
}
