//! `rv6-uthread`: a purely user-mode cooperative thread library linked into
//! one kernel thread of a process (§4.5).
//!
//! Grounded in `original_source/user/uthread.c`'s `uthread`/`uscheduler`/
//! `uthread_create`/`uthread_yield`/`uthread_exit`/`uthread_start_all`, with
//! the same fix applied that `kernel::proc`'s KT side applies to its own
//! `original_source` counterpart: the source picks a max-priority thread
//! with `max_prio` seeded at `0` and `max_prio_t` left uninitialized when no
//! thread qualifies, which is undefined behavior the moment every slot is
//! FREE or equal priority to zero; this crate instead threads an `Option`
//! through the search and only ever unwraps it where §4.5 guarantees a
//! RUNNABLE slot exists ("legal only after at least one `create`").
//!
//! This crate cannot depend on `kernel`'s `param.rs`: it is linked into user
//! binaries, not the kernel image, the same separation xv6 keeps between
//! `kernel/param.h` and a user program's own constants. `MAX_UTHREADS` and
//! `STACK_SIZE` are kept numerically in lockstep by convention, not by a
//! shared crate.

#![cfg_attr(not(feature = "test"), no_std)]
#![allow(clippy::missing_safety_doc)]

pub mod context;
pub mod param;
pub mod uthread;

pub use context::{uswtch, Context};
pub use param::{MAX_UTHREADS, STACK_SIZE};
pub use uthread::{
    uthread_create, uthread_exit, uthread_get_priority, uthread_self, uthread_set_priority,
    uthread_start_all, uthread_yield, Priority, UthreadState,
};
