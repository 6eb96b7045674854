//! Compile-time tunables for the user-thread library (§3, §6).

/// Maximum number of user-mode cooperative threads per process.
pub const MAX_UTHREADS: usize = 8;

/// Size (in bytes) of each user thread's embedded stack.
pub const STACK_SIZE: usize = 4096;
