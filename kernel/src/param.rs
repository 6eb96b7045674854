//! Compile-time tunables for the process, thread, and paging subsystems.

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Maximum number of kernel threads per process.
pub const NKT: usize = 8;

/// Stack size (in bytes) required by `kthread_create`.
pub const KTHREAD_STACK_SIZE: usize = 4096;

/// Maximum number of user-mode cooperative threads per process.
pub const MAX_UTHREADS: usize = 8;

/// Size (in bytes) of each user thread's embedded stack.
pub const STACK_SIZE: usize = 4096;

/// Per-process hard cap on RAM-resident user pages once SW is active
/// (`pid > 2`). Also the number of slots in the per-process swap file.
pub const MAX_PSYC_PAGES: usize = 16;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Maximum length of process name.
pub const MAXPROCNAME: usize = 16;

/// Maximum length of an `exit` message copied into the parent's memory.
pub const MAXEXITMSG: usize = 32;
