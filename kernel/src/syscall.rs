//! Thin `sys_*` wrappers translating trap-frame arguments into calls on the
//! KT/PT/SW/UT APIs and writing back status codes (§6).
//!
//! `fork`/`exec`/`wait`/`exit` are owned by an external process-management
//! collaborator (§1 Non-goals: ELF loading, argument marshalling, and the
//! parent/child relationship are out of scope) and are therefore not given a
//! real implementation here; their syscall numbers fall through to `-1`.

use crate::kernel::kernel;
use crate::proc::{current_kthread, scheduler_yield, KThread, Proc, ProcState};
use crate::vm::PteFlags;

const SYS_FORK: i32 = 1;
const SYS_EXIT: i32 = 2;
const SYS_WAIT: i32 = 3;
const SYS_KILL: i32 = 6;
const SYS_EXEC: i32 = 7;
const SYS_GETPID: i32 = 11;
const SYS_SBRK: i32 = 12;
const SYS_SLEEP: i32 = 13;
const SYS_UPTIME: i32 = 14;
const SYS_MEMSIZE: i32 = 20;
const SYS_SET_PS_PRIORITY: i32 = 21;
const SYS_SET_CFS_PRIORITY: i32 = 22;
const SYS_GET_CFS_STATS: i32 = 23;
const SYS_KTHREAD_CREATE: i32 = 24;
const SYS_KTHREAD_ID: i32 = 25;
const SYS_KTHREAD_KILL: i32 = 26;
const SYS_KTHREAD_EXIT: i32 = 27;
const SYS_KTHREAD_JOIN: i32 = 28;

/// Dispatches one syscall, returning the value to place in `a0`. `-1` means
/// `UserRequestFailed` (§7); `fork`/`exec`/`wait`/`exit` are not serviced by
/// this core and always report failure.
pub fn dispatch(num: i32) -> i64 {
    match num {
        SYS_SBRK => sys_sbrk(),
        SYS_MEMSIZE => sys_memsize(),
        SYS_SET_PS_PRIORITY => sys_set_ps_priority(),
        SYS_SET_CFS_PRIORITY => sys_set_cfs_priority(),
        SYS_GET_CFS_STATS => sys_get_cfs_stats(),
        SYS_KTHREAD_CREATE => sys_kthread_create(),
        SYS_KTHREAD_ID => sys_kthread_id(),
        SYS_KTHREAD_KILL => sys_kthread_kill(),
        SYS_KTHREAD_EXIT => sys_kthread_exit(),
        SYS_KTHREAD_JOIN => sys_kthread_join(),
        SYS_SLEEP => sys_sleep(),
        SYS_KILL => sys_kill(),
        SYS_GETPID => sys_getpid(),
        SYS_UPTIME => sys_uptime(),
        SYS_FORK | SYS_EXIT | SYS_WAIT | SYS_EXEC => -1,
        _ => -1,
    }
}

fn current() -> (*mut KThread, &'static Proc) {
    let kt = unsafe { current_kthread() }.expect("syscall: no current kthread");
    (kt, unsafe { (*kt).proc() })
}

fn argraw(kt: *mut KThread, n: usize) -> usize {
    unsafe { (*(*kt).trapframe()).arg(n) }
}

fn argint(kt: *mut KThread, n: usize) -> i32 {
    argraw(kt, n) as i32
}

fn argaddr(kt: *mut KThread, n: usize) -> usize {
    argraw(kt, n)
}

fn sys_sbrk() -> i64 {
    let (kt, proc) = current();
    let n = argint(kt, 0) as isize;
    let old = proc.lock.lock().sz;
    if n >= 0 {
        match proc.grow(old + n as usize, PteFlags::W) {
            Some(_) => old as i64,
            None => -1,
        }
    } else {
        let newsz = old.saturating_sub((-n) as usize);
        proc.shrink(newsz);
        old as i64
    }
}

fn sys_memsize() -> i64 {
    let (_, proc) = current();
    proc.lock.lock().sz as i64
}

fn sys_set_ps_priority() -> i64 {
    let (kt, proc) = current();
    let n = argint(kt, 0);
    proc.lock.lock().ps_priority = n;
    0
}

fn sys_set_cfs_priority() -> i64 {
    let (kt, proc) = current();
    let n = argint(kt, 0);
    proc.lock.lock().cfs_priority = n;
    0
}

/// Writes `{cfs_priority, rtime, stime, retime}` (four 32-bit words) to the
/// user buffer at `addr`. Returns `-1` if `pid` is not a live process or the
/// copy-out fails.
fn sys_get_cfs_stats() -> i64 {
    let (kt, proc) = current();
    let pid = argint(kt, 0);
    let addr = argaddr(kt, 1);

    let mut found = None;
    for p in kernel().procs() {
        let inner = p.lock.lock();
        if inner.state != ProcState::Unused && inner.pid == pid {
            found = Some([inner.cfs_priority, inner.rtime as i32, inner.stime as i32, inner.retime as i32]);
            break;
        }
    }
    let stats = match found {
        Some(s) => s,
        None => return -1,
    };

    let mut buf = [0u8; 16];
    for (i, v) in stats.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
    }
    let mut inner = proc.lock.lock();
    match inner.page_table.as_mut() {
        Some(pt) if pt.copy_out_bytes(addr.into(), &buf).is_ok() => 0,
        _ => -1,
    }
}

fn sys_kthread_create() -> i64 {
    let (kt, proc) = current();
    let start = argaddr(kt, 0);
    let stack_ptr = argaddr(kt, 1);
    let stack_size = argaddr(kt, 2);
    proc.kthread_create(start, stack_ptr, stack_size) as i64
}

fn sys_kthread_id() -> i64 {
    let (kt, _) = current();
    unsafe { (*kt).lock.lock().thread_id as i64 }
}

fn sys_kthread_kill() -> i64 {
    let (kt, proc) = current();
    let tid = argint(kt, 0);
    proc.kthread_kill(tid) as i64
}

fn sys_kthread_exit() -> i64 {
    let (kt, proc) = current();
    let status = argint(kt, 0);
    proc.kthread_exit(unsafe { (*kt).slot_index() }, status)
}

fn sys_kthread_join() -> i64 {
    let (kt, proc) = current();
    let tid = argint(kt, 0);
    let status_addr = argaddr(kt, 1);
    let slot_hint = unsafe { (*kt).slot_index() };

    let mut status = 0i32;
    let ret = proc.kthread_join(slot_hint, tid, &mut status);
    if ret == 0 && status_addr != 0 {
        let mut inner = proc.lock.lock();
        match inner.page_table.as_mut() {
            Some(pt) if pt.copy_out_bytes(status_addr.into(), &status.to_ne_bytes()).is_ok() => {}
            _ => return -1,
        }
    }
    ret as i64
}

/// Spins, yielding the calling KT each round, until `ticks - start >= n` or
/// the process is killed (§5 "the only timed primitive"). A full
/// channel-addressed `sleep`/`wakeup` pair (as used for KT join, §4.4) would
/// need a kernel-wide wait registry this core's per-process `WaitChannel`
/// does not provide; yielding in a loop gives the same observable contract
/// at the cost of waking up every tick instead of exactly at expiry.
fn sys_sleep() -> i64 {
    let (kt, proc) = current();
    let n = argint(kt, 0).max(0) as u32;
    let start = *kernel().ticks().lock();
    loop {
        let now = *kernel().ticks().lock();
        if now.wrapping_sub(start) >= n {
            return 0;
        }
        if proc.killed() {
            return -1;
        }
        unsafe { scheduler_yield((*kt).slot_index()) };
    }
}

fn sys_kill() -> i64 {
    let (kt, _) = current();
    let pid = argint(kt, 0);
    for p in kernel().procs() {
        if p.lock.lock().pid == pid {
            p.kill();
            return 0;
        }
    }
    -1
}

fn sys_getpid() -> i64 {
    let (_, proc) = current();
    proc.pid() as i64
}

fn sys_uptime() -> i64 {
    *kernel().ticks().lock() as i64
}
