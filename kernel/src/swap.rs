//! Per-process demand paging: SwapManager (§4.2).
//!
//! Grounded in `original_source/kernel/vm.c`'s `uvmalloc`'s `SWAP_ALGO`
//! block, `phyMemToSwapFile`/`swapFileToPhyMem`, and `updateCounter`. Unlike
//! the original (which writes through `writeToSwapFile`/`readFromSwapFile`
//! to an actual on-disk file — a filesystem is a Non-goal here, §1), this
//! swap file's "bytes" are a retained, owning `Page` per occupied slot: the
//! evicted frame itself becomes the backing store for its swap slot instead
//! of being freed and its contents copied elsewhere. This still realizes
//! the external contract in full (§6: "logically a linear array of
//! `MAX_PSYC_PAGES` pages; byte offset of page `i` is `i * PGSIZE`") without
//! fabricating a file-I/O layer this core has no use for.

use crate::addr::{Addr, PGSIZE};
use crate::addr::UVAddr;
use crate::kernel::kernel;
use crate::page::Page;
use crate::param::MAX_PSYC_PAGES;
use crate::replacement::{ActivePolicy, ReplacementPolicy};
use crate::vm::{PageTable, PteFlags};

/// Whether this build has a replacement policy selected at all. The `NONE`
/// configuration (§6) disables SW/RP entirely: every function below is
/// skipped (and for pid ≤ 2 processes, always, regardless of this flag —
/// §4.2 "SW is bypassed entirely" for init and the first user process).
pub const SWAP_ENABLED: bool =
    cfg!(feature = "swap-nfua") || cfg!(feature = "swap-lapa") || cfg!(feature = "swap-scfifo");

/// Whether SW applies to a process with this pid, per §4.2.
pub fn active(pid: i32) -> bool {
    SWAP_ENABLED && pid > 2
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DescState {
    Unused,
    Used,
}

/// One entry of `phy_mem_pgs` or `swap_file_pgs` (§3).
#[derive(Clone, Copy)]
pub struct PageDescriptor {
    pub va: usize,
    pub state: DescState,
    pub creation_time: u32,
    pub counter: u32,
}

impl PageDescriptor {
    pub const fn new() -> Self {
        Self {
            va: 0,
            state: DescState::Unused,
            creation_time: 0,
            counter: 0,
        }
    }
}

/// A process's swap bookkeeping: the resident-page descriptor table
/// (`phy_mem_pgs`) and the swapped-out descriptor table (`swap_file_pgs`),
/// plus the retained frames backing the latter.
pub struct SwapState {
    pub resident: [PageDescriptor; MAX_PSYC_PAGES],
    pub swapped: [PageDescriptor; MAX_PSYC_PAGES],
    slots: [Option<Page>; MAX_PSYC_PAGES],
}

impl SwapState {
    pub fn new() -> Self {
        Self {
            resident: [PageDescriptor::new(); MAX_PSYC_PAGES],
            swapped: [PageDescriptor::new(); MAX_PSYC_PAGES],
            slots: array_macro::array![_ => None; MAX_PSYC_PAGES],
        }
    }

    pub fn resident_count(&self) -> usize {
        self.resident
            .iter()
            .filter(|d| d.state == DescState::Used)
            .count()
    }

    pub fn swapped_count(&self) -> usize {
        self.swapped
            .iter()
            .filter(|d| d.state == DescState::Used)
            .count()
    }
}

impl Default for SwapState {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes the resident page at `victim` out to a free swap slot and marks
/// its PTE paged-out, freeing up `victim`'s resident-table slot. Panics
/// (`KernelInvariant`, §7) if the swap file is also full: "exhaustion of
/// both RAM and swap ... is fatal to the kernel", by design in a teaching
/// kernel.
fn evict(pt: &mut PageTable<UVAddr>, swap: &mut SwapState, victim: usize) {
    let victim_va: UVAddr = swap.resident[victim].va.into();
    let pte = pt
        .walk(victim_va, false)
        .expect("swap::evict: victim has no PTE");
    assert!(pte.is_valid(), "swap::evict: victim already paged out");
    let perm = pte.flags() & (PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U);
    let pa = pte.pa();

    let sslot = swap
        .swapped
        .iter()
        .position(|d| d.state == DescState::Unused)
        .unwrap_or_else(|| panic!("swap::evict: swap file exhausted (RAM and swap both full)"));

    // SAFETY: `pa` is the physical frame this PTE uniquely owned; the PTE
    // is about to be rewritten to no longer reference it, so ownership
    // transfers cleanly to the swap slot.
    let page = unsafe { Page::from_usize(pa.into_usize()) };
    swap.slots[sslot] = Some(page);
    swap.swapped[sslot] = PageDescriptor {
        va: victim_va.into_usize(),
        state: DescState::Used,
        creation_time: swap.resident[victim].creation_time,
        counter: swap.resident[victim].counter,
    };

    pte.set_paged_out(perm);
    swap.resident[victim] = PageDescriptor::new();
}

fn pick_and_evict(pt: &mut PageTable<UVAddr>, swap: &mut SwapState) -> usize {
    let victim = ActivePolicy::pick_victim(
        &mut swap.resident,
        |pd, clear| {
            let va: UVAddr = pd.va.into();
            match pt.walk(va, false) {
                Some(pte) => {
                    let was = pte.is_accessed();
                    if was && clear {
                        pte.clear_accessed();
                    }
                    was
                }
                None => false,
            }
        },
        || kernel().next_creation_time(),
    );
    evict(pt, swap, victim);
    victim
}

/// §4.2 `grow`: called from the allocation path (`Proc::grow`) for every
/// newly mapped page of a `pid > 2` process, after the page has already
/// been allocated and mapped by `PageTable::uvmalloc`.
pub fn grow(pt: &mut PageTable<UVAddr>, swap: &mut SwapState, va: UVAddr) {
    let slot = swap
        .resident
        .iter()
        .position(|d| d.state == DescState::Unused)
        .unwrap_or_else(|| pick_and_evict(pt, swap));
    swap.resident[slot] = PageDescriptor {
        va: va.into_usize(),
        state: DescState::Used,
        creation_time: kernel().next_creation_time(),
        counter: ActivePolicy::INITIAL_COUNTER,
    };
}

/// §4.2 `fault_in`: called from the page-fault path when the faulting PTE
/// has the paged-out bit set and `V` clear.
pub fn fault_in(pt: &mut PageTable<UVAddr>, swap: &mut SwapState, va: UVAddr) {
    let perm = {
        let pte = pt.walk(va, false).expect("swap::fault_in: no PTE for va");
        assert!(
            pte.is_paged_out() && !pte.is_valid(),
            "swap::fault_in: va is not paged out"
        );
        pte.flags() & (PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U)
    };

    let slot = swap
        .resident
        .iter()
        .position(|d| d.state == DescState::Unused)
        .unwrap_or_else(|| pick_and_evict(pt, swap));

    let sidx = swap
        .swapped
        .iter()
        .position(|d| d.state == DescState::Used && d.va == va.into_usize())
        .expect("swap::fault_in: va not found in swap file");
    let page = swap.slots[sidx]
        .take()
        .expect("swap::fault_in: swap slot missing its backing frame");
    swap.swapped[sidx] = PageDescriptor::new();

    let pa = page.addr();
    pt.mappages(va, PGSIZE, pa, perm)
        .expect("swap::fault_in: remapping a freshly cleared PTE cannot fail");
    core::mem::forget(page); // ownership now lives in the page table leaf

    swap.resident[slot] = PageDescriptor {
        va: va.into_usize(),
        state: DescState::Used,
        creation_time: kernel().next_creation_time(),
        counter: ActivePolicy::INITIAL_COUNTER,
    };
}

/// §4.2 `drop`: called from the `uvmunmap` path. Scans both descriptor
/// tables and clears any slot tracking `va`, freeing a retained swap frame
/// if one was holding this page's contents.
pub fn drop_va(swap: &mut SwapState, va: UVAddr) {
    let va = va.into_usize();
    if let Some(d) = swap
        .resident
        .iter_mut()
        .find(|d| d.state == DescState::Used && d.va == va)
    {
        *d = PageDescriptor::new();
        return;
    }
    if let Some(i) = swap
        .swapped
        .iter()
        .position(|d| d.state == DescState::Used && d.va == va)
    {
        swap.swapped[i] = PageDescriptor::new();
        if let Some(page) = swap.slots[i].take() {
            kernel().free(page);
        }
    }
}

/// §4.6: invoked once per timer tick, ages every resident page of every
/// swap-active process under its own `proc->lock`.
pub fn on_tick() {
    if !SWAP_ENABLED {
        return;
    }
    for proc in kernel().procs() {
        let mut inner = proc.lock.lock();
        if inner.pid <= 2 {
            continue;
        }
        let crate::proc::ProcInner { page_table, swap, .. } = &mut *inner;
        let pt = match page_table.as_mut() {
            Some(pt) => pt,
            None => continue,
        };
        ActivePolicy::on_tick(&mut swap.resident, |pd, clear| {
            let va: UVAddr = pd.va.into();
            match pt.walk(va, false) {
                Some(pte) => {
                    let was = pte.is_accessed();
                    if was && clear {
                        pte.clear_accessed();
                    }
                    was
                }
                None => false,
            }
        });
    }
}
