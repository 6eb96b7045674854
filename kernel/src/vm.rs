//! RISC-V Sv39 page tables.
//!
//! Grounded in the teacher kernel's `vm.rs` split between `RawPageTable`
//! and a bit-packed `PageTableEntry`, and in `original_source/kernel/vm.c`'s
//! `walk`/`mappages`/`uvmunmap`/`uvmcopy`/`uvmfree`/`uvmalloc`/`uvmdealloc`
//! for the exact operation names and edge-case behavior §4.1 fixes in place.

use zerocopy::{AsBytes, FromBytes};

use crate::addr::{pgrounddown, pgroundup, pa2pte, pte2pa, Addr, PAddr, VAddr, PGSIZE, PLSIZE};
use crate::kernel::kernel;
use crate::page::Page;

bitflags::bitflags! {
    /// RISC-V standard PTE permission/status bits, plus the custom
    /// software-reserved "paged-out" bit (§9 GLOSSARY).
    #[derive(Default)]
    pub struct PteFlags: usize {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
        /// Software-reserved (RSW) bit 8: page is resident in the per-process
        /// swap file rather than RAM. Never set together with `V` (§4.1).
        const PG = 1 << 8;
    }
}

/// A bit-packed page-table entry.
///
/// `#[repr(C)]` plus `zerocopy`'s `AsBytes`/`FromBytes` let this be read and
/// written directly as memory, matching the teacher's approach to
/// hardware-shaped structs (SPEC_FULL §4.1 supplement).
#[repr(C)]
#[derive(Clone, Copy, Default, AsBytes, FromBytes)]
pub struct PageTableEntry(usize);

impl PageTableEntry {
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PteFlags::V)
    }

    pub fn is_paged_out(&self) -> bool {
        self.flags().contains(PteFlags::PG)
    }

    pub fn is_user(&self) -> bool {
        self.flags().contains(PteFlags::V | PteFlags::U)
    }

    fn is_table(&self) -> bool {
        self.is_valid() && !self.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }

    fn is_leaf(&self) -> bool {
        self.is_valid() && self.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)
    }

    pub fn is_accessed(&self) -> bool {
        self.flags().contains(PteFlags::A)
    }

    pub fn clear_accessed(&mut self) {
        self.0 &= !PteFlags::A.bits();
    }

    pub fn pa(&self) -> PAddr {
        pte2pa(self.0)
    }

    fn set_table(&mut self, page: *mut RawPageTable) {
        self.0 = pa2pte((page as usize).into()) | PteFlags::V.bits();
    }

    fn set_leaf(&mut self, pa: PAddr, perm: PteFlags) {
        debug_assert!(perm.intersects(PteFlags::R | PteFlags::W | PteFlags::X));
        self.0 = pa2pte(pa) | (perm | PteFlags::V).bits();
    }

    /// Installs a paged-out marker with the given permission flags but no
    /// physical frame and no `V` bit (§4.1: "without copying any physical
    /// frame").
    pub fn set_paged_out(&mut self, perm: PteFlags) {
        debug_assert!(!perm.contains(PteFlags::V));
        self.0 = (perm | PteFlags::PG).bits() & !PteFlags::V.bits();
    }

    pub fn clear_paged_out(&mut self) {
        self.0 &= !PteFlags::PG.bits();
    }

    fn invalidate(&mut self) {
        self.0 = 0;
    }

    fn as_table_mut(&mut self) -> Option<&mut RawPageTable> {
        if self.is_table() {
            Some(unsafe { &mut *(self.pa().into_usize() as *mut RawPageTable) })
        } else {
            None
        }
    }
}

/// A page-table page: 512 eight-byte entries.
///
/// # Safety invariant
///
/// An instance only ever lives at the start of a page owned via `Kmem`.
struct RawPageTable {
    entries: [PageTableEntry; PLSIZE],
}

impl RawPageTable {
    fn new() -> Option<*mut RawPageTable> {
        let mut page = kernel().alloc()?;
        page.fill(0);
        Some(page.into_usize() as *mut RawPageTable)
    }

    fn get_table_mut(&mut self, index: usize, alloc: bool) -> Option<&mut RawPageTable> {
        let pte = &mut self.entries[index];
        if !pte.is_valid() {
            if !alloc {
                return None;
            }
            let table = Self::new()?;
            pte.set_table(table);
        }
        pte.as_table_mut()
    }

    fn get_entry_mut(&mut self, index: usize) -> &mut PageTableEntry {
        let pte = &mut self.entries[index];
        assert!(!pte.is_table(), "RawPageTable::get_entry_mut: not a leaf slot");
        pte
    }

    /// Recursively frees page-table pages. Panics if a leaf mapping remains
    /// (§4.1: "freewalk over a leaf" is a `KernelInvariant` failure).
    unsafe fn free_walk(&mut self) {
        for pte in &mut self.entries {
            if let Some(table) = pte.as_table_mut() {
                unsafe { table.free_walk() };
                pte.invalidate();
            } else {
                assert!(!pte.is_valid(), "freewalk: leaf");
            }
        }
        let page = unsafe { Page::from_usize(self.entries.as_ptr() as usize) };
        kernel().free(page);
    }
}

/// A three-level Sv39 page table, indexed by virtual addresses of kind `A`.
///
/// # Safety invariant
///
/// `ptr` uniquely owns a valid three-level `RawPageTable`.
pub struct PageTable<A: VAddr> {
    ptr: *mut RawPageTable,
    _marker: core::marker::PhantomData<A>,
}

impl<A: VAddr> PageTable<A> {
    pub fn new() -> Option<Self> {
        Some(Self {
            ptr: RawPageTable::new()?,
            _marker: core::marker::PhantomData,
        })
    }

    pub fn as_paddr(&self) -> PAddr {
        (self.ptr as usize).into()
    }

    /// Returns the leaf PTE for `va`, allocating intermediate levels iff
    /// `alloc`. Returns `None` on out-of-memory during an `alloc` walk.
    pub fn walk(&mut self, va: A, alloc: bool) -> Option<&mut PageTableEntry> {
        assert!(
            va.into_usize() < crate::addr::MAXVA,
            "PageTable::walk: va too large"
        );
        let mut table = unsafe { &mut *self.ptr };
        for level in (1..crate::addr::PLNUM).rev() {
            table = table.get_table_mut(va.px(level), alloc)?;
        }
        Some(table.get_entry_mut(va.px(0)))
    }

    /// Returns the physical address `va` maps to, only if the PTE is valid
    /// and user-accessible.
    pub fn walkaddr(&mut self, va: A) -> Option<PAddr> {
        let pte = self.walk(va, false)?;
        if pte.is_user() {
            Some(pte.pa())
        } else {
            None
        }
    }

    /// Creates PTEs for `size` bytes starting at `va`, mapped to physical
    /// addresses starting at `pa`. Panics ("remap") if any leaf is already
    /// valid. Returns `Err(())` if a needed page-table page could not be
    /// allocated.
    pub fn mappages(&mut self, va: A, size: usize, pa: PAddr, perm: PteFlags) -> Result<(), ()> {
        assert!(size != 0, "mappages: size");
        let start = pgrounddown(va.into_usize());
        let last = pgrounddown(va.into_usize() + size - 1);
        let mut a = start;
        let mut p = pa;
        loop {
            let pte = self.walk(A::from(a), true).ok_or(())?;
            assert!(!pte.is_valid(), "mappages: remap");
            pte.set_leaf(p, perm);
            if a == last {
                break;
            }
            a += PGSIZE;
            p = p + PGSIZE;
        }
        Ok(())
    }

    /// Removes `n` pages of mappings starting at the page-aligned `va`.
    /// Frees the backing physical frame per-page iff `do_free` and the page
    /// is not paged-out. Panics if `va` is misaligned or any covered page is
    /// neither valid nor paged-out ("programmer error", §4.1).
    pub fn uvmunmap(&mut self, va: A, n: usize, do_free: bool) {
        assert!(va.is_page_aligned(), "uvmunmap: not aligned");
        let mut a = va.into_usize();
        let end = a + n * PGSIZE;
        while a < end {
            let pte = self.walk(A::from(a), false).expect("uvmunmap: walk");
            assert!(
                pte.is_valid() || pte.is_paged_out(),
                "uvmunmap: not mapped"
            );
            assert!(
                !(pte.is_valid() && !pte.flags().intersects(PteFlags::R | PteFlags::W | PteFlags::X)),
                "uvmunmap: not a leaf"
            );
            if do_free && pte.is_valid() && !pte.is_paged_out() {
                let pa = pte.pa();
                kernel().free(unsafe { Page::from_usize(pa.into_usize()) });
            }
            pte.invalidate();
            a += PGSIZE;
        }
    }

    /// Recursively frees leaves then page-table pages.
    pub fn uvmfree(&mut self, sz: usize) {
        if sz > 0 {
            self.uvmunmap(A::from(0), pgroundup(sz) / PGSIZE, true);
        }
        unsafe { (*self.ptr).free_walk() };
        // `self.ptr` must not be dereferenced again.
    }
}

impl PageTable<crate::addr::UVAddr> {
    /// Grows the process from `oldsz` to `newsz` (both arbitrary, not
    /// necessarily page-aligned), allocating and mapping whole pages with
    /// permission `R | U | xperm`. Returns the new size, or `None` on
    /// allocation/mapping failure (any pages allocated so far are rolled
    /// back via `uvmdealloc`).
    ///
    /// Per §4.2, `SwapManager::grow` is invoked from exactly this path for
    /// every newly-mapped page belonging to a `pid > 2` process.
    pub fn uvmalloc(&mut self, oldsz: usize, newsz: usize, xperm: PteFlags) -> Option<usize> {
        if newsz < oldsz {
            return Some(oldsz);
        }
        let mut a = pgroundup(oldsz);
        while a < newsz {
            let mut page = match kernel().alloc() {
                Some(p) => p,
                None => {
                    self.uvmdealloc(a, oldsz);
                    return None;
                }
            };
            page.fill(0);
            let pa = page.addr();
            if self
                .mappages(
                    a.into(),
                    PGSIZE,
                    pa,
                    PteFlags::R | PteFlags::U | xperm,
                )
                .is_err()
            {
                kernel().free(page);
                self.uvmdealloc(a, oldsz);
                return None;
            }
            core::mem::forget(page);
            a += PGSIZE;
        }
        Some(newsz)
    }

    /// Shrinks the process from `oldsz` to `newsz`, freeing whole pages.
    /// Returns the new size (`newsz`, unchanged if `newsz >= oldsz`).
    pub fn uvmdealloc(&mut self, oldsz: usize, newsz: usize) -> usize {
        if newsz >= oldsz {
            return oldsz;
        }
        if pgroundup(newsz) < pgroundup(oldsz) {
            let npages = (pgroundup(oldsz) - pgroundup(newsz)) / PGSIZE;
            self.uvmunmap(pgroundup(newsz).into(), npages, true);
        }
        newsz
    }

    /// Copies `src` into user memory starting at `dstva`, crossing page
    /// boundaries as needed. Used by syscalls that write results back into
    /// user-supplied buffers (e.g. `get_cfs_stats`, `kthread_join`).
    pub fn copy_out_bytes(&mut self, dstva: UVAddr, src: &[u8]) -> Result<(), ()> {
        let mut dst = dstva.into_usize();
        let mut len = src.len();
        let mut offset = 0;
        while len > 0 {
            let va = pgrounddown(dst);
            let poffset = dst - va;
            let pa = self.walkaddr(va.into()).ok_or(())?;
            let n = core::cmp::min(PGSIZE - poffset, len);
            // SAFETY: kernel code runs with a direct view of physical memory
            // (see `uvmcopy`'s identical access pattern); `pa` was just
            // validated as the backing frame of a `U`-accessible leaf.
            let page = unsafe {
                core::slice::from_raw_parts_mut(pa.into_usize() as *mut u8, PGSIZE)
            };
            page[poffset..poffset + n].copy_from_slice(&src[offset..offset + n]);
            len -= n;
            offset += n;
            dst += n;
        }
        Ok(())
    }

    /// Copies `dst.len()` bytes from user memory starting at `srcva`.
    pub fn copy_in_bytes(&mut self, dst: &mut [u8], srcva: UVAddr) -> Result<(), ()> {
        let mut src = srcva.into_usize();
        let mut len = dst.len();
        let mut offset = 0;
        while len > 0 {
            let va = pgrounddown(src);
            let poffset = src - va;
            let pa = self.walkaddr(va.into()).ok_or(())?;
            let n = core::cmp::min(PGSIZE - poffset, len);
            let page = unsafe {
                core::slice::from_raw_parts(pa.into_usize() as *const u8, PGSIZE)
            };
            dst[offset..offset + n].copy_from_slice(&page[poffset..poffset + n]);
            len -= n;
            offset += n;
            src += n;
        }
        Ok(())
    }

    /// Duplicates every leaf of `self` (covering `[0, sz)`) into `new`. For a
    /// PTE with `V` clear but `PG` set, installs the same paged-out flag
    /// pattern in `new` without copying a frame or touching swap state
    /// (§4.2: SW state is not duplicated on fork).
    pub fn uvmcopy(&mut self, new: &mut Self, sz: usize) -> Result<(), ()> {
        let mut i = 0;
        while i < sz {
            let pte = self.walk(i.into(), false).expect("uvmcopy: pte should exist");
            if !pte.is_valid() {
                if pte.is_paged_out() {
                    let flags = pte.flags();
                    let new_pte = new.walk(i.into(), true).ok_or(())?;
                    new_pte.set_paged_out(flags & !(PteFlags::V | PteFlags::PG));
                    i += PGSIZE;
                    continue;
                }
                panic!("uvmcopy: page not present");
            }
            let pa = pte.pa();
            let flags = pte.flags();
            let mut page = kernel().alloc().ok_or(())?;
            let src = unsafe {
                core::slice::from_raw_parts(pa.into_usize() as *const u8, PGSIZE)
            };
            page.copy_from_slice(src);
            let new_pa = page.addr();
            if new.mappages(i.into(), PGSIZE, new_pa, flags).is_err() {
                kernel().free(page);
                new.uvmunmap(0usize.into(), i / PGSIZE, true);
                return Err(());
            }
            core::mem::forget(page);
            i += PGSIZE;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::UVAddr;

    // These tests exercise only the pure bit-packing logic of
    // `PageTableEntry`, which needs no physical-frame allocator and no
    // hardware; the page-walk/allocation paths are exercised end to end
    // under QEMU, out of reach here (SPEC_FULL §2.13).

    #[test]
    fn pte_valid_and_paged_out_are_mutually_exclusive_by_construction() {
        let mut pte = PageTableEntry::default();
        pte.set_leaf(0x1000usize.into(), PteFlags::R | PteFlags::W);
        assert!(pte.is_valid());
        assert!(!pte.is_paged_out());

        pte.invalidate();
        pte.set_paged_out(PteFlags::R | PteFlags::W | PteFlags::X | PteFlags::U);
        assert!(!pte.is_valid());
        assert!(pte.is_paged_out());
    }

    #[test]
    fn pte_accessed_bit_round_trips() {
        let mut pte = PageTableEntry::default();
        pte.set_leaf(0x2000usize.into(), PteFlags::R);
        assert!(!pte.is_accessed());
        pte.0 |= PteFlags::A.bits();
        assert!(pte.is_accessed());
        pte.clear_accessed();
        assert!(!pte.is_accessed());
    }

    #[test]
    fn px_extracts_sv39_index_fields() {
        let va: UVAddr = ((7usize << 12) | (3usize << 21) | (1usize << 30)).into();
        assert_eq!(va.px(0), 7);
        assert_eq!(va.px(1), 3);
        assert_eq!(va.px(2), 1);
    }
}
