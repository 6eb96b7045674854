//! Physical memory allocator for user pages, kernel stacks, page-table pages,
//! and swap I/O buffers. Allocates whole `PGSIZE`-byte pages.
//!
//! Grounded in the teacher kernel's `kalloc.rs`: a singly-linked free list
//! threaded through the pages themselves (`Run { next }`), seeded once from
//! `end` (the first address after the kernel image) to `PHYSTOP`.

use core::mem;
use core::ptr;

use crate::addr::{pgrounddown, pgroundup, PGSIZE};
use crate::memlayout::PHYSTOP;
use crate::page::Page;

extern "C" {
    /// First address after the kernel image; defined by the linker script.
    static mut end: u8;
}

struct Run {
    next: *mut Run,
}

/// # Safety invariant
///
/// This singly linked list never contains a cycle. If `head` is null the
/// list is empty; otherwise `head` is a valid, exclusively-owned page.
pub struct Kmem {
    head: *mut Run,
}

unsafe impl Send for Kmem {}

impl Kmem {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
        }
    }

    /// Populates the free list with every page between `end` and `PHYSTOP`.
    ///
    /// # Safety
    ///
    /// Must be called exactly once, before any other CPU observes `self`.
    pub unsafe fn init(&mut self) {
        let pa_start = pgroundup(unsafe { &mut end as *mut u8 as usize });
        let pa_end = pgrounddown(PHYSTOP);
        let mut pa = pa_start;
        while pa < pa_end {
            unsafe { self.free(Page::from_usize(pa)) };
            pa += PGSIZE;
        }
    }

    pub fn free(&mut self, page: Page) {
        let pa = page.into_usize();
        debug_assert_eq!(pa % PGSIZE, 0, "Kmem::free: misaligned");
        let r = pa as *mut Run;
        unsafe { (*r).next = self.head };
        self.head = r;
    }

    pub fn alloc(&mut self) -> Option<Page> {
        if self.head.is_null() {
            return None;
        }
        let next = unsafe { (*self.head).next };
        let pa = mem::replace(&mut self.head, next) as usize;
        Some(unsafe { Page::from_usize(pa) })
    }
}
