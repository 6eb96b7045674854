//! The unit of currency for `Kmem`, trap frames, page-table pages, and swap I/O.
//!
//! Grounded in the teacher kernel's `page.rs`: `Page` is a move-only handle
//! that proves unique ownership of one physical, page-aligned, `PGSIZE`-byte
//! range. Unlike the teacher's by-value `[u8; PGSIZE]` field (which would
//! copy a full page on every `from_usize`/`into_usize` round trip), this
//! `Page` holds the address as a raw pointer, matching the "proof of
//! ownership, not a container" role the type actually plays in `Kmem`'s
//! free list and in page-table/trap-frame setup.

use core::ops::{Deref, DerefMut};
use core::ptr::NonNull;

use crate::addr::{PAddr, PGSIZE};

pub struct Page {
    ptr: NonNull<[u8; PGSIZE]>,
}

unsafe impl Send for Page {}

impl Page {
    /// Reinterprets the page-aligned physical address `pa` as an owned `Page`.
    ///
    /// # Safety
    ///
    /// `pa` must be page-aligned, and the caller must be relinquishing unique
    /// ownership of the `PGSIZE` bytes starting at `pa` to the returned `Page`.
    pub unsafe fn from_usize(pa: usize) -> Self {
        debug_assert_eq!(pa % PGSIZE, 0, "Page::from_usize: misaligned");
        Self {
            ptr: unsafe { NonNull::new_unchecked(pa as *mut [u8; PGSIZE]) },
        }
    }

    /// Consumes the `Page`, returning its physical address and relinquishing
    /// ownership back to the caller.
    pub fn into_usize(self) -> usize {
        let addr = self.ptr.as_ptr() as usize;
        core::mem::forget(self);
        addr
    }

    pub fn addr(&self) -> PAddr {
        (self.ptr.as_ptr() as usize).into()
    }
}

impl Deref for Page {
    type Target = [u8; PGSIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { self.ptr.as_ref() }
    }
}

impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.ptr.as_mut() }
    }
}
