//! Address newtypes and Sv39 constants.
//!
//! `PAddr`/`KVAddr`/`UVAddr` are distinct zero-cost wrappers around `usize`
//! so that a physical address can never be passed where a user virtual
//! address is expected, and vice versa.

use core::ops::Add;

/// Bits of offset within a page.
pub const PGSHIFT: usize = 12;

/// Bytes per page.
pub const PGSIZE: usize = 1 << PGSHIFT;

/// Bits of offset for each page-table level.
pub const PLSHIFT: usize = 9;

/// Entries per page-table level.
pub const PLSIZE: usize = 1 << PLSHIFT;

/// Bit mask for a page-table index.
pub const PLMASK: usize = PLSIZE - 1;

/// Number of page-table levels in Sv39.
pub const PLNUM: usize = 3;

/// One beyond the highest possible virtual address. This is one bit less
/// than the max allowed by Sv39, to avoid having to sign-extend virtual
/// addresses that have the high bit set.
pub const MAXVA: usize = 1 << (PLSHIFT * PLNUM + PGSHIFT - 1);

#[inline]
pub const fn pgroundup(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

#[inline]
pub const fn pgrounddown(a: usize) -> usize {
    a & !(PGSIZE - 1)
}

pub trait Addr: Copy + From<usize> + Add<usize, Output = Self> {
    fn into_usize(self) -> usize;
    fn is_null(self) -> bool;
    fn is_page_aligned(self) -> bool;
}

pub trait VAddr: Addr {
    /// Extract the `level`-th 9-bit page-table index (0 = leaf level).
    fn px(&self, level: usize) -> usize {
        (self.into_usize() >> (PGSHIFT + PLSHIFT * level)) & PLMASK
    }
}

macro_rules! define_addr_type {
    ($typ:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
        pub struct $typ(usize);

        impl From<usize> for $typ {
            fn from(value: usize) -> Self {
                Self(value)
            }
        }

        impl Add<usize> for $typ {
            type Output = Self;

            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Addr for $typ {
            fn into_usize(self) -> usize {
                self.0
            }

            fn is_null(self) -> bool {
                self.0 == 0
            }

            fn is_page_aligned(self) -> bool {
                self.0 % PGSIZE == 0
            }
        }
    };
}

define_addr_type!(PAddr);
define_addr_type!(KVAddr);
define_addr_type!(UVAddr);

impl VAddr for KVAddr {}
impl VAddr for UVAddr {}

/// Bit position at which a physical page number starts inside a PTE.
const PTESHIFT: usize = 10;

#[inline]
pub fn pa2pte(pa: PAddr) -> usize {
    (pa.into_usize() >> PGSHIFT) << PTESHIFT
}

#[inline]
pub fn pte2pa(pte: usize) -> PAddr {
    ((pte >> PTESHIFT) << PGSHIFT).into()
}
