// kernel/src/memory/layout.rs
//
// Virtual memory map shared by the kernel and the user library.
//
// Two-level paging over 512-entry tables: PDX = bits 21..29,
// PTX = bits 12..20, so the translatable space is 1 GiB.
//
//    ADDRESS_SPACE_TOP  0x4000_0000 -+
//                                    |  physical memory, kernel RW
//    KERNBASE, ULIM     0x3000_0000 -+
//                                    |  UVPT: page tables, user R (self-map)
//    UVPT               0x2FE0_0000 -+
//                                    |  UENVS: environment records, user R
//    UTOP, UXSTACKTOP   0x2FC0_0000 -+  exception stack (1 page)
//                                    |  guard page (never mapped)
//    USTACKTOP          0x2FBF_E000 -+  normal stack grows down
//                                    ...
//    UTEXT              0x0040_0000     program text
//    PFTEMP             0x003F_F000     COW scratch page
//    UTEMP              0x0020_0000

use static_assertions::const_assert;
use static_assertions::const_assert_eq;
use x86_64::VirtAddr;

pub const PGSIZE: u64 = 4096;
pub const PGSHIFT: u32 = 12;
pub const NPTENTRIES: usize = 512;
pub const NPDENTRIES: usize = 512;
pub const PTSIZE: u64 = PGSIZE * NPTENTRIES as u64;
pub const PDXSHIFT: u32 = 21;

pub const ADDRESS_SPACE_TOP: u64 = PTSIZE * NPDENTRIES as u64;

pub const KERNBASE: u64 = 0x3000_0000;
pub const ULIM: u64 = KERNBASE;
pub const UVPT: u64 = ULIM - PTSIZE;
pub const UTOP: u64 = UVPT - PTSIZE;
pub const UXSTACKTOP: u64 = UTOP;
pub const USTACKTOP: u64 = UTOP - 2 * PGSIZE;
/// One 32-byte record per environment slot, for all 1024 slots.
pub const UENVS: u64 = UTOP;
pub const UENVS_SIZE: u64 = 1024 * 32;

pub const UTEXT: u64 = 2 * PTSIZE;
pub const UTEMP: u64 = PTSIZE;
pub const PFTEMP: u64 = UTEMP + PTSIZE - PGSIZE;

const_assert_eq!(ADDRESS_SPACE_TOP, 0x4000_0000);
const_assert_eq!(KERNBASE % PTSIZE, 0);
const_assert_eq!(UTOP % PTSIZE, 0);
const_assert!(UTEXT >= PFTEMP + PGSIZE);
const_assert!(USTACKTOP > UTEXT);
const_assert_eq!(UENVS_SIZE % PGSIZE, 0);
const_assert!(UENVS + UENVS_SIZE <= UVPT);

/// Page directory index.
#[inline]
pub const fn pdx(va: u64) -> usize {
    ((va >> PDXSHIFT) & (NPDENTRIES as u64 - 1)) as usize
}

/// Page table index.
#[inline]
pub const fn ptx(va: u64) -> usize {
    ((va >> PGSHIFT) & (NPTENTRIES as u64 - 1)) as usize
}

/// Linear page number: index into the UVPT window.
#[inline]
pub const fn pgnum(va: u64) -> usize {
    (va >> PGSHIFT) as usize
}

#[inline]
pub const fn pgaddr(pdx: usize, ptx: usize, offset: u64) -> u64 {
    ((pdx as u64) << PDXSHIFT) | ((ptx as u64) << PGSHIFT) | offset
}

#[inline]
pub const fn round_down(va: u64, align: u64) -> u64 {
    va - va % align
}

#[inline]
pub const fn round_up(va: u64, align: u64) -> u64 {
    round_down(va + align - 1, align)
}

/// Address of the UVPT entry describing `va`'s page.
#[inline]
pub const fn uvpt_entry(va: u64) -> u64 {
    UVPT + (pgnum(va) as u64) * 8
}

/// Address of the UVPD entry (root entry) covering `va`.
#[inline]
pub const fn uvpd_entry(va: u64) -> u64 {
    UVPT + ((pdx(UVPT) as u64) << PGSHIFT) + (pdx(va) as u64) * 8
}

/// `VirtAddr` for an address already known to be inside the 1 GiB window.
#[inline]
pub fn va(addr: u64) -> VirtAddr {
    VirtAddr::new(addr)
}
