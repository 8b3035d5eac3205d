// kernel/src/memory/paging.rs
//
// Page permission bits and page-fault error codes.
//
// Hardware bits (present/writable/user) share the entry with three
// software-available bits (9..11).  Bit 11 is copy-on-write: the MMU
// ignores it, only the user-space fault handler reads it.

use bitflags::bitflags;
use x86_64::structures::paging::PageTableFlags;

use crate::error::{KResult, KernError};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Perm: u64 {
        const PRESENT = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;

        // ── software-reserved range ──
        const AVAIL0 = 1 << 9;
        const AVAIL1 = 1 << 10;
        const COW = 1 << 11;
        const AVAIL = Self::AVAIL0.bits() | Self::AVAIL1.bits() | Self::COW.bits();

        /// Everything a syscall caller may request.
        const SYSCALL = Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::USER.bits()
            | Self::AVAIL.bits();
    }
}

impl Perm {
    /// Hardware view of these bits.
    pub fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.bits())
    }

    /// Permission bits of a page-table entry; accessed/dirty etc. are dropped.
    pub fn from_flags(flags: PageTableFlags) -> Self {
        Perm::from_bits_truncate(flags.bits())
    }

    /// Validate permission bits passed to page_alloc / page_map / IPC:
    /// present and user must be set, nothing outside the allow-set.
    pub fn from_syscall(raw: u64) -> KResult<Self> {
        let perm = Perm::from_bits(raw).ok_or(KernError::Inval)?;
        if !perm.contains(Perm::PRESENT | Perm::USER) || !Perm::SYSCALL.contains(perm) {
            return Err(KernError::Inval);
        }
        Ok(perm)
    }
}

bitflags! {
    /// x86 page-fault error code.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FaultCode: u64 {
        /// 0 = page not present, 1 = protection violation
        const PROTECTION = 1 << 0;
        const WRITE = 1 << 1;
        const USER = 1 << 2;
    }
}
