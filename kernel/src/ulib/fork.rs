// kernel/src/ulib/fork.rs
//
// Copy-on-write fork, entirely in user space.
//
//   1. install `pgfault` as our page-fault handler
//   2. exofork a NOT_RUNNABLE child
//   3. share every present user page below USTACKTOP: writable and COW
//      pages become COW on both sides, read-only pages are shared as is
//   4. give the child its own exception stack and our upcall
//   5. mark it RUNNABLE
//
// A write to a COW page faults; `pgfault` copies the page into a private
// frame and remaps it writable.

use super::pgfault::set_pgfault_handler;
use super::syscall::{
    sys_env_set_pgfault_upcall, sys_env_set_status, sys_exofork, sys_page_alloc, sys_page_map,
    sys_page_unmap,
};
use super::{UserContext, uvpd, uvpt};
use crate::error::KResult;
use crate::memory::layout::{
    NPTENTRIES, PFTEMP, PGSIZE, USTACKTOP, UVPT, UXSTACKTOP, pdx, pgaddr, round_down,
};
use crate::memory::{FaultCode, Perm};
use crate::process::{EnvId, EnvStatus, UTrapframe};

/// Page-fault handler for COW pages.  Anything other than a write to a
/// COW page is a protocol violation.
pub fn pgfault<U: UserContext>(u: &mut U, utf: &UTrapframe) {
    let addr = utf.fault_va;
    let err = FaultCode::from_bits_truncate(utf.err);
    if !err.contains(FaultCode::WRITE) {
        panic!("pgfault: read fault at {:#x} (err {:#x}, rip {:#x})", addr, utf.err, utf.rip);
    }
    if !uvpd(u, addr).contains(Perm::PRESENT) || !uvpt(u, addr).contains(Perm::PRESENT | Perm::COW) {
        panic!("pgfault: write to non-COW page at {:#x} (rip {:#x})", addr, utf.rip);
    }

    let page = round_down(addr, PGSIZE);
    let rw = Perm::PRESENT | Perm::USER | Perm::WRITABLE;
    if let Err(e) = sys_page_alloc(u, EnvId::SELF, PFTEMP, rw) {
        panic!("pgfault: sys_page_alloc: {}", e);
    }
    let mut buf = [0u8; PGSIZE as usize];
    u.read(page, &mut buf);
    u.write(PFTEMP, &buf);
    if let Err(e) = sys_page_map(u, EnvId::SELF, PFTEMP, EnvId::SELF, page, rw) {
        panic!("pgfault: sys_page_map: {}", e);
    }
    if let Err(e) = sys_page_unmap(u, EnvId::SELF, PFTEMP) {
        panic!("pgfault: sys_page_unmap: {}", e);
    }
}

/// Share page `va` with `child`.  Writable pages end up COW in both
/// spaces; the child is mapped first so our own copy stays valid until
/// it is remapped.
fn duppage<U: UserContext>(u: &mut U, child: EnvId, va: u64, pte: Perm) -> KResult<()> {
    let base = Perm::PRESENT | Perm::USER;
    if pte.intersects(Perm::WRITABLE | Perm::COW) {
        let cow = base | Perm::COW;
        sys_page_map(u, EnvId::SELF, va, child, va, cow)?;
        sys_page_map(u, EnvId::SELF, va, EnvId::SELF, va, cow)?;
    } else {
        sys_page_map(u, EnvId::SELF, va, child, va, pte & Perm::SYSCALL)?;
    }
    Ok(())
}

/// Fork a copy-on-write child that starts in `child_entry`.  Returns the
/// child's id once it is RUNNABLE.
pub fn fork<U: UserContext>(u: &mut U, child_entry: fn(&mut U)) -> KResult<EnvId> {
    set_pgfault_handler(u, pgfault::<U>);

    let entry = u.link_entry(child_entry);
    let saved = u.frame().rip;
    u.frame_mut().rip = entry;
    let child = sys_exofork(u);
    u.frame_mut().rip = saved;
    let child = child?;

    for pdeno in 0..=pdx(USTACKTOP - 1) {
        if !uvpd(u, pgaddr(pdeno, 0, 0)).contains(Perm::PRESENT) {
            continue;
        }
        let mut table = [0u8; PGSIZE as usize];
        u.read(UVPT + pdeno as u64 * PGSIZE, &mut table);
        for pteno in 0..NPTENTRIES {
            let va = pgaddr(pdeno, pteno, 0);
            if va >= USTACKTOP {
                break;
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&table[pteno * 8..pteno * 8 + 8]);
            let pte = Perm::from_bits_truncate(u64::from_le_bytes(raw));
            if pte.contains(Perm::PRESENT | Perm::USER) {
                duppage(u, child, va, pte)?;
            }
        }
    }

    let rw = Perm::PRESENT | Perm::USER | Perm::WRITABLE;
    sys_page_alloc(u, child, UXSTACKTOP - PGSIZE, rw)?;
    let upcall = u.pgfault_upcall();
    sys_env_set_pgfault_upcall(u, child, upcall)?;
    sys_env_set_status(u, child, EnvStatus::Runnable)?;
    Ok(child)
}
