// kernel/src/ulib/pgfault.rs
//
// User-level page-fault handling.  The kernel delivers every fault to one
// upcall; the upcall calls whatever handler is stored in the library data
// page, then restores the faulting context from the `UTrapframe`.

use super::syscall::{sys_env_set_pgfault_upcall, sys_page_alloc};
use super::{UserContext, page_has};
use crate::memory::Perm;
use crate::memory::layout::{PGSIZE, UTEXT, UXSTACKTOP};
use crate::process::{EnvId, UTrapframe};

pub type PgfaultHandler<U> = fn(&mut U, &UTrapframe);

/// Library data page, right after the program text.
pub const LIBDATA: u64 = UTEXT + PGSIZE;

/// `_pgfault_handler`: text address of the current handler, 0 if none.
pub const PGFAULT_HANDLER_VA: u64 = LIBDATA;

/// Install `handler`.  The first call also maps the exception stack (if
/// it is not there yet) and registers the upcall with the kernel.
pub fn set_pgfault_handler<U: UserContext>(u: &mut U, handler: PgfaultHandler<U>) {
    if u.read_u64(PGFAULT_HANDLER_VA) == 0 {
        let exstack = UXSTACKTOP - PGSIZE;
        if !page_has(u, exstack, Perm::USER | Perm::WRITABLE) {
            if let Err(e) = sys_page_alloc(u, EnvId::SELF, exstack, Perm::PRESENT | Perm::USER | Perm::WRITABLE) {
                panic!("set_pgfault_handler: {}", e);
            }
        }
        let upcall = u.pgfault_upcall();
        if let Err(e) = sys_env_set_pgfault_upcall(u, EnvId::SELF, upcall) {
            panic!("set_pgfault_handler: {}", e);
        }
    }
    let addr = u.link_pgfault_handler(handler);
    u.write_u64(PGFAULT_HANDLER_VA, addr);
}
