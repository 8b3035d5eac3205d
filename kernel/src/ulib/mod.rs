// kernel/src/ulib/mod.rs
//
// User-space library.  Everything here runs as environment code: it
// reaches the kernel only through `UserContext::syscall` and touches
// memory only through the environment's own page tables.
//
// Copy-on-write fork lives here, built from the exokernel syscalls, the
// page-fault upcall and the read-only UVPT window.

pub mod fork;
pub mod ipc;
pub mod pgfault;
pub mod syscall;

pub use fork::fork;
pub use ipc::{ipc_find_env, ipc_recv, ipc_send};
pub use pgfault::{PgfaultHandler, set_pgfault_handler};

use core::fmt;

use crate::memory::layout::{uvpd_entry, uvpt_entry};
use crate::memory::Perm;
use crate::process::{EnvId, TrapFrame};

/// One user environment's view of the machine.
pub trait UserContext: Sized {
    /// Trap with `num` and five arguments; returns rax on resume.
    fn syscall(&mut self, num: u64, args: [u64; 5]) -> i64;

    /// Live registers.
    fn frame(&self) -> &TrapFrame;
    fn frame_mut(&mut self) -> &mut TrapFrame;

    /// User-mode loads and stores.  Page faults go to the kernel (and the
    /// registered upcall) and the access is retried once they are handled.
    fn read(&mut self, va: u64, buf: &mut [u8]);
    fn write(&mut self, va: u64, data: &[u8]);

    /// Text address at which `handler` can be named to the kernel.
    fn link_pgfault_handler(&mut self, handler: PgfaultHandler<Self>) -> u64;
    /// Text address of an entry routine, for a child to start at.
    fn link_entry(&mut self, entry: fn(&mut Self)) -> u64;
    /// Text address of the assembly-level upcall that calls the handler
    /// stored in the library data page.
    fn pgfault_upcall(&self) -> u64;

    fn read_u64(&mut self, va: u64) -> u64 {
        let mut b = [0u8; 8];
        self.read(va, &mut b);
        u64::from_le_bytes(b)
    }

    fn write_u64(&mut self, va: u64, value: u64) {
        self.write(va, &value.to_le_bytes());
    }
}

// ============================================================================
// Self-map lookups
// ============================================================================

/// Root-table entry covering `va`, read through UVPT.
pub fn uvpd<U: UserContext>(u: &mut U, va: u64) -> Perm {
    Perm::from_bits_truncate(u.read_u64(uvpd_entry(va)))
}

/// Page-table entry for `va`.  Only valid if `uvpd(va)` is present.
pub fn uvpt<U: UserContext>(u: &mut U, va: u64) -> Perm {
    Perm::from_bits_truncate(u.read_u64(uvpt_entry(va)))
}

/// Is `va`'s page mapped with at least `perm`?
pub fn page_has<U: UserContext>(u: &mut U, va: u64, perm: Perm) -> bool {
    uvpd(u, va).contains(Perm::PRESENT) && uvpt(u, va).contains(perm | Perm::PRESENT)
}

// ============================================================================
// Process helpers
// ============================================================================

pub fn getenvid<U: UserContext>(u: &mut U) -> EnvId {
    syscall::sys_getenvid(u)
}

/// Destroy the calling environment.  The kernel frees it at its next
/// trap, which the yield loop provides.
pub fn exit<U: UserContext>(u: &mut U) -> ! {
    let _ = syscall::sys_env_destroy(u, EnvId::SELF);
    loop {
        syscall::sys_yield(u);
    }
}

/// Write `s` to the console.  The bytes are staged on the user stack
/// below the stack pointer.
pub fn puts<U: UserContext>(u: &mut U, s: &str) {
    const CHUNK: usize = 256;
    for piece in s.as_bytes().chunks(CHUNK) {
        let va = (u.frame().rsp - CHUNK as u64 - 8) & !7;
        u.write(va, piece);
        syscall::sys_cputs(u, va, piece.len() as u64);
    }
}

#[doc(hidden)]
pub fn _print<U: UserContext>(u: &mut U, args: fmt::Arguments) {
    puts(u, &alloc::fmt::format(args));
}

/// Formatted console output from user code.
#[macro_export]
macro_rules! cprintln {
    ($u:expr, $($arg:tt)*) => {
        $crate::ulib::_print($u, format_args!("{}\n", format_args!($($arg)*)))
    };
}
