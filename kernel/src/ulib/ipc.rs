// kernel/src/ulib/ipc.rs

use super::syscall::{sys_ipc_recv, sys_ipc_try_send, sys_yield};
use super::{UserContext, exit};
use crate::error::{KResult, KernError};
use crate::memory::Perm;
use crate::memory::layout::{UENVS, UENVS_SIZE, UTOP};
use crate::process::{EnvId, EnvRecord, EnvStatus, EnvType};

/// Wait for a message.  With `pg`, a page sent along is mapped there.
/// Returns (value, sender, permission of the mapped page or empty).
pub fn ipc_recv<U: UserContext>(u: &mut U, pg: Option<u64>) -> KResult<(u32, EnvId, Perm)> {
    let value = sys_ipc_recv(u, pg.unwrap_or(UTOP))?;
    let regs = u.frame().regs;
    Ok((
        value,
        EnvId(regs.rdx as u32),
        Perm::from_bits_truncate(regs.rcx),
    ))
}

/// Send until `to` accepts.  Any error other than "not receiving"
/// terminates the sender.
pub fn ipc_send<U: UserContext>(u: &mut U, to: EnvId, value: u32, pg: Option<(u64, Perm)>) {
    let (srcva, perm) = pg.unwrap_or((UTOP, Perm::empty()));
    loop {
        match sys_ipc_try_send(u, to, value, srcva, perm) {
            Ok(()) => return,
            Err(KernError::IpcNotRecv) => sys_yield(u),
            Err(e) => {
                crate::cprintln!(u, "ipc_send to {}: {}", to, e);
                exit(u);
            }
        }
    }
}

/// First live environment of type `ty`, found by scanning the read-only
/// UENVS records.  Dying environments are skipped.
pub fn ipc_find_env<U: UserContext>(u: &mut U, ty: EnvType) -> Option<EnvId> {
    let mut window = alloc::vec![0u8; UENVS_SIZE as usize];
    u.read(UENVS, &mut window);
    window
        .chunks_exact(EnvRecord::SIZE)
        .filter_map(EnvRecord::decode)
        .find(|rec| rec.env_type == ty && !matches!(rec.status, EnvStatus::Free | EnvStatus::Dying))
        .map(|rec| rec.id)
}
