// kernel/src/ulib/syscall.rs
//
// Thin wrappers over the syscall ABI.

use super::UserContext;
use crate::error::{KResult, KernError};
use crate::memory::Perm;
use crate::process::syscall::*;
use crate::process::{EnvId, EnvStatus};

fn call<U: UserContext>(u: &mut U, num: u64, args: [u64; 5]) -> KResult<u64> {
    KernError::check(u.syscall(num, args))
}

pub fn sys_cputs<U: UserContext>(u: &mut U, va: u64, len: u64) {
    u.syscall(SYS_CPUTS, [va, len, 0, 0, 0]);
}

/// Next console byte, or `None` if nothing is waiting.
pub fn sys_cgetc<U: UserContext>(u: &mut U) -> Option<u8> {
    match u.syscall(SYS_CGETC, [0; 5]) {
        c if c > 0 => Some(c as u8),
        _ => None,
    }
}

pub fn sys_getenvid<U: UserContext>(u: &mut U) -> EnvId {
    EnvId(u.syscall(SYS_GETENVID, [0; 5]) as u32)
}

pub fn sys_env_destroy<U: UserContext>(u: &mut U, env: EnvId) -> KResult<()> {
    call(u, SYS_ENV_DESTROY, [u64::from(env.0), 0, 0, 0, 0]).map(drop)
}

pub fn sys_yield<U: UserContext>(u: &mut U) {
    u.syscall(SYS_YIELD, [0; 5]);
}

pub fn sys_page_alloc<U: UserContext>(u: &mut U, env: EnvId, va: u64, perm: Perm) -> KResult<()> {
    call(u, SYS_PAGE_ALLOC, [u64::from(env.0), va, perm.bits(), 0, 0]).map(drop)
}

pub fn sys_page_map<U: UserContext>(
    u: &mut U,
    src: EnvId,
    srcva: u64,
    dst: EnvId,
    dstva: u64,
    perm: Perm,
) -> KResult<()> {
    call(
        u,
        SYS_PAGE_MAP,
        [u64::from(src.0), srcva, u64::from(dst.0), dstva, perm.bits()],
    )
    .map(drop)
}

pub fn sys_page_unmap<U: UserContext>(u: &mut U, env: EnvId, va: u64) -> KResult<()> {
    call(u, SYS_PAGE_UNMAP, [u64::from(env.0), va, 0, 0, 0]).map(drop)
}

/// Returns the child's id in the parent.  The child starts at the
/// caller's current `rip` with rax = 0.
pub fn sys_exofork<U: UserContext>(u: &mut U) -> KResult<EnvId> {
    call(u, SYS_EXOFORK, [0; 5]).map(|id| EnvId(id as u32))
}

pub fn sys_env_set_status<U: UserContext>(u: &mut U, env: EnvId, status: EnvStatus) -> KResult<()> {
    call(u, SYS_ENV_SET_STATUS, [u64::from(env.0), status as u64, 0, 0, 0]).map(drop)
}

pub fn sys_env_set_pgfault_upcall<U: UserContext>(u: &mut U, env: EnvId, func: u64) -> KResult<()> {
    call(u, SYS_ENV_SET_PGFAULT_UPCALL, [u64::from(env.0), func, 0, 0, 0]).map(drop)
}

pub fn sys_ipc_try_send<U: UserContext>(
    u: &mut U,
    to: EnvId,
    value: u32,
    srcva: u64,
    perm: Perm,
) -> KResult<()> {
    call(
        u,
        SYS_IPC_TRY_SEND,
        [u64::from(to.0), u64::from(value), srcva, perm.bits(), 0],
    )
    .map(drop)
}

/// Blocks until a sender delivers.  Returns the delivered value.
pub fn sys_ipc_recv<U: UserContext>(u: &mut U, dstva: u64) -> KResult<u32> {
    call(u, SYS_IPC_RECV, [dstva, 0, 0, 0, 0]).map(|v| v as u32)
}
