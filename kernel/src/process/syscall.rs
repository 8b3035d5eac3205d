// kernel/src/process/syscall.rs
//
// System call layer.  `dispatch` decodes the number and arguments taken
// from the trapped environment's stored frame and runs the call with the
// big kernel lock held.
//
// Errors come back to user space as negative values in rax.  A bad user
// pointer is different: the caller is terminated and never sees a return.

use alloc::vec;
use log::{debug, info, trace};
use x86_64::VirtAddr;

use super::{EnvId, EnvStatus, ipc};
use crate::error::{KResult, KernError, UserFault};
use crate::kern::{CpuId, KernelState};
use crate::memory::layout::{PGSIZE, UTOP};
use crate::memory::{AllocFlags, Perm};

// ============ Syscall numbers ============
pub const SYS_CPUTS: u64 = 0;
pub const SYS_CGETC: u64 = 1;
pub const SYS_GETENVID: u64 = 2;
pub const SYS_ENV_DESTROY: u64 = 3;
pub const SYS_PAGE_ALLOC: u64 = 4;
pub const SYS_PAGE_MAP: u64 = 5;
pub const SYS_PAGE_UNMAP: u64 = 6;
pub const SYS_EXOFORK: u64 = 7;
pub const SYS_ENV_SET_STATUS: u64 = 8;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u64 = 9;
pub const SYS_YIELD: u64 = 10;
pub const SYS_IPC_TRY_SEND: u64 = 11;
pub const SYS_IPC_RECV: u64 = 12;

/// How a syscall leaves the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Store the value in rax and resume.
    Return(i64),
    /// Give up the core; rax reads 0 on resume.
    Yield,
    /// Caller is NOT_RUNNABLE; its rax is written by whoever wakes it.
    Blocked,
    /// Caller was terminated.
    Killed,
}

enum SysError {
    Errno(KernError),
    Fault(UserFault),
}

impl From<KernError> for SysError {
    fn from(e: KernError) -> Self {
        SysError::Errno(e)
    }
}

impl From<UserFault> for SysError {
    fn from(f: UserFault) -> Self {
        SysError::Fault(f)
    }
}

type SysResult = Result<i64, SysError>;

pub fn dispatch(st: &mut KernelState, cpu: CpuId, cur: usize, num: u64, a: [u64; 5]) -> Outcome {
    if st.config.trace_syscalls {
        trace!(
            "[{}] syscall {} ({:#x}, {:#x}, {:#x}, {:#x}, {:#x})",
            st.envs.get(cur).id,
            num,
            a[0],
            a[1],
            a[2],
            a[3],
            a[4]
        );
    }

    let ret = match num {
        SYS_CPUTS => sys_cputs(st, cur, a[0], a[1]),
        SYS_CGETC => Ok(sys_cgetc(st)),
        SYS_GETENVID => Ok(i64::from(st.envs.get(cur).id.0)),
        SYS_ENV_DESTROY => sys_env_destroy(st, cpu, cur, EnvId::from_arg(a[0])),
        SYS_PAGE_ALLOC => sys_page_alloc(st, cur, EnvId::from_arg(a[0]), a[1], a[2]),
        SYS_PAGE_MAP => sys_page_map(
            st,
            cur,
            EnvId::from_arg(a[0]),
            a[1],
            EnvId::from_arg(a[2]),
            a[3],
            a[4],
        ),
        SYS_PAGE_UNMAP => sys_page_unmap(st, cur, EnvId::from_arg(a[0]), a[1]),
        SYS_EXOFORK => sys_exofork(st, cur),
        SYS_ENV_SET_STATUS => sys_env_set_status(st, cpu, cur, EnvId::from_arg(a[0]), a[1]),
        SYS_ENV_SET_PGFAULT_UPCALL => {
            sys_env_set_pgfault_upcall(st, cur, EnvId::from_arg(a[0]), a[1])
        }
        SYS_YIELD => return Outcome::Yield,
        SYS_IPC_TRY_SEND => ipc::try_send(st, cur, EnvId::from_arg(a[0]), a[1] as u32, a[2], a[3])
            .map(|()| 0)
            .map_err(SysError::from),
        SYS_IPC_RECV => match ipc::recv(st, cur, a[0]) {
            Ok(()) => return Outcome::Blocked,
            Err(e) => Err(e.into()),
        },
        _ => Err(KernError::NoSys.into()),
    };

    match ret {
        Ok(v) => Outcome::Return(v),
        Err(SysError::Errno(e)) => Outcome::Return(e.errno()),
        Err(SysError::Fault(fault)) => {
            debug!(
                "[{}] syscall {} killed: bad user pointer {:#x}",
                st.envs.get(cur).id,
                num,
                fault.va
            );
            st.kill_current(cpu);
            Outcome::Killed
        }
    }
}

/// Page-aligned and below UTOP.
fn check_user_va(va: u64) -> KResult<()> {
    if va >= UTOP || va % PGSIZE != 0 {
        return Err(KernError::Inval);
    }
    Ok(())
}

// ============================================================================
// CONSOLE
// ============================================================================

fn sys_cputs(st: &mut KernelState, cur: usize, s: u64, len: u64) -> SysResult {
    st.user_mem_assert(cur, s, len, Perm::empty())?;
    let mut buf = vec![0u8; len as usize];
    let space = st.envs.get(cur).space();
    st.vm
        .copy_from_user(space, s, &mut buf)
        .map_err(|va| UserFault { va })?;
    st.console.write(&buf);
    Ok(0)
}

/// Next input byte, 0 if none.
fn sys_cgetc(st: &mut KernelState) -> i64 {
    st.console.getc().map_or(0, i64::from)
}

// ============================================================================
// ENVIRONMENTS
// ============================================================================

fn sys_env_destroy(st: &mut KernelState, cpu: CpuId, cur: usize, envid: EnvId) -> SysResult {
    let idx = st.envs.resolve(envid, Some(cur), true)?;
    let me = st.envs.get(cur).id;
    if idx == cur {
        info!("[{}] exiting gracefully", me);
    } else {
        info!("[{}] destroying {}", me, st.envs.get(idx).id);
    }
    st.env_destroy(cpu, idx);
    Ok(0)
}

/// New environment with a copy of the caller's registers, NOT_RUNNABLE,
/// and an empty user address space.  It sees 0 from this call.
fn sys_exofork(st: &mut KernelState, cur: usize) -> SysResult {
    let parent = st.envs.get(cur);
    let (parent_id, tf) = (parent.id, parent.tf);

    let idx = st.envs.alloc(&mut st.vm, parent_id)?;
    let child = st.envs.get_mut(idx);
    child.status = EnvStatus::NotRunnable;
    child.tf = tf;
    child.tf.regs.rax = 0;
    Ok(i64::from(child.id.0))
}

/// A DYING target stays dying, and an environment running on another
/// core cannot be made runnable a second time.
fn sys_env_set_status(
    st: &mut KernelState,
    cpu: CpuId,
    cur: usize,
    envid: EnvId,
    status: u64,
) -> SysResult {
    let status = match EnvStatus::from_u64(status) {
        Some(s @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => s,
        _ => return Err(KernError::Inval.into()),
    };
    let idx = st.envs.resolve(envid, Some(cur), true)?;
    let env = st.envs.get(idx);
    match env.status {
        EnvStatus::Dying => return Err(KernError::BadEnv.into()),
        EnvStatus::Running if env.cpunum != Some(cpu) => return Err(KernError::Inval.into()),
        _ => {}
    }
    st.envs.get_mut(idx).status = status;
    Ok(0)
}

/// Register the page-fault entry point.  `func` must be user-mapped in
/// the caller's space.
fn sys_env_set_pgfault_upcall(st: &mut KernelState, cur: usize, envid: EnvId, func: u64) -> SysResult {
    let idx = st.envs.resolve(envid, Some(cur), true)?;
    st.user_mem_assert(cur, func, 1, Perm::empty())?;
    st.envs.get_mut(idx).pgfault_upcall = Some(func);
    Ok(0)
}

// ============================================================================
// MEMORY
// ============================================================================

/// Map a fresh zeroed page at `va` in `envid`, replacing any existing
/// mapping.
fn sys_page_alloc(st: &mut KernelState, cur: usize, envid: EnvId, va: u64, perm: u64) -> SysResult {
    let idx = st.envs.resolve(envid, Some(cur), true)?;
    check_user_va(va)?;
    let perm = Perm::from_syscall(perm)?;

    let space = st.envs.get(idx).space();
    let frame = st
        .vm
        .pmap_mut()
        .page_alloc(AllocFlags::ZERO)
        .ok_or(KernError::NoMem)?;
    if let Err(e) = st.vm.insert(space, frame, VirtAddr::new(va), perm) {
        st.vm.pmap_mut().page_free(frame);
        return Err(e.into());
    }
    Ok(0)
}

/// Map the page at `srcva` in `srcenv` into `dstenv` at `dstva`.  The
/// new mapping may not be writable unless the source is.
fn sys_page_map(
    st: &mut KernelState,
    cur: usize,
    srcenv: EnvId,
    srcva: u64,
    dstenv: EnvId,
    dstva: u64,
    perm: u64,
) -> SysResult {
    let src = st.envs.resolve(srcenv, Some(cur), true)?;
    let dst = st.envs.resolve(dstenv, Some(cur), true)?;
    check_user_va(srcva)?;
    check_user_va(dstva)?;
    let perm = Perm::from_syscall(perm)?;

    let (frame, src_perm) = st
        .vm
        .lookup(st.envs.get(src).space(), VirtAddr::new(srcva))
        .ok_or(KernError::Inval)?;
    if perm.contains(Perm::WRITABLE) && !src_perm.contains(Perm::WRITABLE) {
        return Err(KernError::Inval.into());
    }

    let dst_space = st.envs.get(dst).space();
    st.vm.insert(dst_space, frame, VirtAddr::new(dstva), perm)?;
    Ok(0)
}

fn sys_page_unmap(st: &mut KernelState, cur: usize, envid: EnvId, va: u64) -> SysResult {
    let idx = st.envs.resolve(envid, Some(cur), true)?;
    check_user_va(va)?;
    let space = st.envs.get(idx).space();
    st.vm.remove(space, VirtAddr::new(va));
    Ok(0)
}
