// kernel/src/process/ipc.rs
//
// Synchronous, non-queued IPC.  A receiver parks itself NOT_RUNNABLE
// with `recving` set; the first sender to find it that way delivers a
// value (and optionally a page) and clears the flag.  Later senders see
// `IpcNotRecv` and retry.
//
// Both halves run under the big kernel lock, so checking and clearing
// `recving` cannot interleave with another send.

use log::debug;
use x86_64::VirtAddr;

use super::{EnvId, EnvStatus};
use crate::error::{KResult, KernError};
use crate::kern::KernelState;
use crate::memory::Perm;
use crate::memory::layout::{PGSIZE, UTOP};

/// Block `cur` until a sender arrives.  `dstva` below UTOP asks for a
/// page to be mapped there; anything at or above UTOP means no page.
pub fn recv(st: &mut KernelState, cur: usize, dstva: u64) -> KResult<()> {
    let dstva = if dstva < UTOP {
        if dstva % PGSIZE != 0 {
            return Err(KernError::Inval);
        }
        Some(dstva)
    } else {
        None
    };

    let env = st.envs.get_mut(cur);
    env.ipc.recving = true;
    env.ipc.dstva = dstva;
    env.status = EnvStatus::NotRunnable;
    Ok(())
}

/// Deliver `value` to `target` if it is blocked in `recv`.
///
/// A page moves only when both sides want one: `srcva` below UTOP and a
/// receiver that asked for a page.  Only then are `srcva` and `perm`
/// checked; otherwise the value alone is delivered.  The receiver wakes
/// with the value in rax, the sender in rdx and the delivered permission
/// in rcx.
pub fn try_send(
    st: &mut KernelState,
    sender: usize,
    target: EnvId,
    value: u32,
    srcva: u64,
    perm: u64,
) -> KResult<()> {
    // Any environment may signal any other.
    let dst = st.envs.resolve(target, Some(sender), false)?;
    if !st.envs.get(dst).ipc.recving {
        return Err(KernError::IpcNotRecv);
    }

    let mut delivered = Perm::empty();
    if let Some(dstva) = st.envs.get(dst).ipc.dstva.filter(|_| srcva < UTOP) {
        if srcva % PGSIZE != 0 {
            return Err(KernError::Inval);
        }
        let perm = Perm::from_syscall(perm)?;
        let src_space = st.envs.get(sender).space();
        let (frame, src_perm) = st
            .vm
            .lookup(src_space, VirtAddr::new(srcva))
            .ok_or(KernError::Inval)?;
        if perm.contains(Perm::WRITABLE) && !src_perm.contains(Perm::WRITABLE) {
            return Err(KernError::Inval);
        }
        let dst_space = st.envs.get(dst).space();
        st.vm.insert(dst_space, frame, VirtAddr::new(dstva), perm)?;
        delivered = perm;
    }

    let from = st.envs.get(sender).id;
    let env = st.envs.get_mut(dst);
    env.ipc.recving = false;
    env.ipc.from = from;
    env.ipc.value = value;
    env.ipc.perm = delivered.bits();
    env.status = EnvStatus::Runnable;
    env.tf.regs.rax = u64::from(value);
    env.tf.regs.rdx = u64::from(from.0);
    env.tf.regs.rcx = delivered.bits();

    debug!("[{}] ipc {} -> {} perm {:#x}", from, value, env.id, delivered.bits());
    Ok(())
}
