// kernel/src/interrupts/trap.rs
//
// Trap dispatch.  Called with the big kernel lock held.
//
// For a trap from user mode the incoming frame is copied into the
// current environment's record first; from then on that stored copy is
// "the trapframe" and is what the core resumes with.

use log::{debug, info, warn};

use super::{IRQ_OFFSET, IRQ_SPURIOUS, IRQ_TIMER, T_BRKPT, T_PGFLT, T_SYSCALL, trapname};
use crate::kern::{CpuId, KernelState, Resume};
use crate::memory::Perm;
use crate::memory::layout::{PGSIZE, UXSTACKTOP};
use crate::process::scheduler::{resume_current, sched_yield};
use crate::process::syscall::{self, Outcome};
use crate::process::trapframe::{UTRAPFRAME_SIZE, UTrapframe};
use crate::process::{EnvStatus, TrapFrame};

/// What to do with the trapped environment once its trap is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Resume it if it is still RUNNING (or DYING).
    Resume,
    /// Give up the core.
    Reschedule,
}

pub fn trap(st: &mut KernelState, cpu: CpuId, tf: &TrapFrame) -> Resume {
    if !tf.from_user() {
        return kernel_trap(st, cpu, tf);
    }

    let Some(cur) = st.curenv(cpu) else {
        crate::kernel_panic!("cpu{}: user trap {} with no current environment", cpu, tf.trapno);
    };

    // Deferred reclamation of an environment that destroyed itself.
    if st.envs.get(cur).status == EnvStatus::Dying {
        let id = st.envs.get(cur).id;
        st.reap(cur, id);
        return sched_yield(st, cpu);
    }

    st.envs.get_mut(cur).tf = *tf;

    let flow = dispatch(st, cpu, cur);
    if flow == Flow::Resume {
        if let Some(resume) = resume_current(st, cpu) {
            return resume;
        }
    }
    sched_yield(st, cpu)
}

fn dispatch(st: &mut KernelState, cpu: CpuId, cur: usize) -> Flow {
    let tf = st.envs.get(cur).tf;
    match tf.trapno {
        T_PGFLT => {
            page_fault_handler(st, cpu, cur);
            Flow::Resume
        }
        T_BRKPT => {
            monitor(&tf, None);
            Flow::Resume
        }
        T_SYSCALL => {
            let (num, args) = tf.syscall_args();
            match syscall::dispatch(st, cpu, cur, num, args) {
                Outcome::Return(ret) => {
                    st.envs.get_mut(cur).tf.regs.rax = ret as u64;
                    Flow::Resume
                }
                Outcome::Yield => {
                    st.envs.get_mut(cur).tf.regs.rax = 0;
                    Flow::Reschedule
                }
                Outcome::Blocked | Outcome::Killed => Flow::Reschedule,
            }
        }
        t if t == IRQ_OFFSET + IRQ_TIMER => Flow::Reschedule,
        t if t == IRQ_OFFSET + IRQ_SPURIOUS => {
            debug!("cpu{}: spurious interrupt on irq 7", cpu);
            Flow::Resume
        }
        _ => {
            let id = st.envs.get(cur).id;
            warn!("[{}] unexpected trap {} ({})", id, tf.trapno, trapname(tf.trapno));
            tf.debug_print(None);
            st.kill_current(cpu);
            Flow::Reschedule
        }
    }
}

fn kernel_trap(st: &mut KernelState, cpu: CpuId, tf: &TrapFrame) -> Resume {
    match tf.trapno {
        T_BRKPT => {
            monitor(tf, None);
            Resume::Kernel { tf: *tf }
        }
        T_PGFLT => {
            let cr2 = st.cpus[cpu].cr2;
            tf.debug_print(Some(cr2));
            crate::kernel_panic!("kernel page fault at va {:#x}, rip {:#x}", cr2, tf.rip);
        }
        t if t == IRQ_OFFSET + IRQ_TIMER => {
            if st.cpus[cpu].halted {
                sched_yield(st, cpu)
            } else {
                Resume::Kernel { tf: *tf }
            }
        }
        t if t == IRQ_OFFSET + IRQ_SPURIOUS => Resume::Kernel { tf: *tf },
        _ => {
            tf.debug_print(None);
            crate::kernel_panic!("unhandled trap {} ({}) in kernel", tf.trapno, trapname(tf.trapno));
        }
    }
}

/// Breakpoint hook: dump the frame and carry on.
fn monitor(tf: &TrapFrame, cr2: Option<u64>) {
    info!("breakpoint at rip {:#x}", tf.rip);
    tf.debug_print(cr2);
}

// ============================================================================
// PAGE FAULTS
// ============================================================================

/// User page fault: push a `UTrapframe` on the exception stack and
/// redirect the environment to its upcall.  Any problem with the upcall
/// or the exception stack terminates the environment.
fn page_fault_handler(st: &mut KernelState, cpu: CpuId, cur: usize) {
    let fault_va = st.cpus[cpu].cr2;
    let env = st.envs.get(cur);
    let (id, tf, space) = (env.id, env.tf, env.space());

    let Some(upcall) = env.pgfault_upcall else {
        info!("[{}] user fault va {:08x} ip {:08x}", id, fault_va, tf.rip);
        tf.debug_print(Some(fault_va));
        st.kill_current(cpu);
        return;
    };

    let exstack = UXSTACKTOP - PGSIZE;
    if st.user_mem_assert(cur, exstack, PGSIZE, Perm::WRITABLE).is_err() {
        st.kill_current(cpu);
        return;
    }

    // A fault inside the upcall leaves one scratch word below the
    // interrupted stack pointer.
    let nested = (exstack..UXSTACKTOP).contains(&tf.rsp);
    let top = if nested { tf.rsp.saturating_sub(8) } else { UXSTACKTOP };
    let pos = top.saturating_sub(UTRAPFRAME_SIZE as u64);
    // No room for another record: an exception-stack overflow.  Only the
    // environment dies; the kernel carries on.
    if pos < exstack {
        warn!("[{}] exception stack overflow at rsp {:#x}", id, tf.rsp);
        st.kill_current(cpu);
        return;
    }

    let utf = UTrapframe::from_trapframe(&tf, fault_va);
    if st.vm.copy_to_user(space, pos, &utf.to_bytes()).is_err() {
        st.kill_current(cpu);
        return;
    }

    let env = st.envs.get_mut(cur);
    env.tf.rip = upcall;
    env.tf.rsp = pos;
}
