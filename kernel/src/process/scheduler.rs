// kernel/src/process/scheduler.rs
//
// Round-robin selection over the environment table.  Runs with the big
// kernel lock held; the caller turns the returned `Resume` into a
// context switch.

use log::debug;

use super::EnvStatus;
use crate::kern::{CpuId, KernelState, Resume};

/// Pick the next RUNNABLE environment after `cpu`'s current one.  If
/// none is found, keep running the current environment if it is still
/// RUNNING here; otherwise halt the core.
pub fn sched_yield(st: &mut KernelState, cpu: CpuId) -> Resume {
    let n = st.envs.capacity();
    let start = st.curenv(cpu).map_or(0, |i| i + 1);

    for k in 0..n {
        let idx = (start + k) % n;
        if st.envs.get(idx).status == EnvStatus::Runnable {
            return env_run(st, cpu, idx);
        }
    }

    if let Some(cur) = st.curenv(cpu) {
        let env = st.envs.get(cur);
        if env.status == EnvStatus::Running && env.cpunum == Some(cpu) {
            return env_run(st, cpu, cur);
        }
    }

    sched_halt(st, cpu)
}

/// Context switch to `idx` on `cpu`.  The previous occupant, if still
/// RUNNING, goes back to RUNNABLE.
pub fn env_run(st: &mut KernelState, cpu: CpuId, idx: usize) -> Resume {
    if let Some(prev) = st.curenv(cpu) {
        let prev = st.envs.get_mut(prev);
        if prev.status == EnvStatus::Running {
            prev.status = EnvStatus::Runnable;
        }
    }

    let env = st.envs.get_mut(idx);
    env.status = EnvStatus::Running;
    env.runs += 1;
    env.cpunum = Some(cpu);
    let (id, tf, space) = (env.id, env.tf, env.space());

    st.cpus[cpu].curenv = Some(idx);
    st.cpus[cpu].halted = false;
    st.vm.activate(cpu, space);
    Resume::Run { env: id, tf }
}

/// Resume `cpu`'s current environment exactly as stored, without a
/// status change.
pub fn resume_current(st: &mut KernelState, cpu: CpuId) -> Option<Resume> {
    let cur = st.curenv(cpu)?;
    let env = st.envs.get(cur);
    matches!(env.status, EnvStatus::Running | EnvStatus::Dying).then(|| Resume::Run {
        env: env.id,
        tf: env.tf,
    })
}

fn sched_halt(st: &mut KernelState, cpu: CpuId) -> Resume {
    let runnable = st.envs.live().any(|i| {
        matches!(
            st.envs.get(i).status,
            EnvStatus::Runnable | EnvStatus::Running | EnvStatus::Dying
        )
    });
    if !runnable {
        debug!("cpu{}: no runnable environments in the system", cpu);
    }

    let kern = st.vm.kernel_space();
    st.vm.activate(cpu, kern);
    st.cpus[cpu].curenv = None;
    st.cpus[cpu].halted = true;
    Resume::Halt
}
