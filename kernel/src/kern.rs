// kernel/src/kern.rs
//
// The kernel object: every piece of kernel state behind one lock.
//
// `Kernel::state` is the big kernel lock.  Every entry from a core
// (trap, first dispatch, idle tick) takes it for the whole of its kernel
// work, so syscalls, IPC and page-table updates are atomic with respect
// to each other.  User-mode memory accesses also pass through it because
// the MMU model shares the page tables with the kernel.

use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{info, warn};
use spin::{Mutex, MutexGuard};

use crate::config::KernelConfig;
use crate::drivers::{Console, InputRing};
use crate::error::UserFault;
use crate::memory::layout::{PGSIZE, UENVS};
use crate::memory::{Access, AddressSpaceManager, ExecutableImage, FaultCode, Perm};
use crate::process::{EnvId, EnvRecord, EnvStatus, EnvTable, EnvType, TrapFrame};

pub type CpuId = usize;

/// What a core does after leaving the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Enter user mode as `env` with these registers.
    Run { env: EnvId, tf: TrapFrame },
    /// Nothing to run on this core.
    Halt,
    /// Return to interrupted kernel code.
    Kernel { tf: TrapFrame },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuState {
    /// Slot of the environment this core last dispatched.
    pub curenv: Option<usize>,
    /// Last page-fault address seen by this core.
    pub cr2: u64,
    pub halted: bool,
}

pub struct KernelState {
    pub vm: AddressSpaceManager,
    pub envs: EnvTable,
    pub cpus: Vec<CpuState>,
    pub console: Console,
    pub config: KernelConfig,
    reaped: Vec<EnvId>,
}

impl KernelState {
    pub(crate) fn new(vm: AddressSpaceManager, config: KernelConfig, console: Console) -> Self {
        Self {
            vm,
            envs: EnvTable::new(config.nenv),
            cpus: alloc::vec![CpuState::default(); config.ncpu],
            console,
            config,
            reaped: Vec::new(),
        }
    }

    pub fn curenv(&self, cpu: CpuId) -> Option<usize> {
        self.cpus[cpu].curenv
    }

    fn curenv_id(&self, cpu: CpuId) -> EnvId {
        self.curenv(cpu).map_or(EnvId(0), |i| self.envs.get(i).id)
    }

    // ========================================================================
    // DESTROY / REAP
    // ========================================================================

    /// Free `idx` now and remember its handle for the host side.
    pub fn reap(&mut self, idx: usize, actor: EnvId) {
        let id = self.envs.get(idx).id;
        self.envs.free(&mut self.vm, idx, actor);
        for cpu in self.cpus.iter_mut() {
            if cpu.curenv == Some(idx) {
                cpu.curenv = None;
            }
        }
        self.reaped.push(id);
    }

    /// Destroy requested by `cpu`'s current environment (or the kernel).
    /// The caller itself, or an environment running on another core, is
    /// only marked DYING; its next trap entry frees it.
    pub fn env_destroy(&mut self, cpu: CpuId, idx: usize) {
        let env = self.envs.get(idx);
        let is_self = self.curenv(cpu) == Some(idx);
        if is_self || matches!(env.status, EnvStatus::Running | EnvStatus::Dying) {
            self.envs.get_mut(idx).status = EnvStatus::Dying;
            return;
        }
        let actor = self.curenv_id(cpu);
        self.reap(idx, actor);
    }

    /// Kernel-initiated termination of the environment that trapped on
    /// `cpu`.  It is freed immediately and never resumed.
    pub fn kill_current(&mut self, cpu: CpuId) {
        if let Some(cur) = self.curenv(cpu) {
            let id = self.envs.get(cur).id;
            self.reap(cur, id);
        }
    }

    // ========================================================================
    // USER POINTER CHECKS
    // ========================================================================

    /// Whole range mapped with `perm` (plus user) below ULIM in `idx`'s
    /// space.
    pub fn user_mem_assert(&self, idx: usize, va: u64, len: u64, perm: Perm) -> Result<(), UserFault> {
        let env = self.envs.get(idx);
        self.vm
            .user_mem_check(env.space(), va, len, perm | Perm::USER)
            .map_err(|bad| {
                warn!("[{}] user_mem_check assertion failure for va {:08x}", env.id, bad);
                UserFault { va: bad }
            })
    }

    pub fn take_reaped(&mut self) -> Vec<EnvId> {
        core::mem::take(&mut self.reaped)
    }

    /// Rewrite the UENVS records from the table.  Runs on every way out
    /// of the kernel, so user code never sees a stale slot.
    pub fn publish_envs(&mut self) {
        let mut records = Vec::with_capacity(self.envs.capacity() * EnvRecord::SIZE);
        for idx in 0..self.envs.capacity() {
            records.extend_from_slice(&EnvRecord::of(self.envs.get(idx)).encode());
        }
        let kern = self.vm.kernel_space();
        if let Err(va) = self.vm.copy_to_user(kern, UENVS, &records) {
            crate::kernel_panic!("publish_envs: UENVS page {:#x} not mapped", va);
        }
    }

    /// No environment can make progress: nothing RUNNABLE, RUNNING or DYING.
    pub fn is_quiescent(&self) -> bool {
        self.envs.live().all(|i| self.envs.get(i).status == EnvStatus::NotRunnable)
    }
}

// ============================================================================
// Kernel handle
// ============================================================================

pub struct Kernel {
    state: Mutex<KernelState>,
    input: Arc<InputRing>,
}

impl Kernel {
    pub fn boot(config: KernelConfig) -> Result<Self, &'static str> {
        crate::init::boot(config)
    }

    pub(crate) fn from_state(state: KernelState, input: Arc<InputRing>) -> Self {
        Self {
            state: Mutex::new(state),
            input,
        }
    }

    fn lock(&self) -> MutexGuard<'_, KernelState> {
        self.state.lock()
    }

    /// Load `image` into a new environment.  Boot-time only: failure is
    /// fatal.
    pub fn create_env(&self, image: &dyn ExecutableImage, env_type: EnvType) -> EnvId {
        let mut st = self.lock();
        let id = crate::init::processes::env_create(&mut st, image, env_type);
        st.publish_envs();
        id
    }

    /// First dispatch on `cpu`.
    pub fn start(&self, cpu: CpuId) -> Resume {
        info!("cpu{}: starting", cpu);
        let mut st = self.lock();
        let resume = crate::process::scheduler::sched_yield(&mut st, cpu);
        st.publish_envs();
        resume
    }

    /// Trap entry.  `tf` is the frame the hardware and entry stub pushed.
    pub fn trap(&self, cpu: CpuId, tf: &TrapFrame) -> Resume {
        let mut st = self.lock();
        let resume = crate::interrupts::trap::trap(&mut st, cpu, tf);
        st.publish_envs();
        resume
    }

    /// Timer tick on a halted core.
    pub fn idle_tick(&self, cpu: CpuId) -> Resume {
        let mut st = self.lock();
        if !st.cpus[cpu].halted {
            return Resume::Halt;
        }
        let resume = crate::process::scheduler::sched_yield(&mut st, cpu);
        st.publish_envs();
        resume
    }

    // ========================================================================
    // USER MEMORY BUS
    // ========================================================================

    /// User-mode load through `cpu`'s MMU.  On a fault the faulting
    /// address is latched in the core's cr2.
    pub fn user_read(&self, cpu: CpuId, va: u64, buf: &mut [u8]) -> Result<(), FaultCode> {
        let mut st = self.lock();
        let mut done = 0usize;
        while done < buf.len() {
            let cur = va.wrapping_add(done as u64);
            let n = ((PGSIZE - cur % PGSIZE) as usize).min(buf.len() - done);
            match st.vm.translate(cpu, cur, Access::Read) {
                Ok(pa) => st.vm.read_phys(pa, &mut buf[done..done + n]),
                Err(code) => {
                    st.cpus[cpu].cr2 = cur;
                    return Err(code);
                }
            }
            done += n;
        }
        Ok(())
    }

    /// User-mode store through `cpu`'s MMU.  Nothing is written unless
    /// every page of the range is writable.
    pub fn user_write(&self, cpu: CpuId, va: u64, data: &[u8]) -> Result<(), FaultCode> {
        let mut st = self.lock();
        let mut chunks = Vec::new();
        let mut done = 0usize;
        while done < data.len() {
            let cur = va.wrapping_add(done as u64);
            let n = ((PGSIZE - cur % PGSIZE) as usize).min(data.len() - done);
            match st.vm.translate(cpu, cur, Access::Write) {
                Ok(pa) => chunks.push((pa, done, n)),
                Err(code) => {
                    st.cpus[cpu].cr2 = cur;
                    return Err(code);
                }
            }
            done += n;
        }
        for (pa, off, n) in chunks {
            st.vm.write_phys(pa, &data[off..off + n]);
        }
        Ok(())
    }

    // ========================================================================
    // INTROSPECTION
    // ========================================================================

    /// Run `f` under the kernel lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Handles freed since the last call.
    pub fn take_reaped(&self) -> Vec<EnvId> {
        self.lock().take_reaped()
    }

    pub fn is_quiescent(&self) -> bool {
        self.lock().is_quiescent()
    }

    pub fn env_status(&self, id: EnvId) -> Option<EnvStatus> {
        let st = self.lock();
        st.envs.resolve(id, None, false).ok().map(|i| st.envs.get(i).status)
    }

    /// Live environments and their status, by slot.
    pub fn live_envs(&self) -> Vec<(EnvId, EnvStatus)> {
        let st = self.lock();
        st.envs
            .live()
            .map(|i| {
                let env = st.envs.get(i);
                (env.id, env.status)
            })
            .collect()
    }

    pub fn console_output(&self) -> Vec<u8> {
        self.lock().console.output().to_vec()
    }

    /// Keyboard side of the console.  Lock-free.
    pub fn input(&self) -> &Arc<InputRing> {
        &self.input
    }

    pub fn free_frames(&self) -> usize {
        self.lock().vm.pmap().free_count()
    }
}
