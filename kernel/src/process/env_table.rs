// kernel/src/process/env_table.rs
//
// Fixed-capacity registry of environment records.  Slots are reused
// through a LIFO free list; every reuse stamps a new generation into the
// handle so stale handles stop resolving.

use alloc::vec::Vec;
use log::info;

use super::{Env, EnvId, EnvStatus, EnvType, IpcState, TrapFrame};
use crate::error::{KResult, KernError};
use crate::memory::AddressSpaceManager;
use crate::memory::layout::USTACKTOP;

pub struct EnvTable {
    envs: Vec<Env>,
    /// Free slot indices; the top of the stack is handed out next.
    free: Vec<usize>,
}

impl EnvTable {
    /// All slots FREE.  Slot 0 is allocated first.
    pub fn new(nenv: usize) -> Self {
        Self {
            envs: (0..nenv).map(|_| Env::empty()).collect(),
            free: (0..nenv).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.envs.len()
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn get(&self, idx: usize) -> &Env {
        &self.envs[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Env {
        &mut self.envs[idx]
    }

    /// Slot indices of every non-free environment.
    pub fn live(&self) -> impl Iterator<Item = usize> + '_ {
        self.envs
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_live())
            .map(|(i, _)| i)
    }

    // ========================================================================
    // ALLOCATION
    // ========================================================================

    /// Take a free slot, give it a fresh address space and handle, and
    /// leave it RUNNABLE with a blank user-mode frame.
    pub fn alloc(&mut self, vm: &mut AddressSpaceManager, parent: EnvId) -> KResult<usize> {
        let idx = self.free.pop().ok_or(KernError::NoFreeEnv)?;
        let space = match vm.new_space() {
            Ok(space) => space,
            Err(e) => {
                self.free.push(idx);
                return Err(e);
            }
        };

        let env = &mut self.envs[idx];
        env.id = EnvId::next(env.id, idx);
        env.parent_id = parent;
        env.env_type = EnvType::User;
        env.status = EnvStatus::Runnable;
        env.runs = 0;
        env.cpunum = None;
        env.space = Some(space);
        env.pgfault_upcall = None;
        env.ipc = IpcState::default();
        env.tf = TrapFrame::new_user(0, USTACKTOP);

        info!("[{}] new env {}", parent, env.id);
        Ok(idx)
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// Resolve `id` to a slot.  `EnvId::SELF` names the requester.  With
    /// `checkperm`, the target must be the requester or its immediate child.
    pub fn resolve(&self, id: EnvId, requester: Option<usize>, checkperm: bool) -> KResult<usize> {
        if id.is_self() {
            return requester.ok_or(KernError::BadEnv);
        }

        let idx = id.index();
        let env = self.envs.get(idx).ok_or(KernError::BadEnv)?;
        if env.status == EnvStatus::Free || env.id != id {
            return Err(KernError::BadEnv);
        }

        if checkperm {
            let Some(req) = requester else {
                return Err(KernError::BadEnv);
            };
            if idx != req && env.parent_id != self.envs[req].id {
                return Err(KernError::BadEnv);
            }
        }
        Ok(idx)
    }

    // ========================================================================
    // TEARDOWN
    // ========================================================================

    /// Release the slot's address space and put it back on the free list.
    /// Any core still running the space is switched to the kernel space
    /// before its tables are released.
    pub fn free(&mut self, vm: &mut AddressSpaceManager, idx: usize, actor: EnvId) {
        let env = &mut self.envs[idx];
        info!("[{}] free env {}", actor, env.id);

        if let Some(space) = env.space.take() {
            vm.teardown(space);
        }
        env.status = EnvStatus::Free;
        env.pgfault_upcall = None;
        env.ipc = IpcState::default();
        env.cpunum = None;
        self.free.push(idx);
    }
}
