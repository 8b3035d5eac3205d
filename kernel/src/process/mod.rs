// kernel/src/process/mod.rs
//
// Environments: the kernel's process abstraction.  An environment is an
// address space, a saved register snapshot, and an identity.

use core::fmt;

pub mod env_table;
pub mod ipc;
pub mod scheduler;
pub mod syscall;
pub mod trapframe;

pub use env_table::EnvTable;
pub use trapframe::{TrapFrame, UTrapframe};

use static_assertions::const_assert_eq;

use crate::memory::AddressSpace;
use crate::memory::layout::UENVS_SIZE;

// ============================================================================
// Identity
// ============================================================================

pub const LOG2NENV: u32 = 10;
/// Hard ceiling on table capacity: the width of the slot-index field.
pub const NENV_MAX: usize = 1 << LOG2NENV;
/// Generation stamps start above the slot-index bits.
pub const ENVGENSHIFT: u32 = 12;

/// Environment handle: generation (high bits) | slot index (low bits).
/// `EnvId(0)` means "the caller" wherever a syscall takes a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EnvId(pub u32);

impl EnvId {
    pub const SELF: EnvId = EnvId(0);

    pub const fn index(self) -> usize {
        (self.0 as usize) & (NENV_MAX - 1)
    }

    pub const fn generation(self) -> u32 {
        self.0 >> ENVGENSHIFT
    }

    pub const fn is_self(self) -> bool {
        self.0 == 0
    }

    /// Handle for the next occupant of `prev`'s slot.  Stays positive as
    /// an i32 and never collides with 0.
    pub const fn next(prev: EnvId, index: usize) -> EnvId {
        let mut generation = prev.0.wrapping_add(1 << ENVGENSHIFT) & !(NENV_MAX as u32 - 1);
        if generation == 0 || generation > i32::MAX as u32 {
            generation = 1 << ENVGENSHIFT;
        }
        EnvId(generation | index as u32)
    }

    /// Handle carried in a syscall argument register.
    pub const fn from_arg(arg: u64) -> EnvId {
        EnvId(arg as u32)
    }
}

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvStatus {
    Free = 0,
    Dying = 1,
    Runnable = 2,
    Running = 3,
    NotRunnable = 4,
}

impl EnvStatus {
    pub fn from_u64(n: u64) -> Option<Self> {
        match n {
            0 => Some(Self::Free),
            1 => Some(Self::Dying),
            2 => Some(Self::Runnable),
            3 => Some(Self::Running),
            4 => Some(Self::NotRunnable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvType {
    User = 0,
    /// Long-running server environments (same privileges as User).
    Service = 1,
}

impl EnvType {
    pub fn from_u32(n: u32) -> Option<Self> {
        match n {
            0 => Some(Self::User),
            1 => Some(Self::Service),
            _ => None,
        }
    }
}

// ============================================================================
// Environment record
// ============================================================================

/// Receive-side rendezvous state.  Only meaningful while `recving`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpcState {
    pub recving: bool,
    /// Where the receiver wants a page mapped; `None` = no page.
    pub dstva: Option<u64>,
    pub from: EnvId,
    pub value: u32,
    pub perm: u64,
}

pub struct Env {
    pub tf: TrapFrame,
    pub id: EnvId,
    pub parent_id: EnvId,
    pub env_type: EnvType,
    pub status: EnvStatus,
    pub runs: u32,
    /// Core this environment last ran on.
    pub cpunum: Option<usize>,
    pub space: Option<AddressSpace>,
    pub pgfault_upcall: Option<u64>,
    pub ipc: IpcState,
}

impl Env {
    pub(crate) fn empty() -> Self {
        Self {
            tf: TrapFrame::default(),
            id: EnvId(0),
            parent_id: EnvId(0),
            env_type: EnvType::User,
            status: EnvStatus::Free,
            runs: 0,
            cpunum: None,
            space: None,
            pgfault_upcall: None,
            ipc: IpcState::default(),
        }
    }

    /// Address space of a live environment.
    pub fn space(&self) -> AddressSpace {
        match self.space {
            Some(space) => space,
            None => crate::kernel_panic!("env {} has no address space", self.id),
        }
    }

    pub fn is_live(&self) -> bool {
        self.status != EnvStatus::Free
    }
}

// ============================================================================
// Published view
// ============================================================================

/// One slot as user code sees it through the read-only UENVS window.
///
/// Little-endian words: id, parent, type, status, runs, then padding.
/// An all-zero record reads as a free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvRecord {
    pub id: EnvId,
    pub parent_id: EnvId,
    pub env_type: EnvType,
    pub status: EnvStatus,
    pub runs: u32,
}

const_assert_eq!(NENV_MAX * EnvRecord::SIZE, UENVS_SIZE as usize);

impl EnvRecord {
    pub const SIZE: usize = 32;

    pub fn of(env: &Env) -> Self {
        Self {
            id: env.id,
            parent_id: env.parent_id,
            env_type: env.env_type,
            status: env.status,
            runs: env.runs,
        }
    }

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let words = [
            self.id.0,
            self.parent_id.0,
            self.env_type as u32,
            self.status as u32,
            self.runs,
        ];
        let mut out = [0u8; Self::SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    /// `None` if `bytes` is short or holds an unknown type or status.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Some(Self {
            id: EnvId(word(0)),
            parent_id: EnvId(word(4)),
            env_type: EnvType::from_u32(word(8))?,
            status: EnvStatus::from_u64(u64::from(word(12)))?,
            runs: word(16),
        })
    }
}
