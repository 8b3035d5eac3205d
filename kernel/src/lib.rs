// kernel/src/lib.rs
//
// Exokernel core: environments (processes), per-environment address
// spaces, trap dispatch, the syscall surface, IPC, and the user-space
// library that builds copy-on-write fork out of those syscalls.
//
// The hardware underneath (physical frames, MMU, TLB, cores) is modelled
// in software so the whole core runs on a host.  With the default `std`
// feature the `hosted` machine executes user programs on host threads.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod serial;
pub mod logger;
pub mod panic;
pub mod config;
pub mod error;
pub mod drivers;
pub mod memory;
pub mod process;
pub mod interrupts;
pub mod init;
pub mod kern;
pub mod ulib;

#[cfg(feature = "std")]
pub mod hosted;

pub use config::KernelConfig;
pub use error::{KResult, KernError};
pub use kern::{CpuId, Kernel, KernelState, Resume};
pub use process::{EnvId, EnvStatus, EnvType};
