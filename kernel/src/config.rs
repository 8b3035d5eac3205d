// kernel/src/config.rs
//
// Boot-time parameters for the simulated machine and the kernel tables.

use log::LevelFilter;

use crate::memory::layout::{ADDRESS_SPACE_TOP, KERNBASE, PGSIZE};
use crate::process::NENV_MAX;

/// Upper bound on simulated cores.
pub const MAX_NCPU: usize = 8;

/// Frames that fit in the privileged window above KERNBASE.
pub const MAX_NFRAMES: usize = ((ADDRESS_SPACE_TOP - KERNBASE) / PGSIZE) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of cores that can run environments.
    pub ncpu: usize,
    /// Capacity of the environment table.
    pub nenv: usize,
    /// Physical memory size in 4 KiB frames.
    pub nframes: usize,
    /// Ceiling handed to the `log` facade at boot.
    pub log_level: LevelFilter,
    /// Log every syscall at `trace` level.
    pub trace_syscalls: bool,
}

impl KernelConfig {
    pub const fn new_default() -> Self {
        Self {
            ncpu: 1,
            nenv: 64,
            nframes: 1024,
            log_level: LevelFilter::Warn,
            trace_syscalls: false,
        }
    }

    pub const fn with_ncpu(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu;
        self
    }

    pub const fn with_nenv(mut self, nenv: usize) -> Self {
        self.nenv = nenv;
        self
    }

    pub const fn with_nframes(mut self, nframes: usize) -> Self {
        self.nframes = nframes;
        self
    }

    pub const fn with_log_level(mut self, level: LevelFilter) -> Self {
        self.log_level = level;
        self
    }

    pub const fn with_syscall_trace(mut self, on: bool) -> Self {
        self.trace_syscalls = on;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ncpu == 0 || self.ncpu > MAX_NCPU {
            return Err("ncpu out of range");
        }
        if self.nenv == 0 || self.nenv > NENV_MAX {
            return Err("nenv out of range");
        }
        // root, kernel tables, the UENVS pages and a few user pages
        if self.nframes < 32 || self.nframes > MAX_NFRAMES {
            return Err("nframes out of range");
        }
        Ok(())
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new_default()
    }
}
