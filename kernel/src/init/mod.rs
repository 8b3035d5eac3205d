// kernel/src/init/mod.rs
//
// Boot orchestration: logging, physical memory and the kernel mapping,
// then the kernel tables.  Environments are created afterwards through
// `Kernel::create_env`.

pub mod memory;
pub mod processes;

use alloc::sync::Arc;
use log::info;

use crate::{
    config::KernelConfig,
    drivers::{Console, InputRing},
    kern::{Kernel, KernelState},
    logger, serial_println,
};

pub fn boot(config: KernelConfig) -> Result<Kernel, &'static str> {
    config.validate()?;
    logger::init(config.log_level);

    // ── Physical memory + kernel mapping ──────────────────────────
    let vm = memory::init_core(&config);

    // ── Console ────────────────────────────────────────────────────
    let input = Arc::new(InputRing::new());
    let console = Console::new(Arc::clone(&input));

    // ── Kernel tables ──────────────────────────────────────────────
    let state = KernelState::new(vm, config, console);
    info!(
        "boot: {} cpu(s), {} env slots, {} free frames",
        config.ncpu,
        config.nenv,
        state.vm.pmap().free_count()
    );
    if config.log_level >= log::LevelFilter::Debug {
        serial_println!("✅ kernel ready");
    }

    Ok(Kernel::from_state(state, input))
}
