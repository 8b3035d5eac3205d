// kernel/src/init/memory.rs
//
// Physical memory, the kernel's root table, and the privileged mapping
// every address space inherits.

use log::debug;

use crate::{
    config::KernelConfig,
    memory::{
        AddressSpaceManager, AllocFlags, Perm, Pmap,
        layout::{KERNBASE, PGSIZE, UENVS, UENVS_SIZE},
    },
};
use x86_64::VirtAddr;

/// Frame table + kernel root with all of physical memory mapped at
/// KERNBASE, kernel-only, and zeroed environment records at UENVS,
/// user read-only.  Every core starts on this space.
pub fn init_core(config: &KernelConfig) -> AddressSpaceManager {
    let mut pmap = Pmap::new(config.nframes);
    let Some(root) = pmap.page_alloc(AllocFlags::ZERO) else {
        crate::kernel_panic!("init_core: no frame for the kernel root");
    };
    pmap.incref(root);

    let mut vm = AddressSpaceManager::new(pmap, root, config.ncpu);
    let size = config.nframes as u64 * PGSIZE;
    let kern = vm.kernel_space();
    vm.boot_map_region(kern, KERNBASE, size, 0, Perm::WRITABLE);

    for va in (UENVS..UENVS + UENVS_SIZE).step_by(PGSIZE as usize) {
        let Some(frame) = vm.pmap_mut().page_alloc(AllocFlags::ZERO) else {
            crate::kernel_panic!("init_core: no frame for UENVS");
        };
        if let Err(e) = vm.insert(kern, frame, VirtAddr::new(va), Perm::USER) {
            crate::kernel_panic!("init_core: mapping UENVS: {}", e);
        }
    }

    debug!(
        "kernel mapping: [{:#x}, {:#x}) -> pa 0, root {:#x}",
        KERNBASE,
        KERNBASE + size,
        root.start_address().as_u64()
    );
    vm
}
