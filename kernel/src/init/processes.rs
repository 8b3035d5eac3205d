// kernel/src/init/processes.rs
//
// Environment creation from an executable image at boot.

use log::info;

use crate::{
    kern::KernelState,
    memory::ExecutableImage,
    process::{EnvId, EnvType},
};

/// Allocate an environment, load `image` into it and point it at the
/// entry.  Nothing can recover from a failure here, so it is fatal.
pub fn env_create(st: &mut KernelState, image: &dyn ExecutableImage, env_type: EnvType) -> EnvId {
    let idx = match st.envs.alloc(&mut st.vm, EnvId(0)) {
        Ok(idx) => idx,
        Err(e) => crate::kernel_panic!("env_create: {}", e),
    };

    let space = st.envs.get(idx).space();
    let entry = match st.vm.load_image(space, image) {
        Ok(entry) => entry,
        Err(e) => crate::kernel_panic!("env_create: {}", e),
    };

    let env = st.envs.get_mut(idx);
    env.env_type = env_type;
    env.tf.rip = entry;
    info!("env {} ({:?}) entry {:#x}", env.id, env_type, entry);
    env.id
}
