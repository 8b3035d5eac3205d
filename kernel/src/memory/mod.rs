// kernel/src/memory/mod.rs

pub mod address_space;
pub mod elf;
pub mod layout;
pub mod paging;
pub mod pmap;

pub use address_space::{Access, AddressSpace, AddressSpaceManager};
pub use elf::{ElfBuilder, ElfImage, ExecutableImage, ImageError};
pub use paging::{FaultCode, Perm};
pub use pmap::{AllocFlags, PhysMemory, Pmap};
