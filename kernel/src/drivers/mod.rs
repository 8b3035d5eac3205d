// kernel/src/drivers/mod.rs

pub mod console;

pub use console::{Console, InputRing};
