// kernel/src/hosted/mod.rs
//
// Runs the kernel on a host: cores are executor threads, environments
// are host threads whose user code is ordinary Rust written against
// `ulib::UserContext`.

pub mod cpu;
pub mod machine;
pub mod text;

pub use cpu::UserCpu;
pub use machine::{DEFAULT_QUANTUM, Machine, MachineError, RunReport};
pub use text::{Entry, Handler};
