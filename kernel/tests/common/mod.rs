// kernel/tests/common/mod.rs
//
// Drives the kernel directly: boot, load blank programs, and trap in
// with hand-built frames.

#![allow(dead_code)]

use kernel::interrupts::{IRQ_OFFSET, IRQ_TIMER, T_PGFLT, T_SYSCALL};
use kernel::memory::elf::{ElfBuilder, SegmentFlags};
use kernel::memory::layout::{PGSIZE, UTEXT};
use kernel::memory::{FaultCode, Perm};
use kernel::process::TrapFrame;
use kernel::ulib::pgfault::LIBDATA;
use kernel::{EnvId, EnvType, Kernel, KernelConfig, Resume};

pub const RW: Perm = Perm::PRESENT.union(Perm::USER).union(Perm::WRITABLE);
pub const RO: Perm = Perm::PRESENT.union(Perm::USER);

pub fn boot(ncpu: usize, nenv: usize) -> Kernel {
    let config = KernelConfig::new_default()
        .with_ncpu(ncpu)
        .with_nenv(nenv)
        .with_nframes(512);
    Kernel::boot(config).expect("boot")
}

/// Text page + library data page, entry at the start of text.
pub fn spawn(kernel: &Kernel) -> EnvId {
    let bytes = ElfBuilder::new(UTEXT)
        .segment(
            UTEXT,
            &[0xCC; PGSIZE as usize],
            PGSIZE,
            SegmentFlags::READ | SegmentFlags::EXECUTE,
        )
        .segment(LIBDATA, &[], PGSIZE, SegmentFlags::READ | SegmentFlags::WRITE)
        .build();
    let image = bytes.parse().expect("image");
    kernel.create_env(&image, EnvType::User)
}

#[track_caller]
pub fn expect_run(resume: Resume) -> (EnvId, TrapFrame) {
    match resume {
        Resume::Run { env, tf } => (env, tf),
        other => panic!("expected Run, got {:?}", other),
    }
}

/// Trap into the kernel from `tf` with a syscall.
pub fn syscall(kernel: &Kernel, cpu: usize, tf: &TrapFrame, num: u64, args: [u64; 5]) -> Resume {
    let mut tf = *tf;
    tf.set_syscall(num, args);
    tf.trapno = T_SYSCALL;
    kernel.trap(cpu, &tf)
}

/// Syscall that must resume the same environment; returns rax.
#[track_caller]
pub fn call(kernel: &Kernel, cpu: usize, who: EnvId, tf: &mut TrapFrame, num: u64, args: [u64; 5]) -> i64 {
    let (env, next) = expect_run(syscall(kernel, cpu, tf, num, args));
    assert_eq!(env, who, "syscall {} did not resume the caller", num);
    *tf = next;
    next.regs.rax as i64
}

pub fn timer(kernel: &Kernel, cpu: usize, tf: &TrapFrame) -> Resume {
    let mut tf = *tf;
    tf.trapno = IRQ_OFFSET + IRQ_TIMER;
    kernel.trap(cpu, &tf)
}

/// User-mode store that faults; returns the resulting `Resume`.
pub fn fault_on_write(kernel: &Kernel, cpu: usize, tf: &TrapFrame, va: u64) -> Resume {
    let code = kernel
        .user_write(cpu, va, &[1])
        .expect_err("store should fault");
    assert!(code.contains(FaultCode::USER | FaultCode::WRITE));
    let mut tf = *tf;
    tf.trapno = T_PGFLT;
    tf.err = code.bits();
    kernel.trap(cpu, &tf)
}

pub fn arg(id: EnvId) -> u64 {
    u64::from(id.0)
}
