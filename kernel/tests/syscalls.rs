// kernel/tests/syscalls.rs
//
// Syscall surface, driven with hand-built trap frames on one core.

mod common;

use common::*;
use kernel::memory::layout::{KERNBASE, PGSIZE, UENVS, USTACKTOP, UTOP};
use kernel::memory::{FaultCode, Perm};
use kernel::process::EnvRecord;
use kernel::process::syscall::*;
use kernel::{EnvId, EnvStatus, EnvType, Kernel, KernError, Resume};
use x86_64::VirtAddr;

const DATA: u64 = 0x80_0000;

#[test]
fn cputs_writes_console_and_returns_zero() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (env, mut tf) = expect_run(k.start(0));
    assert_eq!(env, a);

    let va = USTACKTOP - 64;
    k.user_write(0, va, b"hi there").unwrap();
    assert_eq!(call(&k, 0, a, &mut tf, SYS_CPUTS, [va, 8, 0, 0, 0]), 0);
    assert_eq!(k.console_output(), b"hi there");

    assert_eq!(call(&k, 0, a, &mut tf, SYS_GETENVID, [0; 5]), i64::from(a.0));
    assert_eq!(call(&k, 0, a, &mut tf, 99, [0; 5]), KernError::NoSys.errno());
}

#[test]
fn cgetc_reads_input_without_blocking() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));

    assert_eq!(call(&k, 0, a, &mut tf, SYS_CGETC, [0; 5]), 0);
    assert!(k.input().push(b'x'));
    assert_eq!(call(&k, 0, a, &mut tf, SYS_CGETC, [0; 5]), i64::from(b'x'));
}

#[test]
fn bad_pointer_terminates_caller() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let b = spawn(&k);
    let (_, tf) = expect_run(k.start(0));

    // Unmapped user address.
    let (next, tfb) = expect_run(syscall(&k, 0, &tf, SYS_CPUTS, [0x1000_0000, 4, 0, 0, 0]));
    assert_eq!(next, b);
    assert_eq!(k.env_status(a), None);
    assert!(k.take_reaped().contains(&a));

    // Kernel address: mapped, but not for user.
    assert_eq!(syscall(&k, 0, &tfb, SYS_CPUTS, [KERNBASE, 8, 0, 0, 0]), Resume::Halt);
    assert_eq!(k.env_status(b), None);
    assert!(k.console_output().is_empty());
}

#[test]
fn page_alloc_validates_arguments() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));
    let inval = KernError::Inval.errno();

    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, UTOP, RW.bits(), 0, 0]), inval);
    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA + 8, RW.bits(), 0, 0]), inval);
    let no_user = (Perm::PRESENT | Perm::WRITABLE).bits();
    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA, no_user, 0, 0]), inval);
    let extra = RW.bits() | (1 << 3);
    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA, extra, 0, 0]), inval);
    let cow = (RW | Perm::COW).bits();
    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA, cow, 0, 0]), 0);
}

#[test]
fn page_alloc_is_zeroed_and_user_visible() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));

    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA, RW.bits(), 0, 0]), 0);
    let mut buf = vec![0xffu8; PGSIZE as usize];
    k.user_read(0, DATA, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0));
    k.user_write(0, DATA + 100, b"abc").unwrap();

    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_UNMAP, [0, DATA, 0, 0, 0]), 0);
    let code = k.user_read(0, DATA, &mut buf[..1]).unwrap_err();
    assert!(!code.contains(FaultCode::PROTECTION));
}

#[test]
fn remap_cannot_add_write_access() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));

    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA, RO.bits(), 0, 0]), 0);
    let dst = DATA + PGSIZE;
    assert_eq!(
        call(&k, 0, a, &mut tf, SYS_PAGE_MAP, [0, DATA, 0, dst, RW.bits()]),
        KernError::Inval.errno()
    );
    k.with_state(|st| {
        let space = st.envs.get(st.curenv(0).unwrap()).space();
        assert!(st.vm.lookup(space, VirtAddr::new(dst)).is_none());
    });

    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_MAP, [0, DATA, 0, dst, RO.bits()]), 0);
    let code = k.user_write(0, dst, b"x").unwrap_err();
    assert_eq!(code, FaultCode::PROTECTION | FaultCode::WRITE | FaultCode::USER);

    // Unmapped source.
    assert_eq!(
        call(&k, 0, a, &mut tf, SYS_PAGE_MAP, [0, DATA + 8 * PGSIZE, 0, dst, RO.bits()]),
        KernError::Inval.errno()
    );
}

#[test]
fn page_map_shares_frame_with_child() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));

    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [0, DATA, RW.bits(), 0, 0]), 0);
    k.user_write(0, DATA, b"payload").unwrap();
    let child = EnvId(call(&k, 0, a, &mut tf, SYS_EXOFORK, [0; 5]) as u32);
    assert_eq!(k.env_status(child), Some(EnvStatus::NotRunnable));

    let dst = 0x90_0000;
    assert_eq!(
        call(&k, 0, a, &mut tf, SYS_PAGE_MAP, [0, DATA, arg(child), dst, RO.bits()]),
        0
    );

    k.with_state(|st| {
        let pa = st.envs.get(st.curenv(0).unwrap()).space();
        let ci = st.envs.resolve(child, None, false).unwrap();
        let ca = st.envs.get(ci).space();
        let (frame, _) = st.vm.lookup(pa, VirtAddr::new(DATA)).unwrap();
        let (cframe, cperm) = st.vm.lookup(ca, VirtAddr::new(dst)).unwrap();
        assert_eq!(frame, cframe);
        assert_eq!(cperm, RO);
        assert_eq!(st.vm.pmap().refcount(frame), 2);

        let mut buf = [0u8; 7];
        st.vm.copy_from_user(ca, dst, &mut buf).unwrap();
        assert_eq!(&buf, b"payload");
    });
}

#[test]
fn exofork_child_sees_zero_and_waits_for_status() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));
    tf.regs.rbx = 0xfeed;

    let child = EnvId(call(&k, 0, a, &mut tf, SYS_EXOFORK, [0; 5]) as u32);
    assert_ne!(child, a);

    // Not runnable yet: yielding comes straight back to the parent.
    assert_eq!(call(&k, 0, a, &mut tf, SYS_YIELD, [0; 5]), 0);

    assert_eq!(
        call(&k, 0, a, &mut tf, SYS_ENV_SET_STATUS, [arg(child), 7, 0, 0, 0]),
        KernError::Inval.errno()
    );
    assert_eq!(
        call(&k, 0, a, &mut tf, SYS_ENV_SET_STATUS, [arg(child), EnvStatus::Running as u64, 0, 0, 0]),
        KernError::Inval.errno()
    );
    let runnable = EnvStatus::Runnable as u64;
    assert_eq!(call(&k, 0, a, &mut tf, SYS_ENV_SET_STATUS, [arg(child), runnable, 0, 0, 0]), 0);

    let (env, ctf) = expect_run(syscall(&k, 0, &tf, SYS_YIELD, [0; 5]));
    assert_eq!(env, child);
    assert_eq!(ctf.regs.rax, 0);
    assert_eq!(ctf.regs.rbx, 0xfeed);
    assert_eq!(ctf.rip, tf.rip);
}

#[test]
fn handles_need_parent_or_self() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let b = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));
    let bad_env = KernError::BadEnv.errno();

    // b is a sibling, not a child.
    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [arg(b), DATA, RW.bits(), 0, 0]), bad_env);
    assert_eq!(call(&k, 0, a, &mut tf, SYS_ENV_DESTROY, [arg(b), 0, 0, 0, 0]), bad_env);

    let child = EnvId(call(&k, 0, a, &mut tf, SYS_EXOFORK, [0; 5]) as u32);
    assert_eq!(call(&k, 0, a, &mut tf, SYS_PAGE_ALLOC, [arg(child), DATA, RW.bits(), 0, 0]), 0);

    // Destroying a non-running child frees it at once; its handle goes stale.
    assert_eq!(call(&k, 0, a, &mut tf, SYS_ENV_DESTROY, [arg(child), 0, 0, 0, 0]), 0);
    assert_eq!(k.env_status(child), None);
    assert!(k.take_reaped().contains(&child));
    assert_eq!(
        call(&k, 0, a, &mut tf, SYS_ENV_SET_STATUS, [arg(child), 2, 0, 0, 0]),
        bad_env
    );

    // The slot comes back under a new generation.
    let again = EnvId(call(&k, 0, a, &mut tf, SYS_EXOFORK, [0; 5]) as u32);
    assert_eq!(again.index(), child.index());
    assert!(again.generation() > child.generation());
}

fn record(k: &Kernel, id: EnvId) -> EnvRecord {
    let mut bytes = [0u8; EnvRecord::SIZE];
    let va = UENVS + (id.index() * EnvRecord::SIZE) as u64;
    k.user_read(0, va, &mut bytes).unwrap();
    EnvRecord::decode(&bytes).unwrap()
}

#[test]
fn env_records_follow_the_table() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));

    let me = record(&k, a);
    assert_eq!((me.id, me.env_type, me.status), (a, EnvType::User, EnvStatus::Running));
    assert_eq!(me.runs, 1);

    let child = EnvId(call(&k, 0, a, &mut tf, SYS_EXOFORK, [0; 5]) as u32);
    let rec = record(&k, child);
    assert_eq!((rec.id, rec.parent_id, rec.status), (child, a, EnvStatus::NotRunnable));

    let runnable = EnvStatus::Runnable as u64;
    assert_eq!(call(&k, 0, a, &mut tf, SYS_ENV_SET_STATUS, [arg(child), runnable, 0, 0, 0]), 0);
    assert_eq!(record(&k, child).status, EnvStatus::Runnable);

    // the window is read-only to user code
    let code = k.user_write(0, UENVS, &[0]).unwrap_err();
    assert!(code.contains(FaultCode::PROTECTION | FaultCode::WRITE | FaultCode::USER));

    assert_eq!(call(&k, 0, a, &mut tf, SYS_ENV_DESTROY, [arg(child), 0, 0, 0, 0]), 0);
    assert_eq!(record(&k, child).status, EnvStatus::Free);
}

#[test]
fn table_capacity_is_enforced() {
    let k = boot(1, 2);
    let a = spawn(&k);
    let _b = spawn(&k);
    let (_, mut tf) = expect_run(k.start(0));
    assert_eq!(call(&k, 0, a, &mut tf, SYS_EXOFORK, [0; 5]), KernError::NoFreeEnv.errno());
}

#[test]
fn timer_interrupt_round_robins() {
    let k = boot(1, 8);
    let a = spawn(&k);
    let b = spawn(&k);
    let (_, tfa) = expect_run(k.start(0));
    let (env, tfb) = expect_run(timer(&k, 0, &tfa));
    assert_eq!(env, b);
    let (env, _) = expect_run(timer(&k, 0, &tfb));
    assert_eq!(env, a);
    k.with_state(|st| {
        assert_eq!(st.envs.get(a.index()).runs, 2);
        assert_eq!(st.envs.get(b.index()).status, EnvStatus::Runnable);
    });
}
