// kernel/tests/hosted.rs
//
// Whole programs on the hosted machine: user-space fork, COW, IPC.

#![cfg(feature = "std")]

use kernel::cprintln;
use kernel::hosted::{Machine, MachineError, UserCpu};
use kernel::memory::Perm;
use kernel::memory::layout::USTACKTOP;
use kernel::process::EnvId;
use kernel::ulib::syscall::{sys_cgetc, sys_page_alloc, sys_page_map};
use kernel::ulib::{UserContext, exit, fork, getenvid, ipc_find_env, ipc_recv, ipc_send};
use kernel::{EnvType, KernError, KernelConfig};

const RW: Perm = Perm::PRESENT.union(Perm::USER).union(Perm::WRITABLE);
const RO: Perm = Perm::PRESENT.union(Perm::USER);
const DATA: u64 = 0x80_0000;
const SHARED_RO: u64 = DATA + 0x1000;
const PARENT_SLOT: u64 = DATA + 0x100;

fn machine(ncpu: usize) -> Machine {
    let config = KernelConfig::new_default().with_ncpu(ncpu);
    Machine::new(config).expect("boot")
}

fn count(console: &str, needle: &str) -> usize {
    console.lines().filter(|l| l.contains(needle)).count()
}

// ============================================================================
// hello
// ============================================================================

fn hello(u: &mut UserCpu) {
    let id = getenvid(u);
    cprintln!(u, "hello from {}", id);
}

#[test]
fn hello_prints_and_exits() {
    let m = machine(1);
    let id = m.spawn(hello).unwrap();
    let report = m.run().unwrap();
    assert_eq!(report.console, format!("hello from {}\n", id));
    assert!(report.live.is_empty());
    assert_eq!(m.kernel().env_status(id), None);
}

fn echo(u: &mut UserCpu) {
    let mut got = Vec::new();
    while let Some(c) = sys_cgetc(u) {
        got.push(c);
    }
    cprintln!(u, "read {}", String::from_utf8_lossy(&got));
}

#[test]
fn console_input_reaches_cgetc() {
    let m = machine(1);
    m.push_input(b"abc");
    m.spawn(echo).unwrap();
    assert_eq!(m.run().unwrap().console, "read abc\n");
}

// ============================================================================
// copy-on-write
// ============================================================================

fn cow_parent(u: &mut UserCpu) {
    sys_page_alloc(u, EnvId::SELF, DATA, RW).unwrap();
    sys_page_alloc(u, EnvId::SELF, SHARED_RO, RW).unwrap();
    u.write(DATA, b"parent");
    u.write(SHARED_RO, b"constant");
    sys_page_map(u, EnvId::SELF, SHARED_RO, EnvId::SELF, SHARED_RO, RO).unwrap();
    let me = getenvid(u);
    u.write_u64(PARENT_SLOT, u64::from(me.0));

    fork(u, cow_child).unwrap();
    let (value, _, _) = ipc_recv(u, None).unwrap();

    let mut buf = [0u8; 6];
    u.read(DATA, &mut buf);
    cprintln!(u, "parent {} {}", value, String::from_utf8_lossy(&buf));
}

fn cow_child(u: &mut UserCpu) {
    let mut buf = [0u8; 6];
    u.read(DATA, &mut buf);
    cprintln!(u, "child before {}", String::from_utf8_lossy(&buf));
    u.write(DATA, b"child!");
    u.read(DATA, &mut buf);
    cprintln!(u, "child after {}", String::from_utf8_lossy(&buf));

    let mut ro = [0u8; 8];
    u.read(SHARED_RO, &mut ro);
    cprintln!(u, "child shared {}", String::from_utf8_lossy(&ro));
    let escalate = sys_page_map(u, EnvId::SELF, SHARED_RO, EnvId::SELF, SHARED_RO, RW);
    cprintln!(u, "child escalate {:?}", escalate.err());

    let parent = EnvId(u.read_u64(PARENT_SLOT) as u32);
    ipc_send(u, parent, 7, None);
}

#[test]
fn fork_isolates_writes() {
    let m = machine(1);
    m.spawn(cow_parent).unwrap();
    let report = m.run().unwrap();
    let console = report.console;
    assert_eq!(count(&console, "child before parent"), 1, "{}", console);
    assert_eq!(count(&console, "child after child!"), 1, "{}", console);
    assert_eq!(count(&console, "child shared constant"), 1, "{}", console);
    assert_eq!(
        count(&console, &format!("child escalate {:?}", Some(KernError::Inval))),
        1,
        "{}",
        console
    );
    assert_eq!(count(&console, "parent 7 parent"), 1, "{}", console);
    assert!(report.live.is_empty());
}

#[test]
fn fork_isolates_writes_on_two_cores() {
    let m = machine(2);
    m.spawn(cow_parent).unwrap();
    let console = m.run().unwrap().console;
    assert_eq!(count(&console, "parent 7 parent"), 1, "{}", console);
    assert_eq!(count(&console, "child after child!"), 1, "{}", console);
}

fn write_read_only(u: &mut UserCpu) {
    sys_page_alloc(u, EnvId::SELF, SHARED_RO, RO).unwrap();
    fork(u, |u| {
        u.write(SHARED_RO, b"nope");
    })
    .unwrap();
}

#[test]
fn write_to_shared_read_only_page_is_fatal() {
    let m = machine(1);
    m.spawn(write_read_only).unwrap();
    match m.run() {
        Err(MachineError::UserPanic { message, .. }) => {
            assert!(message.contains("non-COW"), "{}", message)
        }
        other => panic!("expected user panic, got {:?}", other),
    }
}

// ============================================================================
// IPC
// ============================================================================

fn ping(u: &mut UserCpu) {
    let who = fork(u, pong).unwrap();
    ipc_send(u, who, 0, None);
    pong(u);
}

fn pong(u: &mut UserCpu) {
    let me = getenvid(u);
    loop {
        let (i, from, _) = ipc_recv(u, None).unwrap();
        cprintln!(u, "{} got {} from {}", me, i, from);
        if i == 10 {
            return;
        }
        ipc_send(u, from, i + 1, None);
        if i + 1 == 10 {
            return;
        }
    }
}

#[test]
fn pingpong_counts_to_ten() {
    let m = machine(1);
    m.spawn(ping).unwrap();
    let report = m.run().unwrap();
    assert_eq!(count(&report.console, " got "), 11, "{}", report.console);
    assert_eq!(count(&report.console, " got 10 "), 1);
    assert!(report.live.is_empty());
}

fn page_sender(u: &mut UserCpu) {
    let child = fork(u, page_receiver).unwrap();
    sys_page_alloc(u, EnvId::SELF, DATA, RW).unwrap();
    u.write(DATA, b"over ipc");
    ipc_send(u, child, 1, Some((DATA, RW)));
    // Wait until the child has written back through the shared page.
    ipc_recv(u, None).unwrap();
    let mut buf = [0u8; 8];
    u.read(DATA, &mut buf);
    cprintln!(u, "sender sees {}", String::from_utf8_lossy(&buf));
}

fn page_receiver(u: &mut UserCpu) {
    const AT: u64 = 0xA0_0000;
    let (_, from, perm) = ipc_recv(u, Some(AT)).unwrap();
    let mut buf = [0u8; 8];
    u.read(AT, &mut buf);
    cprintln!(u, "receiver got {} perm {:#x}", String::from_utf8_lossy(&buf), perm.bits());
    u.write(AT, b"answered");
    ipc_send(u, from, 2, None);
}

#[test]
fn ipc_page_is_shared_not_copied() {
    let m = machine(1);
    m.spawn(page_sender).unwrap();
    let console = m.run().unwrap().console;
    assert_eq!(count(&console, &format!("receiver got over ipc perm {:#x}", RW.bits())), 1, "{}", console);
    assert_eq!(count(&console, "sender sees answered"), 1, "{}", console);
}

#[test]
fn blocked_receiver_stays_live() {
    let m = machine(1);
    let id = m
        .spawn(|u| {
            let _ = ipc_recv(u, None);
        })
        .unwrap();
    let report = m.run().unwrap();
    assert_eq!(report.live, vec![(id, kernel::EnvStatus::NotRunnable)]);
}

fn echo_service(u: &mut UserCpu) {
    let (value, from, _) = ipc_recv(u, None).unwrap();
    ipc_send(u, from, value + 1, None);
}

fn service_client(u: &mut UserCpu) {
    match ipc_find_env(u, EnvType::Service) {
        Some(svc) => {
            ipc_send(u, svc, 41, None);
            let (value, from, _) = ipc_recv(u, None).unwrap();
            cprintln!(u, "{} answered {}", from, value);
        }
        None => cprintln!(u, "no service"),
    }
}

#[test]
fn client_finds_service_by_type() {
    for ncpu in [1, 2] {
        let m = machine(ncpu);
        m.spawn(service_client).unwrap();
        let svc = m.spawn_as(echo_service, EnvType::Service).unwrap();
        let report = m.run().unwrap();
        assert_eq!(report.console, format!("{} answered 42\n", svc));
        assert!(report.live.is_empty());
    }
}

#[test]
fn find_env_without_service_comes_back_empty() {
    let m = machine(1);
    m.spawn(service_client).unwrap();
    m.spawn(hello).unwrap();
    let console = m.run().unwrap().console;
    assert_eq!(count(&console, "no service"), 1, "{}", console);
}

// ============================================================================
// forktree
// ============================================================================

const DEPTH: usize = 3;

fn name(u: &mut UserCpu) -> Vec<u8> {
    let len = u.read_u64(DATA) as usize;
    let mut name = vec![0u8; len.min(DEPTH)];
    u.read(DATA + 8, &mut name);
    name
}

fn set_name(u: &mut UserCpu, name: &[u8]) {
    u.write_u64(DATA, name.len() as u64);
    u.write(DATA + 8, name);
}

fn node(u: &mut UserCpu) {
    let me = name(u);
    cprintln!(u, "node '{}'", String::from_utf8_lossy(&me));
    for branch in [b'0', b'1'] {
        if me.len() >= DEPTH {
            break;
        }
        let mut next = me.clone();
        next.push(branch);
        set_name(u, &next);
        fork(u, node).unwrap();
        set_name(u, &me);
    }
}

fn forktree(u: &mut UserCpu) {
    sys_page_alloc(u, EnvId::SELF, DATA, RW).unwrap();
    node(u);
}

#[test]
fn forktree_reaches_every_node() {
    for ncpu in [1, 4] {
        let m = machine(ncpu);
        m.spawn(forktree).unwrap();
        let report = m.run().unwrap();
        let console = report.console;
        assert_eq!(count(&console, "node "), 15, "{}", console);
        for leaf in ["000", "011", "101", "111"] {
            assert_eq!(count(&console, &format!("node '{}'", leaf)), 1, "{}", console);
        }
        assert!(report.live.is_empty());
    }
}

// ============================================================================
// scheduling
// ============================================================================

fn spinner(u: &mut UserCpu) {
    for _ in 0..2000 {
        u.read_u64(USTACKTOP - 8);
    }
    cprintln!(u, "spinner done");
}

fn quick(u: &mut UserCpu) {
    cprintln!(u, "quick done");
    exit(u);
}

#[test]
fn timer_preempts_long_running_env() {
    let config = KernelConfig::new_default().with_ncpu(1);
    let m = Machine::with_quantum(config, 16).unwrap();
    m.spawn(spinner).unwrap();
    m.spawn(quick).unwrap();
    assert_eq!(m.run().unwrap().console, "quick done\nspinner done\n");
}
