// src/demos.rs
//
// Bundled user programs.  Each is an environment entry point written
// against the user library.

use clap::ValueEnum;
use kernel::cprintln;
use kernel::hosted::{Entry, UserCpu};
use kernel::memory::Perm;
use kernel::process::EnvId;
use kernel::ulib::syscall::{sys_page_alloc, sys_page_map};
use kernel::ulib::{UserContext, exit, fork, getenvid, ipc_recv, ipc_send};
use kernel::KernError;

/// Programs selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Program {
    Hello,
    Forktree,
    Pingpong,
    Cowcheck,
}

impl Program {
    pub fn entry(self) -> Entry {
        match self {
            Program::Hello => hello,
            Program::Forktree => forktree,
            Program::Pingpong => pingpong,
            Program::Cowcheck => cowcheck,
        }
    }
}

const RW: Perm = Perm::PRESENT.union(Perm::USER).union(Perm::WRITABLE);

/// Scratch data page used by the demos.
const DATA_VA: u64 = 0x80_0000;

fn hello(u: &mut UserCpu) {
    cprintln!(u, "hello, world");
    let id = getenvid(u);
    cprintln!(u, "i am environment {}", id);
}

// ============================================================================
// forktree
// ============================================================================

const DEPTH: usize = 3;

fn read_name(u: &mut UserCpu) -> Vec<u8> {
    let len = (u.read_u64(DATA_VA) as usize).min(DEPTH);
    let mut name = vec![0u8; len];
    u.read(DATA_VA + 8, &mut name);
    name
}

fn write_name(u: &mut UserCpu, name: &[u8]) {
    u.write_u64(DATA_VA, name.len() as u64);
    u.write(DATA_VA + 8, name);
}

fn forkchild(u: &mut UserCpu, branch: u8) {
    let cur = read_name(u);
    if cur.len() >= DEPTH {
        return;
    }
    let mut next = cur.clone();
    next.push(branch);
    write_name(u, &next);
    if let Err(e) = fork(u, forktree_node) {
        cprintln!(u, "fork: {}", e);
        exit(u);
    }
    write_name(u, &cur);
}

fn forktree_node(u: &mut UserCpu) {
    let name = read_name(u);
    let id = getenvid(u);
    cprintln!(u, "{}: I am '{}'", id, String::from_utf8_lossy(&name));
    forkchild(u, b'0');
    forkchild(u, b'1');
}

fn forktree(u: &mut UserCpu) {
    if let Err(e) = sys_page_alloc(u, EnvId::SELF, DATA_VA, RW) {
        cprintln!(u, "forktree: {}", e);
        return;
    }
    forktree_node(u);
}

// ============================================================================
// pingpong
// ============================================================================

fn pingpong(u: &mut UserCpu) {
    let who = match fork(u, pong) {
        Ok(who) => who,
        Err(e) => {
            cprintln!(u, "fork: {}", e);
            return;
        }
    };
    let me = getenvid(u);
    cprintln!(u, "send 0 from {} to {}", me, who);
    ipc_send(u, who, 0, None);
    pong(u);
}

fn pong(u: &mut UserCpu) {
    let me = getenvid(u);
    loop {
        let (i, from, _) = match ipc_recv(u, None) {
            Ok(msg) => msg,
            Err(e) => {
                cprintln!(u, "ipc_recv: {}", e);
                return;
            }
        };
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

// ============================================================================
// cowcheck
// ============================================================================

const RO_VA: u64 = DATA_VA + 0x1000;
const PARENT_SLOT: u64 = DATA_VA + 0x100;

fn cowcheck(u: &mut UserCpu) {
    let ro = Perm::PRESENT | Perm::USER;
    let setup = sys_page_alloc(u, EnvId::SELF, DATA_VA, RW)
        .and_then(|()| sys_page_alloc(u, EnvId::SELF, RO_VA, RW));
    if let Err(e) = setup {
        cprintln!(u, "cowcheck: {}", e);
        return;
    }
    u.write(DATA_VA, b"parent");
    u.write(RO_VA, b"read-only");
    let me = getenvid(u);
    u.write_u64(PARENT_SLOT, u64::from(me.0));
    if let Err(e) = sys_page_map(u, EnvId::SELF, RO_VA, EnvId::SELF, RO_VA, ro) {
        cprintln!(u, "cowcheck: {}", e);
        return;
    }

    if let Err(e) = fork(u, cow_child) {
        cprintln!(u, "fork: {}", e);
        return;
    }
    if let Err(e) = ipc_recv(u, None) {
        cprintln!(u, "ipc_recv: {}", e);
        return;
    }

    let mut buf = [0u8; 6];
    u.read(DATA_VA, &mut buf);
    cprintln!(u, "parent sees '{}'", String::from_utf8_lossy(&buf));
}

fn cow_child(u: &mut UserCpu) {
    let mut buf = [0u8; 6];
    u.read(DATA_VA, &mut buf);
    cprintln!(u, "child sees '{}'", String::from_utf8_lossy(&buf));
    u.write(DATA_VA, b"child!");
    u.read(DATA_VA, &mut buf);
    cprintln!(u, "child wrote '{}'", String::from_utf8_lossy(&buf));

    let mut ro = [0u8; 9];
    u.read(RO_VA, &mut ro);
    cprintln!(u, "child shares '{}'", String::from_utf8_lossy(&ro));
    let escalate = sys_page_map(u, EnvId::SELF, RO_VA, EnvId::SELF, RO_VA, RW);
    cprintln!(u, "remap read-only page writable: {:?}", escalate.err().map(KernError::errno));

    let parent = EnvId(u.read_u64(PARENT_SLOT) as u32);
    ipc_send(u, parent, 1, None);
}
