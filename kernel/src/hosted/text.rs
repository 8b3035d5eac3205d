// kernel/src/hosted/text.rs
//
// Program text for hosted environments.  User routines are host
// functions; each one gets a 16-byte slot in the text page at UTEXT so
// that the kernel sees ordinary user addresses for entry points and
// fault handlers.
//
// Slot 0 is the page-fault upcall trampoline.

use std::vec::Vec;

use spin::Mutex;

use super::cpu::UserCpu;
use crate::memory::layout::{PGSIZE, UTEXT};
use crate::process::UTrapframe;

pub const SLOT_SIZE: u64 = 16;
pub const NSLOTS: usize = (PGSIZE / SLOT_SIZE) as usize;

/// Address of the upcall trampoline.
pub const UPCALL: u64 = UTEXT;

pub type Entry = fn(&mut UserCpu);
pub type Handler = fn(&mut UserCpu, &UTrapframe);

#[derive(Clone, Copy)]
pub enum Routine {
    Upcall,
    Entry(Entry),
    Handler(Handler),
}

impl Routine {
    fn same(&self, other: &Routine) -> bool {
        match (self, other) {
            (Routine::Upcall, Routine::Upcall) => true,
            (Routine::Entry(a), Routine::Entry(b)) => *a as usize == *b as usize,
            (Routine::Handler(a), Routine::Handler(b)) => *a as usize == *b as usize,
            _ => false,
        }
    }
}

pub struct Text {
    slots: Mutex<Vec<Routine>>,
}

impl Text {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(vec![Routine::Upcall]),
        }
    }

    /// Address of `routine`, assigning a slot on first use.  `None` once
    /// the text page is full.
    pub fn link(&self, routine: Routine) -> Option<u64> {
        let mut slots = self.slots.lock();
        let idx = match slots.iter().position(|r| r.same(&routine)) {
            Some(idx) => idx,
            None if slots.len() < NSLOTS => {
                slots.push(routine);
                slots.len() - 1
            }
            None => return None,
        };
        Some(UTEXT + idx as u64 * SLOT_SIZE)
    }

    pub fn resolve(&self, addr: u64) -> Option<Routine> {
        if addr < UTEXT || (addr - UTEXT) % SLOT_SIZE != 0 {
            return None;
        }
        let idx = ((addr - UTEXT) / SLOT_SIZE) as usize;
        self.slots.lock().get(idx).copied()
    }
}

impl Default for Text {
    fn default() -> Self {
        Self::new()
    }
}
