// kernel/src/drivers/console.rs
//
// Console device behind sys_cputs / sys_cgetc.
//
// Output is captured in a buffer (and echoed on the serial line).  Input
// is a single-producer/single-consumer ring: the device side pushes bytes
// without taking the kernel lock, the syscall side pops them.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicUsize, Ordering};

const INPUT_SIZE: usize = 128;

pub struct InputRing {
    buffer: UnsafeCell<[u8; INPUT_SIZE]>,
    read_index: AtomicUsize,
    write_index: AtomicUsize,
}

// SAFETY: one producer writes slots it owns (between write and read), one
// consumer reads slots published by the Release store of write_index.
unsafe impl Sync for InputRing {}
unsafe impl Send for InputRing {}

impl InputRing {
    pub const fn new() -> Self {
        Self {
            buffer: UnsafeCell::new([0; INPUT_SIZE]),
            read_index: AtomicUsize::new(0),
            write_index: AtomicUsize::new(0),
        }
    }

    /// Queue a byte.  Dropped when the ring is full.
    pub fn push(&self, byte: u8) -> bool {
        let write = self.write_index.load(Ordering::Acquire);
        let read = self.read_index.load(Ordering::Acquire);
        let next_write = (write + 1) % INPUT_SIZE;

        if next_write == read {
            return false;
        }

        // SAFETY: slot `write` is not visible to the consumer yet
        unsafe {
            (*self.buffer.get())[write] = byte;
        }
        self.write_index.store(next_write, Ordering::Release);
        true
    }

    pub fn pop(&self) -> Option<u8> {
        let read = self.read_index.load(Ordering::Acquire);
        let write = self.write_index.load(Ordering::Acquire);

        if read == write {
            return None;
        }

        // SAFETY: slot `read` was published by the producer
        let byte = unsafe { (*self.buffer.get())[read] };
        self.read_index.store((read + 1) % INPUT_SIZE, Ordering::Release);
        Some(byte)
    }

    pub fn len(&self) -> usize {
        let write = self.write_index.load(Ordering::Relaxed);
        let read = self.read_index.load(Ordering::Relaxed);
        if write >= read {
            write - read
        } else {
            INPUT_SIZE - read + write
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InputRing {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Console {
    output: Vec<u8>,
    input: Arc<InputRing>,
}

impl Console {
    pub fn new(input: Arc<InputRing>) -> Self {
        Self {
            output: Vec::new(),
            input,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
        crate::serial_print!("{}", alloc::string::String::from_utf8_lossy(bytes));
    }

    /// Next input byte, if any.  Never blocks.
    pub fn getc(&self) -> Option<u8> {
        self.input.pop()
    }

    pub fn output(&self) -> &[u8] {
        &self.output
    }

    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}
