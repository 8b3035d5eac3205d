// kernel/src/serial.rs
//
// Two writers for the debug serial line:
//
//   1. `Serial` behind a Mutex, used by serial_print!/serial_println!.
//      Safe for general kernel code.  Do NOT use from a path that may
//      already hold the serial lock (fatal paths).
//
//   2. `RawSerialWriter`: no lock, no allocation.  Implements fmt::Write
//      so it supports full formatting via format_args!.
//      Used by serial_print_raw!/serial_println_raw! and kernel_panic!.
//
// On a hosted build the line is the process's stderr.  Without `std` the
// bytes land in a fixed ring that platform glue drains with `drain_into`.

use core::fmt;
use spin::Mutex;

// ============================================================================
// Locked writer (general use)
// ============================================================================

const RING_SIZE: usize = 16 * 1024;

static SERIAL: Mutex<Serial> = Mutex::new(Serial::new());

struct Serial {
    #[cfg_attr(feature = "std", allow(dead_code))]
    ring: [u8; RING_SIZE],
    #[cfg_attr(feature = "std", allow(dead_code))]
    head: usize,
    #[cfg_attr(feature = "std", allow(dead_code))]
    len: usize,
}

impl Serial {
    const fn new() -> Self {
        Self {
            ring: [0; RING_SIZE],
            head: 0,
            len: 0,
        }
    }

    #[cfg(feature = "std")]
    fn write_bytes(&mut self, bytes: &[u8]) {
        use std::io::Write;
        let _ = std::io::stderr().write_all(bytes);
    }

    // Oldest bytes are overwritten once the ring is full.
    #[cfg(not(feature = "std"))]
    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            let tail = (self.head + self.len) % RING_SIZE;
            self.ring[tail] = b;
            if self.len == RING_SIZE {
                self.head = (self.head + 1) % RING_SIZE;
            } else {
                self.len += 1;
            }
        }
    }
}

impl fmt::Write for Serial {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.write_bytes(s.as_bytes());
        Ok(())
    }
}

/// Move everything buffered on the line into `out`.
#[cfg(not(feature = "std"))]
pub fn drain_into(out: &mut alloc::vec::Vec<u8>) {
    let mut serial = SERIAL.lock();
    while serial.len > 0 {
        out.push(serial.ring[serial.head]);
        serial.head = (serial.head + 1) % RING_SIZE;
        serial.len -= 1;
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = SERIAL.lock().write_fmt(args);
}

#[macro_export]
macro_rules! serial_print {
    ($($arg:tt)*) => {
        $crate::serial::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! serial_println {
    () => ($crate::serial_print!("\n"));
    ($($arg:tt)*) => ($crate::serial_print!("{}\n", format_args!($($arg)*)));
}

// ============================================================================
// Lock-free writer (fatal paths)
// ============================================================================

/// Lock-free serial writer.
///
/// ```ignore
/// use core::fmt::Write;
/// let _ = writeln!(RawSerialWriter, "frame {:#x}", pa);
/// ```
///
/// Without `std` it only writes if the ring is not currently locked; a
/// message racing a locked writer is dropped rather than deadlocking.
pub struct RawSerialWriter;

impl fmt::Write for RawSerialWriter {
    #[cfg(feature = "std")]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use std::io::Write;
        let _ = std::io::stderr().write_all(s.as_bytes());
        Ok(())
    }

    #[cfg(not(feature = "std"))]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(mut serial) = SERIAL.try_lock() {
            serial.write_bytes(s.as_bytes());
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! serial_print_raw {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::serial::RawSerialWriter, $($arg)*);
    }};
}

#[macro_export]
macro_rules! serial_println_raw {
    () => ($crate::serial_print_raw!("\n"));
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = writeln!($crate::serial::RawSerialWriter, $($arg)*);
    }};
}
