// kernel/src/panic.rs
//
// Fatal kernel errors.  These halt the whole system: nothing is returned
// to any environment.  On a hosted build the panic unwinds out of the
// kernel call so the machine can report it; the big kernel lock guard is
// released on the way out.

use core::fmt;

/// Report a fatal kernel error and stop.
///
/// ```ignore
/// kernel_panic!("page_free: frame {:#x} still referenced", pa);
/// ```
#[macro_export]
macro_rules! kernel_panic {
    ($($arg:tt)*) => {
        $crate::panic::fatal(file!(), line!(), format_args!($($arg)*))
    };
}

#[cold]
#[inline(never)]
pub fn fatal(file: &'static str, line: u32, args: fmt::Arguments) -> ! {
    // Lock-free: the serial lock may be held by whoever tripped the error.
    crate::serial_println_raw!("KERNEL PANIC!");
    crate::serial_println_raw!("========================================");
    crate::serial_println_raw!("  at {}:{}", file, line);
    crate::serial_println_raw!("  {}", args);
    panic!("kernel panic at {}:{}: {}", file, line, args);
}
