// kernel/src/error.rs
//
// Error codes visible to user space.  Syscalls return them negated in rax.

use core::fmt;

/// Raw error numbers (positive).  A syscall result of `-n` means error `n`.
pub mod errno {
    pub const E_BAD_ENV: i64 = 2;
    pub const E_INVAL: i64 = 3;
    pub const E_NO_MEM: i64 = 4;
    pub const E_NO_FREE_ENV: i64 = 5;
    pub const E_IPC_NOT_RECV: i64 = 7;
    pub const E_NO_SYS: i64 = 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernError {
    /// Stale handle, free slot, or requester is not allowed to touch it.
    BadEnv,
    /// Misaligned or out-of-range address, bad permission bits, bad status.
    Inval,
    /// Out of physical frames (data page or page-table page).
    NoMem,
    /// Environment table exhausted.
    NoFreeEnv,
    /// IPC target is not blocked in receive.  Retryable.
    IpcNotRecv,
    /// Unknown syscall number.
    NoSys,
}

pub type KResult<T> = Result<T, KernError>;

/// A user pointer that failed validation.  Never returned to user space:
/// the environment that passed it is terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserFault {
    /// First offending address.
    pub va: u64,
}

impl KernError {
    /// Negative value placed in rax.
    pub const fn errno(self) -> i64 {
        -(match self {
            KernError::BadEnv => errno::E_BAD_ENV,
            KernError::Inval => errno::E_INVAL,
            KernError::NoMem => errno::E_NO_MEM,
            KernError::NoFreeEnv => errno::E_NO_FREE_ENV,
            KernError::IpcNotRecv => errno::E_IPC_NOT_RECV,
            KernError::NoSys => errno::E_NO_SYS,
        })
    }

    /// Inverse of [`KernError::errno`].  Unknown codes map to `None`.
    pub const fn from_errno(value: i64) -> Option<Self> {
        match -value {
            errno::E_BAD_ENV => Some(KernError::BadEnv),
            errno::E_INVAL => Some(KernError::Inval),
            errno::E_NO_MEM => Some(KernError::NoMem),
            errno::E_NO_FREE_ENV => Some(KernError::NoFreeEnv),
            errno::E_IPC_NOT_RECV => Some(KernError::IpcNotRecv),
            errno::E_NO_SYS => Some(KernError::NoSys),
            _ => None,
        }
    }

    /// Decode a raw syscall return: non-negative is success.
    pub fn check(ret: i64) -> KResult<u64> {
        if ret >= 0 {
            Ok(ret as u64)
        } else {
            Err(Self::from_errno(ret).unwrap_or(KernError::Inval))
        }
    }
}

impl fmt::Display for KernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernError::BadEnv => "bad environment",
            KernError::Inval => "invalid parameter",
            KernError::NoMem => "out of memory",
            KernError::NoFreeEnv => "out of environments",
            KernError::IpcNotRecv => "env is not recving",
            KernError::NoSys => "no such system call",
        };
        f.write_str(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_negative_and_invertible() {
        for err in [
            KernError::BadEnv,
            KernError::Inval,
            KernError::NoMem,
            KernError::NoFreeEnv,
            KernError::IpcNotRecv,
            KernError::NoSys,
        ] {
            assert!(err.errno() < 0);
            assert_eq!(KernError::from_errno(err.errno()), Some(err));
        }
        assert_eq!(KernError::from_errno(-99), None);
    }

    #[test]
    fn check_splits_success_and_error() {
        assert_eq!(KernError::check(0x1000), Ok(0x1000));
        assert_eq!(KernError::check(-3), Err(KernError::Inval));
        assert_eq!(KernError::check(-7), Err(KernError::IpcNotRecv));
    }
}
