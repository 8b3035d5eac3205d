// kernel/src/process/trapframe.rs
//
// Saved user execution state.  Field order follows what the trap entry
// stub pushes: general registers, vector + error code, then the frame the
// CPU pushes itself (rip, cs, rflags, rsp, ss).

use static_assertions::const_assert_eq;

// ============ Segment selectors ============
pub const GD_KT: u64 = 0x08;
pub const GD_KD: u64 = 0x10;
pub const GD_UT: u64 = 0x18;
pub const GD_UD: u64 = 0x20;

/// RFLAGS.IF
pub const FL_IF: u64 = 0x200;

const NREGS: usize = 15;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PushRegs {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
}

impl PushRegs {
    fn to_words(self) -> [u64; NREGS] {
        [
            self.rax, self.rbx, self.rcx, self.rdx, self.rsi, self.rdi, self.rbp, self.r8,
            self.r9, self.r10, self.r11, self.r12, self.r13, self.r14, self.r15,
        ]
    }

    fn from_words(w: &[u64]) -> Self {
        Self {
            rax: w[0],
            rbx: w[1],
            rcx: w[2],
            rdx: w[3],
            rsi: w[4],
            rdi: w[5],
            rbp: w[6],
            r8: w[7],
            r9: w[8],
            r10: w[9],
            r11: w[10],
            r12: w[11],
            r13: w[12],
            r14: w[13],
            r15: w[14],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    // ============ Pushed by the entry stub ============
    pub regs: PushRegs,
    pub trapno: u64,
    pub err: u64,

    // ============ Pushed by the CPU ============
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl TrapFrame {
    /// State for the first entry into user mode.
    pub fn new_user(entry_point: u64, user_stack: u64) -> Self {
        Self {
            rip: entry_point,
            cs: GD_UT | 3,
            rflags: FL_IF | 0x2,
            rsp: user_stack,
            ss: GD_UD | 3,
            ..Self::default()
        }
    }

    /// A frame as pushed while the CPU was already at privilege level 0.
    pub fn kernel(rip: u64, trapno: u64) -> Self {
        Self {
            trapno,
            rip,
            cs: GD_KT,
            rflags: 0x2,
            ss: GD_KD,
            ..Self::default()
        }
    }

    pub fn from_user(&self) -> bool {
        self.cs & 3 == 3
    }

    /// Syscall number and its five arguments.
    pub fn syscall_args(&self) -> (u64, [u64; 5]) {
        let r = &self.regs;
        (r.rax, [r.rdi, r.rsi, r.rdx, r.r10, r.r8])
    }

    pub fn set_syscall(&mut self, num: u64, args: [u64; 5]) {
        self.regs.rax = num;
        self.regs.rdi = args[0];
        self.regs.rsi = args[1];
        self.regs.rdx = args[2];
        self.regs.r10 = args[3];
        self.regs.r8 = args[4];
    }

    /// Dump for the trap log.  `cr2` is shown for page faults.
    pub fn debug_print(&self, cr2: Option<u64>) {
        let r = &self.regs;
        crate::serial_println!("╔════════════════════════════════════════════════════════╗");
        crate::serial_println!(
            "║ TRAP {:>3} ({})",
            self.trapno,
            crate::interrupts::trapname(self.trapno)
        );
        crate::serial_println!("╠════════════════════════════════════════════════════════╣");
        crate::serial_println!("║   RAX={:#018x}  RBX={:#018x}", r.rax, r.rbx);
        crate::serial_println!("║   RCX={:#018x}  RDX={:#018x}", r.rcx, r.rdx);
        crate::serial_println!("║   RSI={:#018x}  RDI={:#018x}", r.rsi, r.rdi);
        crate::serial_println!("║   RBP={:#018x}  R8 ={:#018x}", r.rbp, r.r8);
        crate::serial_println!("║   R9 ={:#018x}  R10={:#018x}", r.r9, r.r10);
        crate::serial_println!("║   R11={:#018x}  R12={:#018x}", r.r11, r.r12);
        crate::serial_println!("║   R13={:#018x}  R14={:#018x}", r.r13, r.r14);
        crate::serial_println!("║   R15={:#018x}", r.r15);
        crate::serial_println!("╠════════════════════════════════════════════════════════╣");
        if let Some(cr2) = cr2 {
            crate::serial_println!("║   CR2    = {:#018x}", cr2);
            crate::serial_println!(
                "║   ERR    = {:#06x} [{}, {}, {}]",
                self.err,
                if self.err & 4 != 0 { "user" } else { "kernel" },
                if self.err & 2 != 0 { "write" } else { "read" },
                if self.err & 1 != 0 { "protection" } else { "not-present" }
            );
        } else {
            crate::serial_println!("║   ERR    = {:#06x}", self.err);
        }
        crate::serial_println!("║   RIP    = {:#018x}", self.rip);
        crate::serial_println!("║   CS     = {:#06x} (RPL={})", self.cs, self.cs & 3);
        crate::serial_println!("║   RFLAGS = {:#018x}", self.rflags);
        if self.from_user() {
            crate::serial_println!("║   RSP    = {:#018x}", self.rsp);
            crate::serial_println!("║   SS     = {:#06x}", self.ss);
        }
        crate::serial_println!("╚════════════════════════════════════════════════════════╝");
    }
}

// ============================================================================
// Page-fault upcall record
// ============================================================================

/// What the kernel pushes on the user exception stack before running the
/// page-fault upcall.  The upcall resumes the faulting code from it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UTrapframe {
    pub fault_va: u64,
    pub err: u64,
    pub regs: PushRegs,
    pub rip: u64,
    pub rflags: u64,
    pub rsp: u64,
}

pub const UTRAPFRAME_SIZE: usize = 20 * 8;

const_assert_eq!(core::mem::size_of::<UTrapframe>(), UTRAPFRAME_SIZE);

impl UTrapframe {
    pub fn from_trapframe(tf: &TrapFrame, fault_va: u64) -> Self {
        Self {
            fault_va,
            err: tf.err,
            regs: tf.regs,
            rip: tf.rip,
            rflags: tf.rflags,
            rsp: tf.rsp,
        }
    }

    pub fn to_bytes(&self) -> [u8; UTRAPFRAME_SIZE] {
        let mut words = [0u64; 20];
        words[0] = self.fault_va;
        words[1] = self.err;
        words[2..2 + NREGS].copy_from_slice(&self.regs.to_words());
        words[17] = self.rip;
        words[18] = self.rflags;
        words[19] = self.rsp;

        let mut out = [0u8; UTRAPFRAME_SIZE];
        for (chunk, w) in out.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    pub fn from_bytes(raw: &[u8; UTRAPFRAME_SIZE]) -> Self {
        let mut words = [0u64; 20];
        for (w, chunk) in words.iter_mut().zip(raw.chunks_exact(8)) {
            let mut b = [0u8; 8];
            b.copy_from_slice(chunk);
            *w = u64::from_le_bytes(b);
        }
        Self {
            fault_va: words[0],
            err: words[1],
            regs: PushRegs::from_words(&words[2..2 + NREGS]),
            rip: words[17],
            rflags: words[18],
            rsp: words[19],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_frame_has_user_privilege() {
        let tf = TrapFrame::new_user(0x40_0000, 0x2fbf_e000);
        assert!(tf.from_user());
        assert_eq!(tf.rflags & FL_IF, FL_IF);
        assert!(!TrapFrame::kernel(0x3000_0000, 14).from_user());
    }

    #[test]
    fn syscall_registers() {
        let mut tf = TrapFrame::default();
        tf.set_syscall(5, [1, 2, 3, 4, 5]);
        assert_eq!(tf.regs.rdi, 1);
        assert_eq!(tf.regs.r10, 4);
        assert_eq!(tf.syscall_args(), (5, [1, 2, 3, 4, 5]));
    }

    #[test]
    fn utrapframe_byte_layout() {
        let mut tf = TrapFrame::new_user(0x40_1234, 0x2fbf_dff0);
        tf.err = 7;
        tf.regs.rax = 0xaa;
        tf.regs.r15 = 0xff;
        let utf = UTrapframe::from_trapframe(&tf, 0x50_0008);
        let raw = utf.to_bytes();

        assert_eq!(&raw[0..8], &0x50_0008u64.to_le_bytes());
        assert_eq!(&raw[16..24], &0xaau64.to_le_bytes());
        assert_eq!(&raw[136..144], &0x40_1234u64.to_le_bytes());
        assert_eq!(&raw[152..160], &0x2fbf_dff0u64.to_le_bytes());
        assert_eq!(UTrapframe::from_bytes(&raw), utf);
    }
}
