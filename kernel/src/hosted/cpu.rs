// kernel/src/hosted/cpu.rs
//
// `UserCpu`: the user-mode side of one environment on the hosted
// machine.  It owns the live registers while the environment runs and
// hands them to the core's executor on every trap.

use std::boxed::Box;
use std::panic;
use std::string::String;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender};

use super::machine::Shared;
use super::text::{self, Routine};
use crate::interrupts::{IRQ_OFFSET, IRQ_TIMER, T_PGFLT, T_SYSCALL};
use crate::kern::CpuId;
use crate::memory::FaultCode;
use crate::process::trapframe::UTRAPFRAME_SIZE;
use crate::process::{EnvId, TrapFrame, UTrapframe};
use crate::ulib::pgfault::PGFAULT_HANDLER_VA;
use crate::ulib::{PgfaultHandler, UserContext};

/// Executor -> environment thread.
pub(crate) enum Wake {
    Resume {
        tf: TrapFrame,
        cpu: CpuId,
        trap_tx: Sender<TrapMsg>,
    },
    Exit,
}

/// Environment thread -> executor.
pub(crate) enum TrapMsg {
    Trap { env: EnvId, tf: TrapFrame },
    Panicked { env: EnvId, message: String },
}

/// Unwind payload that retires an environment thread once the kernel
/// has freed the environment.
pub(crate) struct EnvExit;

pub struct UserCpu {
    env: EnvId,
    cpu: CpuId,
    frame: TrapFrame,
    trap_tx: Sender<TrapMsg>,
    wake_rx: Receiver<Wake>,
    shared: Arc<Shared>,
    accesses: u64,
}

impl UserCpu {
    /// Block until the kernel first dispatches `env`.
    pub(crate) fn attach(env: EnvId, wake_rx: Receiver<Wake>, shared: Arc<Shared>) -> Option<Self> {
        match wake_rx.recv() {
            Ok(Wake::Resume { tf, cpu, trap_tx }) => Some(Self {
                env,
                cpu,
                frame: tf,
                trap_tx,
                wake_rx,
                shared,
                accesses: 0,
            }),
            _ => None,
        }
    }

    pub fn env(&self) -> EnvId {
        self.env
    }

    /// Core this environment was last resumed on.
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub(crate) fn report_panic(&self, message: String) {
        let _ = self.trap_tx.send(TrapMsg::Panicked {
            env: self.env,
            message,
        });
    }

    /// Hand the frame to the kernel and wait to be resumed.  If the
    /// kernel frees this environment instead, the thread unwinds.
    fn enter_kernel(&mut self) {
        let msg = TrapMsg::Trap {
            env: self.env,
            tf: self.frame,
        };
        if self.trap_tx.send(msg).is_err() {
            panic::resume_unwind(Box::new(EnvExit));
        }
        match self.wake_rx.recv() {
            Ok(Wake::Resume { tf, cpu, trap_tx }) => {
                self.frame = tf;
                self.cpu = cpu;
                self.trap_tx = trap_tx;
            }
            Ok(Wake::Exit) | Err(_) => panic::resume_unwind(Box::new(EnvExit)),
        }
    }

    /// Timer preemption, counted in memory accesses.
    fn tick(&mut self) {
        self.accesses += 1;
        let quantum = self.shared.quantum;
        if quantum != 0 && self.accesses % quantum == 0 {
            self.frame.trapno = IRQ_OFFSET + IRQ_TIMER;
            self.enter_kernel();
        }
    }

    fn page_fault(&mut self, code: FaultCode) {
        self.frame.trapno = T_PGFLT;
        self.frame.err = code.bits();
        self.enter_kernel();
        // A fault the kernel did not kill us for comes back redirected.
        if self.frame.rip == text::UPCALL {
            self.upcall();
        }
    }

    /// The `_pgfault_upcall` trampoline: call the handler stored in the
    /// library data page with the record on top of the exception stack,
    /// then resume the faulting context.
    fn upcall(&mut self) {
        let mut raw = [0u8; UTRAPFRAME_SIZE];
        let rsp = self.frame.rsp;
        self.read(rsp, &mut raw);
        let utf = UTrapframe::from_bytes(&raw);

        let addr = self.read_u64(PGFAULT_HANDLER_VA);
        match self.shared.text.resolve(addr) {
            Some(Routine::Handler(handler)) => handler(self, &utf),
            _ => panic!("_pgfault_upcall: no handler at {:#x}", addr),
        }

        self.frame.regs = utf.regs;
        self.frame.rip = utf.rip;
        self.frame.rflags = utf.rflags;
        self.frame.rsp = utf.rsp;
    }
}

impl UserContext for UserCpu {
    fn syscall(&mut self, num: u64, args: [u64; 5]) -> i64 {
        self.frame.set_syscall(num, args);
        self.frame.trapno = T_SYSCALL;
        self.frame.err = 0;
        self.enter_kernel();
        self.frame.regs.rax as i64
    }

    fn frame(&self) -> &TrapFrame {
        &self.frame
    }

    fn frame_mut(&mut self) -> &mut TrapFrame {
        &mut self.frame
    }

    fn read(&mut self, va: u64, buf: &mut [u8]) {
        self.tick();
        loop {
            match self.shared.kernel.user_read(self.cpu, va, buf) {
                Ok(()) => return,
                Err(code) => self.page_fault(code),
            }
        }
    }

    fn write(&mut self, va: u64, data: &[u8]) {
        self.tick();
        loop {
            match self.shared.kernel.user_write(self.cpu, va, data) {
                Ok(()) => return,
                Err(code) => self.page_fault(code),
            }
        }
    }

    fn link_pgfault_handler(&mut self, handler: PgfaultHandler<Self>) -> u64 {
        match self.shared.text.link(Routine::Handler(handler)) {
            Some(addr) => addr,
            None => panic!("program text full"),
        }
    }

    fn link_entry(&mut self, entry: fn(&mut Self)) -> u64 {
        match self.shared.text.link(Routine::Entry(entry)) {
            Some(addr) => addr,
            None => panic!("program text full"),
        }
    }

    fn pgfault_upcall(&self) -> u64 {
        text::UPCALL
    }
}
