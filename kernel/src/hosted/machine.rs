// kernel/src/hosted/machine.rs
//
// The simulated machine: one executor thread per core plus one host
// thread per environment.
//
// An executor asks the kernel what to run, wakes that environment's
// thread, and waits for its next trap.  Only the environment currently
// dispatched on a core runs, so each core executes one stream of user
// code at a time, and all kernel work goes through the big kernel lock.

use std::any::Any;
use std::collections::BTreeMap;
use std::format;
use std::panic::{self, AssertUnwindSafe};
use std::string::{String, ToString};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::vec::Vec;
use std::{fmt, time::Duration};

use log::{debug, error};
use spin::Mutex;

use super::cpu::{EnvExit, TrapMsg, UserCpu, Wake};
use super::text::{Entry, Routine, Text};
use crate::config::KernelConfig;
use crate::kern::{CpuId, Kernel, Resume};
use crate::memory::ImageError;
use crate::memory::elf::{ElfBuilder, ElfBytes, SegmentFlags};
use crate::memory::layout::{PGSIZE, UTEXT};
use crate::process::{EnvId, EnvStatus, EnvType, TrapFrame};
use crate::ulib::{self, pgfault::LIBDATA};

/// Memory accesses between timer interrupts.
pub const DEFAULT_QUANTUM: u64 = 512;

#[derive(Debug)]
pub enum MachineError {
    Boot(&'static str),
    Image(ImageError),
    /// Program text page has no free slot.
    TextFull,
    Host(String),
    KernelPanic(String),
    UserPanic { env: EnvId, message: String },
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineError::Boot(msg) => write!(f, "boot failed: {}", msg),
            MachineError::Image(e) => write!(f, "bad program image: {}", e),
            MachineError::TextFull => f.write_str("program text full"),
            MachineError::Host(msg) => write!(f, "host: {}", msg),
            MachineError::KernelPanic(msg) => write!(f, "kernel panic: {}", msg),
            MachineError::UserPanic { env, message } => {
                write!(f, "user panic in env {}: {}", env, message)
            }
        }
    }
}

impl std::error::Error for MachineError {}

impl From<ImageError> for MachineError {
    fn from(e: ImageError) -> Self {
        MachineError::Image(e)
    }
}

/// State of the machine when `run` returned.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Everything written with `sys_cputs`.
    pub console: String,
    /// Environments still allocated (normally blocked receivers).
    pub live: Vec<(EnvId, EnvStatus)>,
}

struct EnvThread {
    wake_tx: Sender<Wake>,
    handle: JoinHandle<()>,
}

pub(crate) struct Shared {
    pub(crate) kernel: Kernel,
    pub(crate) text: Text,
    pub(crate) quantum: u64,
    threads: Mutex<BTreeMap<EnvId, EnvThread>>,
    retired: Mutex<Vec<JoinHandle<()>>>,
    failure: Mutex<Option<MachineError>>,
    stop: AtomicBool,
}

pub struct Machine {
    shared: Arc<Shared>,
    ncpu: usize,
}

impl Machine {
    pub fn new(config: KernelConfig) -> Result<Self, MachineError> {
        Self::with_quantum(config, DEFAULT_QUANTUM)
    }

    /// `quantum` = 0 disables timer preemption.
    pub fn with_quantum(config: KernelConfig, quantum: u64) -> Result<Self, MachineError> {
        let kernel = Kernel::boot(config).map_err(MachineError::Boot)?;
        Ok(Self {
            shared: Arc::new(Shared {
                kernel,
                text: Text::new(),
                quantum,
                threads: Mutex::new(BTreeMap::new()),
                retired: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
                stop: AtomicBool::new(false),
            }),
            ncpu: config.ncpu,
        })
    }

    pub fn kernel(&self) -> &Kernel {
        &self.shared.kernel
    }

    /// Create a user environment that starts in `entry`.
    pub fn spawn(&self, entry: Entry) -> Result<EnvId, MachineError> {
        self.spawn_as(entry, EnvType::User)
    }

    /// Same, with an explicit type.  `ulib::ipc_find_env` looks services
    /// up by this type.
    pub fn spawn_as(&self, entry: Entry, env_type: EnvType) -> Result<EnvId, MachineError> {
        let addr = self
            .shared
            .text
            .link(Routine::Entry(entry))
            .ok_or(MachineError::TextFull)?;
        let bytes = program_image(addr);
        let image = bytes.parse()?;
        self.shared
            .kernel_call(|k| k.create_env(&image, env_type))
            .ok_or_else(|| self.shared.take_failure())
    }

    /// Queue console input for `sys_cgetc`.  Bytes beyond the ring's
    /// capacity are dropped.
    pub fn push_input(&self, bytes: &[u8]) {
        for &b in bytes {
            if !self.shared.kernel.input().push(b) {
                break;
            }
        }
    }

    /// Run until no environment can make progress, or until a kernel
    /// panic or user panic.
    pub fn run(&self) -> Result<RunReport, MachineError> {
        self.shared.stop.store(false, Ordering::SeqCst);

        let mut executors = Vec::with_capacity(self.ncpu);
        for cpu in 0..self.ncpu {
            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name(format!("cpu{}", cpu))
                .spawn(move || executor(shared, cpu))
                .map_err(|e| MachineError::Host(e.to_string()))?;
            executors.push(handle);
        }
        for handle in executors {
            if handle.join().is_err() {
                self.shared.fail(MachineError::Host("executor thread died".to_string()));
            }
        }
        self.shared.join_retired();

        if let Some(err) = self.shared.failure.lock().take() {
            return Err(err);
        }
        Ok(RunReport {
            console: String::from_utf8_lossy(&self.shared.kernel.console_output()).into_owned(),
            live: self.shared.kernel.live_envs(),
        })
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let threads = core::mem::take(&mut *self.shared.threads.lock());
        for (_, t) in threads {
            let _ = t.wake_tx.send(Wake::Exit);
            let _ = t.handle.join();
        }
        self.shared.join_retired();
    }
}

/// Text page (trap-filled, every routine slot lives here) plus the
/// zeroed library data page.
fn program_image(entry: u64) -> ElfBytes {
    ElfBuilder::new(entry)
        .segment(
            UTEXT,
            &[0xCC; PGSIZE as usize],
            PGSIZE,
            SegmentFlags::READ | SegmentFlags::EXECUTE,
        )
        .segment(LIBDATA, &[], PGSIZE, SegmentFlags::READ | SegmentFlags::WRITE)
        .build()
}

// ============================================================================
// Executors
// ============================================================================

impl Shared {
    fn fail(&self, err: MachineError) {
        error!("machine: {}", err);
        let mut failure = self.failure.lock();
        if failure.is_none() {
            *failure = Some(err);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    fn take_failure(&self) -> MachineError {
        self.failure
            .lock()
            .take()
            .unwrap_or_else(|| MachineError::Host("kernel call failed".to_string()))
    }

    /// Kernel entry with kernel panics turned into a machine failure.
    fn kernel_call<R>(&self, f: impl FnOnce(&Kernel) -> R) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(|| f(&self.kernel))) {
            Ok(r) => Some(r),
            Err(payload) => {
                self.fail(MachineError::KernelPanic(panic_message(payload.as_ref())));
                None
            }
        }
    }

    /// Retire host threads of environments the kernel has freed.
    fn retire_reaped(&self) {
        for id in self.kernel.take_reaped() {
            if let Some(t) = self.threads.lock().remove(&id) {
                debug!("machine: retiring env {}", id);
                let _ = t.wake_tx.send(Wake::Exit);
                self.retired.lock().push(t.handle);
            }
        }
    }

    fn join_retired(&self) {
        let handles = core::mem::take(&mut *self.retired.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }

    /// Resume `env` on `cpu`, starting its host thread on first dispatch.
    fn dispatch(self: &Arc<Self>, env: EnvId, tf: TrapFrame, cpu: CpuId, trap_tx: &Sender<TrapMsg>) -> bool {
        let mut threads = self.threads.lock();
        if !threads.contains_key(&env) {
            let Some(Routine::Entry(entry)) = self.text.resolve(tf.rip) else {
                drop(threads);
                self.fail(MachineError::UserPanic {
                    env,
                    message: format!("no entry routine at {:#x}", tf.rip),
                });
                return false;
            };
            let (wake_tx, wake_rx) = mpsc::channel();
            let shared = Arc::clone(self);
            let handle = match thread::Builder::new()
                .name(format!("env {}", env))
                .spawn(move || env_main(shared, env, wake_rx, entry))
            {
                Ok(handle) => handle,
                Err(e) => {
                    drop(threads);
                    self.fail(MachineError::Host(e.to_string()));
                    return false;
                }
            };
            threads.insert(env, EnvThread { wake_tx, handle });
        }

        let wake = Wake::Resume {
            tf,
            cpu,
            trap_tx: trap_tx.clone(),
        };
        threads.get(&env).is_some_and(|t| t.wake_tx.send(wake).is_ok())
    }
}

fn executor(shared: Arc<Shared>, cpu: CpuId) {
    let (trap_tx, trap_rx) = mpsc::channel::<TrapMsg>();
    let mut next = shared.kernel_call(|k| k.start(cpu));

    while let Some(resume) = next {
        shared.retire_reaped();
        if shared.stop.load(Ordering::SeqCst) {
            break;
        }

        next = match resume {
            Resume::Run { env, tf } => {
                if !shared.dispatch(env, tf, cpu, &trap_tx) {
                    break;
                }
                match trap_rx.recv() {
                    Ok(TrapMsg::Trap { tf, .. }) => shared.kernel_call(|k| k.trap(cpu, &tf)),
                    Ok(TrapMsg::Panicked { env, message }) => {
                        shared.fail(MachineError::UserPanic { env, message });
                        None
                    }
                    Err(_) => None,
                }
            }
            Resume::Halt => {
                if shared.kernel.is_quiescent() {
                    shared.stop.store(true, Ordering::SeqCst);
                    break;
                }
                thread::sleep(Duration::from_micros(100));
                shared.kernel_call(|k| k.idle_tick(cpu))
            }
            Resume::Kernel { tf } => {
                shared.fail(MachineError::KernelPanic(format!(
                    "cpu{}: return to kernel context at {:#x}",
                    cpu, tf.rip
                )));
                None
            }
        };
    }
    shared.retire_reaped();
}

fn env_main(shared: Arc<Shared>, env: EnvId, wake_rx: Receiver<Wake>, entry: Entry) {
    let Some(mut u) = UserCpu::attach(env, wake_rx, shared) else {
        return;
    };
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        entry(&mut u);
        ulib::exit(&mut u);
    }));
    if let Err(payload) = result {
        if payload.is::<EnvExit>() {
            return;
        }
        u.report_panic(panic_message(payload.as_ref()));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
