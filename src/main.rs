// src/main.rs
//
// Host runner: boots the kernel on the simulated machine, starts one of
// the bundled user programs and prints the console when every
// environment has finished.
//
//   exokern [hello|forktree|pingpong|cowcheck] [--ncpu N] [--trace|--quiet]

mod demos;

use std::process::ExitCode;

use clap::Parser;
use kernel::KernelConfig;
use kernel::hosted::Machine;
use log::LevelFilter;

use demos::Program;

#[derive(Debug, Parser)]
#[command(name = "exokern", about = "Run a bundled user program on the simulated exokernel")]
struct Cli {
    /// Program loaded as the first environment.
    #[arg(value_enum, default_value_t = Program::Hello)]
    program: Program,

    /// Simulated cores.
    #[arg(long, default_value_t = 1)]
    ncpu: usize,

    /// Log every syscall.
    #[arg(long)]
    trace: bool,

    /// Warnings and errors only.
    #[arg(long, conflicts_with = "trace")]
    quiet: bool,
}

impl Cli {
    fn log_level(&self) -> LevelFilter {
        if self.trace {
            LevelFilter::Trace
        } else if self.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = KernelConfig::new_default()
        .with_ncpu(cli.ncpu)
        .with_log_level(cli.log_level())
        .with_syscall_trace(cli.trace);

    let machine = match Machine::new(config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("exokern: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = machine.spawn(cli.program.entry()) {
        eprintln!("exokern: {}", e);
        return ExitCode::FAILURE;
    }

    match machine.run() {
        Ok(report) => {
            print!("{}", report.console);
            for (id, status) in &report.live {
                eprintln!("exokern: env {} left {:?}", id, status);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("exokern: {}", e);
            ExitCode::FAILURE
        }
    }
}
