// kernel/src/logger.rs
//
// `log` facade backend that prints through the serial line.

use lazy_static::lazy_static;
use log::{LevelFilter, Metadata, Record};

lazy_static! {
    static ref LOGGER: SerialLogger = SerialLogger {
        ceiling: SerialLogger::ceiling_from_env(),
    };
}

pub struct SerialLogger {
    ceiling: LevelFilter,
}

impl SerialLogger {
    /// Compile-time ceiling, `EXOKERN_LOG=off|error|warn|info|debug|trace`.
    /// Unset means no ceiling beyond what `init` asks for.
    fn ceiling_from_env() -> LevelFilter {
        option_env!("EXOKERN_LOG")
            .and_then(|s| s.parse().ok())
            .unwrap_or(LevelFilter::Trace)
    }
}

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level().to_level_filter() <= self.ceiling
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the serial logger and set the global level.  Safe to call more
/// than once: later calls only adjust the level.
pub fn init(level: LevelFilter) {
    let logger: &'static SerialLogger = &LOGGER;
    let _ = log::set_logger(logger);
    log::set_max_level(level.min(logger.ceiling));
}
