//! Kernel logging facility
//!
//! Routes `log` records to the serial console as `[LEVEL] message` lines.
//! Nothing is logged until [`init`] installs the logger, which keeps hosted
//! test runs away from port I/O.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

pub static LOGGER: Logger = Logger;

pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            crate::serial_println!("[{}] {}", record.level(), record.args());
        }
    }

    /// Serial output is unbuffered.
    fn flush(&self) {}
}

/// `Debug` in debug builds, `Info` in release builds.
pub const fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// Installs the serial logger. Fails if a logger is already set.
pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(default_level());
    Ok(())
}
