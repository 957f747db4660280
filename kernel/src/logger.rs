//! `log` facade sink for the kernel.
//!
//! Subsystems log state changes through `log::info!`/`warn!`; the sink
//! renders `[LEVEL] target: message` onto the same console the `println!`
//! macros use, so QEMU serial capture and host test output share a stream.

use log::{LevelFilter, Metadata, Record};

struct KernelLogger;

static LOGGER: KernelLogger = KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{}] {}: {}", record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

/// Install the kernel logger. Safe to call more than once; only the first
/// call wins.
pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
