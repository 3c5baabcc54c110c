//! Serial logger backing the `log` facade.
//!
//! Boot-time diagnostics go to the serial port only; the framebuffer
//! console belongs to the monitor's interactive output.

use core::fmt::Write;

use log::{LevelFilter, Metadata, Record};

struct SerialLogger;

static LOGGER: SerialLogger = SerialLogger;

impl log::Log for SerialLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let mut serial = crate::console::SERIAL.lock();
            let _ = writeln!(serial, "[{:>5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

pub fn init() {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(LevelFilter::Info);
    }
}
