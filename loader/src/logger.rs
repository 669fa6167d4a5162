// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! The logger writes each record as one line to a sink registered by the
//! host, typically the firmware serial console. Records are serialized by a
//! spin lock so lines are never interleaved.

use core::fmt::{self, Write};

use log::{LevelFilter, Metadata, Record};
use spin::Mutex;

use crate::config::LoaderConfig;

/// A console the logger writes to.
pub type LogSink = dyn Write + Send;

static SINK: Mutex<Option<&'static mut LogSink>> = Mutex::new(None);

static LOGGER: Logger = Logger {};

struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut sink = SINK.lock();
        if let Some(sink) = sink.as_deref_mut() {
            // A console that fails to write has nowhere to report it.
            let _ = write_record(sink, record);
        }
    }

    fn flush(&self) {}
}

fn write_record(sink: &mut LogSink, record: &Record) -> fmt::Result {
    writeln!(sink, "{:<5}: {}", record.level(), record.args())
}

/// Initializes the logger with the given sink and level.
///
/// The log macros are no-ops before this function is called. Calling it again
/// replaces the sink and the level.
pub fn init(sink: &'static mut LogSink, level: LevelFilter) {
    *SINK.lock() = Some(sink);
    // The logger is already installed if this is not the first call.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

/// Initializes the logger with the given sink at the level of `config`.
pub fn init_with_config(sink: &'static mut LogSink, config: &LoaderConfig) {
    init(sink, config.log_level);
}

/// Changes the maximum level at runtime.
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}
