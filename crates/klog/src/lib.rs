//! Kernel logging backend.
//!
//! Implements [`log::Log`] on top of a single registered [`LogSink`]. The
//! kernel logs through the ordinary `log` macros; whatever console the
//! platform provides becomes the sink at boot.
#![cfg_attr(not(test), no_std)]

use core::fmt::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Where formatted log lines end up.
pub trait LogSink: Send + Sync {
    fn write_str(&self, s: &str);
}

/// Fixed-width tag for a level.
pub fn tag(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRACE",
        Level::Debug => "DEBUG",
        Level::Info => " INFO",
        Level::Warn => " WARN",
        Level::Error => "ERROR",
    }
}

/// ANSI color for a level.
pub fn color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90m", // Gray
        Level::Debug => "\x1b[36m", // Cyan
        Level::Info => "\x1b[32m",  // Green
        Level::Warn => "\x1b[33m",  // Yellow
        Level::Error => "\x1b[31m", // Red
    }
}

/// Formats one record as a single colored line.
pub fn format_record<W: Write>(out: &mut W, record: &Record<'_>) -> fmt::Result {
    writeln!(
        out,
        "{}[{}]\x1b[0m {}: {}",
        color(record.level()),
        tag(record.level()),
        record.target(),
        record.args()
    )
}

struct SinkWriter<'a>(&'a dyn LogSink);

impl Write for SinkWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.write_str(s);
        Ok(())
    }
}

struct KernelLogger {
    sink: Mutex<Option<&'static dyn LogSink>>,
}

static LOGGER: KernelLogger = KernelLogger {
    sink: Mutex::new(None),
};

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Holding the sink lock keeps lines from different cores whole.
        let sink = self.sink.lock();
        if let Some(sink) = *sink {
            let _ = format_record(&mut SinkWriter(sink), record);
        }
    }

    fn flush(&self) {}
}

/// Installs the kernel logger. Call once, early in boot.
pub fn init(sink: &'static dyn LogSink, level: LevelFilter) -> Result<(), SetLoggerError> {
    *LOGGER.sink.lock() = Some(sink);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Writes straight to the sink, bypassing level filtering.
///
/// Used by the panic path. If another core died while holding the sink
/// lock the output is dropped rather than deadlocking.
pub fn print(args: fmt::Arguments<'_>) {
    if let Some(sink) = LOGGER.sink.try_lock() {
        if let Some(sink) = *sink {
            let _ = SinkWriter(sink).write_fmt(args);
        }
    }
}

/// Print without newline
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::print(format_args!($($arg)*))
    };
}

/// Print with newline
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {{
        $crate::print(format_args!($($arg)*));
        $crate::print(format_args!("\n"));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_line_has_tag_target_and_message() {
        let mut out = String::new();
        format_record(
            &mut out,
            &Record::builder()
                .level(Level::Warn)
                .target("cinder::task")
                .args(format_args!("pid {} exited", 7))
                .build(),
        )
        .unwrap();
        assert!(out.starts_with("\x1b[33m[ WARN]\x1b[0m"));
        assert!(out.ends_with("cinder::task: pid 7 exited\n"));
    }

    #[test]
    fn tags_are_fixed_width() {
        for level in [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error] {
            assert_eq!(tag(level).len(), 5);
        }
    }
}
