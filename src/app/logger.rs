//! Minimal stderr logger for the CLI.

use std::io::{self, Write};

use log::{Level, LevelFilter, Log, Metadata, Record};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

/// Installs the logger. `verbose` lowers the threshold to debug.
pub fn init(verbose: bool) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        });
    }
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(OffsetDateTime::now_utc(), record.level(), &record.args().to_string());
        let _ = writeln!(io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn format_line(at: OffsetDateTime, level: Level, message: &str) -> String {
    let stamp = at
        .format(&Rfc3339)
        .unwrap_or_else(|_| "<invalid timestamp>".to_string());
    match level {
        Level::Info => format!("[{stamp}] {message}"),
        other => format!("[{stamp}] {other}: {message}"),
    }
}
