// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! Sets up the `log` facade for the miner binary:
//! - Standard logging configuration
//! - Benchmark-specific logging
//!
//! Uses `env_logger` under the hood with custom formatting and filtering.

use env_logger::{Builder, Target};
use log::{Level, LevelFilter};
use std::env;
use std::fmt;

/// Initializes the logging subsystem with sensible defaults
///
/// # Configuration
/// - Logs to stdout
/// - Default log level: Info
/// - Respects `RUST_LOG` environment variable if set
pub fn init_logging() {
    let mut builder = common_log_config();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

/// Configures benchmark-specific logging
///
/// Same formatting as [`init_logging`], but defaults to Debug so that
/// per-thread rates show up without setting `RUST_LOG`.
pub fn init_bench_logging() {
    let mut builder = common_log_config();

    if env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.parse_env("RUST_LOG");
    }

    builder.init();
}

/// Base builder shared by both init functions
///
/// Format: `[<unix seconds> <level> <thread> <module>:<line>] <message>` on
/// stdout. Accelerator workers are named `<kind>-<index>`, so every line
/// shows which context emitted it.
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let thread = std::thread::current();
            let line = format_line(
                ts,
                record.level(),
                thread_label(&thread),
                record.module_path().unwrap_or_default(),
                record.line().unwrap_or(0),
                record.args(),
            );
            writeln!(buf, "{}", line)
        })
        .target(Target::Stdout);

    builder
}

fn thread_label(thread: &std::thread::Thread) -> &str {
    thread.name().unwrap_or("<unnamed>")
}

fn format_line(
    ts: impl fmt::Display,
    level: Level,
    thread: &str,
    module: &str,
    line: u32,
    message: impl fmt::Display,
) -> String {
    format!("[{} {} {} {}:{}] {}", ts, level, thread, module, line, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_carries_thread_name() {
        let line = format_line(
            1_700_000_000,
            Level::Warn,
            "spu-3",
            "cellminer_rs::miner::pool",
            42,
            "context timed out",
        );
        assert_eq!(
            line,
            "[1700000000 WARN spu-3 cellminer_rs::miner::pool:42] context timed out"
        );
    }

    #[test]
    fn worker_threads_are_labelled_by_name() {
        let named = std::thread::Builder::new()
            .name("ppu-0".into())
            .spawn(|| thread_label(&std::thread::current()).to_string())
            .unwrap();
        assert_eq!(named.join().unwrap(), "ppu-0");

        let unnamed = std::thread::spawn(|| thread_label(&std::thread::current()).to_string());
        assert_eq!(unnamed.join().unwrap(), "<unnamed>");
    }
}
