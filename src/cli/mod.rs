// src/cli/mod.rs
//! Command-line interface definitions

/// `clap` derive types for the `cellminer` binary
pub mod commands;

pub use commands::{Action, BenchmarkOptions, Commands, ConfigOptions, StartOptions};
