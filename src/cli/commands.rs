// src/cli/commands.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// cellminer - double SHA-256 dispatch across control and accelerator cores
#[derive(Parser, Debug)]
#[command(name = "cellminer")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform (start mining, run benchmarks, or generate config)
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Mine a block header template until solved, exhausted or interrupted
    Start(StartOptions),

    /// Measure raw kernel throughput
    Benchmark(BenchmarkOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Options for starting the mining operation
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// JSON block header template to mine
    #[arg(short, long)]
    pub template: PathBuf,

    /// Kernel threads on the control core (overrides config)
    #[arg(long)]
    pub ppe: Option<usize>,

    /// Accelerator core contexts (overrides config)
    #[arg(long)]
    pub spe: Option<usize>,

    /// Share log path (overrides config)
    #[arg(long)]
    pub share_log: Option<PathBuf>,

    /// Enable per-scan debug logging in the accelerators
    #[arg(long)]
    pub debug: bool,
}

/// Options for running the kernel benchmark
#[derive(Parser, Debug)]
pub struct BenchmarkOptions {
    /// Duration of benchmark in seconds
    #[arg(short, long, default_value_t = 10)]
    pub duration: u64,

    /// Number of threads to use
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub threads: usize,

    /// Nonces scanned per batch
    #[arg(short, long, default_value_t = 1 << 16)]
    pub batch: u64,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_accepts_core_overrides() {
        let cli = Commands::try_parse_from([
            "cellminer",
            "start",
            "--template",
            "block.json",
            "--ppe",
            "1",
            "--spe",
            "6",
        ])
        .unwrap();
        match cli.action {
            Action::Start(opts) => {
                assert_eq!(opts.template, PathBuf::from("block.json"));
                assert_eq!(opts.config, PathBuf::from("config.toml"));
                assert_eq!(opts.ppe, Some(1));
                assert_eq!(opts.spe, Some(6));
                assert!(!opts.debug);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn start_requires_template() {
        assert!(Commands::try_parse_from(["cellminer", "start"]).is_err());
    }

    #[test]
    fn benchmark_defaults() {
        let cli = Commands::try_parse_from(["cellminer", "benchmark"]).unwrap();
        match cli.action {
            Action::Benchmark(opts) => {
                assert_eq!(opts.duration, 10);
                assert_eq!(opts.threads, num_cpus::get());
                assert_eq!(opts.batch, 1 << 16);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }
}
