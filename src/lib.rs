//! cellminer - heterogeneous-core double SHA-256 dispatch engine
//!
//! A control core splits the 32-bit nonce space of a block header template
//! into work units and farms them out to a pool of accelerator contexts:
//! - Double SHA-256 kernel with midstate reuse
//! - Accelerator pool with fault detection and work reissue
//! - Dispatcher state machine with stale-work and duplicate filtering
//! - Template sources, solution sinks and statistics reporting

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Kernel, work units, accelerator pool and dispatcher
pub mod miner;

/// Template sources and solution sinks
pub mod source;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::Config;
pub use miner::{
    Accelerator, AcceleratorPool, BlockHeaderTemplate, Dispatcher, DispatcherConfig,
    DispatcherEvent, DispatcherHandle, DispatcherState, HashResult, Target, WorkUnit,
};
pub use source::{SharedTemplateSource, Solution, SolutionSink, TemplateSource};
pub use stats::{HardwareStats, MiningCounters, MiningStats, StatsReporter};
pub use types::AcceleratorKind;
pub use utils::{MinerError, init_logging};
