//! Statistics collection and reporting module
//!
//! Tracks what the dispatcher does:
//! - Rolling hash-rate estimate
//! - Solutions, stale results and accelerator faults
//! - Hardware monitoring (CPU, memory, temperature) for the periodic report

/// Sliding-window hash-rate meter
pub mod hashrate;

/// Shared counters and the periodic reporter
///
/// The reporter handles:
/// - Atomic collection of mining statistics
/// - Hardware monitoring
/// - Periodic reporting of stats
pub mod reporter;

// Re-export main components
pub use hashrate::HashrateMeter;
pub use reporter::{HardwareStats, MiningCounters, MiningStats, StatsReporter};
