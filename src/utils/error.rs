// src/utils/error.rs
use crate::miner::pool::ContextId;
use crate::source::Solution;
use std::io;
use thiserror::Error;

/// Main error type for the mining engine
///
/// Covers the dispatch taxonomy (pool exhaustion, accelerator faults,
/// malformed headers, total loss of accelerators) as well as the ambient
/// I/O, configuration and serialization failures.
#[derive(Error, Debug)]
pub enum MinerError {
    /// No Idle accelerator context was available for a submission.
    ///
    /// Transient: the caller should back off and retry.
    #[error("Accelerator pool exhausted: no idle context")]
    PoolExhausted,

    /// An accelerator context timed out or reported a hardware fault
    #[error("Accelerator {context} faulted: {reason}")]
    AcceleratorFaulted {
        /// Context that faulted
        context: ContextId,
        /// Human readable fault description
        reason: String,
    },

    /// Header bytes of the wrong shape were handed to the engine
    #[error("Malformed block header: {0}")]
    MalformedHeader(String),

    /// Every accelerator context is Faulted; no work can be submitted
    #[error("No accelerators available")]
    NoAcceleratorsAvailable,

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Async task execution errors
    #[error("Task execution error: {0}")]
    TaskError(String),
}

/// Converts hex decoding errors into MinerError
///
/// Used when template files carry invalid hash or target strings.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts a failed solution hand-off into MinerError
///
/// The receiving side of a `ChannelSink` has gone away.
impl From<crossbeam_channel::SendError<Solution>> for MinerError {
    fn from(e: crossbeam_channel::SendError<Solution>) -> Self {
        MinerError::ChannelError(format!("Solution send failed: {}", e))
    }
}

/// Converts TOML parse errors into MinerError
impl From<toml::de::Error> for MinerError {
    fn from(e: toml::de::Error) -> Self {
        MinerError::ConfigError(format!("Invalid config format: {}", e))
    }
}

/// Converts async task join errors into MinerError
///
/// Used when the blocking dispatcher task panics or is cancelled.
impl From<tokio::task::JoinError> for MinerError {
    fn from(e: tokio::task::JoinError) -> Self {
        MinerError::TaskError(format!("Async task failed: {}", e))
    }
}
