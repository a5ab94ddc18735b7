// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains all components related to the mining process:
//! - The double SHA-256 kernel and its nonce scan
//! - Block header templates, targets and work units
//! - Accelerator backends and the pool that drives them
//! - The control-core dispatcher

/// Double SHA-256 kernel
pub mod kernel;

/// Header templates, targets, work units and nonce partitioning
pub mod work;

/// Accelerator backends
///
/// Anything that can scan a nonce range of a work unit. The software
/// backend runs the kernel on a host thread.
pub mod accelerator;

/// Accelerator context pool
///
/// One worker thread per context. Tracks Idle/Busy/Faulted state and
/// turns missed deadlines and panics into faults.
pub mod pool;

/// Control-core dispatcher
pub mod dispatcher;

// Re-export main components for cleaner imports
pub use self::accelerator::{Accelerator, AcceleratorFault, SoftwareAccelerator};
pub use self::dispatcher::{
    Dispatcher, DispatcherConfig, DispatcherEvent, DispatcherHandle, DispatcherState,
};
pub use self::kernel::ScanOutcome;
pub use self::pool::{AcceleratorPool, ContextId, ContextState, FaultReport, PoolEvent, SubmitHandle};
pub use self::work::{BlockHeaderTemplate, HashResult, NoncePartition, Target, WorkUnit};
