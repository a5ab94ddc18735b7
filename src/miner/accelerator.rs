// src/miner/accelerator.rs
//! Accelerator capability interface
//!
//! An [`Accelerator`] is whatever actually executes a work unit: a software
//! core running the hash kernel, an offload engine, or a test double. The
//! pool owns one per context and drives it from that context's worker
//! thread.

use crate::miner::kernel::{self, ScanOutcome};
use crate::miner::work::WorkUnit;
use crate::types::AcceleratorKind;
use std::fmt;

/// Hardware-level failure reported by an accelerator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorFault {
    /// Backend specific fault code
    pub code: i32,
    /// Human readable reason
    pub reason: String,
}

impl AcceleratorFault {
    /// Creates a fault with the given code and reason
    pub fn new(code: i32, reason: impl Into<String>) -> Self {
        AcceleratorFault {
            code,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for AcceleratorFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x})", self.reason, self.code)
    }
}

/// Common interface for accelerator execution contexts
///
/// `run` is blocking from the accelerator's point of view and runs the unit
/// to completion or to the first qualifying nonce.
pub trait Accelerator: Send {
    /// Which kind of core this accelerator represents
    fn kind(&self) -> AcceleratorKind;

    /// Executes one work unit
    ///
    /// # Returns
    /// - `Ok(ScanOutcome)` when the range was scanned
    /// - `Err(AcceleratorFault)` when the hardware failed
    fn run(&mut self, unit: &WorkUnit) -> Result<ScanOutcome, AcceleratorFault>;
}

/// Software accelerator that runs the hash kernel on its worker thread
#[derive(Debug, Clone)]
pub struct SoftwareAccelerator {
    kind: AcceleratorKind,
    debug: bool,
}

impl SoftwareAccelerator {
    /// Creates a software accelerator of the given kind
    pub fn new(kind: AcceleratorKind) -> Self {
        SoftwareAccelerator { kind, debug: false }
    }

    /// Enables per-unit debug logging
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl Accelerator for SoftwareAccelerator {
    fn kind(&self) -> AcceleratorKind {
        self.kind
    }

    fn run(&mut self, unit: &WorkUnit) -> Result<ScanOutcome, AcceleratorFault> {
        let outcome = kernel::scan(&unit.template, unit.nonce_start, unit.nonce_end);
        if self.debug {
            log::debug!(
                "{} {}: {} hashes, best {} at {:#010x}",
                self.kind,
                unit,
                outcome.hashes,
                hex::encode(outcome.best_hash),
                outcome.best_nonce
            );
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::work::{BlockHeaderTemplate, Target};
    use std::sync::Arc;

    #[test]
    fn software_accelerator_runs_kernel() {
        let template = BlockHeaderTemplate::new(2, [1; 32], [2; 32], 1_700_000_000, 0x1d00ffff)
            .unwrap()
            .with_target(Target::MAX);
        let unit = WorkUnit::new(Arc::new(template), 1, 10, 20);

        let mut acc = SoftwareAccelerator::new(AcceleratorKind::Spu).with_debug(true);
        let outcome = acc.run(&unit).unwrap();
        assert_eq!(outcome.found, Some(10));
        assert_eq!(acc.kind(), AcceleratorKind::Spu);
    }

    #[test]
    fn fault_display_includes_code() {
        let fault = AcceleratorFault::new(0x1234, "SPE encountered DMA error");
        assert_eq!(fault.to_string(), "SPE encountered DMA error (0x00001234)");
    }
}
