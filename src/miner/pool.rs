// src/miner/pool.rs
//! Accelerator pool
//!
//! Owns a fixed table of accelerator contexts (arena + [`ContextId`] index).
//! Each context is a worker thread running one [`Accelerator`]; the control
//! flow hands it work over a private command channel and all contexts report
//! back over one shared result channel. Only the pool mutates the table.

use crate::miner::accelerator::{Accelerator, AcceleratorFault, SoftwareAccelerator};
use crate::miner::kernel::ScanOutcome;
use crate::miner::work::{HashResult, WorkUnit};
use crate::types::AcceleratorKind;
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Fault code reported when an accelerator panics mid-unit
pub const FAULT_PANIC: i32 = -1;

/// Fault code reported when an accelerator misses its deadline
pub const FAULT_TIMEOUT: i32 = -2;

/// Fault code reported when a worker thread is gone
pub const FAULT_WORKER_EXITED: i32 = -3;

/// Index of a context in the pool's table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub usize);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of one accelerator context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Ready for a work unit
    Idle,
    /// Executing exactly one work unit
    Busy,
    /// Timed out or reported a hardware fault; never used again
    Faulted,
}

/// Receipt for a submitted unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitHandle {
    /// Context executing the unit
    pub context: ContextId,
    /// Submission sequence number
    pub ticket: u64,
}

/// A context that left service
#[derive(Debug, Clone)]
pub struct FaultReport {
    /// Context that faulted
    pub context: ContextId,
    /// Kind of core behind the context
    pub kind: AcceleratorKind,
    /// The fault itself
    pub fault: AcceleratorFault,
    /// Unit that was in flight, to be reissued elsewhere
    pub unit: Option<WorkUnit>,
}

impl FaultReport {
    /// The fault as a [`MinerError::AcceleratorFaulted`]
    pub fn to_error(&self) -> MinerError {
        MinerError::AcceleratorFaulted {
            context: self.context,
            reason: self.fault.to_string(),
        }
    }
}

/// Something that happened on an accelerator
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// A unit ran to completion (with or without a solution)
    Completed(HashResult),
    /// A context faulted
    Faulted(FaultReport),
}

struct Assignment {
    ticket: u64,
    unit: WorkUnit,
}

struct Completion {
    context: ContextId,
    ticket: u64,
    outcome: Result<ScanOutcome, AcceleratorFault>,
}

struct InFlight {
    ticket: u64,
    unit: WorkUnit,
    started: Instant,
}

struct Context {
    id: ContextId,
    kind: AcceleratorKind,
    state: ContextState,
    in_flight: Option<InFlight>,
    commands: Option<Sender<Assignment>>,
    thread: Option<JoinHandle<()>>,
}

/// Owns N accelerator contexts and moves work units through them
pub struct AcceleratorPool {
    contexts: Vec<Context>,
    // Held so the result channel never disconnects while the pool lives
    _results_tx: Sender<Completion>,
    results_rx: Receiver<Completion>,
    fault_timeout: Duration,
    next_ticket: u64,
    pending: VecDeque<PoolEvent>,
}

impl AcceleratorPool {
    /// Creates a pool with one context per accelerator
    ///
    /// # Arguments
    /// * `accelerators` - Backends, one per context, in table order
    /// * `fault_timeout` - How long a unit may run before its context is
    ///   declared Faulted
    ///
    /// # Returns
    /// - `Ok(AcceleratorPool)` with every context Idle
    /// - `Err(MinerError)` if a worker thread could not be spawned
    pub fn new(
        accelerators: Vec<Box<dyn Accelerator>>,
        fault_timeout: Duration,
    ) -> Result<Self, MinerError> {
        let (results_tx, results_rx) = crossbeam_channel::unbounded();
        let mut contexts = Vec::with_capacity(accelerators.len());

        for (index, accelerator) in accelerators.into_iter().enumerate() {
            let id = ContextId(index);
            let kind = accelerator.kind();
            let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
            let results = results_tx.clone();

            let thread = std::thread::Builder::new()
                .name(format!("{}-{}", kind, index))
                .spawn(move || worker_loop(id, accelerator, commands_rx, results))?;

            contexts.push(Context {
                id,
                kind,
                state: ContextState::Idle,
                in_flight: None,
                commands: Some(commands_tx),
                thread: Some(thread),
            });
        }

        log::info!("Accelerator pool up with {} contexts", contexts.len());

        Ok(AcceleratorPool {
            contexts,
            _results_tx: results_tx,
            results_rx,
            fault_timeout,
            next_ticket: 0,
            pending: VecDeque::new(),
        })
    }

    /// Creates a pool of software accelerators
    ///
    /// Control-core threads come first in the table, then accelerator cores.
    pub fn software(
        ppu_threads: usize,
        spu_cores: usize,
        debug: bool,
        fault_timeout: Duration,
    ) -> Result<Self, MinerError> {
        let accelerators = std::iter::repeat_n(AcceleratorKind::Ppu, ppu_threads)
            .chain(std::iter::repeat_n(AcceleratorKind::Spu, spu_cores))
            .map(|kind| {
                Box::new(SoftwareAccelerator::new(kind).with_debug(debug)) as Box<dyn Accelerator>
            })
            .collect();
        Self::new(accelerators, fault_timeout)
    }

    /// Total number of contexts, faulted ones included
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the pool has no contexts at all
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Number of Idle contexts
    pub fn idle_count(&self) -> usize {
        self.count(ContextState::Idle)
    }

    /// Number of Busy contexts
    pub fn busy_count(&self) -> usize {
        self.count(ContextState::Busy)
    }

    /// Number of contexts that are not Faulted
    pub fn usable_count(&self) -> usize {
        self.len() - self.count(ContextState::Faulted)
    }

    fn count(&self, state: ContextState) -> usize {
        self.contexts.iter().filter(|c| c.state == state).count()
    }

    /// State of a context, `None` for an unknown id
    pub fn state(&self, id: ContextId) -> Option<ContextState> {
        self.contexts.get(id.0).map(|c| c.state)
    }

    /// Kind of core behind a context
    pub fn kind(&self, id: ContextId) -> Option<AcceleratorKind> {
        self.contexts.get(id.0).map(|c| c.kind)
    }

    /// Units currently executing
    pub fn in_flight(&self) -> impl Iterator<Item = &WorkUnit> {
        self.contexts
            .iter()
            .filter_map(|c| c.in_flight.as_ref().map(|f| &f.unit))
    }

    /// Hands a unit to the lowest-index Idle context
    ///
    /// Execution starts asynchronously on that context's worker thread.
    ///
    /// # Errors
    /// - `PoolExhausted` if no context is Idle
    /// - `NoAcceleratorsAvailable` if every context is Faulted
    pub fn submit(&mut self, mut unit: WorkUnit) -> Result<SubmitHandle, MinerError> {
        debug_assert!(
            !self.in_flight().any(|f| f.overlaps(&unit)),
            "overlapping unit submitted: {}",
            unit
        );

        loop {
            let Some(index) = self
                .contexts
                .iter()
                .position(|c| c.state == ContextState::Idle)
            else {
                return Err(if self.usable_count() == 0 {
                    MinerError::NoAcceleratorsAvailable
                } else {
                    MinerError::PoolExhausted
                });
            };

            let ticket = self.next_ticket;
            self.next_ticket += 1;

            let context = &mut self.contexts[index];
            unit.accelerator = Some(context.id);

            let sent = context.commands.as_ref().is_some_and(|tx| {
                tx.send(Assignment {
                    ticket,
                    unit: unit.clone(),
                })
                .is_ok()
            });
            if !sent {
                self.fault(
                    index,
                    AcceleratorFault::new(FAULT_WORKER_EXITED, "worker thread exited"),
                    None,
                );
                continue;
            }

            log::trace!("Submitted {} to {}", unit, context.id);
            context.state = ContextState::Busy;
            let handle = SubmitHandle {
                context: context.id,
                ticket,
            };
            context.in_flight = Some(InFlight {
                ticket,
                unit,
                started: Instant::now(),
            });
            return Ok(handle);
        }
    }

    /// Collects every completion and fault since the last call
    ///
    /// Never blocks. Completed contexts are back to Idle on return.
    pub fn poll(&mut self) -> Vec<PoolEvent> {
        while let Ok(completion) = self.results_rx.try_recv() {
            self.absorb(completion);
        }
        self.check_timeouts(Instant::now());
        self.pending.drain(..).collect()
    }

    /// Blocks until one context completes or faults
    ///
    /// # Errors
    /// - `NoAcceleratorsAvailable` if every context is Faulted
    /// - `InputError` if nothing is in flight, since nothing could complete
    pub fn wait_any(&mut self) -> Result<PoolEvent, MinerError> {
        loop {
            if let Some(event) = self.wait_until(None)? {
                return Ok(event);
            }
        }
    }

    /// Like [`AcceleratorPool::wait_any`], but gives up after `timeout`
    ///
    /// Returns `Ok(None)` on timeout, or at once if nothing is in flight.
    pub fn wait_any_timeout(&mut self, timeout: Duration) -> Result<Option<PoolEvent>, MinerError> {
        if self.pending.is_empty() && self.busy_count() == 0 {
            if self.usable_count() == 0 {
                return Err(MinerError::NoAcceleratorsAvailable);
            }
            return Ok(None);
        }
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&mut self, limit: Option<Instant>) -> Result<Option<PoolEvent>, MinerError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.busy_count() == 0 {
                return Err(if self.usable_count() == 0 {
                    MinerError::NoAcceleratorsAvailable
                } else {
                    MinerError::InputError("wait on a pool with no work in flight".into())
                });
            }

            let fault_deadline = self
                .contexts
                .iter()
                .filter_map(|c| c.in_flight.as_ref())
                .map(|f| f.started + self.fault_timeout)
                .min();
            let deadline = match (fault_deadline, limit) {
                (Some(f), Some(l)) => f.min(l),
                (Some(f), None) => f,
                (None, Some(l)) => l,
                (None, None) => Instant::now() + self.fault_timeout,
            };

            match self.results_rx.recv_deadline(deadline) {
                Ok(completion) => self.absorb(completion),
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    self.check_timeouts(now);
                    if self.pending.is_empty() && limit.is_some_and(|l| now >= l) {
                        return Ok(None);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MinerError::ChannelError("result channel closed".into()));
                }
            }
        }
    }

    fn absorb(&mut self, completion: Completion) {
        let index = completion.context.0;
        let Some(context) = self.contexts.get_mut(index) else {
            return;
        };

        let current = context
            .in_flight
            .as_ref()
            .is_some_and(|f| f.ticket == completion.ticket);
        if context.state != ContextState::Busy || !current {
            log::debug!(
                "Dropping late answer from {} (ticket {})",
                completion.context,
                completion.ticket
            );
            return;
        }

        let Some(InFlight { unit, .. }) = context.in_flight.take() else {
            return;
        };

        match completion.outcome {
            Ok(outcome) => {
                context.state = ContextState::Idle;
                self.pending.push_back(PoolEvent::Completed(HashResult {
                    context: context.id,
                    best_hash: outcome.best_hash,
                    nonce: outcome.best_nonce,
                    meets_target: outcome.meets_target(),
                    hashes: outcome.hashes,
                    unit,
                }));
            }
            Err(fault) => self.fault(index, fault, Some(unit)),
        }
    }

    fn check_timeouts(&mut self, now: Instant) {
        let timeout = self.fault_timeout;
        let expired: Vec<usize> = self
            .contexts
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                c.in_flight
                    .as_ref()
                    .is_some_and(|f| now.duration_since(f.started) >= timeout)
            })
            .map(|(index, _)| index)
            .collect();

        for index in expired {
            let unit = self.contexts[index].in_flight.take().map(|f| f.unit);
            self.fault(
                index,
                AcceleratorFault::new(
                    FAULT_TIMEOUT,
                    format!("no response within {:?}", timeout),
                ),
                unit,
            );
        }
    }

    fn fault(&mut self, index: usize, fault: AcceleratorFault, unit: Option<WorkUnit>) {
        let context = &mut self.contexts[index];
        context.state = ContextState::Faulted;
        context.in_flight = None;
        // Closing the command channel lets the worker exit once it is free
        context.commands = None;

        log::warn!("Accelerator {} ({}) faulted: {}", context.id, context.kind, fault);
        self.pending.push_back(PoolEvent::Faulted(FaultReport {
            context: context.id,
            kind: context.kind,
            fault,
            unit,
        }));
    }
}

impl Drop for AcceleratorPool {
    fn drop(&mut self) {
        for context in &mut self.contexts {
            context.commands = None;
        }
        // Idle workers exit at once; busy and faulted ones are left to
        // finish their range in the background.
        for context in &mut self.contexts {
            if let Some(thread) = context.thread.take() {
                if context.state == ContextState::Idle {
                    let _ = thread.join();
                }
            }
        }
    }
}

fn worker_loop(
    id: ContextId,
    mut accelerator: Box<dyn Accelerator>,
    commands: Receiver<Assignment>,
    results: Sender<Completion>,
) {
    for Assignment { ticket, unit } in commands {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| accelerator.run(&unit)))
            .unwrap_or_else(|_| Err(AcceleratorFault::new(FAULT_PANIC, "accelerator panicked")));

        if results
            .send(Completion {
                context: id,
                ticket,
                outcome,
            })
            .is_err()
        {
            break;
        }
    }
    log::trace!("Accelerator {} worker exiting", id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::kernel;
    use crate::miner::work::{BlockHeaderTemplate, Target};
    use std::sync::Arc;

    fn template() -> Arc<BlockHeaderTemplate> {
        Arc::new(
            BlockHeaderTemplate::new(2, [3; 32], [4; 32], 1_600_000_000, 0x1d00ffff)
                .unwrap()
                .with_target(Target::ZERO),
        )
    }

    fn unit(start: u64, end: u64) -> WorkUnit {
        WorkUnit::new(template(), 1, start, end)
    }

    /// Waits for a release signal before scanning
    struct Gated {
        gate: Receiver<()>,
    }

    impl Accelerator for Gated {
        fn kind(&self) -> AcceleratorKind {
            AcceleratorKind::Spu
        }

        fn run(&mut self, unit: &WorkUnit) -> Result<ScanOutcome, AcceleratorFault> {
            let _ = self.gate.recv_timeout(Duration::from_secs(10));
            Ok(kernel::scan(&unit.template, unit.nonce_start, unit.nonce_end))
        }
    }

    /// Reports a hardware fault on every unit
    struct Broken;

    impl Accelerator for Broken {
        fn kind(&self) -> AcceleratorKind {
            AcceleratorKind::Spu
        }

        fn run(&mut self, _unit: &WorkUnit) -> Result<ScanOutcome, AcceleratorFault> {
            Err(AcceleratorFault::new(0x0b, "SPE_RUNTIME_EXCEPTION"))
        }
    }

    /// Answers only after `delay`
    struct Slow {
        delay: Duration,
    }

    impl Accelerator for Slow {
        fn kind(&self) -> AcceleratorKind {
            AcceleratorKind::Ppu
        }

        fn run(&mut self, unit: &WorkUnit) -> Result<ScanOutcome, AcceleratorFault> {
            std::thread::sleep(self.delay);
            Ok(kernel::scan(&unit.template, unit.nonce_start, unit.nonce_end))
        }
    }

    struct Panicky;

    impl Accelerator for Panicky {
        fn kind(&self) -> AcceleratorKind {
            AcceleratorKind::Spu
        }

        fn run(&mut self, _unit: &WorkUnit) -> Result<ScanOutcome, AcceleratorFault> {
            panic!("bus error");
        }
    }

    fn gated_pool(n: usize) -> (AcceleratorPool, Vec<Sender<()>>) {
        let mut gates = Vec::new();
        let mut accelerators: Vec<Box<dyn Accelerator>> = Vec::new();
        for _ in 0..n {
            let (tx, rx) = crossbeam_channel::unbounded();
            gates.push(tx);
            accelerators.push(Box::new(Gated { gate: rx }));
        }
        let pool = AcceleratorPool::new(accelerators, Duration::from_secs(30)).unwrap();
        (pool, gates)
    }

    #[test]
    fn submit_fails_when_all_contexts_busy() {
        let (mut pool, gates) = gated_pool(2);

        let first = pool.submit(unit(0, 10)).unwrap();
        let second = pool.submit(unit(10, 20)).unwrap();
        assert_eq!(first.context, ContextId(0));
        assert_eq!(second.context, ContextId(1));
        assert_eq!(pool.busy_count(), 2);

        assert!(matches!(
            pool.submit(unit(20, 30)),
            Err(MinerError::PoolExhausted)
        ));

        gates[1].send(()).unwrap();
        let PoolEvent::Completed(result) = pool.wait_any().unwrap() else {
            panic!("expected a completion");
        };
        assert_eq!(result.context, ContextId(1));
        assert_eq!(result.hashes, 10);
        assert!(!result.meets_target);
        assert_eq!(pool.state(ContextId(1)), Some(ContextState::Idle));

        let third = pool.submit(unit(20, 30)).unwrap();
        assert_eq!(third.context, ContextId(1));

        for gate in &gates {
            let _ = gate.send(());
            let _ = gate.send(());
        }
    }

    #[test]
    fn poll_does_not_block() {
        let (mut pool, gates) = gated_pool(1);
        pool.submit(unit(0, 5)).unwrap();

        let started = Instant::now();
        assert!(pool.poll().is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));

        gates[0].send(()).unwrap();
        let mut events = Vec::new();
        while events.is_empty() {
            events = pool.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(events.len(), 1);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn in_flight_tracks_assigned_units() {
        let (mut pool, gates) = gated_pool(2);
        pool.submit(unit(0, 10)).unwrap();
        pool.submit(unit(10, 20)).unwrap();

        let units: Vec<_> = pool.in_flight().cloned().collect();
        assert_eq!(units.len(), 2);
        assert!(!units[0].overlaps(&units[1]));
        assert_eq!(units[0].accelerator, Some(ContextId(0)));
        assert_eq!(units[1].accelerator, Some(ContextId(1)));

        for gate in &gates {
            let _ = gate.send(());
        }
    }

    #[test]
    fn hardware_fault_demotes_context() {
        let accelerators: Vec<Box<dyn Accelerator>> = vec![
            Box::new(Broken),
            Box::new(SoftwareAccelerator::new(AcceleratorKind::Spu)),
        ];
        let mut pool = AcceleratorPool::new(accelerators, Duration::from_secs(30)).unwrap();

        pool.submit(unit(0, 10)).unwrap();
        let PoolEvent::Faulted(report) = pool.wait_any().unwrap() else {
            panic!("expected a fault");
        };
        assert_eq!(report.context, ContextId(0));
        assert_eq!(report.fault.code, 0x0b);
        assert_eq!(report.unit.as_ref().map(|u| u.nonce_start), Some(0));
        assert!(matches!(
            report.to_error(),
            MinerError::AcceleratorFaulted { context: ContextId(0), .. }
        ));

        assert_eq!(pool.state(ContextId(0)), Some(ContextState::Faulted));
        assert_eq!(pool.usable_count(), 1);

        // the faulted context is skipped from now on
        let handle = pool.submit(report.unit.unwrap()).unwrap();
        assert_eq!(handle.context, ContextId(1));
        assert!(matches!(pool.wait_any().unwrap(), PoolEvent::Completed(_)));
    }

    #[test]
    fn unresponsive_context_times_out() {
        let accelerators: Vec<Box<dyn Accelerator>> = vec![Box::new(Slow {
            delay: Duration::from_millis(400),
        })];
        let mut pool = AcceleratorPool::new(accelerators, Duration::from_millis(50)).unwrap();

        pool.submit(unit(0, 4)).unwrap();
        let started = Instant::now();
        let PoolEvent::Faulted(report) = pool.wait_any().unwrap() else {
            panic!("expected a timeout fault");
        };
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(report.fault.code, FAULT_TIMEOUT);
        assert!(report.unit.is_some());

        // the late answer is dropped
        std::thread::sleep(Duration::from_millis(500));
        assert!(pool.poll().is_empty());
        assert!(matches!(
            pool.submit(unit(0, 4)),
            Err(MinerError::NoAcceleratorsAvailable)
        ));
    }

    #[test]
    fn panicking_accelerator_is_a_fault() {
        let accelerators: Vec<Box<dyn Accelerator>> = vec![Box::new(Panicky)];
        let mut pool = AcceleratorPool::new(accelerators, Duration::from_secs(30)).unwrap();

        pool.submit(unit(0, 4)).unwrap();
        let PoolEvent::Faulted(report) = pool.wait_any().unwrap() else {
            panic!("expected a fault");
        };
        assert_eq!(report.fault.code, FAULT_PANIC);
        assert!(matches!(
            pool.wait_any_timeout(Duration::from_millis(10)),
            Err(MinerError::NoAcceleratorsAvailable)
        ));
    }

    #[test]
    fn wait_timeout_returns_none_when_idle() {
        let mut pool = AcceleratorPool::software(1, 1, false, Duration::from_secs(5)).unwrap();
        assert_eq!(pool.kind(ContextId(0)), Some(AcceleratorKind::Ppu));
        assert_eq!(pool.kind(ContextId(1)), Some(AcceleratorKind::Spu));
        assert!(pool.wait_any_timeout(Duration::from_millis(10)).unwrap().is_none());
        assert!(pool.wait_any().is_err());
    }
}
