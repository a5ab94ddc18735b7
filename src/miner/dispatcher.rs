// src/miner/dispatcher.rs
//! Control-core dispatcher
//!
//! Drives the accelerator pool: cuts work units from the current template,
//! keeps every usable context busy, sorts incoming results into solutions,
//! stale work and plain progress, and reissues work lost to faulted
//! contexts.
//!
//! State machine: `Idle → Running → Draining → Stopped`. The control flow
//! only suspends inside [`AcceleratorPool::wait_any_timeout`].

use crate::miner::kernel;
use crate::miner::pool::{AcceleratorPool, ContextId, FaultReport, PoolEvent};
use crate::miner::work::{BlockHeaderTemplate, HashResult, NONCE_SPACE, NoncePartition, WorkUnit};
use crate::source::{Solution, SolutionSink, TemplateSource};
use crate::stats::{MiningCounters, MiningStats};
use crate::utils::error::MinerError;
use crossbeam_channel::{Receiver, Sender};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

/// Partitioning and timing policy for the control loop
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Nonces per work unit
    pub work_unit_size: u64,
    /// Exclusive upper bound of the nonce space to search per template
    pub nonce_limit: u64,
    /// Pause after a submission failed with `PoolExhausted`
    pub submit_backoff: Duration,
    /// Longest a single control cycle waits on the pool
    pub poll_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            work_unit_size: NONCE_SPACE / 128,
            nonce_limit: NONCE_SPACE,
            submit_backoff: Duration::from_millis(50),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Lifecycle of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Constructed, not started
    Idle,
    /// Issuing work and collecting results
    Running,
    /// No new work; in-flight units are abandoned
    Draining,
    /// Finished
    Stopped,
}

impl DispatcherState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => DispatcherState::Idle,
            1 => DispatcherState::Running,
            2 => DispatcherState::Draining,
            _ => DispatcherState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            DispatcherState::Idle => 0,
            DispatcherState::Running => 1,
            DispatcherState::Draining => 2,
            DispatcherState::Stopped => 3,
        }
    }
}

/// Things the host may want to observe
#[derive(Debug, Clone)]
pub enum DispatcherEvent {
    /// A new template generation opened
    TemplateChanged {
        /// Generation tag of the new template
        generation: u64,
    },
    /// The first qualifying result of the run
    SolutionFound {
        /// Solved header and nonce
        solution: Solution,
        /// Context that found it
        context: ContextId,
    },
    /// A qualifying result after the block was already solved
    DuplicateSolutionDiscarded {
        /// Context that reported it
        context: ContextId,
        /// Its nonce
        nonce: u32,
    },
    /// A result computed against a superseded template
    StaleWorkDiscarded {
        /// The stale unit
        unit: WorkUnit,
    },
    /// A context left service
    AcceleratorFaulted {
        /// Context that faulted
        context: ContextId,
        /// Fault description
        reason: String,
        /// Whether its unit went back into the queue
        reissued: bool,
    },
    /// Every nonce was searched and the source had nothing new
    WorkExhausted,
    /// The dispatcher reached `Stopped`
    Stopped,
}

struct Shared {
    state: AtomicU8,
    stop: AtomicBool,
}

/// Cloneable remote control for a running dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    shared: Arc<Shared>,
    counters: MiningCounters,
}

impl DispatcherHandle {
    /// Asks the dispatcher to stop at its next control cycle
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// Current state
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Rolling hash rate in hashes per second
    pub fn get_hashrate(&self) -> f64 {
        self.counters.hashrate()
    }

    /// Snapshot of the dispatch counters
    pub fn stats(&self) -> MiningStats {
        self.counters.snapshot()
    }
}

/// The control loop
pub struct Dispatcher {
    pool: AcceleratorPool,
    source: Box<dyn TemplateSource>,
    sink: Box<dyn SolutionSink>,
    config: DispatcherConfig,
    counters: MiningCounters,
    shared: Arc<Shared>,
    events_tx: Sender<DispatcherEvent>,
    events_rx: Receiver<DispatcherEvent>,
    partition: Option<NoncePartition>,
    generation: u64,
    /// Generations whose nonce space ran out but whose tail is still live
    retired: HashSet<u64>,
    /// Units waiting for a context, reissues first
    queued: VecDeque<WorkUnit>,
    solution: Option<Solution>,
}

impl Dispatcher {
    /// Creates an Idle dispatcher
    ///
    /// # Arguments
    /// * `pool` - Accelerator contexts to drive
    /// * `source` - Where templates come from
    /// * `sink` - Where solutions go
    /// * `counters` - Statistics shared with the host
    /// * `config` - Partitioning and timing policy
    pub fn new(
        pool: AcceleratorPool,
        source: Box<dyn TemplateSource>,
        sink: Box<dyn SolutionSink>,
        counters: MiningCounters,
        config: DispatcherConfig,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Dispatcher {
            pool,
            source,
            sink,
            config,
            counters,
            shared: Arc::new(Shared {
                state: AtomicU8::new(DispatcherState::Idle.as_u8()),
                stop: AtomicBool::new(false),
            }),
            events_tx,
            events_rx,
            partition: None,
            generation: 0,
            retired: HashSet::new(),
            queued: VecDeque::new(),
            solution: None,
        }
    }

    /// Remote control usable from other threads
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: Arc::clone(&self.shared),
            counters: self.counters.clone(),
        }
    }

    /// Receiver for [`DispatcherEvent`]s
    ///
    /// The channel is unbounded; hosts that do not care can drop it.
    pub fn events(&self) -> Receiver<DispatcherEvent> {
        self.events_rx.clone()
    }

    /// Current state
    pub fn state(&self) -> DispatcherState {
        DispatcherState::from_u8(self.shared.state.load(Ordering::SeqCst))
    }

    /// Rolling hash rate in hashes per second
    pub fn get_hashrate(&self) -> f64 {
        self.counters.hashrate()
    }

    /// Current template generation tag
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The pool being driven
    pub fn pool(&self) -> &AcceleratorPool {
        &self.pool
    }

    /// The solution, once found
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Asks the dispatcher to stop at its next control cycle
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
    }

    /// `Idle → Running`: loads the template and submits the first batch
    pub fn start(&mut self) -> Result<(), MinerError> {
        if self.state() != DispatcherState::Idle {
            return Err(MinerError::InputError(format!(
                "cannot start dispatcher in state {:?}",
                self.state()
            )));
        }
        if self.pool.usable_count() == 0 {
            return self.fatal();
        }

        let template = self.source.get_current_template()?;
        self.open_generation(template);
        self.set_state(DispatcherState::Running);
        self.fill()
    }

    /// Runs until `Stopped`, returning the solution if one was found
    pub fn run(&mut self) -> Result<Option<Solution>, MinerError> {
        if self.state() == DispatcherState::Idle {
            self.start()?;
        }
        while self.step()? != DispatcherState::Stopped {}
        Ok(self.solution.clone())
    }

    /// One control cycle
    ///
    /// Picks up template updates, waits up to `poll_interval` for the pool,
    /// handles every event that arrived and refills idle contexts.
    pub fn step(&mut self) -> Result<DispatcherState, MinerError> {
        match self.state() {
            DispatcherState::Idle => {
                return Err(MinerError::InputError("dispatcher not started".into()));
            }
            DispatcherState::Stopped => return Ok(DispatcherState::Stopped),
            DispatcherState::Draining => {
                self.finish();
                return Ok(DispatcherState::Stopped);
            }
            DispatcherState::Running => {}
        }

        if self.shared.stop.load(Ordering::SeqCst) {
            log::info!("Stop requested");
            self.set_state(DispatcherState::Draining);
            self.finish();
            return Ok(DispatcherState::Stopped);
        }

        self.check_update();

        let mut events = Vec::new();
        match self.pool.wait_any_timeout(self.config.poll_interval) {
            Ok(Some(event)) => events.push(event),
            Ok(None) => {}
            Err(MinerError::NoAcceleratorsAvailable) => {
                self.fatal()?;
                return Ok(self.state());
            }
            Err(e) => return Err(e),
        }
        events.extend(self.pool.poll());

        // A template published during the wait makes these results stale
        self.check_update();

        for event in events {
            match event {
                PoolEvent::Completed(result) => self.on_result(result),
                PoolEvent::Faulted(report) => self.on_fault(report),
            }
        }

        if self.solution.is_some() {
            self.set_state(DispatcherState::Draining);
            self.finish();
            return Ok(DispatcherState::Stopped);
        }

        self.prune_retired();
        self.fill()?;
        Ok(self.state())
    }

    fn on_result(&mut self, result: HashResult) {
        self.counters.record_hashes(result.hashes);

        if !self.is_live(result.unit.generation) {
            log::debug!("Discarding stale result for {}", result.unit);
            self.counters.record_stale();
            self.emit(DispatcherEvent::StaleWorkDiscarded { unit: result.unit });
            return;
        }

        if !result.meets_target {
            log::trace!(
                "{} finished {} without solution ({} hashes)",
                result.context,
                result.unit,
                result.hashes
            );
            return;
        }

        if self.solution.is_some() {
            log::debug!(
                "Duplicate solution {:#010x} from {} discarded",
                result.nonce,
                result.context
            );
            self.emit(DispatcherEvent::DuplicateSolutionDiscarded {
                context: result.context,
                nonce: result.nonce,
            });
            return;
        }

        let template = result.unit.template.as_ref();
        if !kernel::meets_target(&kernel::hash_header(template, result.nonce), &template.target) {
            log::warn!(
                "{} reported nonce {:#010x} that does not meet the target",
                result.context,
                result.nonce
            );
            return;
        }

        let solution = Solution {
            header: template.clone(),
            nonce: result.nonce,
        };
        log::info!(
            "Solution {:#010x} found by {} in {}",
            solution.nonce,
            result.context,
            result.unit
        );
        self.counters.record_solution();
        if let Err(e) = self.sink.report_solution(&solution.header, solution.nonce) {
            log::error!("Solution sink failed: {}", e);
        }
        self.emit(DispatcherEvent::SolutionFound {
            solution: solution.clone(),
            context: result.context,
        });
        self.solution = Some(solution);
    }

    fn on_fault(&mut self, report: FaultReport) {
        self.counters.record_fault();

        let reason = report.to_error().to_string();
        let mut reissued = false;
        if let Some(mut unit) = report.unit {
            if self.solution.is_none() && self.is_live(unit.generation) {
                log::info!("Reissuing {} lost on {}", unit, report.context);
                unit.accelerator = None;
                self.queued.push_front(unit);
                reissued = true;
            }
        }

        self.emit(DispatcherEvent::AcceleratorFaulted {
            context: report.context,
            reason,
            reissued,
        });
    }

    /// Keeps every idle context busy
    fn fill(&mut self) -> Result<(), MinerError> {
        if self.pool.usable_count() == 0 {
            return self.fatal();
        }

        while self.pool.idle_count() > 0 {
            let Some(unit) = self.next_unit() else {
                break;
            };
            match self.pool.submit(unit.clone()) {
                Ok(handle) => log::trace!("{} -> {}", unit, handle.context),
                Err(MinerError::PoolExhausted) => {
                    self.queued.push_front(unit);
                    std::thread::sleep(self.config.submit_backoff);
                    break;
                }
                Err(MinerError::NoAcceleratorsAvailable) => {
                    self.queued.push_front(unit);
                    return self.fatal();
                }
                Err(e) => return Err(e),
            }
        }

        if self.partition.is_none() && self.queued.is_empty() && self.pool.busy_count() == 0 {
            log::info!("Nonce space exhausted and no fresh template available");
            self.emit(DispatcherEvent::WorkExhausted);
            self.finish();
        }
        Ok(())
    }

    fn next_unit(&mut self) -> Option<WorkUnit> {
        if let Some(unit) = self.queued.pop_front() {
            return Some(unit);
        }
        loop {
            let partition = self.partition.as_mut()?;
            if let Some(unit) = partition.next_unit() {
                return Some(unit);
            }

            let exhausted = Arc::clone(partition.template());
            let generation = partition.generation();
            self.partition = None;

            if let Some(template) = self.source.take_update() {
                self.supersede(template);
                continue;
            }

            self.retired.insert(generation);
            let template = self.source.next_template(&exhausted)?;
            log::debug!("Generation {} exhausted, moving on", self.generation);
            self.open_generation(template);
        }
    }

    fn open_generation(&mut self, template: BlockHeaderTemplate) {
        self.generation += 1;
        log::info!(
            "Template generation {} (time {}, bits {:08x})",
            self.generation,
            template.timestamp,
            template.bits
        );
        self.partition = Some(NoncePartition::new(
            Arc::new(template),
            self.generation,
            self.config.work_unit_size,
            self.config.nonce_limit,
        ));
        self.emit(DispatcherEvent::TemplateChanged {
            generation: self.generation,
        });
    }

    fn check_update(&mut self) {
        if let Some(template) = self.source.take_update() {
            self.supersede(template);
        }
    }

    /// A new template makes every outstanding unit stale
    fn supersede(&mut self, template: BlockHeaderTemplate) {
        log::info!(
            "New template supersedes generation {} ({} units in flight)",
            self.generation,
            self.pool.busy_count()
        );
        self.retired.clear();
        self.queued.clear();
        self.open_generation(template);
    }

    fn is_live(&self, generation: u64) -> bool {
        generation == self.generation || self.retired.contains(&generation)
    }

    fn prune_retired(&mut self) {
        if self.retired.is_empty() {
            return;
        }
        let outstanding: HashSet<u64> = self
            .pool
            .in_flight()
            .chain(self.queued.iter())
            .map(|u| u.generation)
            .collect();
        self.retired.retain(|g| outstanding.contains(g));
    }

    fn finish(&mut self) {
        let abandoned = self.pool.busy_count();
        if abandoned > 0 {
            log::debug!("Abandoning {} in-flight units", abandoned);
        }
        self.partition = None;
        self.queued.clear();
        self.set_state(DispatcherState::Stopped);
    }

    fn fatal(&mut self) -> Result<(), MinerError> {
        log::error!("All accelerator contexts faulted; stopping");
        self.finish();
        Err(MinerError::NoAcceleratorsAvailable)
    }

    fn set_state(&self, state: DispatcherState) {
        let previous = DispatcherState::from_u8(self.shared.state.swap(state.as_u8(), Ordering::SeqCst));
        if previous != state {
            log::debug!("Dispatcher {:?} -> {:?}", previous, state);
            if state == DispatcherState::Stopped {
                self.emit(DispatcherEvent::Stopped);
            }
        }
    }

    fn emit(&self, event: DispatcherEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::work::Target;
    use crate::source::{ChannelSink, StaticTemplateSource};
    use crate::types::AcceleratorKind;

    fn dispatcher(target: Target, config: DispatcherConfig) -> (Dispatcher, Receiver<Solution>) {
        let template = BlockHeaderTemplate::new(1, [1; 32], [2; 32], 1_500_000_000, 0x1d00ffff)
            .unwrap()
            .with_target(target);
        let pool = AcceleratorPool::software(1, 1, false, Duration::from_secs(30)).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let dispatcher = Dispatcher::new(
            pool,
            Box::new(StaticTemplateSource::new(template)),
            Box::new(ChannelSink::new(tx)),
            MiningCounters::new(Duration::from_secs(60)),
            config,
        );
        (dispatcher, rx)
    }

    fn small(limit: u64) -> DispatcherConfig {
        DispatcherConfig {
            work_unit_size: 10,
            nonce_limit: limit,
            poll_interval: Duration::from_millis(20),
            ..DispatcherConfig::default()
        }
    }

    #[test]
    fn default_partition_is_128_slices() {
        let config = DispatcherConfig::default();
        assert_eq!(config.work_unit_size * 128, NONCE_SPACE);
        assert_eq!(config.nonce_limit, NONCE_SPACE);
    }

    #[test]
    fn state_round_trips_through_u8() {
        for state in [
            DispatcherState::Idle,
            DispatcherState::Running,
            DispatcherState::Draining,
            DispatcherState::Stopped,
        ] {
            assert_eq!(DispatcherState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn step_before_start_is_an_error() {
        let (mut d, _solutions) = dispatcher(Target::ZERO, small(40));
        assert!(d.step().is_err());
        assert_eq!(d.state(), DispatcherState::Idle);
    }

    #[test]
    fn start_submits_one_unit_per_context() {
        let (mut d, _solutions) = dispatcher(Target::ZERO, small(1_000));
        d.start().unwrap();
        assert_eq!(d.state(), DispatcherState::Running);
        assert_eq!(d.generation(), 1);
        assert_eq!(d.pool().in_flight().count() + d.pool().idle_count(), 2);
        assert!(d.start().is_err());
    }

    #[test]
    fn easy_target_is_solved_by_first_unit() {
        let (mut d, solutions) = dispatcher(Target::MAX, small(1_000));
        let events = d.events();
        let solution = d.run().unwrap().unwrap();
        assert_eq!(solutions.try_recv().unwrap(), solution);
        assert!(solutions.try_recv().is_err());

        assert_eq!(d.state(), DispatcherState::Stopped);
        assert!(solution.nonce == 0 || solution.nonce == 10);
        let found = events
            .try_iter()
            .filter(|e| matches!(e, DispatcherEvent::SolutionFound { .. }))
            .count();
        assert_eq!(found, 1);
        assert_eq!(d.handle().stats().solutions, 1);
    }

    #[test]
    fn handle_stop_ends_the_run() {
        let (mut d, _solutions) = dispatcher(Target::ZERO, small(NONCE_SPACE));
        let handle = d.handle();
        d.start().unwrap();
        handle.stop();
        assert_eq!(d.step().unwrap(), DispatcherState::Stopped);
        assert_eq!(handle.state(), DispatcherState::Stopped);
        assert_eq!(d.pool().kind(ContextId(0)), Some(AcceleratorKind::Ppu));
    }
}
