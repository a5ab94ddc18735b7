// src/stats/reporter.rs
use crate::stats::hashrate::HashrateMeter;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

/// Snapshot of dispatch statistics
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total number of nonces hashed
    pub hashes_total: u64,
    /// Solutions reported to the solution sink
    pub solutions: u64,
    /// Results discarded because their template was superseded
    pub stale_discarded: u64,
    /// Accelerator contexts that faulted
    pub faults: u64,
    /// Rolling hash rate (hashes per second)
    pub hashrate: f64,
    /// Seconds since the counters were created
    pub uptime_secs: u64,
}

/// Statistics related to hardware performance
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently used (in bytes)
    pub memory_used: u64,
    /// Current CPU temperature in Celsius
    pub temperature: f32,
}

/// Thread-safe counters fed by the dispatcher
///
/// Cheap to clone; every clone shares the same counters.
#[derive(Clone)]
pub struct MiningCounters {
    inner: Arc<CountersInner>,
}

struct CountersInner {
    hashes: AtomicU64,
    solutions: AtomicU64,
    stale: AtomicU64,
    faults: AtomicU64,
    meter: Mutex<HashrateMeter>,
    start_time: Instant,
}

impl MiningCounters {
    /// Creates zeroed counters with a hash-rate window of `window`
    pub fn new(window: Duration) -> Self {
        MiningCounters {
            inner: Arc::new(CountersInner {
                hashes: AtomicU64::new(0),
                solutions: AtomicU64::new(0),
                stale: AtomicU64::new(0),
                faults: AtomicU64::new(0),
                meter: Mutex::new(HashrateMeter::new(window)),
                start_time: Instant::now(),
            }),
        }
    }

    /// Adds hashed nonces to the total and the rolling meter
    pub fn record_hashes(&self, count: u64) {
        self.inner.hashes.fetch_add(count, Ordering::Relaxed);
        if let Ok(mut meter) = self.inner.meter.lock() {
            meter.record(count);
        }
    }

    /// Counts one reported solution
    pub fn record_solution(&self) {
        self.inner.solutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one discarded stale result
    pub fn record_stale(&self) {
        self.inner.stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one faulted context
    pub fn record_fault(&self) {
        self.inner.faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Current rolling hash rate in hashes per second
    pub fn hashrate(&self) -> f64 {
        self.inner
            .meter
            .lock()
            .map(|mut meter| meter.rate())
            .unwrap_or(0.0)
    }

    /// Snapshot of every counter
    pub fn snapshot(&self) -> MiningStats {
        MiningStats {
            hashes_total: self.inner.hashes.load(Ordering::Relaxed),
            solutions: self.inner.solutions.load(Ordering::Relaxed),
            stale_discarded: self.inner.stale.load(Ordering::Relaxed),
            faults: self.inner.faults.load(Ordering::Relaxed),
            hashrate: self.hashrate(),
            uptime_secs: self.inner.start_time.elapsed().as_secs(),
        }
    }
}

/// Periodically logs mining and hardware statistics
pub struct StatsReporter {
    /// Counters shared with the dispatcher
    counters: MiningCounters,
    /// System information collector
    system: System,
    /// Hardware component information collector
    components: Components,
    /// Interval at which stats are reported
    report_interval: Duration,
    /// Cleared to stop the background reporting thread
    running: Arc<AtomicBool>,
}

impl Clone for StatsReporter {
    fn clone(&self) -> Self {
        StatsReporter {
            counters: self.counters.clone(),
            system: System::new_all(),
            components: Components::new_with_refreshed_list(),
            report_interval: self.report_interval,
            running: self.running.clone(),
        }
    }
}

impl StatsReporter {
    /// Creates a reporter over `counters`
    ///
    /// # Arguments
    /// * `counters` - Counters the dispatcher records into
    /// * `report_interval` - How often to log statistics
    pub fn new(counters: MiningCounters, report_interval: Duration) -> Self {
        StatsReporter {
            counters,
            system: System::new_all(),
            components: Components::new_with_refreshed_list(),
            report_interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Counters this reporter reads
    pub fn counters(&self) -> &MiningCounters {
        &self.counters
    }

    /// Gets the current mining statistics
    pub fn get_stats(&self) -> MiningStats {
        self.counters.snapshot()
    }

    /// Gets the current hardware statistics
    ///
    /// This refreshes system information before returning the stats.
    pub fn get_hardware_stats(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.components.refresh(true);

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperature = self
            .components
            .iter()
            .find(|c| c.label().contains("CPU"))
            .and_then(|c| c.temperature())
            .unwrap_or(0.0);

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
            temperature,
        }
    }

    /// Starts the periodic reporting of statistics
    ///
    /// Spawns a background thread that logs stats every interval until
    /// [`StatsReporter::stop_reporting`] is called.
    pub fn start_reporting(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut reporter = self.clone();

        std::thread::spawn(move || {
            while reporter.running.load(Ordering::Relaxed) {
                std::thread::sleep(reporter.report_interval);
                if !reporter.running.load(Ordering::Relaxed) {
                    break;
                }
                let mining_stats = reporter.get_stats();
                let hw_stats = reporter.get_hardware_stats();

                log::info!(
                    "{:.3} Mh/s | solutions: {} stale: {} faults: {} | CPU: {:.1}% | Temp: {:.1}°C",
                    mining_stats.hashrate / 1_000_000.0,
                    mining_stats.solutions,
                    mining_stats.stale_discarded,
                    mining_stats.faults,
                    hw_stats.cpu_usage,
                    hw_stats.temperature
                );
            }
        });
    }

    /// Stops the background reporting thread after its current sleep
    pub fn stop_reporting(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_between_clones() {
        let counters = MiningCounters::new(Duration::from_secs(60));
        let other = counters.clone();

        other.record_hashes(500);
        other.record_solution();
        other.record_stale();
        other.record_stale();
        other.record_fault();

        let stats = counters.snapshot();
        assert_eq!(stats.hashes_total, 500);
        assert_eq!(stats.solutions, 1);
        assert_eq!(stats.stale_discarded, 2);
        assert_eq!(stats.faults, 1);
    }

    #[test]
    fn reporter_reads_the_same_counters() {
        let counters = MiningCounters::new(Duration::from_secs(60));
        let reporter = StatsReporter::new(counters.clone(), Duration::from_secs(1));
        counters.record_hashes(42);
        assert_eq!(reporter.get_stats().hashes_total, 42);
    }
}
