// src/main.rs
use cellminer_rs::miner::kernel;
use cellminer_rs::miner::work::NONCE_SPACE;
use cellminer_rs::source::{ShareLog, TemplateFile};
use cellminer_rs::utils::logging::init_bench_logging;
use cellminer_rs::{self, *};
use clap::Parser;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;

/// Main entry point for cellminer
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Mines one template until it is solved, exhausted or interrupted
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads configuration and applies CLI overrides
/// 3. Loads the header template
/// 4. Brings up the accelerator pool and the dispatcher
/// 5. Runs the dispatcher on a blocking task; Ctrl-C stops it
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let mut config = if opts.config.exists() {
        config::load(&opts.config)?
    } else {
        log::warn!(
            "No config at {}, using defaults",
            opts.config.display()
        );
        Config::default()
    };
    // Apply CLI overrides
    if let Some(ppe) = opts.ppe {
        config.accelerators.ppu_threads = ppe;
    }
    if let Some(spe) = opts.spe {
        config.accelerators.spu_cores = spe;
    }
    if let Some(path) = opts.share_log {
        config.share_log = path;
    }
    config.accelerators.debug |= opts.debug;
    config.validate()?;

    let template = TemplateFile::load(&opts.template)?;
    log::info!(
        "Mining template version {} time {} bits {:08x} with {} ppu + {} spu contexts",
        template.version,
        template.timestamp,
        template.bits,
        config.accelerators.ppu_threads,
        config.accelerators.spu_cores
    );

    let pool = AcceleratorPool::software(
        config.accelerators.ppu_threads,
        config.accelerators.spu_cores,
        config.accelerators.debug,
        config.fault_timeout(),
    )?;
    let counters = MiningCounters::new(config.hashrate_window());
    let sink = ShareLog::open(&config.share_log)?;
    log::info!("Logging solutions to {}", sink.path().display());

    let mut dispatcher = Dispatcher::new(
        pool,
        Box::new(SharedTemplateSource::new(template)),
        Box::new(sink),
        counters.clone(),
        config.dispatcher_config(),
    );
    let handle = dispatcher.handle();

    // Statistics reporting
    let reporter = StatsReporter::new(counters, config.report_interval());
    reporter.start_reporting();

    // Runtime setup
    let rt = Runtime::new()?;
    let outcome = rt.block_on(async {
        let mut task = tokio::task::spawn_blocking(move || dispatcher.run());
        tokio::select! {
            joined = &mut task => joined,
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, stopping dispatcher");
                handle.stop();
                task.await
            }
        }
    });
    reporter.stop_reporting();

    let stats = reporter.get_stats();
    log::info!(
        "Hashed {} nonces in {}s ({:.3} Mh/s), {} stale, {} faults",
        stats.hashes_total,
        stats.uptime_secs,
        stats.hashrate / 1_000_000.0,
        stats.stale_discarded,
        stats.faults
    );

    match outcome?? {
        Some(solution) => {
            let mut hash = solution.hash();
            hash.reverse();
            log::info!(
                "Solved with nonce {} ({:#010x}), hash {}",
                solution.nonce,
                solution.nonce,
                hex::encode(hash)
            );
        }
        None => log::info!("Stopped without a solution"),
    }
    log::logger().flush();
    Ok(())
}

/// Runs the kernel benchmark
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Builds a rayon pool of the requested size
/// 3. Scans batches of a dummy header until the duration elapses
/// 4. Reports the aggregate hash rate
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let threads = opts.threads.max(1);
    let batch = opts.batch.clamp(1, NONCE_SPACE);
    let workers = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("bench-{}", i))
        .build()
        .map_err(|e| MinerError::TaskError(format!("Failed to build thread pool: {}", e)))?;

    // Unreachable target: every batch runs to its end
    let template = BlockHeaderTemplate::new(1, [0u8; 32], [0u8; 32], 0, 0x1d00ffff)?
        .with_target(Target::ZERO);
    let counters = MiningCounters::new(Duration::from_secs(opts.duration.max(1)));
    let next = AtomicU64::new(0);

    log::info!(
        "Starting double SHA-256 benchmark on {} threads for {} seconds",
        threads,
        opts.duration
    );

    let deadline = Instant::now() + Duration::from_secs(opts.duration);
    workers.install(|| {
        (0..threads).into_par_iter().for_each(|_| {
            while Instant::now() < deadline {
                let start = next.fetch_add(batch, Ordering::Relaxed) % NONCE_SPACE;
                let end = (start + batch).min(NONCE_SPACE);
                let outcome = kernel::scan(&template, start, end);
                counters.record_hashes(outcome.hashes);
                log::trace!("{:?}: scanned {}..{}", std::thread::current().name(), start, end);
            }
        })
    });

    // Report final results
    let stats = counters.snapshot();
    let elapsed = opts.duration.max(1) as f64;
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", stats.hashes_total);
    log::info!(
        "Average hashrate: {:.2} H/s",
        stats.hashes_total as f64 / elapsed
    );
    log::logger().flush(); // Ensure final results appear

    Ok(())
}

/// Generates configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    std::fs::write(&opts.output, config::generate_template())?;
    println!("Wrote {}", opts.output.display());
    Ok(())
}
