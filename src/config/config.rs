// src/config/config.rs
use crate::miner::dispatcher::DispatcherConfig;
use crate::miner::work::NONCE_SPACE;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the miner
///
/// Every section is optional; missing keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// File solutions are appended to
    /// (default: `share.<hostname>.log`)
    #[serde(default = "default_share_log")]
    pub share_log: PathBuf,

    /// How many contexts of each kind to run
    #[serde(default)]
    pub accelerators: AcceleratorConfig,

    /// Partitioning and timing of the control loop
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Hash-rate window and report cadence
    #[serde(default)]
    pub stats: StatsConfig,
}

/// `[accelerators]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Kernel threads on the control core
    /// (default: number of CPU cores)
    pub ppu_threads: usize,

    /// Accelerator core contexts
    /// (default: CPU cores minus two, at least one)
    pub spu_cores: usize,

    /// Per-scan debug logging inside the accelerators
    pub debug: bool,
}

/// `[dispatch]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Nonces per work unit (default: 2^32 / 128)
    pub work_unit_size: u64,
    /// Exclusive upper bound of the searched nonce space (default: 2^32)
    pub nonce_limit: u64,
    /// Milliseconds a unit may run before its context is faulted
    pub fault_timeout_ms: u64,
    /// Milliseconds to back off when no context is free
    pub submit_backoff_ms: u64,
    /// Longest single wait on the pool, in milliseconds
    pub poll_interval_ms: u64,
}

/// `[stats]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Width of the hash-rate window in seconds
    pub hashrate_window_secs: u64,
    /// Seconds between periodic reports
    pub report_interval_secs: u64,
}

fn default_share_log() -> PathBuf {
    let host = sysinfo::System::host_name().unwrap_or_else(|| "localhost".into());
    PathBuf::from(format!("share.{}.log", host))
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        let cores = num_cpus::get();
        AcceleratorConfig {
            ppu_threads: cores,
            spu_cores: cores.saturating_sub(2).max(1),
            debug: false,
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            work_unit_size: NONCE_SPACE / 128,
            nonce_limit: NONCE_SPACE,
            fault_timeout_ms: 60_000,
            submit_backoff_ms: 50,
            poll_interval_ms: 250,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        StatsConfig {
            hashrate_window_secs: 60,
            report_interval_secs: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            share_log: default_share_log(),
            accelerators: AcceleratorConfig::default(),
            dispatch: DispatchConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the dispatcher cannot work with
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.accelerators.ppu_threads + self.accelerators.spu_cores == 0 {
            return Err(MinerError::ConfigError(
                "at least one accelerator context is required".into(),
            ));
        }
        if self.dispatch.work_unit_size == 0 {
            return Err(MinerError::ConfigError("work_unit_size must be positive".into()));
        }
        if self.dispatch.nonce_limit == 0 || self.dispatch.nonce_limit > NONCE_SPACE {
            return Err(MinerError::ConfigError(format!(
                "nonce_limit must be in 1..={}",
                NONCE_SPACE
            )));
        }
        if self.dispatch.fault_timeout_ms == 0 {
            return Err(MinerError::ConfigError("fault_timeout_ms must be positive".into()));
        }
        if self.stats.hashrate_window_secs == 0 {
            return Err(MinerError::ConfigError(
                "hashrate_window_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Dispatcher policy derived from the `[dispatch]` section
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            work_unit_size: self.dispatch.work_unit_size,
            nonce_limit: self.dispatch.nonce_limit,
            submit_backoff: Duration::from_millis(self.dispatch.submit_backoff_ms),
            poll_interval: Duration::from_millis(self.dispatch.poll_interval_ms),
        }
    }

    /// Deadline after which a busy context is declared faulted
    pub fn fault_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch.fault_timeout_ms)
    }

    /// Width of the hash-rate window
    pub fn hashrate_window(&self) -> Duration {
        Duration::from_secs(self.stats.hashrate_window_secs)
    }

    /// Interval between periodic stats reports
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.stats.report_interval_secs)
    }

    /// Generates a configuration template string
    ///
    /// # Returns
    /// String containing a commented TOML configuration template with the
    /// defaults for this machine filled in
    pub fn generate_template() -> String {
        let defaults = Config::default();
        let mut template = String::new();
        template.push_str("# cellminer configuration\n\n");
        template.push_str("# Solutions are appended here as \"<time> <header hex> <nonce>\"\n");
        template.push_str(&format!("share_log = {:?}\n\n", defaults.share_log.display().to_string()));

        template.push_str("[accelerators]\n");
        template.push_str("# Kernel threads on the control core\n");
        template.push_str(&format!("ppu_threads = {}\n", defaults.accelerators.ppu_threads));
        template.push_str("# Accelerator core contexts\n");
        template.push_str(&format!("spu_cores = {}\n", defaults.accelerators.spu_cores));
        template.push_str("# Log every scan\n");
        template.push_str("debug = false\n\n");

        template.push_str("[dispatch]\n");
        template.push_str("# Nonces per work unit (2^32 / 128)\n");
        template.push_str(&format!("work_unit_size = {}\n", defaults.dispatch.work_unit_size));
        template.push_str("# Upper bound of the nonce space searched per template\n");
        template.push_str(&format!("nonce_limit = {}\n", defaults.dispatch.nonce_limit));
        template.push_str("# A unit running longer than this faults its context\n");
        template.push_str(&format!("fault_timeout_ms = {}\n", defaults.dispatch.fault_timeout_ms));
        template.push_str(&format!("submit_backoff_ms = {}\n", defaults.dispatch.submit_backoff_ms));
        template.push_str(&format!("poll_interval_ms = {}\n\n", defaults.dispatch.poll_interval_ms));

        template.push_str("[stats]\n");
        template.push_str(&format!(
            "hashrate_window_secs = {}\n",
            defaults.stats.hashrate_window_secs
        ));
        template.push_str(&format!(
            "report_interval_secs = {}\n",
            defaults.stats.report_interval_secs
        ));

        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_takes_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.dispatch.work_unit_size * 128, NONCE_SPACE);
        assert_eq!(config.dispatch.nonce_limit, NONCE_SPACE);
        assert!(config.accelerators.spu_cores >= 1);
        assert!(config.share_log.to_string_lossy().starts_with("share."));
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            "[accelerators]\nspu_cores = 6\n\n[dispatch]\nwork_unit_size = 1000\n",
        )
        .unwrap();
        assert_eq!(config.accelerators.spu_cores, 6);
        assert_eq!(config.accelerators.ppu_threads, num_cpus::get());
        assert_eq!(config.dispatch.work_unit_size, 1000);
        assert_eq!(config.dispatch.poll_interval_ms, 250);

        let dispatcher = config.dispatcher_config();
        assert_eq!(dispatcher.work_unit_size, 1000);
        assert_eq!(dispatcher.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn generated_template_parses_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(Config::generate_template().as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        let defaults = Config::default();
        assert_eq!(config.share_log, defaults.share_log);
        assert_eq!(config.accelerators.spu_cores, defaults.accelerators.spu_cores);
        assert_eq!(config.dispatch.nonce_limit, NONCE_SPACE);
        assert_eq!(config.stats.report_interval_secs, 10);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut config = Config::default();
        config.dispatch.nonce_limit = NONCE_SPACE + 1;
        assert!(matches!(config.validate(), Err(MinerError::ConfigError(_))));

        let mut config = Config::default();
        config.accelerators.ppu_threads = 0;
        config.accelerators.spu_cores = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.dispatch.work_unit_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path().join("absent.toml")),
            Err(MinerError::ConfigError(_))
        ));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[dispatch]\nwork_unit_size = \"lots\"\n").unwrap();
        assert!(matches!(Config::load(file.path()), Err(MinerError::ConfigError(_))));
    }
}
