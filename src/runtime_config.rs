// =============================================================================
// Runtime Configuration — scanner-worker settings
// =============================================================================
//
// Every tunable parameter the worker needs lives here so the process can be
// reconfigured by editing a JSON file, without touching env vars for most of
// it. Deployment-specific values (worker id/total, bind address, the bus URL)
// are the ones actually expected to differ per-process, so those also accept
// an env var override applied after the file loads.
//
// All fields carry `#[serde(default)]` so that adding a new field never
// breaks loading an older config file, and persistence uses an atomic
// tmp + rename write to avoid corrupting the file on a mid-write crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ScannerError;

fn default_scan_interval_ms() -> u64 {
    1_000
}
fn default_scan_max_time_ms() -> u64 {
    800
}
fn default_rule_reload_interval_secs() -> u64 {
    30
}
fn default_max_final_bars() -> usize {
    200
}
fn default_cooldown_sweep_interval_secs() -> u64 {
    60
}
fn default_consumer_batch_size() -> usize {
    256
}
fn default_consumer_ack_timeout_ms() -> u64 {
    250
}
fn default_consumer_partitions() -> usize {
    1
}
fn default_worker_total() -> usize {
    1
}
fn default_indicator_prefix() -> String {
    "ind:".to_string()
}
fn default_alerts_channel() -> String {
    "alerts".to_string()
}
fn default_alerts_stream() -> Option<String> {
    Some("alerts".to_string())
}
fn default_rehydrate_max_bars() -> usize {
    200
}
fn default_rehydrate_lookback_secs() -> u64 {
    3_600
}
fn default_rehydrate_deadline_secs() -> u64 {
    30
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_symbols() -> Vec<String> {
    vec![
        "AAPL".into(),
        "MSFT".into(),
        "GOOG".into(),
        "TSLA".into(),
        "AMZN".into(),
    ]
}

/// `scan.*` — scan loop cadence and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_scan_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_scan_max_time_ms")]
    pub max_time_ms: u64,
    #[serde(default = "default_rule_reload_interval_secs")]
    pub rule_reload_interval_secs: u64,
}

impl ScanConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_ms)
    }
    pub fn rule_reload_interval(&self) -> Duration {
        Duration::from_secs(self.rule_reload_interval_secs)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_scan_interval_ms(),
            max_time_ms: default_scan_max_time_ms(),
            rule_reload_interval_secs: default_rule_reload_interval_secs(),
        }
    }
}

/// `state.*` — symbol state store sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_max_final_bars")]
    pub max_final_bars: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            max_final_bars: default_max_final_bars(),
        }
    }
}

/// `cooldown.*` — background sweep of expired cooldown entries. The
/// cooldown *duration* itself is per-rule (`Rule::cooldown_seconds`); there
/// is no tracker-level global cooldown in this implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    #[serde(default = "default_cooldown_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl CooldownConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_cooldown_sweep_interval_secs(),
        }
    }
}

/// `consumer.*` — batching knobs shared by the tick/bar/indicator consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default = "default_consumer_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_consumer_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_consumer_partitions")]
    pub partitions: usize,
}

impl ConsumerConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_consumer_batch_size(),
            ack_timeout_ms: default_consumer_ack_timeout_ms(),
            partitions: default_consumer_partitions(),
        }
    }
}

/// `worker.*` — this process's identity within the worker fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub id: usize,
    #[serde(default = "default_worker_total")]
    pub total: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: 0,
            total: default_worker_total(),
        }
    }
}

/// `indicator.*` — key-value store key prefix for indicator blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    #[serde(default = "default_indicator_prefix")]
    pub prefix: String,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            prefix: default_indicator_prefix(),
        }
    }
}

/// `alerts.*` — outbound pubsub channel and optional durable stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default = "default_alerts_channel")]
    pub channel: String,
    #[serde(default = "default_alerts_stream")]
    pub stream: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            channel: default_alerts_channel(),
            stream: default_alerts_stream(),
        }
    }
}

/// `rehydration.*` — startup bar/indicator backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RehydrationConfig {
    #[serde(default = "default_rehydrate_max_bars")]
    pub max_bars: usize,
    #[serde(default = "default_rehydrate_lookback_secs")]
    pub lookback_secs: u64,
    #[serde(default = "default_rehydrate_deadline_secs")]
    pub deadline_secs: u64,
}

impl RehydrationConfig {
    pub fn lookback(&self) -> Duration {
        Duration::from_secs(self.lookback_secs)
    }
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Default for RehydrationConfig {
    fn default() -> Self {
        Self {
            max_bars: default_rehydrate_max_bars(),
            lookback_secs: default_rehydrate_lookback_secs(),
            deadline_secs: default_rehydrate_deadline_secs(),
        }
    }
}

/// Top-level runtime configuration for the scanner worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub indicator: IndicatorConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub rehydration: RehydrationConfig,

    /// Symbol universe this worker partitions over at startup and during
    /// rehydration. Symbols outside this list are still accepted into the
    /// state store if ticks/bars arrive for them (the store is not
    /// restricted to this list — see SPEC_FULL.md §4.9 SUPPLEMENT).
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scan: ScanConfig::default(),
            state: StateConfig::default(),
            cooldown: CooldownConfig::default(),
            consumer: ConsumerConfig::default(),
            worker: WorkerConfig::default(),
            indicator: IndicatorConfig::default(),
            alerts: AlertsConfig::default(),
            rehydration: RehydrationConfig::default(),
            symbols: default_symbols(),
            redis_url: default_redis_url(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist or fails to parse, returns an error so the
    /// caller can fall back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            worker_id = config.worker.id,
            worker_total = config.worker.total,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename) so a crash mid-write never corrupts
    /// the config file on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply deployment-specific env var overrides on top of whatever was
    /// loaded from the file. Mirrors the override-after-load pattern used
    /// elsewhere in this codebase for per-deployment values that shouldn't
    /// need a config file edit (worker identity, bind address, bus URL,
    /// symbol universe).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WORKER_ID") {
            if let Ok(id) = v.parse() {
                self.worker.id = id;
            }
        }
        if let Ok(v) = std::env::var("WORKER_TOTAL") {
            if let Ok(total) = v.parse() {
                self.worker.total = total;
            }
        }
        if let Ok(v) = std::env::var("SCANNER_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("REDIS_URL") {
            self.redis_url = v;
        }
        if let Ok(v) = std::env::var("SCANNER_SYMBOLS") {
            let symbols: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !symbols.is_empty() {
                self.symbols = symbols;
            }
        }
    }

    /// Validate cross-field invariants that serde defaults alone can't
    /// enforce. Called once at startup; a failure here is a `ConfigInvalid`
    /// error and is fatal (see SPEC_FULL.md §7).
    pub fn validate(&self) -> std::result::Result<(), ScannerError> {
        if self.worker.total == 0 {
            return Err(ScannerError::ConfigInvalid(
                "worker.total must be > 0".to_string(),
            ));
        }
        if self.worker.id >= self.worker.total {
            return Err(ScannerError::ConfigInvalid(format!(
                "worker.id ({}) must be < worker.total ({})",
                self.worker.id, self.worker.total
            )));
        }
        if self.scan.interval_ms == 0 {
            return Err(ScannerError::ConfigInvalid(
                "scan.interval_ms must be > 0".to_string(),
            ));
        }
        if self.scan.max_time_ms == 0 {
            return Err(ScannerError::ConfigInvalid(
                "scan.max_time_ms must be > 0".to_string(),
            ));
        }
        if self.consumer.batch_size == 0 {
            return Err(ScannerError::ConfigInvalid(
                "consumer.batch_size must be > 0".to_string(),
            ));
        }
        if self.consumer.partitions == 0 {
            return Err(ScannerError::ConfigInvalid(
                "consumer.partitions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.scan.interval_ms, 1_000);
        assert_eq!(cfg.scan.max_time_ms, 800);
        assert_eq!(cfg.state.max_final_bars, 200);
        assert_eq!(cfg.cooldown.sweep_interval_secs, 60);
        assert_eq!(cfg.indicator.prefix, "ind:");
        assert_eq!(cfg.alerts.channel, "alerts");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.scan.interval_ms, 1_000);
        assert_eq!(cfg.worker.total, 1);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "worker": { "id": 2, "total": 8 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.worker.id, 2);
        assert_eq!(cfg.worker.total, 8);
        assert_eq!(cfg.scan.max_time_ms, 800);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.worker.total, cfg2.worker.total);
    }

    #[test]
    fn worker_id_greater_or_equal_total_is_invalid() {
        let mut cfg = RuntimeConfig::default();
        cfg.worker.id = 4;
        cfg.worker.total = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_total_workers_is_invalid() {
        let mut cfg = RuntimeConfig::default();
        cfg.worker.total = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_apply_on_top_of_defaults() {
        std::env::set_var("WORKER_ID", "3");
        std::env::set_var("WORKER_TOTAL", "16");
        std::env::set_var("SCANNER_SYMBOLS", "aapl, msft ,");
        let mut cfg = RuntimeConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.worker.id, 3);
        assert_eq!(cfg.worker.total, 16);
        assert_eq!(cfg.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
        std::env::remove_var("WORKER_ID");
        std::env::remove_var("WORKER_TOTAL");
        std::env::remove_var("SCANNER_SYMBOLS");
    }
}
