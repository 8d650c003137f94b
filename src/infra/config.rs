//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing values take the defaults below.

use crate::services::detector::policy::{
    DetectorConfig, ExitTimePolicy, DEFAULT_EXIT_MARGIN_SECS, DEFAULT_SAMPLE_INTERVAL_SECS,
};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Deployment label attached to metrics (e.g., "care-home-north")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "geofence".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSection {
    /// Expected cadence of the positional source (seconds)
    #[serde(default = "default_sample_interval_secs")]
    pub sample_interval_secs: u64,
    #[serde(default)]
    pub exit_time_policy: ExitTimePolicy,
    #[serde(default = "default_exit_margin_secs")]
    pub exit_margin_secs: u64,
}

impl Default for DetectorSection {
    fn default() -> Self {
        Self {
            sample_interval_secs: default_sample_interval_secs(),
            exit_time_policy: ExitTimePolicy::default(),
            exit_margin_secs: default_exit_margin_secs(),
        }
    }
}

fn default_sample_interval_secs() -> u64 {
    DEFAULT_SAMPLE_INTERVAL_SECS
}

fn default_exit_margin_secs() -> u64 {
    DEFAULT_EXIT_MARGIN_SECS
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegionsConfig {
    /// Region registry snapshot (JSON)
    #[serde(default = "default_regions_file")]
    pub file: String,
    #[serde(default)]
    pub include_inactive: bool,
}

impl Default for RegionsConfig {
    fn default() -> Self {
        Self { file: default_regions_file(), include_inactive: false }
    }
}

fn default_regions_file() -> String {
    "regions.json".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// JSONL sample file; stdin when unset
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self { file: None, shards: default_shards(), queue_capacity: default_queue_capacity() }
    }
}

fn default_shards() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for transition events (JSONL format)
    #[serde(default = "default_egress_file")]
    pub file: String,
    #[serde(default = "default_queue_capacity")]
    pub channel_capacity: usize,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file(), channel_capacity: default_queue_capacity() }
    }
}

fn default_egress_file() -> String {
    "geofence_events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default)]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs(), prometheus_port: 0 }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

/// Seconds as a chrono duration, clamped to the largest representable span
fn seconds_clamped(key: &str, secs: u64) -> chrono::Duration {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds).unwrap_or_else(|| {
        warn!(key = %key, value = %secs, "detector_duration_clamped");
        chrono::Duration::MAX
    })
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub detector: DetectorSection,
    #[serde(default)]
    pub regions: RegionsConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    sample_interval_secs: u64,
    exit_time_policy: ExitTimePolicy,
    exit_margin_secs: u64,
    regions_file: String,
    include_inactive_regions: bool,
    ingest_file: Option<String>,
    shards: usize,
    queue_capacity: usize,
    egress_file: String,
    egress_channel_capacity: usize,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "defaults".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            sample_interval_secs: toml_config.detector.sample_interval_secs,
            exit_time_policy: toml_config.detector.exit_time_policy,
            exit_margin_secs: toml_config.detector.exit_margin_secs,
            regions_file: toml_config.regions.file,
            include_inactive_regions: toml_config.regions.include_inactive,
            ingest_file: toml_config.ingest.file,
            shards: toml_config.ingest.shards,
            queue_capacity: toml_config.ingest.queue_capacity,
            egress_file: toml_config.egress.file,
            egress_channel_capacity: toml_config.egress.channel_capacity,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Determine config file path from the command line or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from `path`, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Detector tunables derived from the `[detector]` section
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            sample_interval: seconds_clamped("sample_interval_secs", self.sample_interval_secs),
            exit_margin: seconds_clamped("exit_margin_secs", self.exit_margin_secs),
            exit_time_policy: self.exit_time_policy,
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn sample_interval_secs(&self) -> u64 {
        self.sample_interval_secs
    }

    pub fn exit_time_policy(&self) -> ExitTimePolicy {
        self.exit_time_policy
    }

    pub fn exit_margin_secs(&self) -> u64 {
        self.exit_margin_secs
    }

    pub fn regions_file(&self) -> &str {
        &self.regions_file
    }

    pub fn include_inactive_regions(&self) -> bool {
        self.include_inactive_regions
    }

    pub fn ingest_file(&self) -> Option<&str> {
        self.ingest_file.as_deref()
    }

    pub fn shards(&self) -> usize {
        self.shards
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn egress_channel_capacity(&self) -> usize {
        self.egress_channel_capacity
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the exit-time policy
    #[cfg(test)]
    pub fn with_exit_time_policy(mut self, policy: ExitTimePolicy) -> Self {
        self.exit_time_policy = policy;
        self
    }

    /// Builder method for tests to set the sample interval
    #[cfg(test)]
    pub fn with_sample_interval_secs(mut self, secs: u64) -> Self {
        self.sample_interval_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "geofence");
        assert_eq!(config.sample_interval_secs(), 300);
        assert_eq!(config.exit_margin_secs(), 60);
        assert_eq!(config.exit_time_policy(), ExitTimePolicy::FixedInterval);
        assert_eq!(config.regions_file(), "regions.json");
        assert_eq!(config.ingest_file(), None);
        assert_eq!(config.shards(), 4);
        assert_eq!(config.egress_file(), "geofence_events.jsonl");
        assert_eq!(config.metrics_interval_secs(), 10);
        assert_eq!(config.prometheus_port(), 0);
    }

    #[test]
    fn test_default_detector_config_matches_detector_default() {
        assert_eq!(Config::default().detector_config(), DetectorConfig::default());
    }

    #[test]
    fn test_builders_flow_into_detector_config() {
        let detector = Config::default()
            .with_exit_time_policy(ExitTimePolicy::ObservedGap)
            .with_sample_interval_secs(120)
            .detector_config();
        assert_eq!(detector.exit_time_policy, ExitTimePolicy::ObservedGap);
        assert_eq!(detector.sample_interval, chrono::Duration::minutes(2));
    }

    #[test]
    fn test_huge_durations_clamp_instead_of_panicking() {
        let detector = Config::default().with_sample_interval_secs(u64::MAX).detector_config();
        assert_eq!(detector.sample_interval, chrono::Duration::MAX);

        let detector = Config::default()
            .with_sample_interval_secs(i64::MAX as u64)
            .detector_config();
        assert_eq!(detector.sample_interval, chrono::Duration::MAX);
        assert_eq!(detector.exit_margin, chrono::Duration::seconds(60));
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/north.toml")), "config/north.toml");
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[detector]
exit_time_policy = "observed_gap"

[ingest]
shards = 8
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.exit_time_policy(), ExitTimePolicy::ObservedGap);
        assert_eq!(config.sample_interval_secs(), 300);
        assert_eq!(config.shards(), 8);
        assert_eq!(config.queue_capacity(), 1024);
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result: Result<TomlConfig, _> =
            toml::from_str("[detector]\nexit_time_policy = \"psychic\"\n");
        assert!(result.is_err());
    }
}
