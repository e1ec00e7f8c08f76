//! Configuration loading from TOML files
//!
//! Config file is selected via the --config command line argument
//! (default: config/dev.toml). A missing or invalid file falls back to
//! built-in defaults with a warning.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique lot identifier (e.g., "lot-north", "lot-a")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "lot-a".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    /// Topic LPR cameras publish observation batches to
    #[serde(default = "default_observations_topic")]
    pub observations_topic: String,
    /// Topic the management UI publishes operator commands to
    #[serde(default = "default_commands_topic")]
    pub commands_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_observations_topic() -> String {
    "lpr/observations".to_string()
}

fn default_commands_topic() -> String {
    "lpr/commands".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { bind_address: default_broker_bind_address(), port: default_broker_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LotConfig {
    pub total_slots: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    pub rate_per_hour: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Minimum seconds between two accepted observations of the same plate
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Interval between eviction sweeps of the dedup map
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    6
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// File path for the session log (JSONL format)
    #[serde(default = "default_store_file")]
    pub file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { file: default_store_file() }
    }
}

fn default_store_file() -> String {
    "data/sessions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_egress_enabled")]
    pub enabled: bool,
    /// Topic for session opened/closed events (QoS 1)
    #[serde(default = "default_sessions_topic")]
    pub sessions_topic: String,
    /// Topic for occupancy snapshots (QoS 0)
    #[serde(default = "default_occupancy_topic")]
    pub occupancy_topic: String,
    /// Topic for periodic metrics snapshots (QoS 0)
    #[serde(default = "default_metrics_topic")]
    pub metrics_topic: String,
    /// Interval for publishing metrics (seconds)
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_egress_enabled(),
            sessions_topic: default_sessions_topic(),
            occupancy_topic: default_occupancy_topic(),
            metrics_topic: default_metrics_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_egress_enabled() -> bool {
    true
}

fn default_sessions_topic() -> String {
    "parking/sessions".to_string()
}

fn default_occupancy_topic() -> String {
    "parking/occupancy".to_string()
}

fn default_metrics_topic() -> String {
    "parking/metrics".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub mqtt: MqttConfig,
    pub lot: LotConfig,
    pub billing: BillingConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    observations_topic: String,
    commands_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    broker_bind_address: String,
    broker_port: u16,
    total_slots: u32,
    rate_per_hour: f64,
    cooldown_secs: u64,
    sweep_interval_secs: u64,
    store_file: String,
    egress_enabled: bool,
    egress_sessions_topic: String,
    egress_occupancy_topic: String,
    egress_metrics_topic: String,
    egress_metrics_interval_secs: u64,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            observations_topic: default_observations_topic(),
            commands_topic: default_commands_topic(),
            mqtt_username: None,
            mqtt_password: None,
            broker_bind_address: default_broker_bind_address(),
            broker_port: default_broker_port(),
            total_slots: 20,
            rate_per_hour: 2000.0,
            cooldown_secs: default_cooldown_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            store_file: default_store_file(),
            egress_enabled: true,
            egress_sessions_topic: default_sessions_topic(),
            egress_occupancy_topic: default_occupancy_topic(),
            egress_metrics_topic: default_metrics_topic(),
            egress_metrics_interval_secs: default_metrics_publish_interval(),
            metrics_interval_secs: default_metrics_interval(),
            prometheus_port: default_prometheus_port(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        anyhow::ensure!(
            toml_config.lot.total_slots > 0,
            "lot.total_slots must be a positive integer"
        );

        Ok(Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            observations_topic: toml_config.mqtt.observations_topic,
            commands_topic: toml_config.mqtt.commands_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            total_slots: toml_config.lot.total_slots,
            rate_per_hour: toml_config.billing.rate_per_hour,
            cooldown_secs: toml_config.dedup.cooldown_secs,
            sweep_interval_secs: toml_config.dedup.sweep_interval_secs,
            store_file: toml_config.store.file,
            egress_enabled: toml_config.egress.enabled,
            egress_sessions_topic: toml_config.egress.sessions_topic,
            egress_occupancy_topic: toml_config.egress.occupancy_topic,
            egress_metrics_topic: toml_config.egress.metrics_topic,
            egress_metrics_interval_secs: toml_config.egress.metrics_publish_interval_secs,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn observations_topic(&self) -> &str {
        &self.observations_topic
    }

    pub fn commands_topic(&self) -> &str {
        &self.commands_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn total_slots(&self) -> u32 {
        self.total_slots
    }

    pub fn rate_per_hour(&self) -> f64 {
        self.rate_per_hour
    }

    pub fn cooldown_secs(&self) -> u64 {
        self.cooldown_secs
    }

    pub fn sweep_interval_secs(&self) -> u64 {
        self.sweep_interval_secs
    }

    pub fn store_file(&self) -> &str {
        &self.store_file
    }

    pub fn egress_enabled(&self) -> bool {
        self.egress_enabled
    }

    pub fn egress_sessions_topic(&self) -> &str {
        &self.egress_sessions_topic
    }

    pub fn egress_occupancy_topic(&self) -> &str {
        &self.egress_occupancy_topic
    }

    pub fn egress_metrics_topic(&self) -> &str {
        &self.egress_metrics_topic
    }

    pub fn egress_metrics_interval_secs(&self) -> u64 {
        self.egress_metrics_interval_secs
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

    /// Builder method for tests to set the total slot count
    #[cfg(test)]
    pub fn with_total_slots(mut self, slots: u32) -> Self {
        self.total_slots = slots;
        self
    }

    /// Builder method for tests to set the hourly rate
    #[cfg(test)]
    pub fn with_rate_per_hour(mut self, rate: f64) -> Self {
        self.rate_per_hour = rate;
        self
    }

    /// Builder method for tests to set the dedup cooldown
    #[cfg(test)]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }
}
