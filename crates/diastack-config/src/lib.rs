use diastack_core::TransportKind;
use diastack_logging::LogFormat;
use diastack_peer_core::{LocalIdentity, PeerConfig, PeerMode, PeerTimers};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    LoadError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Whole-stack configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StackConfig {
    #[validate(nested)]
    pub local: LocalConfig,
    #[serde(default)]
    #[validate(nested)]
    pub peers: Vec<PeerEntry>,
    #[serde(default)]
    #[validate(nested)]
    pub timers: TimerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub logging: LoggingConfig,
    /// Extra XML dictionary merged over the base one
    #[serde(default)]
    pub dictionary: Option<String>,
    /// Largest inbound message accepted, in bytes
    #[serde(default = "default_max_message_len")]
    #[validate(range(min = 20, max = 16777215))]
    pub max_message_len: usize,
}

/// This node's identity and advertised capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LocalConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(length(min = 1))]
    pub realm: String,
    #[serde(default)]
    pub host_ip_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub vendor_id: u32,
    #[serde(default = "default_product_name")]
    #[validate(length(min = 1))]
    pub product_name: String,
    /// Defaults to the start time in seconds
    #[serde(default)]
    pub origin_state_id: Option<u32>,
    #[serde(default)]
    pub auth_application_ids: Vec<u32>,
    #[serde(default)]
    pub acct_application_ids: Vec<u32>,
    /// Address to accept inbound peer connections on
    #[serde(default)]
    pub listen: Option<SocketAddr>,
}

/// One configured remote peer
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_peer"))]
pub struct PeerEntry {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(length(min = 1))]
    pub realm: String,
    #[serde(default)]
    pub address: Option<SocketAddr>,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub mode: PeerMode,
    #[serde(default = "default_true")]
    pub retry: bool,
}

/// Timer settings in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_backoff"))]
pub struct TimerConfig {
    #[validate(range(min = 1))]
    pub handshake_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub watchdog_interval_ms: u64,
    #[validate(range(min = 1))]
    pub max_watchdog_failures: u32,
    #[validate(range(min = 1))]
    pub reconnect_base_ms: u64,
    #[validate(range(min = 1))]
    pub reconnect_max_ms: u64,
    #[validate(range(min = 1))]
    pub disconnect_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub drain_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub transaction_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    #[validate(length(min = 1))]
    pub level: String,
    pub format: LogFormat,
}

fn default_max_message_len() -> usize {
    65535
}

fn default_product_name() -> String {
    "diastack".to_string()
}

fn default_true() -> bool {
    true
}

fn validate_peer(peer: &PeerEntry) -> Result<(), ValidationError> {
    if peer.mode == PeerMode::Active && peer.address.is_none() {
        return Err(ValidationError::new("active_peer_without_address"));
    }
    Ok(())
}

fn validate_backoff(timers: &TimerConfig) -> Result<(), ValidationError> {
    if timers.reconnect_base_ms > timers.reconnect_max_ms {
        return Err(ValidationError::new("reconnect_base_above_max"));
    }
    Ok(())
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            watchdog_interval_ms: 30_000,
            max_watchdog_failures: 3,
            reconnect_base_ms: 1_000,
            reconnect_max_ms: 60_000,
            disconnect_timeout_ms: 5_000,
            drain_timeout_ms: 5_000,
            transaction_timeout_ms: 10_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl TimerConfig {
    pub fn peer_timers(&self) -> PeerTimers {
        PeerTimers {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            watchdog_interval: Duration::from_millis(self.watchdog_interval_ms),
            max_watchdog_failures: self.max_watchdog_failures,
            reconnect_base: Duration::from_millis(self.reconnect_base_ms),
            reconnect_max: Duration::from_millis(self.reconnect_max_ms),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
        }
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.transaction_timeout_ms)
    }
}

impl LocalConfig {
    pub fn identity(&self) -> LocalIdentity {
        let origin_state_id = self.origin_state_id.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as u32)
                .unwrap_or(0)
        });

        LocalIdentity {
            host: self.host.clone(),
            realm: self.realm.clone(),
            host_ip_addresses: self.host_ip_addresses.clone(),
            vendor_id: self.vendor_id,
            product_name: self.product_name.clone(),
            origin_state_id,
            auth_application_ids: self.auth_application_ids.clone(),
            acct_application_ids: self.acct_application_ids.clone(),
        }
    }
}

impl PeerEntry {
    pub fn peer_config(&self, timers: &TimerConfig) -> PeerConfig {
        PeerConfig {
            host: self.host.clone(),
            realm: self.realm.clone(),
            mode: self.mode,
            retry: self.retry,
            timers: timers.peer_timers(),
        }
    }
}

/// Load configuration from file, overlaid with `DIASTACK__*` environment variables
pub fn load_config<T>(path: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let config: T = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("DIASTACK").separator("__"))
        .build()
        .map_err(|e| ConfigError::LoadError(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::LoadError(e.to_string()))?;

    config
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    Ok(config)
}

/// Load configuration from YAML string (for testing)
pub fn load_from_yaml<T>(yaml: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Validate,
{
    let config: T =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::LoadError(e.to_string()))?;
    config
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
    Ok(config)
}
