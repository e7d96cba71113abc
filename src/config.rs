// src/config.rs

//! Manages server configuration: loading, resolving size values, and validation.

use crate::core::protocol::ResultCode;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use tracing::warn;

/// The per-listener policy consulted by every client connection.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ListenerSettings {
    /// The number of request-handler threads multiplexing client sockets.
    #[serde(default = "default_num_request_handlers")]
    pub num_request_handlers: usize,
    /// Whether clients may upgrade a plaintext connection with StartTLS.
    #[serde(default)]
    pub allow_start_tls: bool,
    /// Whether LDAPv2 binds are accepted.
    #[serde(default)]
    pub allow_ldap_v2: bool,
    /// If true, every connection speaks TLS from the first byte (LDAPS).
    #[serde(default)]
    pub use_ssl: bool,
    /// How long a response write may block before the connection is dropped.
    /// Zero selects the built-in default of five minutes.
    #[serde(with = "humantime_serde", default = "default_max_blocked_write_time")]
    pub max_blocked_write_time: Duration,
    /// Initial capacity of the per-worker response encoding buffers.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Requests larger than this are rejected and the client disconnected.
    /// `0` disables the check.
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    /// Whether per-listener statistics are maintained.
    #[serde(default = "default_true")]
    pub keep_stats: bool,
    /// Administrative listeners execute operations on the reading thread
    /// instead of the shared work queue.
    #[serde(default)]
    pub admin_connector: bool,
    /// Connections idle for longer than this are closed. Zero disables the limit.
    #[serde(with = "humantime_serde", default)]
    pub idle_time_limit: Duration,
    /// How long a disconnected connection's channels stay open before they
    /// are closed by the finalizer.
    #[serde(with = "humantime_serde", default = "default_finalizer_delay")]
    pub finalizer_delay: Duration,
    /// The result code reported for internal server errors.
    #[serde(default = "default_server_error_result_code")]
    pub server_error_result_code: ResultCode,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            num_request_handlers: default_num_request_handlers(),
            allow_start_tls: false,
            allow_ldap_v2: false,
            use_ssl: false,
            max_blocked_write_time: default_max_blocked_write_time(),
            buffer_size: default_buffer_size(),
            max_request_size: default_max_request_size(),
            keep_stats: true,
            admin_connector: false,
            idle_time_limit: Duration::ZERO,
            finalizer_delay: default_finalizer_delay(),
            server_error_result_code: default_server_error_result_code(),
        }
    }
}

fn default_num_request_handlers() -> usize {
    2
}
fn default_max_blocked_write_time() -> Duration {
    Duration::from_secs(120)
}
fn default_buffer_size() -> usize {
    4096
}
fn default_max_request_size() -> usize {
    5 * 1024 * 1024 // 5 MB
}
fn default_true() -> bool {
    true
}
fn default_finalizer_delay() -> Duration {
    Duration::from_millis(100)
}
fn default_server_error_result_code() -> ResultCode {
    ResultCode::OTHER
}

/// Configuration for TLS key material, used by LDAPS and StartTLS.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_path: String,
    #[serde(default)]
    pub key_path: String,
}

impl TlsConfig {
    pub fn is_configured(&self) -> bool {
        !self.cert_path.trim().is_empty() && !self.key_path.trim().is_empty()
    }
}

/// Configuration for the shared work queue.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkQueueConfig {
    /// The maximum number of operations queued or executing at once.
    #[serde(default = "default_work_queue_capacity")]
    pub max_capacity: usize,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_work_queue_capacity(),
        }
    }
}

fn default_work_queue_capacity() -> usize {
    1024
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_metrics_port() -> u16 {
    8389
}

/// The fully resolved and validated server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    pub listener: ListenerSettings,
    pub tls: TlsConfig,
    pub work_queue: WorkQueueConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            listener: ListenerSettings::default(),
            tls: TlsConfig::default(),
            work_queue: WorkQueueConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// A size given either as a byte count or as a string with a unit suffix.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
enum SizeConfig {
    Bytes(usize),
    String(String),
}

/// A raw representation of the config file before validation and resolution.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    /// Kept untyped until size strings such as `"4kb"` are resolved.
    #[serde(default)]
    listener: toml::Table,
    #[serde(default)]
    tls: TlsConfig,
    #[serde(default)]
    work_queue: WorkQueueConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    389
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    10000
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config file '{path}'"))
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let listener = resolve_listener(raw_config.listener)?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            listener,
            tls: raw_config.tls,
            work_queue: raw_config.work_queue,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }
        if self.listener.num_request_handlers == 0 {
            return Err(anyhow!("listener.num_request_handlers cannot be 0"));
        }
        if self.listener.buffer_size == 0 {
            return Err(anyhow!("listener.buffer_size cannot be 0"));
        }
        if self.work_queue.max_capacity == 0 {
            return Err(anyhow!("work_queue.max_capacity cannot be 0"));
        }

        if self.listener.use_ssl && !self.tls.is_configured() {
            return Err(anyhow!(
                "listener.use_ssl requires tls.cert_path and tls.key_path"
            ));
        }
        if self.listener.allow_start_tls && !self.tls.is_configured() {
            return Err(anyhow!(
                "listener.allow_start_tls requires tls.cert_path and tls.key_path"
            ));
        }
        if self.listener.use_ssl && self.listener.allow_start_tls {
            warn!("listener.allow_start_tls has no effect when listener.use_ssl is enabled.");
        }

        if self.listener.max_request_size > 0 && self.listener.max_request_size < 1024 {
            warn!(
                "low listener.max_request_size setting: {} bytes. Most bind requests will be rejected.",
                self.listener.max_request_size
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}

/// Resolves the `[listener]` table, accepting unit-suffixed strings for the
/// size settings.
fn resolve_listener(mut table: toml::Table) -> Result<ListenerSettings> {
    for key in ["buffer_size", "max_request_size"] {
        if let Some(value) = table.remove(key) {
            let size: SizeConfig = value
                .try_into()
                .with_context(|| format!("Invalid value for listener.{key}"))?;
            let bytes = resolve_size(key, size)?;
            let bytes = i64::try_from(bytes)
                .map_err(|_| anyhow!("listener.{key} is too large"))?;
            table.insert(key.to_string(), toml::Value::Integer(bytes));
        }
    }
    toml::Value::Table(table)
        .try_into()
        .context("Invalid [listener] configuration")
}

/// Resolves a `SizeConfig` into a byte count.
fn resolve_size(key: &str, cfg: SizeConfig) -> Result<usize> {
    match cfg {
        SizeConfig::Bytes(b) => Ok(b),
        SizeConfig::String(s) => {
            let s_lower = s.trim().to_lowercase();
            if let Some(val_str) = s_lower.strip_suffix("gb") {
                parse_size_string(key, &s, val_str, 1024 * 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("mb") {
                parse_size_string(key, &s, val_str, 1024 * 1024)
            } else if let Some(val_str) = s_lower.strip_suffix("kb") {
                parse_size_string(key, &s, val_str, 1024)
            } else if let Some(val_str) = s_lower.strip_suffix('b') {
                parse_size_string(key, &s, val_str, 1)
            } else {
                s_lower.parse().with_context(|| {
                    format!("Invalid {key} value '{s}'. Must be a number of bytes or have a unit (e.g., '512kb').")
                })
            }
        }
    }
}

/// Parses a string number with a unit (kb, mb, gb) and applies a multiplier.
fn parse_size_string(key: &str, original_str: &str, value_str: &str, multiplier: u64) -> Result<usize> {
    let value: u64 = value_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid number in {key}: '{original_str}'"))?;
    let result_u64 = value.saturating_mul(multiplier);
    usize::try_from(result_u64).map_err(|_| {
        anyhow!(
            "{} value '{}' is too large for this system's architecture (max is {} bytes)",
            key,
            original_str,
            usize::MAX
        )
    })
}
