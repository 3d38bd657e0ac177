//! Layered Configuration
//!
//! Loads a [`StreamingConfig`] from `~/.config/pulse/pulse.toml`, then lets
//! environment variables and finally CLI flags override individual values.
//!
//! # Configuration Priority
//!
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`PULSE_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [connection]
//! url = "wss://feed.example.com/stream"
//! fallback_urls = ["wss://backup.example.com/stream"]
//! reconnect_interval_ms = 1000
//! max_reconnect_attempts = 5
//! heartbeat_interval_ms = 1000
//!
//! [buffer]
//! buffer_size = 100000
//!
//! [behavior]
//! enable_offline_mode = true
//! data_validation = true
//!
//! [synthetic]
//! rate_per_second = 25.0
//! categories = ["cpu", "memory"]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::recovery::DEFAULT_HISTORY_LIMIT;
use crate::session::{SessionConfig, MAX_TIMER_DELAY};
use crate::streaming::{BufferConfig, SyntheticConfig};
use crate::transport::HeartbeatConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Where the effective configuration last got a value from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Command-line argument
    Cli,
    /// Environment variable
    Env,
    /// TOML configuration file
    File,
    /// Built-in default
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Effective Configuration
// =============================================================================

/// Transport and reconnection settings
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectionSettings {
    /// Primary stream URL
    pub url: Option<String>,
    /// Tried in order once the primary's reconnect budget is spent
    pub fallback_urls: Vec<String>,
    /// Base reconnect delay
    pub reconnect_interval: Duration,
    /// Reconnect delay cap
    pub max_reconnect_delay: Duration,
    /// Reconnects per URL
    pub max_reconnect_attempts: u32,
    /// Backoff growth factor
    pub reconnect_backoff_multiplier: f64,
    /// Whether pings are sent at all
    pub heartbeat_enabled: bool,
    /// Ping cadence
    pub heartbeat_interval: Duration,
    /// Unanswered pings before the link is considered dead
    pub max_missed_pongs: u32,
    /// Open timeout
    pub connection_timeout: Duration,
    /// Reconnect after abnormal closes
    pub auto_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            url: None,
            fallback_urls: Vec::new(),
            reconnect_interval: session.reconnect_interval,
            max_reconnect_delay: session.max_reconnect_delay,
            max_reconnect_attempts: session.max_reconnect_attempts,
            reconnect_backoff_multiplier: session.backoff_multiplier,
            heartbeat_enabled: session.heartbeat.enabled,
            heartbeat_interval: session.heartbeat.interval,
            max_missed_pongs: session.heartbeat.max_missed_pongs,
            connection_timeout: session.connection_timeout,
            auto_reconnect: session.auto_reconnect,
        }
    }
}

/// Buffer sizing
#[derive(Clone, Debug, PartialEq)]
pub struct BufferSettings {
    /// Window capacity in samples
    pub buffer_size: usize,
    /// Estimated footprint that triggers the memory-pressure hook
    pub memory_threshold_bytes: usize,
    /// Minimum spacing of optimize passes
    pub optimize_interval: Duration,
}

impl Default for BufferSettings {
    fn default() -> Self {
        let buffer = BufferConfig::default();
        Self {
            buffer_size: buffer.capacity,
            memory_threshold_bytes: buffer.memory_threshold_bytes,
            optimize_interval: buffer.optimize_interval,
        }
    }
}

/// Facade behavior
#[derive(Clone, Debug, PartialEq)]
pub struct BehaviorSettings {
    /// Fall back to synthetic data while the stream is unavailable
    pub enable_offline_mode: bool,
    /// Reject structurally invalid samples and track integrity
    pub data_validation: bool,
    /// Metrics emission period
    pub metrics_interval: Duration,
    /// Recovery attempts kept in history
    pub recovery_history_limit: usize,
}

impl Default for BehaviorSettings {
    fn default() -> Self {
        Self {
            enable_offline_mode: false,
            data_validation: true,
            metrics_interval: Duration::from_secs(1),
            recovery_history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// Synthetic generation settings
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticSettings {
    /// Baseline samples per second
    pub rate_per_second: f64,
    /// Generation tick
    pub tick: Duration,
    /// Categories rotated through
    pub categories: Vec<String>,
}

impl Default for SyntheticSettings {
    fn default() -> Self {
        let synthetic = SyntheticConfig::default();
        Self {
            rate_per_second: synthetic.rate_per_second,
            tick: synthetic.tick,
            categories: synthetic.categories,
        }
    }
}

/// Complete streaming configuration
///
/// Built from defaults, a TOML file, environment variables and CLI flags
/// with proper priority handling.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamingConfig {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Buffer settings
    pub buffer: BufferSettings,
    /// Behavior settings
    pub behavior: BehaviorSettings,
    /// Synthetic generation settings
    pub synthetic: SyntheticSettings,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for ConfigSource {
    fn default() -> Self {
        Self::Default
    }
}

impl StreamingConfig {
    /// Defaults plus a primary URL
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.connection.url = Some(url.into());
        config
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Primary URL followed by fallbacks, blanks skipped
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        self.connection
            .url
            .iter()
            .chain(self.connection.fallback_urls.iter())
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Reject values the runtime cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "buffer_size must be greater than 0".to_string(),
            ));
        }
        let multiplier = self.connection.reconnect_backoff_multiplier;
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "reconnect_backoff_multiplier must be >= 1, got {multiplier}"
            )));
        }
        if self.connection.heartbeat_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "heartbeat_interval must be greater than 0".to_string(),
            ));
        }
        if self.synthetic.tick.is_zero() {
            return Err(ConfigError::ValidationError(
                "synthetic tick must be greater than 0".to_string(),
            ));
        }
        if self.behavior.metrics_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "metrics_interval must be greater than 0".to_string(),
            ));
        }
        let durations = [
            ("reconnect_interval", self.connection.reconnect_interval),
            ("max_reconnect_delay", self.connection.max_reconnect_delay),
            ("heartbeat_interval", self.connection.heartbeat_interval),
            ("connection_timeout", self.connection.connection_timeout),
            ("optimize_interval", self.buffer.optimize_interval),
            ("metrics_interval", self.behavior.metrics_interval),
            ("synthetic tick", self.synthetic.tick),
        ];
        if let Some((name, value)) = durations.iter().find(|(_, d)| *d > MAX_TIMER_DELAY) {
            return Err(ConfigError::ValidationError(format!(
                "{name} must be at most {}s, got {}s",
                MAX_TIMER_DELAY.as_secs(),
                value.as_secs()
            )));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus at least one stream URL
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] when no URL is configured.
    pub fn validate_for_connect(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.urls().is_empty() {
            return Err(ConfigError::ValidationError(
                "no stream URL configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Session settings derived from this config
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let c = &self.connection;
        SessionConfig {
            urls: self.urls(),
            reconnect_interval: c.reconnect_interval,
            max_reconnect_delay: c.max_reconnect_delay,
            max_reconnect_attempts: c.max_reconnect_attempts,
            backoff_multiplier: c.reconnect_backoff_multiplier,
            heartbeat: HeartbeatConfig {
                interval: c.heartbeat_interval,
                max_missed_pongs: c.max_missed_pongs,
                enabled: c.heartbeat_enabled,
            },
            connection_timeout: c.connection_timeout,
            auto_reconnect: c.auto_reconnect,
            data_validation: self.behavior.data_validation,
        }
    }

    /// Buffer settings derived from this config
    #[must_use]
    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            capacity: self.buffer.buffer_size,
            memory_threshold_bytes: self.buffer.memory_threshold_bytes,
            optimize_interval: self.buffer.optimize_interval,
            ..BufferConfig::default()
        }
    }

    /// Generator settings derived from this config
    #[must_use]
    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            rate_per_second: self.synthetic.rate_per_second,
            tick: self.synthetic.tick,
            categories: self.synthetic.categories.clone(),
            ..SyntheticConfig::default()
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[connection]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionToml {
    /// Primary stream URL
    pub url: Option<String>,
    /// Fallback URLs in order
    pub fallback_urls: Option<Vec<String>>,
    /// Base reconnect delay in milliseconds
    pub reconnect_interval_ms: Option<u64>,
    /// Reconnect delay cap in milliseconds
    pub max_reconnect_delay_ms: Option<u64>,
    /// Reconnects per URL
    pub max_reconnect_attempts: Option<u32>,
    /// Backoff growth factor
    pub reconnect_backoff_multiplier: Option<f64>,
    /// Whether to send pings
    pub heartbeat_enabled: Option<bool>,
    /// Ping cadence in milliseconds
    pub heartbeat_interval_ms: Option<u64>,
    /// Unanswered pings before disconnect
    pub max_missed_pongs: Option<u32>,
    /// Open timeout in milliseconds
    pub connection_timeout_ms: Option<u64>,
    /// Reconnect after abnormal closes
    pub auto_reconnect: Option<bool>,
}

/// `[buffer]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferToml {
    /// Window capacity
    pub buffer_size: Option<usize>,
    /// Memory-pressure threshold in bytes
    pub memory_threshold_bytes: Option<usize>,
    /// Optimize throttle in milliseconds
    pub optimize_interval_ms: Option<u64>,
}

/// `[behavior]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorToml {
    /// Synthetic fallback while offline
    pub enable_offline_mode: Option<bool>,
    /// Sample validation
    pub data_validation: Option<bool>,
    /// Metrics period in milliseconds
    pub metrics_interval_ms: Option<u64>,
    /// Recovery history cap
    pub recovery_history_limit: Option<usize>,
}

/// `[synthetic]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticToml {
    /// Baseline rate
    pub rate_per_second: Option<f64>,
    /// Tick in milliseconds
    pub tick_ms: Option<u64>,
    /// Categories to generate
    pub categories: Option<Vec<String>>,
}

/// Root of `pulse.toml`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PulseToml {
    /// `[connection]`
    pub connection: ConnectionToml,
    /// `[buffer]`
    pub buffer: BufferToml,
    /// `[behavior]`
    pub behavior: BehaviorToml,
    /// `[synthetic]`
    pub synthetic: SyntheticToml,
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Environment variables consulted by [`load_config`]
pub const ENV_VARS: [&str; 9] = [
    "PULSE_URL",
    "PULSE_FALLBACK_URLS",
    "PULSE_BUFFER_SIZE",
    "PULSE_HEARTBEAT_INTERVAL",
    "PULSE_CONNECT_TIMEOUT",
    "PULSE_RECONNECT_ATTEMPTS",
    "PULSE_RECONNECT_INTERVAL",
    "PULSE_OFFLINE_MODE",
    "PULSE_VALIDATION",
];

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/pulse/pulse.toml` or
/// `~/.config/pulse/pulse.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("pulse").join("pulse.toml"))
}

/// Load configuration from the default path and the process environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<StreamingConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path and the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<StreamingConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<StreamingConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = StreamingConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: PulseToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);

    Ok(config)
}

fn apply_toml_config(config: &mut StreamingConfig, toml: &PulseToml) {
    let c = &toml.connection;
    let conn = &mut config.connection;
    if c.url.is_some() {
        conn.url.clone_from(&c.url);
    }
    if let Some(ref urls) = c.fallback_urls {
        conn.fallback_urls.clone_from(urls);
    }
    if let Some(ms) = c.reconnect_interval_ms {
        conn.reconnect_interval = Duration::from_millis(ms);
    }
    if let Some(ms) = c.max_reconnect_delay_ms {
        conn.max_reconnect_delay = Duration::from_millis(ms);
    }
    if let Some(n) = c.max_reconnect_attempts {
        conn.max_reconnect_attempts = n;
    }
    if let Some(m) = c.reconnect_backoff_multiplier {
        conn.reconnect_backoff_multiplier = m;
    }
    if let Some(enabled) = c.heartbeat_enabled {
        conn.heartbeat_enabled = enabled;
    }
    if let Some(ms) = c.heartbeat_interval_ms {
        conn.heartbeat_interval = Duration::from_millis(ms);
    }
    if let Some(n) = c.max_missed_pongs {
        conn.max_missed_pongs = n;
    }
    if let Some(ms) = c.connection_timeout_ms {
        conn.connection_timeout = Duration::from_millis(ms);
    }
    if let Some(enabled) = c.auto_reconnect {
        conn.auto_reconnect = enabled;
    }

    if let Some(size) = toml.buffer.buffer_size {
        config.buffer.buffer_size = size;
    }
    if let Some(bytes) = toml.buffer.memory_threshold_bytes {
        config.buffer.memory_threshold_bytes = bytes;
    }
    if let Some(ms) = toml.buffer.optimize_interval_ms {
        config.buffer.optimize_interval = Duration::from_millis(ms);
    }

    if let Some(enabled) = toml.behavior.enable_offline_mode {
        config.behavior.enable_offline_mode = enabled;
    }
    if let Some(enabled) = toml.behavior.data_validation {
        config.behavior.data_validation = enabled;
    }
    if let Some(ms) = toml.behavior.metrics_interval_ms {
        config.behavior.metrics_interval = Duration::from_millis(ms);
    }
    if let Some(limit) = toml.behavior.recovery_history_limit {
        config.behavior.recovery_history_limit = limit;
    }

    if let Some(rate) = toml.synthetic.rate_per_second {
        config.synthetic.rate_per_second = rate;
    }
    if let Some(ms) = toml.synthetic.tick_ms {
        config.synthetic.tick = Duration::from_millis(ms);
    }
    if let Some(ref categories) = toml.synthetic.categories {
        config.synthetic.categories.clone_from(categories);
    }
}

fn parse_flag(raw: &str) -> bool {
    raw != "0" && !raw.eq_ignore_ascii_case("false")
}

fn apply_env_config<F>(config: &mut StreamingConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("PULSE_URL") {
        config.connection.url = Some(url);
        config.source = ConfigSource::Env;
    }
    if let Some(urls) = env("PULSE_FALLBACK_URLS") {
        config.connection.fallback_urls = urls
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .collect();
        config.source = ConfigSource::Env;
    }
    if let Some(size) = env("PULSE_BUFFER_SIZE") {
        if let Ok(n) = size.parse::<usize>() {
            config.buffer.buffer_size = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(interval) = env("PULSE_HEARTBEAT_INTERVAL") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.connection.heartbeat_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(timeout) = env("PULSE_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.connection.connection_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(attempts) = env("PULSE_RECONNECT_ATTEMPTS") {
        if let Ok(n) = attempts.parse::<u32>() {
            config.connection.max_reconnect_attempts = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(interval) = env("PULSE_RECONNECT_INTERVAL") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.connection.reconnect_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(flag) = env("PULSE_OFFLINE_MODE") {
        config.behavior.enable_offline_mode = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
    if let Some(flag) = env("PULSE_VALIDATION") {
        config.behavior.data_validation = parse_flag(&flag);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Primary URL override
    pub url: Option<String>,

    /// Fallback URL override (replaces the configured list)
    pub fallback_urls: Option<Vec<String>>,

    /// Buffer capacity override
    pub buffer_size: Option<usize>,

    /// Heartbeat interval override (milliseconds)
    pub heartbeat_interval_ms: Option<u64>,

    /// Open timeout override (milliseconds)
    pub connect_timeout_ms: Option<u64>,

    /// Offline mode override
    pub enable_offline_mode: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set primary URL override
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set fallback URL override
    #[must_use]
    pub fn with_fallback_urls(mut self, urls: Vec<String>) -> Self {
        self.fallback_urls = Some(urls);
        self
    }

    /// Set buffer capacity override
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    /// Set heartbeat interval override
    #[must_use]
    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = Some(ms);
        self
    }

    /// Set open timeout override
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Set offline mode override
    #[must_use]
    pub fn with_offline_mode(mut self, enabled: bool) -> Self {
        self.enable_offline_mode = Some(enabled);
        self
    }

    fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.fallback_urls.is_none()
            && self.buffer_size.is_none()
            && self.heartbeat_interval_ms.is_none()
            && self.connect_timeout_ms.is_none()
            && self.enable_offline_mode.is_none()
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut StreamingConfig) {
        if self.is_empty() {
            return;
        }
        config.source = ConfigSource::Cli;

        if let Some(ref url) = self.url {
            config.connection.url = Some(url.clone());
        }
        if let Some(ref urls) = self.fallback_urls {
            config.connection.fallback_urls.clone_from(urls);
        }
        if let Some(size) = self.buffer_size {
            config.buffer.buffer_size = size;
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            config.connection.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connection.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(enabled) = self.enable_offline_mode {
            config.behavior.enable_offline_mode = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
