//! Session Configuration

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::transport::HeartbeatConfig;

/// Longest delay a timer may be armed for
pub const MAX_TIMER_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// `now + delay` with the delay capped at [`MAX_TIMER_DELAY`]; never panics
pub(crate) fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay.min(MAX_TIMER_DELAY)).unwrap_or(now)
}

/// Connection behavior of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Primary URL first, then fallbacks in order
    pub urls: Vec<String>,

    /// Base reconnect delay
    pub reconnect_interval: Duration,

    /// Upper bound for the reconnect delay
    pub max_reconnect_delay: Duration,

    /// Reconnects per URL before moving to the next one
    pub max_reconnect_attempts: u32,

    /// Growth factor between consecutive reconnect delays
    pub backoff_multiplier: f64,

    /// Ping cadence and missed-pong threshold
    pub heartbeat: HeartbeatConfig,

    /// How long an open may take
    pub connection_timeout: Duration,

    /// Whether abnormal closes schedule a reconnect
    pub auto_reconnect: bool,

    /// Whether sample validity feeds the integrity score
    pub data_validation: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            reconnect_interval: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(30_000),
            max_reconnect_attempts: 5,
            backoff_multiplier: 2.0,
            heartbeat: HeartbeatConfig::default(),
            connection_timeout: Duration::from_millis(5000),
            auto_reconnect: true,
            data_validation: true,
        }
    }
}

impl SessionConfig {
    /// Config for a single URL with default behavior
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }

    /// Append fallback URLs
    #[must_use]
    pub fn with_fallback_urls<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.urls.extend(urls.into_iter().map(Into::into));
        self
    }

    /// Set the per-URL reconnect budget
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the heartbeat behavior
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Set the open timeout
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Delay before reconnect number `count` (0-indexed)
    ///
    /// `min(reconnect_interval * multiplier^count, max_reconnect_delay)`;
    /// non-decreasing in `count` for any multiplier >= 1.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss
    )]
    pub fn backoff_delay(&self, count: u32) -> Duration {
        let max_ms = self.max_reconnect_delay.as_millis() as f64;
        let exponent = count.min(i32::MAX as u32) as i32;
        let base = self.reconnect_interval.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = if base.is_finite() { base.min(max_ms) } else { max_ms };
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.reconnect_interval, Duration::from_millis(1000));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connection_timeout, Duration::from_millis(5000));
        assert_eq!(config.heartbeat.interval, Duration::from_millis(1000));
        assert!(config.auto_reconnect);
    }

    #[test]
    fn test_backoff_sequence() {
        let config = SessionConfig::default();
        let delays: Vec<u64> = (0..7)
            .map(|n| config.backoff_delay(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_huge_count_is_capped() {
        let config = SessionConfig::default();
        assert_eq!(config.backoff_delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[test]
    fn test_deadline_after_caps_huge_delays() {
        let now = Instant::now();
        assert_eq!(
            deadline_after(now, Duration::from_millis(250)),
            now + Duration::from_millis(250)
        );
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_TIMER_DELAY);
    }

    #[test]
    fn test_url_builder() {
        let config = SessionConfig::new("ws://a").with_fallback_urls(["ws://b", "ws://c"]);
        assert_eq!(config.urls, vec!["ws://a", "ws://b", "ws://c"]);
    }
}
