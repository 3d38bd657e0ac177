//! Heartbeat Tracking
//!
//! The session sends `{"type":"ping","timestamp":N}` every
//! `interval` while connected and expects the peer to echo it in a pong.
//!
//! # Protocol
//!
//! 1. On each tick, if `max_missed_pongs` pings are already unanswered the
//!    link is declared dead
//! 2. Otherwise a new ping is sent and counted as outstanding
//! 3. Any pong clears the outstanding count; its echoed timestamp gives the
//!    round-trip latency
//!
//! The tracker is a plain state holder; scheduling belongs to the session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// EMA weight for the average latency
const LATENCY_ALPHA: f64 = 0.2;

/// Configuration for heartbeat behavior
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between pings (default: 1 second)
    pub interval: Duration,
    /// Consecutive unanswered pings before the link is dead (default: 3)
    pub max_missed_pongs: u32,
    /// Whether heartbeats run at all (can be disabled for testing)
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_missed_pongs: 3,
            enabled: true,
        }
    }
}

impl HeartbeatConfig {
    /// Set the ping interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the missed-pong threshold
    #[must_use]
    pub fn with_max_missed_pongs(mut self, max: u32) -> Self {
        self.max_missed_pongs = max;
        self
    }

    /// Disable heartbeats
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// What to do on a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatTick {
    /// Send a ping with this timestamp
    SendPing(i64),
    /// Too many pongs missed
    Dead {
        /// Unanswered pings
        missed: u32,
    },
}

/// Per-connection heartbeat state
#[derive(Debug, Clone, Default)]
pub struct HeartbeatTracker {
    max_missed_pongs: u32,
    outstanding: u32,
    pings_sent: u64,
    pongs_received: u64,
    last_latency_ms: Option<f64>,
    average_latency_ms: Option<f64>,
}

impl HeartbeatTracker {
    /// Create a tracker
    #[must_use]
    pub fn new(config: &HeartbeatConfig) -> Self {
        Self {
            max_missed_pongs: config.max_missed_pongs.max(1),
            ..Default::default()
        }
    }

    /// Forget per-connection state, keeping latency history
    pub fn reset(&mut self) {
        self.outstanding = 0;
    }

    /// Decide what a tick does; `now_ms` is wall-clock epoch milliseconds
    pub fn tick(&mut self, now_ms: i64) -> HeartbeatTick {
        if self.outstanding >= self.max_missed_pongs {
            return HeartbeatTick::Dead {
                missed: self.outstanding,
            };
        }
        self.outstanding += 1;
        self.pings_sent += 1;
        HeartbeatTick::SendPing(now_ms)
    }

    /// Record a pong echoing `echoed_ms`; returns the measured latency
    #[allow(clippy::cast_precision_loss)]
    pub fn pong(&mut self, echoed_ms: i64, now_ms: i64) -> Duration {
        self.outstanding = 0;
        self.pongs_received += 1;

        let latency_ms = now_ms.saturating_sub(echoed_ms).max(0);
        let sample = latency_ms as f64;
        self.last_latency_ms = Some(sample);
        self.average_latency_ms = Some(match self.average_latency_ms {
            Some(avg) => avg * (1.0 - LATENCY_ALPHA) + sample * LATENCY_ALPHA,
            None => sample,
        });
        Duration::from_millis(latency_ms.unsigned_abs())
    }

    /// Unanswered pings
    #[must_use]
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    /// Pings sent over the tracker's lifetime
    #[must_use]
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// Pongs received over the tracker's lifetime
    #[must_use]
    pub fn pongs_received(&self) -> u64 {
        self.pongs_received
    }

    /// Most recent round trip
    #[must_use]
    pub fn last_latency_ms(&self) -> Option<f64> {
        self.last_latency_ms
    }

    /// Smoothed round trip
    #[must_use]
    pub fn average_latency_ms(&self) -> Option<f64> {
        self.average_latency_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = HeartbeatConfig::default()
            .with_interval(Duration::from_millis(250))
            .with_max_missed_pongs(5);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.max_missed_pongs, 5);
        assert!(config.enabled);
        assert!(!config.disabled().enabled);
    }

    #[test]
    fn test_dead_after_max_missed() {
        let mut hb = HeartbeatTracker::new(&HeartbeatConfig::default());
        assert_eq!(hb.tick(1), HeartbeatTick::SendPing(1));
        assert_eq!(hb.tick(2), HeartbeatTick::SendPing(2));
        assert_eq!(hb.tick(3), HeartbeatTick::SendPing(3));
        assert_eq!(hb.tick(4), HeartbeatTick::Dead { missed: 3 });
    }

    #[test]
    fn test_pong_clears_outstanding_and_measures_latency() {
        let mut hb = HeartbeatTracker::new(&HeartbeatConfig::default());
        hb.tick(1_000);
        hb.tick(2_000);
        let latency = hb.pong(2_000, 2_040);

        assert_eq!(latency, Duration::from_millis(40));
        assert_eq!(hb.outstanding(), 0);
        assert_eq!(hb.last_latency_ms(), Some(40.0));
        assert_eq!(hb.pings_sent(), 2);
        assert_eq!(hb.pongs_received(), 1);
    }

    #[test]
    fn test_average_latency_smooths() {
        let mut hb = HeartbeatTracker::new(&HeartbeatConfig::default());
        hb.pong(0, 100);
        hb.pong(0, 200);
        // 100 * 0.8 + 200 * 0.2
        let avg = hb.average_latency_ms().unwrap();
        assert!((avg - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_skew_never_negative() {
        let mut hb = HeartbeatTracker::new(&HeartbeatConfig::default());
        assert_eq!(hb.pong(500, 100), Duration::ZERO);
    }
}
