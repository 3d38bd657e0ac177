//! Streaming Metrics
//!
//! One flat record combining session counters, buffer statistics and
//! recovery stats. The facade builds it on demand and on every
//! `metrics_interval` tick.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::recovery::RecoveryStats;
use crate::session::{ConnectionStatus, NetworkStatus, SessionSnapshot};
use crate::streaming::BufferMetrics;

/// Point-in-time view of the whole stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingMetrics {
    /// Connection status
    pub status: ConnectionStatus,
    /// Network availability as last signalled
    pub network: NetworkStatus,
    /// Data payloads received from the transport
    pub messages_received: u64,
    /// Unparsable payloads plus invalid samples
    pub messages_lost: u64,
    /// Average payload rate since the service started
    pub messages_per_second: f64,
    /// Most recent heartbeat round trip
    pub last_latency_ms: Option<f64>,
    /// Smoothed heartbeat round trip
    pub average_latency_ms: Option<f64>,
    /// Reconnects scheduled on the current URL
    pub reconnect_count: u32,
    /// 0..=100
    pub data_integrity_score: f64,
    /// Buffer statistics
    pub buffer: BufferMetrics,
    /// Recovery statistics
    pub recovery: RecoveryStats,
    /// Synthetic data is standing in for the stream
    pub offline_mode: bool,
    /// Synthetic generation is running (offline mode or explicit)
    pub synthetic_active: bool,
    /// When this record was built
    pub collected_at: DateTime<Utc>,
}

impl StreamingMetrics {
    /// Combine the component views; `uptime` is the service age
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn collect(
        session: &SessionSnapshot,
        buffer: BufferMetrics,
        recovery: RecoveryStats,
        offline_mode: bool,
        synthetic_active: bool,
        uptime: Duration,
    ) -> Self {
        let secs = uptime.as_secs_f64();
        let messages_per_second = if secs > 0.0 {
            session.messages_received as f64 / secs
        } else {
            0.0
        };

        Self {
            status: session.status,
            network: session.network,
            messages_received: session.messages_received,
            messages_lost: session.messages_lost,
            messages_per_second,
            last_latency_ms: session.last_latency_ms,
            average_latency_ms: session.average_latency_ms,
            reconnect_count: session.reconnect_count,
            data_integrity_score: session.data_integrity_score,
            buffer,
            recovery,
            offline_mode,
            synthetic_active,
            collected_at: Utc::now(),
        }
    }

    /// Share of received payloads that were lost, 0 when nothing arrived
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn loss_ratio(&self) -> f64 {
        if self.messages_received == 0 {
            0.0
        } else {
            (self.messages_lost as f64 / self.messages_received as f64).min(1.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_rates() {
        let session = SessionSnapshot {
            messages_received: 50,
            messages_lost: 5,
            ..Default::default()
        };
        let metrics = StreamingMetrics::collect(
            &session,
            BufferMetrics::default(),
            RecoveryStats::default(),
            false,
            false,
            Duration::from_secs(10),
        );

        assert!((metrics.messages_per_second - 5.0).abs() < 1e-9);
        assert!((metrics.loss_ratio() - 0.1).abs() < 1e-9);
        assert!((metrics.data_integrity_score - 100.0).abs() < f64::EPSILON);
        assert_eq!(metrics.status, ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_zero_uptime_has_zero_rate() {
        let metrics = StreamingMetrics::collect(
            &SessionSnapshot::default(),
            BufferMetrics::default(),
            RecoveryStats::default(),
            true,
            true,
            Duration::ZERO,
        );
        assert!(metrics.messages_per_second.abs() < f64::EPSILON);
        assert!(metrics.loss_ratio().abs() < f64::EPSILON);
        assert!(metrics.offline_mode);
    }

    #[test]
    fn test_serializes_status_lowercase() {
        let metrics = StreamingMetrics::collect(
            &SessionSnapshot::default(),
            BufferMetrics::default(),
            RecoveryStats::default(),
            false,
            false,
            Duration::from_secs(1),
        );
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["status"], "disconnected");
        assert_eq!(json["network"], "online");
    }
}
