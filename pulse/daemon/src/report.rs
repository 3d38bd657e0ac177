//! Health reporting
//!
//! Subscribes to a [`StreamingService`] and turns its notifications into
//! log lines, plus optional JSON metrics on stdout.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use pulse_core::{ConnectionStatus, StreamingMetrics, StreamingService, Subscription};

/// Listener registrations; removed again on drop
pub struct Reporter {
    subscriptions: Vec<Subscription>,
}

impl Reporter {
    /// Register logging listeners on `service`
    pub fn attach(service: &StreamingService, metrics_json: bool) -> Self {
        let samples = Arc::new(AtomicU64::new(0));
        let mut subscriptions = Vec::with_capacity(4);

        let counter = Arc::clone(&samples);
        subscriptions.push(service.on_data(move |batch| {
            counter.fetch_add(batch.len() as u64, Ordering::Relaxed);
        }));

        subscriptions.push(service.on_status_change(|status| match status {
            ConnectionStatus::Error => warn!(%status, "Stream unavailable"),
            _ => info!(%status, "Stream status"),
        }));

        subscriptions.push(service.on_error(|error, recovery| {
            warn!(
                category = %error.category,
                severity = %error.severity,
                recovered = recovery.success,
                recovery = %recovery.message,
                guidance = error.guidance(),
                "{}",
                error.message
            );
        }));

        subscriptions.push(service.on_metrics_update(move |metrics| {
            if metrics_json {
                print_json(metrics);
            } else {
                debug!(
                    delivered = samples.load(Ordering::Relaxed),
                    "{}",
                    summary(metrics)
                );
            }
        }));

        Self { subscriptions }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        for subscription in self.subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

fn print_json(metrics: &StreamingMetrics) {
    match serde_json::to_string(metrics) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{line}") {
                warn!(error = %e, "Failed to write metrics");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize metrics"),
    }
}

/// One-line human summary of a metrics record
pub fn summary(metrics: &StreamingMetrics) -> String {
    let latency = metrics
        .last_latency_ms
        .map_or_else(|| "-".to_string(), |ms| format!("{ms:.0}ms"));
    let mut line = format!(
        "{} | {:.1} msg/s | buffer {}/{} | lost {} | integrity {:.1}% | latency {}",
        metrics.status,
        metrics.messages_per_second,
        metrics.buffer.size,
        metrics.buffer.capacity,
        metrics.messages_lost,
        metrics.data_integrity_score,
        latency,
    );
    if metrics.offline_mode {
        line.push_str(" | offline");
    } else if metrics.synthetic_active {
        line.push_str(" | synthetic");
    }
    line
}

/// Log connection diagnostics and recovery statistics
pub fn log_diagnostics(service: &StreamingService) {
    let diagnostics = service.diagnostics();
    let recovery = service.recovery_stats();
    info!(
        current_url = ?diagnostics.current_url,
        attempted_urls = ?diagnostics.attempted_urls,
        network = ?diagnostics.network_status,
        connected_ms = diagnostics.connection_duration_ms,
        received = diagnostics.messages_received,
        lost = diagnostics.messages_lost,
        "Connection diagnostics"
    );
    info!(
        attempts = recovery.total_attempts,
        recovered = recovery.successful_recoveries,
        strategies = ?recovery.strategies_used,
        "Recovery statistics"
    );
    info!("{}", summary(&service.metrics()));
}
