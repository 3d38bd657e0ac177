//! Chaos Tests for Stream Resilience
//!
//! These tests verify behavior under adverse conditions:
//! - Links dropped over and over with abnormal close codes
//! - Floods of malformed and invalid payloads
//! - Misbehaving consumers
//! - Control calls racing each other and the reconnect timers
//! - A flapping network
//!
//! All scenarios run on paused Tokio time with a seeded RNG, so they are
//! fast and reproducible.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::task::JoinSet;

use pulse_core::transport::{InProcessConnector, InProcessController, InProcessPeer};
use pulse_core::{ConnectionStatus, ErrorCategory, StreamingConfig, StreamingService};

// =============================================================================
// Chaos Test Infrastructure
// =============================================================================

/// Configuration for chaos scenarios
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Rounds of disruption per scenario
    pub rounds: usize,
    /// Probability that an injected payload is bad (0.0 - 1.0)
    pub failure_rate: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            rounds: 25,
            failure_rate: 0.3,
            seed: 0x5EED,
        }
    }
}

impl ChaosConfig {
    /// Heavier variant for the flood scenario
    pub fn intensive() -> Self {
        Self {
            rounds: 400,
            failure_rate: 0.5,
            ..Self::default()
        }
    }

    fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }
}

/// Counts outcomes seen through the service's listeners
#[derive(Debug, Default)]
pub struct OutcomeTracker {
    /// Data batches delivered
    pub batches: AtomicUsize,
    /// Failures reported on the error topic
    pub failures: AtomicUsize,
    /// Network-category failures
    pub network_failures: AtomicUsize,
}

impl OutcomeTracker {
    fn attach(service: &StreamingService) -> Arc<Self> {
        let tracker = Arc::new(Self::default());
        let t = tracker.clone();
        // Subscriptions stay registered when the handles are dropped
        let _ = service.on_data(move |_| {
            t.batches.fetch_add(1, Ordering::SeqCst);
        });
        let t = tracker.clone();
        let _ = service.on_error(move |error, _| {
            t.failures.fetch_add(1, Ordering::SeqCst);
            if error.category == ErrorCategory::Network {
                t.network_failures.fetch_add(1, Ordering::SeqCst);
            }
        });
        tracker
    }
}

fn chaos_service(config: StreamingConfig) -> (StreamingService, InProcessController) {
    let (connector, server) = InProcessConnector::new_pair();
    let service = StreamingService::with_seed(config, Arc::new(connector), 1).unwrap();
    (service, server)
}

fn quiet_config() -> StreamingConfig {
    let mut config = StreamingConfig::with_url("mem://chaos");
    config.connection.heartbeat_enabled = false;
    config
}

async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let reached = tokio::time::timeout(Duration::from_secs(600), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "condition not reached: {what}");
}

async fn connected_peer(service: &StreamingService, server: &mut InProcessController) -> InProcessPeer {
    let peer = server.next_peer().await.unwrap();
    eventually("connected", || service.status() == ConnectionStatus::Connected).await;
    peer
}

// =============================================================================
// Link Chaos
// =============================================================================

/// Every abnormal close is followed by a reconnect; a successful open
/// resets the budget so the session never gives up
#[tokio::test(start_paused = true)]
async fn chaos_repeated_abnormal_closes() {
    let chaos = ChaosConfig::default();
    let mut rng = chaos.rng();
    let mut config = quiet_config();
    config.connection.max_reconnect_attempts = 2;
    let (service, mut server) = chaos_service(config);
    let tracker = OutcomeTracker::attach(&service);

    service.connect().await.unwrap();
    for round in 0..chaos.rounds {
        let peer = connected_peer(&service, &mut server).await;
        let code = [1001_u16, 1006, 1011, 1012][rng.gen_range(0..4)];
        peer.close(code, &format!("chaos round {round}")).await.unwrap();
    }
    let _last = connected_peer(&service, &mut server).await;

    let snapshot = service.session_snapshot();
    assert_eq!(snapshot.reconnect_count, 0);
    assert_eq!(snapshot.pending_timers, 0);
    assert_eq!(server.attempts().len(), chaos.rounds + 1);
    assert_eq!(
        tracker.network_failures.load(Ordering::SeqCst),
        chaos.rounds
    );
}

/// Transport errors mid-stream are treated like abnormal closes
#[tokio::test(start_paused = true)]
async fn chaos_transport_errors_mid_stream() {
    let chaos = ChaosConfig::default();
    let (service, mut server) = chaos_service(quiet_config());
    let tracker = OutcomeTracker::attach(&service);

    service.connect().await.unwrap();
    for i in 0..chaos.rounds {
        let peer = connected_peer(&service, &mut server).await;
        peer.send_json(&json!({"timestamp": i, "value": i}))
            .await
            .unwrap();
        peer.error("connection reset by peer").await.unwrap();
    }
    let _last = connected_peer(&service, &mut server).await;

    assert_eq!(service.buffer_snapshot().len(), chaos.rounds);
    assert_eq!(tracker.batches.load(Ordering::SeqCst), chaos.rounds);
    assert!(tracker.network_failures.load(Ordering::SeqCst) >= chaos.rounds);
}

// =============================================================================
// Payload Chaos
// =============================================================================

/// Garbage and invalid samples are counted and skipped, never fatal
#[tokio::test(start_paused = true)]
async fn chaos_malformed_payload_flood() {
    let chaos = ChaosConfig::intensive();
    let mut rng = chaos.rng();
    let mut config = quiet_config();
    config.buffer.buffer_size = 64;
    let (service, mut server) = chaos_service(config);

    service.connect().await.unwrap();
    let peer = connected_peer(&service, &mut server).await;

    let mut valid = 0_u64;
    let mut lost = 0_u64;
    for i in 0..chaos.rounds {
        if rng.gen_bool(chaos.failure_rate) {
            lost += 1;
            if rng.gen_bool(0.5) {
                peer.send_text(format!("<garbage {i}>")).await.unwrap();
            } else {
                peer.send_json(&json!({"id": format!("bad{i}"), "value": "NaN?"}))
                    .await
                    .unwrap();
            }
        } else {
            valid += 1;
            peer.send_json(&json!({"timestamp": i, "value": rng.gen_range(-1.0..1.0)}))
                .await
                .unwrap();
        }
    }
    let sent = chaos.rounds as u64;
    eventually("all payloads processed", || {
        service.session_snapshot().messages_received == sent
    })
    .await;

    let snapshot = service.session_snapshot();
    assert_eq!(snapshot.status, ConnectionStatus::Connected);
    assert_eq!(snapshot.messages_lost, lost);
    assert!((0.0..=100.0).contains(&snapshot.data_integrity_score));
    assert!(snapshot.data_integrity_score < 100.0);

    let buffer = service.buffer_metrics();
    assert_eq!(buffer.size as u64, valid.min(64));
    assert_eq!(buffer.total_received - buffer.total_dropped, buffer.size as u64);
    assert!(!peer.is_closed());
}

/// Panicking consumers do not starve well-behaved ones
#[tokio::test(start_paused = true)]
async fn chaos_panicking_listeners() {
    let chaos = ChaosConfig::default();
    let (service, mut server) = chaos_service(quiet_config());

    let delivered = Arc::new(AtomicUsize::new(0));
    for n in 0..6 {
        if n % 2 == 0 {
            let _ = service.on_data(|_| panic!("consumer bug"));
            let _ = service.on_status_change(|_| panic!("consumer bug"));
        } else {
            let d = delivered.clone();
            let _ = service.on_data(move |batch| {
                d.fetch_add(batch.len(), Ordering::SeqCst);
            });
        }
    }

    service.connect().await.unwrap();
    let peer = connected_peer(&service, &mut server).await;
    for i in 0..chaos.rounds {
        peer.send_json(&json!({"timestamp": i, "value": i}))
            .await
            .unwrap();
    }
    eventually("delivered to good listeners", || {
        delivered.load(Ordering::SeqCst) == chaos.rounds * 3
    })
    .await;
    assert_eq!(service.status(), ConnectionStatus::Connected);
}

// =============================================================================
// Control Chaos
// =============================================================================

/// Disconnect always wins over pending retries
#[tokio::test(start_paused = true)]
async fn chaos_disconnect_during_backoff() {
    let chaos = ChaosConfig::default();
    let mut rng = chaos.rng();
    let (service, server) = chaos_service(quiet_config());
    server.refuse("connection refused");

    for _ in 0..chaos.rounds {
        service.connect().await.unwrap();
        let wait = Duration::from_millis(rng.gen_range(0..3000));
        tokio::time::sleep(wait).await;
        service.disconnect().await.unwrap();
        assert_eq!(service.session_snapshot().pending_timers, 0);
    }

    let attempts = server.attempts().len();
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(server.attempts().len(), attempts);
    assert_eq!(service.status(), ConnectionStatus::Disconnected);
}

/// Racing control calls leave the service consistent
#[tokio::test(start_paused = true)]
async fn chaos_concurrent_control_calls() {
    let chaos = ChaosConfig::default();
    let mut rng = chaos.rng();
    let (service, _server) = chaos_service(quiet_config());

    let mut tasks = JoinSet::new();
    for i in 0..chaos.rounds {
        let service = service.clone();
        let op = rng.gen_range(0..5);
        let delay = Duration::from_millis(rng.gen_range(0..500));
        tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            match op {
                0 => service.connect().await.unwrap(),
                1 => service.disconnect().await.unwrap(),
                2 => service.set_network_available(i % 2 == 0).await.unwrap(),
                3 => {
                    service
                        .inject_test_data(&[json!({"timestamp": i, "value": i})])
                        .unwrap();
                }
                _ => service.clear_buffer(),
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    service.set_network_available(true).await.unwrap();
    service.disconnect().await.unwrap();
    assert_eq!(service.session_snapshot().pending_timers, 0);
    assert_eq!(service.status(), ConnectionStatus::Disconnected);

    let buffer = service.buffer_metrics();
    assert_eq!(buffer.total_received - buffer.total_dropped, buffer.size as u64);
}

/// A flapping network ends connected once it settles
#[tokio::test(start_paused = true)]
async fn chaos_network_flapping() {
    let chaos = ChaosConfig::default();
    let mut rng = chaos.rng();
    let mut config = quiet_config();
    config.behavior.enable_offline_mode = true;
    let (service, mut server) = chaos_service(config);

    service.connect().await.unwrap();
    let _first = connected_peer(&service, &mut server).await;

    for _ in 0..chaos.rounds {
        service.set_network_available(false).await.unwrap();
        assert!(service.is_offline_mode());
        assert_eq!(service.session_snapshot().pending_timers, 0);
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..200))).await;
        service.set_network_available(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..200))).await;
    }

    // Peers must stay alive: dropping one drops its link
    let mut peers = Vec::new();
    eventually("settled connected", || {
        while let Some(peer) = server.try_next_peer() {
            peers.push(peer);
        }
        service.status() == ConnectionStatus::Connected
    })
    .await;
    assert!(!peers.is_empty());
    eventually("online mode", || !service.is_offline_mode()).await;
    assert!(server.attempts().len() <= chaos.rounds + 1);
}
