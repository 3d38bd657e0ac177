//! Streaming Service
//!
//! Composition root for one logical stream. A [`StreamingService`] owns the
//! [`StreamBuffer`], the [`RecoveryManager`] and the [`ConnectionSession`],
//! fans notifications out to subscribers and exposes the control surface.
//!
//! ```text
//!                        ┌──────────── StreamingService ────────────┐
//!  connect/disconnect ──►│ ConnectionSession ──SessionEvent──► pump │──► on_data
//!  inject_test_data   ──►│        │                            │    │──► on_status_change
//!  change_scenario    ──►│        ▼                            ▼    │──► on_error
//!  simulate_spike     ──►│   StreamBuffer ◄── synthetic ◄─ offline  │
//!                        │        │ pressure hook ───────────► pump │
//!                        │        └──────── metrics tick ───────────│──► on_metrics_update
//!                        └──────────────────────────────────────────┘
//! ```
//!
//! The service is an explicit instance: construct it once and share it
//! (it is cheap to clone). Background tasks hold only weak references, so
//! dropping the last handle stops them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::classify::{classify, ClassifiedError, ErrorCategory};
use crate::config::{ConfigError, StreamingConfig};
use crate::metrics::StreamingMetrics;
use crate::observer::{ListenerSet, Subscription};
use crate::recovery::{
    RecoveryAction, RecoveryAttempt, RecoveryManager, RecoveryResult, RecoveryStats,
};
use crate::sample::Sample;
use crate::session::{
    ConnectionSession, ConnectionStatus, SessionDiagnostics, SessionEvent, SessionSnapshot,
    MAX_TIMER_DELAY,
};
use crate::streaming::{
    BufferMetrics, MemoryPressure, Scenario, StreamBuffer, SyntheticGenerator, UnknownScenario,
};
use crate::transport::Connector;

/// Component tag for failures raised by the service itself
pub const SERVICE_COMPONENT: &str = "streaming-service";

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by the control surface
#[derive(Debug, Error)]
pub enum StreamError {
    /// `change_scenario` with a name that matches no scenario
    #[error("Unknown scenario: {0}")]
    UnknownScenario(String),

    /// Spike parameters that cannot be applied
    #[error("Invalid spike: {0}")]
    InvalidSpike(String),

    /// The service was shut down
    #[error("Streaming service has been shut down")]
    ShutDown,

    /// Configuration rejected at construction
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<UnknownScenario> for StreamError {
    fn from(e: UnknownScenario) -> Self {
        Self::UnknownScenario(e.0)
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// Payload of the error topic
#[derive(Debug, Clone)]
pub struct ErrorNotice {
    /// The classified failure
    pub error: ClassifiedError,
    /// What recovery made of it
    pub recovery: RecoveryResult,
}

/// Outcome of [`StreamingService::inject_test_data`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InjectReport {
    /// Samples that passed validation and reached the buffer
    pub accepted: usize,
    /// Samples rejected as structurally invalid
    pub rejected: usize,
}

// =============================================================================
// Service
// =============================================================================

struct SyntheticState {
    generator: SyntheticGenerator,
    /// Explicitly started via `start_synthetic`
    manual: bool,
    /// Standing in for an unavailable stream
    offline: bool,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    config: StreamingConfig,
    buffer: Arc<StreamBuffer>,
    recovery: Arc<RecoveryManager>,
    session: ConnectionSession,

    data_listeners: Arc<ListenerSet<Vec<Sample>>>,
    status_listeners: Arc<ListenerSet<ConnectionStatus>>,
    metrics_listeners: Arc<ListenerSet<StreamingMetrics>>,
    error_listeners: Arc<ListenerSet<ErrorNotice>>,

    synthetic: Mutex<SyntheticState>,
    /// Status as last seen by the event pump
    last_status: Mutex<ConnectionStatus>,
    network_available: AtomicBool,

    pump_task: Mutex<Option<JoinHandle<()>>>,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
    started_at: tokio::time::Instant,
    shut_down: AtomicBool,
}

/// Resilient stream facade
///
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct StreamingService {
    inner: Arc<Inner>,
}

impl StreamingService {
    /// Create a service over `connector`
    ///
    /// Does not connect; call [`connect`](Self::connect).
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] if the configuration fails validation.
    pub fn new(config: StreamingConfig, connector: Arc<dyn Connector>) -> Result<Self, StreamError> {
        let generator = SyntheticGenerator::new(config.synthetic_config());
        Self::with_generator(config, connector, generator)
    }

    /// Like [`new`](Self::new) with a reproducible synthetic generator
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] if the configuration fails validation.
    pub fn with_seed(
        config: StreamingConfig,
        connector: Arc<dyn Connector>,
        seed: u64,
    ) -> Result<Self, StreamError> {
        let generator = SyntheticGenerator::with_seed(config.synthetic_config(), seed);
        Self::with_generator(config, connector, generator)
    }

    /// Service backed by the WebSocket transport
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Config`] if the configuration fails validation.
    #[cfg(feature = "websocket")]
    pub fn websocket(config: StreamingConfig) -> Result<Self, StreamError> {
        Self::new(config, Arc::new(crate::transport::WebSocketConnector::default()))
    }

    fn with_generator(
        config: StreamingConfig,
        connector: Arc<dyn Connector>,
        generator: SyntheticGenerator,
    ) -> Result<Self, StreamError> {
        config.validate()?;

        let buffer = Arc::new(StreamBuffer::new(config.buffer_config()));
        let recovery = Arc::new(RecoveryManager::new(config.behavior.recovery_history_limit));
        let (session, events) = ConnectionSession::spawn(
            config.session_config(),
            connector,
            Arc::clone(&buffer),
            Arc::clone(&recovery),
        );

        let (pressure_tx, pressure_rx) = mpsc::unbounded_channel();
        let hook_buffer = Arc::downgrade(&buffer);
        buffer.set_pressure_hook(move |pressure: &MemoryPressure| {
            let removed = hook_buffer.upgrade().map_or(0, |b| b.optimize());
            tracing::info!(
                removed,
                estimate_bytes = pressure.estimate_bytes,
                "Memory pressure: optimized buffer"
            );
            let _ = pressure_tx.send(pressure.clone());
        });

        let metrics_interval = config.behavior.metrics_interval;
        tracing::info!(
            urls = ?config.urls(),
            buffer_size = config.buffer.buffer_size,
            offline_mode = config.behavior.enable_offline_mode,
            source = %config.source(),
            "Streaming service created"
        );

        let inner = Arc::new(Inner {
            config,
            buffer,
            recovery,
            session,
            data_listeners: ListenerSet::new("data"),
            status_listeners: ListenerSet::new("status"),
            metrics_listeners: ListenerSet::new("metrics"),
            error_listeners: ListenerSet::new("error"),
            synthetic: Mutex::new(SyntheticState {
                generator,
                manual: false,
                offline: false,
                task: None,
            }),
            last_status: Mutex::new(ConnectionStatus::Disconnected),
            network_available: AtomicBool::new(true),
            pump_task: Mutex::new(None),
            metrics_task: Mutex::new(None),
            started_at: tokio::time::Instant::now(),
            shut_down: AtomicBool::new(false),
        });

        let pump = tokio::spawn(event_pump(Arc::downgrade(&inner), events, pressure_rx));
        *inner.pump_task.lock() = Some(pump);
        let metrics = tokio::spawn(metrics_loop(Arc::downgrade(&inner), metrics_interval));
        *inner.metrics_task.lock() = Some(metrics);

        Ok(Self { inner })
    }

    fn ensure_running(&self) -> Result<(), StreamError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            Err(StreamError::ShutDown)
        } else {
            Ok(())
        }
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Called with every batch that reached the buffer
    pub fn on_data<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[Sample]) + Send + Sync + 'static,
    {
        self.inner
            .data_listeners
            .subscribe(move |batch: &Vec<Sample>| listener(batch.as_slice()))
    }

    /// Called on every connection status transition
    pub fn on_status_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner
            .status_listeners
            .subscribe(move |status: &ConnectionStatus| listener(*status))
    }

    /// Called every `metrics_interval`
    pub fn on_metrics_update<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&StreamingMetrics) + Send + Sync + 'static,
    {
        self.inner.metrics_listeners.subscribe(listener)
    }

    /// Called with every classified failure and its recovery outcome
    pub fn on_error<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ClassifiedError, &RecoveryResult) + Send + Sync + 'static,
    {
        self.inner
            .error_listeners
            .subscribe(move |notice: &ErrorNotice| listener(&notice.error, &notice.recovery))
    }

    // -------------------------------------------------------------------------
    // Connection control
    // -------------------------------------------------------------------------

    /// Start connecting (returns once the request is applied)
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn connect(&self) -> Result<(), StreamError> {
        self.ensure_running()?;
        self.inner.session.connect().await;
        Ok(())
    }

    /// Close the stream and cancel every pending retry
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn disconnect(&self) -> Result<(), StreamError> {
        self.ensure_running()?;
        self.inner.session.disconnect().await;
        Ok(())
    }

    /// Signal host network availability
    ///
    /// Going offline suspends reconnection and, with offline mode enabled,
    /// switches to synthetic data.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn set_network_available(&self, available: bool) -> Result<(), StreamError> {
        self.ensure_running()?;
        self.inner.network_available.store(available, Ordering::Release);
        self.inner.session.set_network_online(available).await;
        if !available && self.inner.config.behavior.enable_offline_mode {
            self.inner.set_offline_mode(true, "network offline");
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Data control
    // -------------------------------------------------------------------------

    /// Drop everything buffered and reset buffer counters
    pub fn clear_buffer(&self) {
        self.inner.buffer.clear();
        tracing::info!("Buffer cleared on request");
    }

    /// Validate raw sample objects and add the valid ones to the buffer
    ///
    /// Bypasses the transport. Invalid samples are counted as dropped and
    /// reported on the error topic.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn inject_test_data(&self, raw: &[Value]) -> Result<InjectReport, StreamError> {
        self.ensure_running()?;

        let mut valid = Vec::with_capacity(raw.len());
        let mut first_problem = None;
        for item in raw {
            match Sample::from_json(item) {
                Ok(sample) => valid.push(sample),
                Err(e) => {
                    first_problem.get_or_insert(e);
                }
            }
        }
        let report = InjectReport {
            accepted: valid.len(),
            rejected: raw.len() - valid.len(),
        };

        self.inner.buffer.record_rejected(report.rejected);
        self.inner.deliver(valid);

        if report.rejected > 0 && self.inner.config.behavior.data_validation {
            let detail = first_problem.map(|e| e.to_string()).unwrap_or_default();
            let error = ClassifiedError::of_category(
                ErrorCategory::Validation,
                format!(
                    "Sample validation failed for {} of {} injected samples: {detail}",
                    report.rejected,
                    raw.len()
                ),
                Some(SERVICE_COMPONENT),
            );
            let recovery = self.inner.recovery.attempt_recovery(&error, None);
            self.inner.report_failure(error, recovery);
        }

        tracing::debug!(accepted = report.accepted, rejected = report.rejected, "Test data injected");
        Ok(report)
    }

    /// Switch the synthetic scenario by name
    ///
    /// Affects generated data only, never the real transport.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::UnknownScenario`] for unrecognised names.
    pub fn change_scenario(&self, name: &str) -> Result<Scenario, StreamError> {
        self.ensure_running()?;
        let scenario: Scenario = name.parse()?;
        self.inner.synthetic.lock().generator.set_scenario(scenario);
        Ok(scenario)
    }

    /// Multiply the synthetic rate for `duration`
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidSpike`] for a non-positive or
    /// non-finite multiplier, or a duration over [`MAX_TIMER_DELAY`].
    pub fn simulate_spike(&self, duration: Duration, multiplier: f64) -> Result<(), StreamError> {
        self.ensure_running()?;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(StreamError::InvalidSpike(format!(
                "multiplier must be a positive number, got {multiplier}"
            )));
        }
        if duration > MAX_TIMER_DELAY {
            return Err(StreamError::InvalidSpike(format!(
                "duration must be at most {}s, got {}s",
                MAX_TIMER_DELAY.as_secs(),
                duration.as_secs()
            )));
        }
        let now = tokio::time::Instant::now().into_std();
        self.inner
            .synthetic
            .lock()
            .generator
            .spike(now, duration, multiplier);
        Ok(())
    }

    /// Start synthetic generation regardless of connection state
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn start_synthetic(&self) -> Result<(), StreamError> {
        self.ensure_running()?;
        self.inner.synthetic.lock().manual = true;
        self.inner.refresh_synthetic();
        Ok(())
    }

    /// Stop explicitly started generation (offline mode keeps its own)
    pub fn stop_synthetic(&self) {
        self.inner.synthetic.lock().manual = false;
        self.inner.refresh_synthetic();
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Current connection status
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.inner.session.status()
    }

    /// Latest session state
    #[must_use]
    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.inner.session.snapshot()
    }

    /// Connection diagnostics
    #[must_use]
    pub fn diagnostics(&self) -> SessionDiagnostics {
        self.inner.session.diagnostics()
    }

    /// Copy of the buffered window, oldest first
    #[must_use]
    pub fn buffer_snapshot(&self) -> Vec<Sample> {
        self.inner.buffer.snapshot()
    }

    /// Newest `count` samples, oldest first
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<Sample> {
        self.inner.buffer.recent(count)
    }

    /// Buffer statistics
    #[must_use]
    pub fn buffer_metrics(&self) -> BufferMetrics {
        self.inner.buffer.metrics()
    }

    /// Full metrics record as of now
    #[must_use]
    pub fn metrics(&self) -> StreamingMetrics {
        self.inner.collect_metrics()
    }

    /// Recovery statistics
    #[must_use]
    pub fn recovery_stats(&self) -> RecoveryStats {
        self.inner.recovery.stats()
    }

    /// Recovery history, oldest first
    #[must_use]
    pub fn recovery_history(&self) -> Vec<RecoveryAttempt> {
        self.inner.recovery.history()
    }

    /// Whether synthetic data currently stands in for the stream
    #[must_use]
    pub fn is_offline_mode(&self) -> bool {
        self.inner.synthetic.lock().offline
    }

    /// Whether synthetic generation is running
    #[must_use]
    pub fn is_synthetic_active(&self) -> bool {
        self.inner.synthetic.lock().task.is_some()
    }

    /// Current synthetic scenario
    #[must_use]
    pub fn scenario(&self) -> Scenario {
        self.inner.synthetic.lock().generator.scenario()
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.inner.config
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop the session and every background task
    ///
    /// Pending session events are still delivered to listeners. Calling it
    /// again is a no-op.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("Shutting down streaming service");

        self.inner.session.shutdown().await;

        // The pump ends once the session's event channel is drained
        let pump = self.inner.pump_task.lock().take();
        if let Some(pump) = pump {
            let _ = pump.await;
        }
        self.inner.stop_background();
        tracing::info!("Streaming service stopped");
    }
}

impl std::fmt::Debug for StreamingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingService")
            .field("status", &self.status())
            .field("buffered", &self.inner.buffer.len())
            .field("data_listeners", &self.inner.data_listeners.len())
            .field("status_listeners", &self.inner.status_listeners.len())
            .field("offline_mode", &self.is_offline_mode())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Internals
// =============================================================================

impl Inner {
    fn deliver(&self, samples: Vec<Sample>) {
        if samples.is_empty() {
            return;
        }
        self.buffer.add_batch(&samples);
        self.data_listeners.notify(&samples);
    }

    fn report_failure(self: &Arc<Self>, error: ClassifiedError, recovery: RecoveryResult) {
        if error.requires_manual_action() {
            tracing::warn!(
                category = %error.category,
                error = %error.message,
                guidance = error.guidance(),
                "Failure needs manual action"
            );
        } else {
            tracing::warn!(
                category = %error.category,
                error = %error.message,
                recovered = recovery.success,
                "Classified failure"
            );
        }
        self.execute_recovery(&recovery);
        self.error_listeners.notify(&ErrorNotice { error, recovery });
    }

    fn execute_recovery(self: &Arc<Self>, result: &RecoveryResult) {
        for action in result.actions() {
            match action {
                RecoveryAction::EnterOfflineMode => {
                    let unavailable = *self.last_status.lock() == ConnectionStatus::Error
                        || !self.network_available.load(Ordering::Acquire);
                    if self.config.behavior.enable_offline_mode && unavailable {
                        self.set_offline_mode(true, "recovery fallback");
                    }
                }
                RecoveryAction::OptimizeBuffer => {
                    let removed = self.buffer.optimize();
                    tracing::debug!(removed, "Recovery optimized buffer");
                }
                RecoveryAction::Reconnect
                | RecoveryAction::SimplifyRendering
                | RecoveryAction::SafeMode => {
                    tracing::debug!(?action, "Recovery action left to the session or consumers");
                }
            }
        }
    }

    fn on_session_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Status(status) => {
                *self.last_status.lock() = status;
                tracing::info!(%status, "Connection status changed");
                match status {
                    ConnectionStatus::Connected => self.set_offline_mode(false, "connected"),
                    ConnectionStatus::Error if self.config.behavior.enable_offline_mode => {
                        self.set_offline_mode(true, "connection error");
                    }
                    _ => {}
                }
                self.status_listeners.notify(&status);
            }
            SessionEvent::Data(samples) => {
                self.data_listeners.notify(&samples);
            }
            SessionEvent::Failure { error, recovery } => self.report_failure(error, recovery),
        }
    }

    fn on_memory_pressure(self: &Arc<Self>, pressure: &MemoryPressure) {
        let message = format!(
            "Memory threshold exceeded: {} bytes estimated, {} allowed",
            pressure.estimate_bytes, pressure.threshold_bytes
        );
        let error = classify(message.as_str(), Some(SERVICE_COMPONENT));
        let recovery = self.recovery.attempt_recovery(&error, None);
        self.report_failure(error, recovery);
    }

    fn set_offline_mode(self: &Arc<Self>, on: bool, reason: &str) {
        {
            let mut state = self.synthetic.lock();
            if state.offline == on {
                return;
            }
            state.offline = on;
        }
        if on {
            tracing::info!(reason, "Entering offline mode");
        } else {
            tracing::info!(reason, "Leaving offline mode");
        }
        self.refresh_synthetic();
    }

    /// Start or stop the generator task to match the requested modes
    fn refresh_synthetic(self: &Arc<Self>) {
        let mut state = self.synthetic.lock();
        let wanted = (state.manual || state.offline) && !self.shut_down.load(Ordering::Acquire);
        if wanted && state.task.is_none() {
            let tick = state.generator.config().tick;
            state.task = Some(tokio::spawn(synthetic_loop(Arc::downgrade(self), tick)));
            tracing::debug!(tick_ms = tick.as_millis() as u64, "Synthetic generation started");
        } else if !wanted {
            if let Some(task) = state.task.take() {
                task.abort();
                tracing::debug!("Synthetic generation stopped");
            }
        }
    }

    fn collect_metrics(&self) -> StreamingMetrics {
        let (offline, synthetic_active) = {
            let state = self.synthetic.lock();
            (state.offline, state.task.is_some())
        };
        StreamingMetrics::collect(
            &self.session.snapshot(),
            self.buffer.metrics(),
            self.recovery.stats(),
            offline,
            synthetic_active,
            self.started_at.elapsed(),
        )
    }

    fn stop_background(&self) {
        if let Some(task) = self.metrics_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.pump_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.synthetic.lock().task.take() {
            task.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_background();
    }
}

async fn event_pump(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut pressure: mpsc::UnboundedReceiver<MemoryPressure>,
) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                inner.on_session_event(event);
            }
            Some(p) = pressure.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.on_memory_pressure(&p);
            }
        }
    }
    tracing::debug!("Event pump stopped");
}

async fn metrics_loop(inner: Weak<Inner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        if inner.metrics_listeners.is_empty() {
            continue;
        }
        let metrics = inner.collect_metrics();
        inner.metrics_listeners.notify(&metrics);
    }
}

async fn synthetic_loop(inner: Weak<Inner>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;
    let mut last = tokio::time::Instant::now();
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else { break };
        let now = tokio::time::Instant::now();
        let batch = inner
            .synthetic
            .lock()
            .generator
            .next_batch(now.into_std(), now.duration_since(last));
        last = now;
        inner.deliver(batch);
    }
}
