//! Session State Machine
//!
//! Every input (command, transport event, timer) is a method taking the
//! current instant and returning the [`Action`]s the actor must perform.
//! Nothing here awaits, spawns or touches a socket, so every transition is
//! testable with synthetic instants.
//!
//! ```text
//!                 connect()
//!  Disconnected ───────────► Connecting ──open ok──► Connected
//!      ▲  ▲                    │   │                    │
//!      │  │ reconnect timer    │   │ timeout / refused  │ close ≠ 1000 / error /
//!      │  └────────────────────┼───┘                    │ heartbeat dead
//!      │       backoff(n)      ▼                        ▼
//!      │                 connection_lost() ◄────────────┘
//!      │                       │ budget spent on every URL
//!      │ close 1000,           ▼
//!      │ disconnect()        Error
//! ```

use std::time::Instant;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::classify::{classify, ClassifiedError, ErrorCategory};
use crate::sample::Sample;
use crate::transport::wire::{self, Inbound};
use crate::transport::{HeartbeatTick, HeartbeatTracker, TransportError, NORMAL_CLOSE};

use super::config::{deadline_after, SessionConfig};
use super::scheduler::{Scheduler, TimerKind};

/// Component tag on errors raised by the session
pub const COMPONENT: &str = "session";

/// EMA weight of the newest validity ratio in the integrity score
pub const INTEGRITY_ALPHA: f64 = 0.1;

/// Connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Idle, or waiting for a reconnect
    #[default]
    Disconnected,
    /// Open in flight
    Connecting,
    /// Link up
    Connected,
    /// Every URL exhausted its reconnect budget
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Host network availability as last signalled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkStatus {
    /// Reachable
    #[default]
    Online,
    /// Unreachable; reconnection suspended
    Offline,
}

/// Point-in-time view of a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    /// Connection status
    pub status: ConnectionStatus,
    /// URL in use (or next to be tried)
    pub current_url: Option<String>,
    /// Index of `current_url` in the URL list
    pub url_index: usize,
    /// URLs that lost a connection or failed an open, first occurrence order
    pub attempted_urls: Vec<String>,
    /// Reconnects scheduled on the current URL
    pub reconnect_count: u32,
    /// Most recent failure
    pub last_error: Option<ClassifiedError>,
    /// 0..=100, EMA of per-message validity
    pub data_integrity_score: f64,
    /// Data payloads received (including unparsable ones)
    pub messages_received: u64,
    /// Unparsable payloads plus invalid samples
    pub messages_lost: u64,
    /// Network availability
    pub network: NetworkStatus,
    /// Wall-clock time the current link opened
    pub connected_since: Option<DateTime<Utc>>,
    /// Monotonic time the current link opened
    #[serde(skip)]
    pub connected_at: Option<Instant>,
    /// Most recent heartbeat round trip
    pub last_latency_ms: Option<f64>,
    /// Smoothed heartbeat round trip
    pub average_latency_ms: Option<f64>,
    /// Armed session timers
    pub pending_timers: usize,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            current_url: None,
            url_index: 0,
            attempted_urls: Vec::new(),
            reconnect_count: 0,
            last_error: None,
            data_integrity_score: 100.0,
            messages_received: 0,
            messages_lost: 0,
            network: NetworkStatus::Online,
            connected_since: None,
            connected_at: None,
            last_latency_ms: None,
            average_latency_ms: None,
            pending_timers: 0,
        }
    }
}

impl SessionSnapshot {
    /// Diagnostics view as of `now`
    #[must_use]
    pub fn diagnostics(&self, now: Instant) -> SessionDiagnostics {
        let connection_duration_ms = self.connected_at.map_or(0, |at| {
            u64::try_from(now.saturating_duration_since(at).as_millis()).unwrap_or(u64::MAX)
        });
        SessionDiagnostics {
            current_url: self.current_url.clone(),
            attempted_urls: self.attempted_urls.clone(),
            network_status: self.network,
            connection_duration_ms,
            messages_received: self.messages_received,
            messages_lost: self.messages_lost,
        }
    }
}

/// Read-only connection diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionDiagnostics {
    /// URL in use
    pub current_url: Option<String>,
    /// URLs that failed, first occurrence order
    pub attempted_urls: Vec<String>,
    /// Network availability
    pub network_status: NetworkStatus,
    /// Age of the current link, 0 when not connected
    pub connection_duration_ms: u64,
    /// Data payloads received
    pub messages_received: u64,
    /// Payloads and samples lost
    pub messages_lost: u64,
}

/// Side effect requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Action {
    /// Start opening `url`; results tagged with `attempt`
    Open { attempt: u64, url: String },
    /// Cancel the in-flight open
    AbortOpen,
    /// Close and release the link
    Close { code: u16, reason: String },
    /// Write to the link
    Send(String),
    /// Status changed
    Status(ConnectionStatus),
    /// Valid samples, in wire order
    Deliver(Vec<Sample>),
    /// Samples dropped as invalid
    Rejected(usize),
    /// A classified failure
    Failure(ClassifiedError),
}

/// The connection resilience state machine
#[derive(Debug)]
pub(crate) struct SessionMachine {
    config: SessionConfig,
    status: ConnectionStatus,
    url_index: usize,
    attempted_urls: IndexSet<String>,
    reconnect_count: u32,
    last_error: Option<ClassifiedError>,
    integrity: f64,
    messages_received: u64,
    messages_lost: u64,
    network_online: bool,
    resume_on_online: bool,
    attempt: u64,
    connected_at: Option<Instant>,
    heartbeat: HeartbeatTracker,
    timers: Scheduler,
    anchor: (Instant, DateTime<Utc>),
}

impl SessionMachine {
    pub fn new(config: SessionConfig, now: Instant) -> Self {
        let heartbeat = HeartbeatTracker::new(&config.heartbeat);
        Self {
            config,
            status: ConnectionStatus::Disconnected,
            url_index: 0,
            attempted_urls: IndexSet::new(),
            reconnect_count: 0,
            last_error: None,
            integrity: 100.0,
            messages_received: 0,
            messages_lost: 0,
            network_online: true,
            resume_on_online: false,
            attempt: 0,
            connected_at: None,
            heartbeat,
            timers: Scheduler::default(),
            anchor: (now, Utc::now()),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Whether an open result tagged `attempt` is still wanted
    pub fn is_pending_attempt(&self, attempt: u64) -> bool {
        self.status == ConnectionStatus::Connecting && attempt == self.attempt
    }

    fn current_url(&self) -> Option<&str> {
        self.config.urls.get(self.url_index).map(String::as_str)
    }

    fn wall_clock(&self, now: Instant) -> DateTime<Utc> {
        let elapsed = now.saturating_duration_since(self.anchor.0);
        self.anchor.1 + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn set_status(&mut self, status: ConnectionStatus) -> Vec<Action> {
        if self.status == status {
            return Vec::new();
        }
        tracing::info!(from = %self.status, to = %status, "Connection status changed");
        self.status = status;
        vec![Action::Status(status)]
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            current_url: self.current_url().map(str::to_string),
            url_index: self.url_index,
            attempted_urls: self.attempted_urls.iter().cloned().collect(),
            reconnect_count: self.reconnect_count,
            last_error: self.last_error.clone(),
            data_integrity_score: self.integrity,
            messages_received: self.messages_received,
            messages_lost: self.messages_lost,
            network: if self.network_online {
                NetworkStatus::Online
            } else {
                NetworkStatus::Offline
            },
            connected_since: self.connected_at.map(|at| self.wall_clock(at)),
            connected_at: self.connected_at,
            last_latency_ms: self.heartbeat.last_latency_ms(),
            average_latency_ms: self.heartbeat.average_latency_ms(),
            pending_timers: self.timers.pending(),
        }
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn connect(&mut self, now: Instant) -> Vec<Action> {
        if matches!(
            self.status,
            ConnectionStatus::Connecting | ConnectionStatus::Connected
        ) {
            tracing::debug!(status = %self.status, "Connect ignored");
            return Vec::new();
        }
        if !self.network_online {
            tracing::info!("Network offline, connect deferred until online");
            self.resume_on_online = true;
            return Vec::new();
        }
        if self.config.urls.is_empty() {
            let error = ClassifiedError::of_category(
                ErrorCategory::Network,
                "No stream URL configured; connection unavailable",
                Some(COMPONENT),
            );
            self.last_error = Some(error.clone());
            let mut actions = self.set_status(ConnectionStatus::Error);
            actions.push(Action::Failure(error));
            return actions;
        }
        if self.status == ConnectionStatus::Error {
            self.url_index = 0;
            self.attempted_urls.clear();
            self.reconnect_count = 0;
        }
        self.timers.cancel(TimerKind::Reconnect);
        self.begin_attempt(now)
    }

    pub fn disconnect(&mut self, _now: Instant) -> Vec<Action> {
        self.timers.cancel_all();
        self.reconnect_count = 0;
        self.resume_on_online = false;
        self.connected_at = None;
        self.heartbeat.reset();

        let mut actions = match self.status {
            ConnectionStatus::Connecting => vec![Action::AbortOpen],
            ConnectionStatus::Connected => vec![Action::Close {
                code: NORMAL_CLOSE,
                reason: "client disconnect".to_string(),
            }],
            ConnectionStatus::Disconnected | ConnectionStatus::Error => Vec::new(),
        };
        actions.extend(self.set_status(ConnectionStatus::Disconnected));
        actions
    }

    pub fn set_network_online(&mut self, online: bool, now: Instant) -> Vec<Action> {
        if online == self.network_online {
            return Vec::new();
        }
        self.network_online = online;

        if online {
            tracing::info!("Network back online");
            if !std::mem::take(&mut self.resume_on_online) {
                return Vec::new();
            }
            self.reconnect_count = 0;
            if self.status == ConnectionStatus::Error {
                self.url_index = 0;
                self.attempted_urls.clear();
            }
            return self.begin_attempt(now);
        }

        self.resume_on_online = self.resume_on_online
            || self.timers.is_pending(TimerKind::Reconnect)
            || matches!(
                self.status,
                ConnectionStatus::Connecting | ConnectionStatus::Connected
            );
        self.timers.cancel_all();
        self.connected_at = None;
        self.heartbeat.reset();

        let mut actions = match self.status {
            ConnectionStatus::Connecting => vec![Action::AbortOpen],
            ConnectionStatus::Connected => vec![Action::Close {
                code: NORMAL_CLOSE,
                reason: "network offline".to_string(),
            }],
            ConnectionStatus::Disconnected | ConnectionStatus::Error => Vec::new(),
        };
        let error = classify("Network is offline", Some(COMPONENT));
        tracing::warn!(resume = self.resume_on_online, "Network offline");
        self.last_error = Some(error.clone());
        actions.push(Action::Failure(error));
        actions.extend(self.set_status(ConnectionStatus::Disconnected));
        actions
    }

    // ------------------------------------------------------------------
    // Open results
    // ------------------------------------------------------------------

    pub fn open_succeeded(&mut self, now: Instant) -> Vec<Action> {
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.reconnect_count = 0;
        self.connected_at = Some(now);
        self.heartbeat.reset();
        if self.config.heartbeat.enabled {
            let deadline = deadline_after(now, self.config.heartbeat.interval);
            self.timers.schedule(TimerKind::Heartbeat, deadline);
        }
        tracing::info!(url = self.current_url().unwrap_or_default(), "Connected");
        self.set_status(ConnectionStatus::Connected)
    }

    pub fn open_failed(&mut self, error: &TransportError, now: Instant) -> Vec<Action> {
        self.connection_lost(classify(error, Some(COMPONENT)), now)
    }

    // ------------------------------------------------------------------
    // Link events
    // ------------------------------------------------------------------

    pub fn link_closed(&mut self, code: u16, reason: &str, now: Instant) -> Vec<Action> {
        if self.status != ConnectionStatus::Connected {
            return Vec::new();
        }
        if code == NORMAL_CLOSE {
            tracing::info!(reason, "Stream closed normally");
            self.timers.cancel(TimerKind::Heartbeat);
            self.connected_at = None;
            let mut actions = vec![Action::Close {
                code: NORMAL_CLOSE,
                reason: reason.to_string(),
            }];
            actions.extend(self.set_status(ConnectionStatus::Disconnected));
            return actions;
        }
        let message = if reason.is_empty() {
            format!("WebSocket connection closed abnormally (code {code})")
        } else {
            format!("WebSocket connection closed abnormally (code {code}): {reason}")
        };
        self.connection_lost(classify(message.as_str(), Some(COMPONENT)), now)
    }

    pub fn link_error(&mut self, reason: &str, now: Instant) -> Vec<Action> {
        if self.status != ConnectionStatus::Connected {
            return Vec::new();
        }
        let message = format!("WebSocket connection error: {reason}");
        self.connection_lost(classify(message.as_str(), Some(COMPONENT)), now)
    }

    pub fn link_message(&mut self, text: &str, now: Instant) -> Vec<Action> {
        if self.status != ConnectionStatus::Connected {
            return Vec::new();
        }
        match wire::decode(text) {
            Ok(Inbound::Ping { timestamp }) => vec![Action::Send(wire::pong(timestamp))],
            Ok(Inbound::Pong { timestamp }) => {
                let now_ms = self.wall_clock(now).timestamp_millis();
                let latency = self.heartbeat.pong(timestamp, now_ms);
                tracing::trace!(latency_ms = latency.as_millis() as u64, "Pong");
                Vec::new()
            }
            Ok(Inbound::Samples(raw)) => self.ingest(&raw),
            Err(e) => {
                self.messages_received += 1;
                self.messages_lost += 1;
                if self.config.data_validation {
                    self.update_integrity(0.0);
                }
                let error = classify(&e, Some(COMPONENT));
                tracing::debug!(error = %error, "Dropped unparsable message");
                self.last_error = Some(error.clone());
                vec![Action::Failure(error)]
            }
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn ingest(&mut self, raw: &[Value]) -> Vec<Action> {
        self.messages_received += 1;
        let total = raw.len();
        let mut valid = Vec::with_capacity(total);
        let mut first_problem = None;
        for item in raw {
            match Sample::from_json(item) {
                Ok(sample) => valid.push(sample),
                Err(e) => {
                    first_problem.get_or_insert(e);
                }
            }
        }
        let invalid = total - valid.len();

        if self.config.data_validation && total > 0 {
            self.update_integrity(valid.len() as f64 / total as f64);
        }

        let mut actions = Vec::new();
        if invalid > 0 {
            actions.push(Action::Rejected(invalid));
        }
        if !valid.is_empty() {
            tracing::debug!(count = valid.len(), "Samples received");
            actions.push(Action::Deliver(valid));
        }
        if invalid > 0 && self.config.data_validation {
            self.messages_lost += invalid as u64;
            let detail = first_problem.map(|e| e.to_string()).unwrap_or_default();
            let error = ClassifiedError::of_category(
                ErrorCategory::Validation,
                format!("Sample validation failed for {invalid} of {total} samples: {detail}"),
                Some(COMPONENT),
            );
            self.last_error = Some(error.clone());
            actions.push(Action::Failure(error));
        }
        actions
    }

    fn update_integrity(&mut self, ratio: f64) {
        self.integrity =
            (self.integrity * (1.0 - INTEGRITY_ALPHA) + ratio * 100.0 * INTEGRITY_ALPHA).clamp(0.0, 100.0);
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn poll_timers(&mut self, now: Instant) -> Vec<Action> {
        let mut actions = Vec::new();
        for kind in self.timers.take_due(now) {
            actions.extend(self.timer_fired(kind, now));
        }
        actions
    }

    fn timer_fired(&mut self, kind: TimerKind, now: Instant) -> Vec<Action> {
        match kind {
            TimerKind::ConnectTimeout if self.status == ConnectionStatus::Connecting => {
                let error = TransportError::Timeout(self.config.connection_timeout);
                self.connection_lost(classify(&error, Some(COMPONENT)), now)
            }
            TimerKind::Reconnect
                if self.status == ConnectionStatus::Disconnected && self.network_online =>
            {
                self.begin_attempt(now)
            }
            TimerKind::Heartbeat if self.status == ConnectionStatus::Connected => {
                let now_ms = self.wall_clock(now).timestamp_millis();
                match self.heartbeat.tick(now_ms) {
                    HeartbeatTick::SendPing(timestamp) => {
                        self.timers.schedule(
                            TimerKind::Heartbeat,
                            deadline_after(now, self.config.heartbeat.interval),
                        );
                        tracing::trace!(timestamp, "Ping");
                        vec![Action::Send(wire::ping(timestamp))]
                    }
                    HeartbeatTick::Dead { missed } => {
                        let message = format!("Heartbeat timeout: {missed} consecutive pongs missed");
                        self.connection_lost(classify(message.as_str(), Some(COMPONENT)), now)
                    }
                }
            }
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------

    fn begin_attempt(&mut self, now: Instant) -> Vec<Action> {
        let Some(url) = self.current_url().map(str::to_string) else {
            return self.exhausted();
        };
        self.attempt += 1;
        let deadline = deadline_after(now, self.config.connection_timeout);
        self.timers.schedule(TimerKind::ConnectTimeout, deadline);
        tracing::info!(url = %url, retry = self.reconnect_count, "Connecting");
        let mut actions = self.set_status(ConnectionStatus::Connecting);
        actions.push(Action::Open {
            attempt: self.attempt,
            url,
        });
        actions
    }

    fn connection_lost(&mut self, error: ClassifiedError, now: Instant) -> Vec<Action> {
        self.timers.cancel(TimerKind::ConnectTimeout);
        self.timers.cancel(TimerKind::Heartbeat);
        self.connected_at = None;
        self.heartbeat.reset();

        let mut actions = match self.status {
            ConnectionStatus::Connecting => vec![Action::AbortOpen],
            ConnectionStatus::Connected => vec![Action::Close {
                code: NORMAL_CLOSE,
                reason: "reconnecting".to_string(),
            }],
            ConnectionStatus::Disconnected | ConnectionStatus::Error => Vec::new(),
        };
        tracing::warn!(error = %error, "Connection lost");
        self.last_error = Some(error.clone());
        actions.push(Action::Failure(error));
        actions.extend(self.set_status(ConnectionStatus::Disconnected));

        if !self.config.auto_reconnect {
            return actions;
        }
        if !self.network_online {
            self.resume_on_online = true;
            return actions;
        }
        actions.extend(self.schedule_reconnect(now));
        actions
    }

    fn schedule_reconnect(&mut self, now: Instant) -> Vec<Action> {
        if let Some(url) = self.current_url().map(str::to_string) {
            self.attempted_urls.insert(url);
        }
        if self.reconnect_count >= self.config.max_reconnect_attempts {
            if self.url_index + 1 >= self.config.urls.len() {
                return self.exhausted();
            }
            self.url_index += 1;
            self.reconnect_count = 0;
            tracing::warn!(
                url = self.current_url().unwrap_or_default(),
                "Reconnect budget spent, switching to fallback URL"
            );
        }

        let delay = self.config.backoff_delay(self.reconnect_count);
        self.reconnect_count += 1;
        self.timers.schedule(TimerKind::Reconnect, deadline_after(now, delay));
        tracing::debug!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.reconnect_count,
            "Reconnect scheduled"
        );
        Vec::new()
    }

    fn exhausted(&mut self) -> Vec<Action> {
        let error = ClassifiedError::of_category(
            ErrorCategory::Network,
            format!(
                "Failed to reconnect after {} attempts",
                self.config.max_reconnect_attempts
            ),
            Some(COMPONENT),
        );
        tracing::warn!(error = %error, "Giving up");
        self.last_error = Some(error.clone());
        let mut actions = self.set_status(ConnectionStatus::Error);
        actions.push(Action::Failure(error));
        actions
    }
}
