//! Pulse Core - Resilient Time-Series Stream Ingestion
//!
//! This crate ingests a continuous stream of time-stamped samples over an
//! unreliable transport and hands it to consumers with bounded memory,
//! self-healing connectivity and classified failure reporting. It has no
//! presentation code; charts, grids and dashboards are consumers that read
//! buffered samples and subscribe to notifications.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Consumers                                │
//! │        on_data · on_status_change · on_metrics_update · on_error  │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────┼──────────────────────────────────┐
//! │                         PULSE CORE                                │
//! │  ┌────────────────────────────┴───────────────────────────────┐  │
//! │  │                     StreamingService                        │  │
//! │  │  ┌───────────────┐  ┌──────────────┐  ┌─────────────────┐  │  │
//! │  │  │ Connection    │─►│ StreamBuffer │  │ RecoveryManager │  │  │
//! │  │  │ Session       │──┼──────────────┼─►│  (strategies)   │  │  │
//! │  │  └───────┬───────┘  └──────────────┘  └─────────────────┘  │  │
//! │  └──────────┼─────────────────────────────────────────────────┘  │
//! │             │ Connector (WebSocket / in-process)                  │
//! └─────────────┼─────────────────────────────────────────────────────┘
//!               ▼
//!          remote stream
//! ```
//!
//! # Key Types
//!
//! - [`StreamingService`]: composition root and control surface
//! - [`ConnectionSession`]: reconnect/backoff/fallback/heartbeat actor
//! - [`StreamBuffer`]: bounded drop-oldest sliding window
//! - [`RecoveryManager`]: priority-ordered recovery strategies with history
//! - [`classify()`]: raw failure to [`ClassifiedError`]
//! - [`Sample`]: one time-stamped observation
//!
//! # Quick Start
//!
//! ```ignore
//! use pulse_core::{StreamingConfig, StreamingService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = StreamingConfig::with_url("wss://feed.example.com/stream");
//!     let service = StreamingService::websocket(config)?;
//!
//!     let _data = service.on_data(|batch| println!("{} samples", batch.len()));
//!     let _status = service.on_status_change(|status| println!("status: {status}"));
//!
//!     service.connect().await?;
//!     tokio::signal::ctrl_c().await?;
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`sample`]: the sample data model and its wire validation
//! - [`classify`]: error taxonomy and classification rules
//! - [`streaming`]: the buffer and synthetic data generation
//! - [`recovery`]: recovery strategies and the manager
//! - [`transport`]: connector abstraction, wire codec, heartbeats
//! - [`session`]: the connection resilience state machine and actor
//! - [`config`]: layered TOML/env/CLI configuration
//! - [`metrics`]: the combined metrics record
//! - [`service`]: the facade

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod classify;
pub mod config;
pub mod metrics;
mod observer;
pub mod recovery;
pub mod sample;
pub mod service;
pub mod session;
pub mod streaming;
pub mod transport;

// Data model
pub use sample::{Metadata, MetadataValue, Sample, ValidationError};

// Classification
pub use classify::{classify, ClassifiedError, ErrorCategory, ErrorSeverity};

// Streaming exports
pub use streaming::{
    BufferConfig, BufferMetrics, MemoryPressure, Scenario, StreamBuffer, SyntheticConfig,
    SyntheticGenerator,
};

// Recovery exports
pub use recovery::{
    RecoveryAction, RecoveryAttempt, RecoveryContext, RecoveryManager, RecoveryResult,
    RecoveryStats, RecoveryStrategy, StrategyError,
};

// Transport exports
pub use transport::{Connector, HeartbeatConfig, TransportError, TransportEvent, TransportLink};

// Session exports
pub use session::{
    ConnectionSession, ConnectionStatus, NetworkStatus, SessionConfig, SessionDiagnostics,
    SessionEvent, SessionSnapshot,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, StreamingConfig,
};

// Facade exports
pub use metrics::StreamingMetrics;
pub use observer::Subscription;
pub use service::{ErrorNotice, InjectReport, StreamError, StreamingService};
