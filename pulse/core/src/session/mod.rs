//! Connection Resilience
//!
//! A session keeps one logical stream alive across an unreliable transport:
//! open with timeout, reconnect with capped exponential backoff, move to
//! fallback URLs, detect dead links via heartbeats, pause while the network
//! is offline.
//!
//! ```text
//!  caller ──connect/disconnect/network──┐
//!                                       ▼
//!  Connector::open ──► open results ──► SessionActor ──► StreamBuffer::add_batch
//!  TransportLink   ──► link events  ──►  (select!)   ──► RecoveryManager
//!  Scheduler       ──► timers       ──►      │       ──► SessionEvent channel
//!                                            ▼
//!                                  watch<SessionSnapshot>
//! ```
//!
//! The transition logic lives in a synchronous state machine; the actor
//! only performs the side effects it asks for.

mod config;
mod connection;
mod machine;
mod scheduler;

pub use config::{SessionConfig, MAX_TIMER_DELAY};
pub use connection::{ConnectionSession, SessionEvent};
pub use machine::{
    ConnectionStatus, NetworkStatus, SessionDiagnostics, SessionSnapshot, COMPONENT,
    INTEGRITY_ALPHA,
};
pub use scheduler::{Scheduler, TimerKind};
