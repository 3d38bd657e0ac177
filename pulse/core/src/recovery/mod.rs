//! Recovery Orchestration
//!
//! Consumes [`ClassifiedError`](crate::classify::ClassifiedError)s and runs
//! the highest-priority [`RecoveryStrategy`] that accepts them.
//!
//! ```text
//!  ClassifiedError ──► RecoveryManager
//!                        │  strategies (priority desc)
//!                        │   network(100) data(90) validation(85)
//!                        │   rendering(80) performance(70) unknown(10)
//!                        │   safe_mode(0)
//!                        ▼
//!                  first can_recover() ─► recover() ─► RecoveryResult
//!                        │ Err / panic: record failure, try next
//!                        ▼
//!                  bounded history ─► stats()
//! ```
//!
//! The manager is independent of the buffer and the connection; actions in
//! a [`RecoveryResult`] are executed by whoever owns those.

mod manager;
mod strategy;

pub use manager::{
    RecoveryAttempt, RecoveryManager, RecoveryStats, DEFAULT_HISTORY_LIMIT, NO_STRATEGY_MESSAGE,
};
pub use strategy::{
    LastKnownGoodState, NetworkRecovery, PerformanceRecovery, RecoveryAction, RecoveryContext,
    RecoveryResult, RecoveryStrategy, RenderingRecovery, SafeModeRecovery, SampleRecovery,
    StrategyError, UnknownRecovery,
};
