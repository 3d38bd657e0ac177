//! Recovery Manager
//!
//! Runs the highest-priority strategy that accepts an error and keeps a
//! bounded history of every attempt.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::classify::ClassifiedError;

use super::strategy::{
    NetworkRecovery, PerformanceRecovery, RecoveryContext, RecoveryResult, RecoveryStrategy,
    RenderingRecovery, SafeModeRecovery, SampleRecovery, UnknownRecovery,
};

/// Message used when no strategy produced a result
pub const NO_STRATEGY_MESSAGE: &str = "No recovery strategy available";

/// Default number of attempts kept in history
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// One entry of the recovery history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    /// Error being recovered
    pub error: ClassifiedError,
    /// Strategy that ran (`"none"` if nothing was applicable)
    pub strategy_name: String,
    /// Whether it reported success
    pub success: bool,
    /// Strategy message, or [`NO_STRATEGY_MESSAGE`] when it failed to run
    pub message: String,
    /// When the attempt was recorded
    pub timestamp: DateTime<Utc>,
}

/// Aggregates over the current history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryStats {
    /// Attempts in history
    pub total_attempts: usize,
    /// Attempts that reported success
    pub successful_recoveries: usize,
    /// Attempt count per strategy name
    pub strategies_used: BTreeMap<String, usize>,
}

impl RecoveryStats {
    /// Successful fraction of attempts, 0 when there are none
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_recoveries as f64 / self.total_attempts as f64
        }
    }
}

/// Strategy-based recovery orchestration
///
/// Strategies are kept sorted by descending priority (ties keep
/// registration order). History writes are serialized by one lock; the
/// strategy list is cloned out before strategies run, so no lock is held
/// while strategy code executes.
pub struct RecoveryManager {
    strategies: RwLock<Vec<Arc<dyn RecoveryStrategy>>>,
    history: Mutex<VecDeque<RecoveryAttempt>>,
    history_limit: usize,
}

impl Default for RecoveryManager {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

impl RecoveryManager {
    /// Manager with the built-in strategies
    ///
    /// One strategy per [`ErrorCategory`](crate::classify::ErrorCategory),
    /// then [`SafeModeRecovery`] for anything a custom registration lets
    /// through.
    #[must_use]
    pub fn new(history_limit: usize) -> Self {
        let manager = Self::empty(history_limit);
        manager.register(NetworkRecovery);
        manager.register(SampleRecovery::data());
        manager.register(SampleRecovery::validation());
        manager.register(RenderingRecovery);
        manager.register(PerformanceRecovery);
        manager.register(UnknownRecovery);
        manager.register(SafeModeRecovery);
        manager
    }

    /// Manager without any strategies
    #[must_use]
    pub fn empty(history_limit: usize) -> Self {
        Self {
            strategies: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            history_limit: history_limit.max(1),
        }
    }

    /// Add a strategy
    pub fn register<S>(&self, strategy: S)
    where
        S: RecoveryStrategy + 'static,
    {
        self.register_arc(Arc::new(strategy));
    }

    /// Add a shared strategy
    pub fn register_arc(&self, strategy: Arc<dyn RecoveryStrategy>) {
        let mut strategies = self.strategies.write();
        let position = strategies
            .iter()
            .position(|s| s.priority() < strategy.priority())
            .unwrap_or(strategies.len());
        tracing::debug!(
            strategy = strategy.name(),
            priority = strategy.priority(),
            "Registered recovery strategy"
        );
        strategies.insert(position, strategy);
    }

    /// Strategy names in evaluation order
    #[must_use]
    pub fn strategy_names(&self) -> Vec<String> {
        self.strategies
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Attempt recovery with the first applicable strategy
    ///
    /// A strategy that errors (or panics) is recorded as a failed attempt
    /// and the next applicable one is tried. When none produces a result,
    /// a failed result carrying [`NO_STRATEGY_MESSAGE`] is returned.
    pub fn attempt_recovery(
        &self,
        error: &ClassifiedError,
        context: Option<&RecoveryContext>,
    ) -> RecoveryResult {
        let strategies = self.strategies.read().clone();
        let mut tried = false;

        for strategy in strategies.iter().filter(|s| s.can_recover(error)) {
            tried = true;
            let outcome = catch_unwind(AssertUnwindSafe(|| strategy.recover(error, context)));
            match outcome {
                Ok(Ok(result)) => {
                    self.record(error, strategy.name(), result.success, &result.message);
                    tracing::info!(
                        strategy = strategy.name(),
                        category = %error.category,
                        success = result.success,
                        "Recovery attempted"
                    );
                    return result;
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Recovery strategy failed");
                    self.record(error, strategy.name(), false, NO_STRATEGY_MESSAGE);
                }
                Err(_) => {
                    tracing::warn!(strategy = strategy.name(), "Recovery strategy panicked");
                    self.record(error, strategy.name(), false, NO_STRATEGY_MESSAGE);
                }
            }
        }

        if !tried {
            self.record(error, "none", false, NO_STRATEGY_MESSAGE);
        }
        tracing::warn!(category = %error.category, message = %error.message, "{NO_STRATEGY_MESSAGE}");
        RecoveryResult::failed(NO_STRATEGY_MESSAGE)
    }

    /// Statistics over the current history
    #[must_use]
    pub fn stats(&self) -> RecoveryStats {
        let history = self.history.lock();
        let mut stats = RecoveryStats {
            total_attempts: history.len(),
            ..Default::default()
        };
        for attempt in history.iter() {
            if attempt.success {
                stats.successful_recoveries += 1;
            }
            *stats
                .strategies_used
                .entry(attempt.strategy_name.clone())
                .or_insert(0) += 1;
        }
        stats
    }

    /// Copy of the history, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<RecoveryAttempt> {
        self.history.lock().iter().cloned().collect()
    }

    /// Maximum number of attempts kept
    #[must_use]
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Forget all attempts
    pub fn clear_history(&self) {
        self.history.lock().clear();
    }

    fn record(&self, error: &ClassifiedError, strategy: &str, success: bool, message: &str) {
        let mut history = self.history.lock();
        while history.len() >= self.history_limit {
            history.pop_front();
        }
        history.push_back(RecoveryAttempt {
            error: error.clone(),
            strategy_name: strategy.to_string(),
            success,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl std::fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("strategies", &self.strategy_names())
            .field("history_len", &self.history.lock().len())
            .field("history_limit", &self.history_limit)
            .finish()
    }
}
