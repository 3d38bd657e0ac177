//! Recovery Strategies
//!
//! A strategy declares which classified errors it handles and how. The
//! built-in set covers every [`ErrorCategory`] plus a catch-all safe mode.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::classify::{ClassifiedError, ErrorCategory};
use crate::sample::Sample;

/// Follow-up the owner of the stream may execute after a recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-open the transport (the session's backoff loop already does this)
    Reconnect,
    /// Switch to synthetic data while the transport is unavailable
    EnterOfflineMode,
    /// Run a de-duplication pass over the buffer
    OptimizeBuffer,
    /// Consumers should fall back to a cheaper presentation
    SimplifyRendering,
    /// Consumers should switch to a minimal, known-safe mode
    SafeMode,
}

/// Outcome of a recovery attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryResult {
    /// Whether the strategy believes the error is handled
    pub success: bool,
    /// Human-readable summary
    pub message: String,
    /// Samples salvaged from the supplied context
    pub recovered_data: Option<Vec<Sample>>,
    /// Preferred follow-up
    pub retry_action: Option<RecoveryAction>,
    /// Follow-up if the retry does not help
    pub fallback_action: Option<RecoveryAction>,
}

impl RecoveryResult {
    /// A successful result
    pub fn recovered(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    /// A failed result
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Attach a retry action
    #[must_use]
    pub fn with_retry(mut self, action: RecoveryAction) -> Self {
        self.retry_action = Some(action);
        self
    }

    /// Attach a fallback action
    #[must_use]
    pub fn with_fallback(mut self, action: RecoveryAction) -> Self {
        self.fallback_action = Some(action);
        self
    }

    /// Attach salvaged samples
    #[must_use]
    pub fn with_data(mut self, data: Vec<Sample>) -> Self {
        self.recovered_data = Some(data);
        self
    }

    /// Every action this result asks for, retry first
    pub fn actions(&self) -> impl Iterator<Item = RecoveryAction> + '_ {
        self.retry_action.into_iter().chain(self.fallback_action)
    }
}

/// Last state known to be good, as raw wire objects
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LastKnownGoodState {
    /// Raw sample objects; may include structurally invalid entries
    pub data: Vec<Value>,
}

/// Optional input to a recovery attempt
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryContext {
    /// Snapshot to salvage samples from
    pub last_known_good_state: Option<LastKnownGoodState>,
}

impl RecoveryContext {
    /// Context carrying a last-known-good snapshot
    #[must_use]
    pub fn with_last_known_good(data: Vec<Value>) -> Self {
        Self {
            last_known_good_state: Some(LastKnownGoodState { data }),
        }
    }

    /// Structurally valid samples from the snapshot, if there is one
    #[must_use]
    pub fn valid_samples(&self) -> Option<Vec<Sample>> {
        self.last_known_good_state.as_ref().map(|state| {
            state
                .data
                .iter()
                .filter_map(|raw| Sample::from_json(raw).ok())
                .collect()
        })
    }
}

/// A strategy failed to run (as opposed to running and reporting failure)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("recovery strategy `{strategy}` failed: {reason}")]
pub struct StrategyError {
    /// Strategy name
    pub strategy: String,
    /// What went wrong
    pub reason: String,
}

impl StrategyError {
    /// Create a strategy error
    pub fn new(strategy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            reason: reason.into(),
        }
    }
}

/// A named, prioritized recovery handler
///
/// Strategies must do bounded, I/O-free work; the manager calls them
/// synchronously.
pub trait RecoveryStrategy: Send + Sync {
    /// Unique name, used in history and statistics
    fn name(&self) -> &str;

    /// Higher runs first
    fn priority(&self) -> u32;

    /// Whether this strategy handles the error
    fn can_recover(&self, error: &ClassifiedError) -> bool;

    /// Attempt recovery
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError`] when the strategy itself could not run; the
    /// manager then moves on to the next candidate.
    fn recover(
        &self,
        error: &ClassifiedError,
        context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError>;
}

// ============================================================================
// Built-in strategies
// ============================================================================

/// Connectivity failures: rely on reconnection, fall back to offline data
#[derive(Debug, Default)]
pub struct NetworkRecovery;

impl RecoveryStrategy for NetworkRecovery {
    fn name(&self) -> &str {
        "network"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn can_recover(&self, error: &ClassifiedError) -> bool {
        error.category == ErrorCategory::Network
    }

    fn recover(
        &self,
        _error: &ClassifiedError,
        _context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError> {
        Ok(
            RecoveryResult::recovered("Reconnection scheduled with exponential backoff")
                .with_retry(RecoveryAction::Reconnect)
                .with_fallback(RecoveryAction::EnterOfflineMode),
        )
    }
}

/// Malformed or invalid samples: keep the stream going, salvage context data
#[derive(Debug)]
pub struct SampleRecovery {
    name: &'static str,
    category: ErrorCategory,
    priority: u32,
}

impl SampleRecovery {
    /// Handles [`ErrorCategory::Data`]
    #[must_use]
    pub fn data() -> Self {
        Self {
            name: "data",
            category: ErrorCategory::Data,
            priority: 90,
        }
    }

    /// Handles [`ErrorCategory::Validation`]
    #[must_use]
    pub fn validation() -> Self {
        Self {
            name: "validation",
            category: ErrorCategory::Validation,
            priority: 85,
        }
    }
}

impl RecoveryStrategy for SampleRecovery {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn can_recover(&self, error: &ClassifiedError) -> bool {
        error.category == self.category
    }

    fn recover(
        &self,
        _error: &ClassifiedError,
        context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError> {
        match context.and_then(RecoveryContext::valid_samples) {
            Some(samples) => Ok(RecoveryResult::recovered(format!(
                "Recovered {} valid samples from last known good state",
                samples.len()
            ))
            .with_data(samples)),
            None => Ok(RecoveryResult::recovered(
                "Discarded malformed input; stream continues with valid samples",
            )),
        }
    }
}

/// Consumer presentation failures
#[derive(Debug, Default)]
pub struct RenderingRecovery;

impl RecoveryStrategy for RenderingRecovery {
    fn name(&self) -> &str {
        "rendering"
    }

    fn priority(&self) -> u32 {
        80
    }

    fn can_recover(&self, error: &ClassifiedError) -> bool {
        error.category == ErrorCategory::Rendering
    }

    fn recover(
        &self,
        _error: &ClassifiedError,
        _context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError> {
        Ok(RecoveryResult::recovered("Switched consumers to simplified rendering")
            .with_fallback(RecoveryAction::SimplifyRendering))
    }
}

/// Memory or throughput exhaustion
///
/// Asks for an optimize pass but reports failure: the buffered window is
/// never discarded here, and the condition is left to manual action.
#[derive(Debug, Default)]
pub struct PerformanceRecovery;

impl RecoveryStrategy for PerformanceRecovery {
    fn name(&self) -> &str {
        "performance"
    }

    fn priority(&self) -> u32 {
        70
    }

    fn can_recover(&self, error: &ClassifiedError) -> bool {
        error.category == ErrorCategory::Performance
    }

    fn recover(
        &self,
        _error: &ClassifiedError,
        _context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError> {
        Ok(RecoveryResult::failed(
            "Buffer optimization requested; memory pressure needs manual action (reload)",
        )
        .with_retry(RecoveryAction::OptimizeBuffer))
    }
}

/// Unclassified failures: degrade to safe mode
#[derive(Debug, Default)]
pub struct UnknownRecovery;

impl RecoveryStrategy for UnknownRecovery {
    fn name(&self) -> &str {
        "unknown"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn can_recover(&self, error: &ClassifiedError) -> bool {
        error.category == ErrorCategory::Unknown
    }

    fn recover(
        &self,
        error: &ClassifiedError,
        context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError> {
        let mut result = SafeModeRecovery.recover(error, context)?;
        result.message = format!("Unrecognized failure, entered safe mode: {}", error.message);
        Ok(result)
    }
}

/// Catch-all; accepts everything and never fails
#[derive(Debug, Default)]
pub struct SafeModeRecovery;

impl RecoveryStrategy for SafeModeRecovery {
    fn name(&self) -> &str {
        "safe_mode"
    }

    fn priority(&self) -> u32 {
        0
    }

    fn can_recover(&self, _error: &ClassifiedError) -> bool {
        true
    }

    fn recover(
        &self,
        error: &ClassifiedError,
        _context: Option<&RecoveryContext>,
    ) -> Result<RecoveryResult, StrategyError> {
        Ok(RecoveryResult::recovered(format!(
            "Entered safe mode after {} error",
            error.category
        ))
        .with_fallback(RecoveryAction::SafeMode))
    }
}
