//! Error Classification
//!
//! Maps raw failures onto a small taxonomy of category, severity and
//! recoverability. Classification is a pure function of the failure message:
//! rules are evaluated in priority order against the lowercased message
//! (substring match) and the first match wins.
//!
//! | Keywords                                               | Category    | Severity | Recoverable |
//! |--------------------------------------------------------|-------------|----------|-------------|
//! | websocket, connection, timeout, network is offline     | network     | high     | yes         |
//! | parse, failed to parse, invalid data format            | data        | medium   | yes         |
//! | render, canvas                                         | rendering   | high     | yes         |
//! | memory, performance                                    | performance | critical | no          |
//! | validation                                             | validation  | medium   | yes         |
//! | (none)                                                 | unknown     | medium   | yes         |

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Transport, connectivity and timeouts
    Network,
    /// Unparsable or malformed payloads
    Data,
    /// Consumer-side presentation failures
    Rendering,
    /// Memory or throughput exhaustion
    Performance,
    /// Structurally invalid samples
    Validation,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Severity assigned by the classification table
    #[must_use]
    pub fn default_severity(self) -> ErrorSeverity {
        match self {
            Self::Network | Self::Rendering => ErrorSeverity::High,
            Self::Performance => ErrorSeverity::Critical,
            Self::Data | Self::Validation | Self::Unknown => ErrorSeverity::Medium,
        }
    }

    /// Recoverability assigned by the classification table
    #[must_use]
    pub fn default_recoverable(self) -> bool {
        !matches!(self, Self::Performance)
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Data => "data",
            Self::Rendering => "rendering",
            Self::Performance => "performance",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Cosmetic or informational
    Low,
    /// Degraded, automatically handled
    Medium,
    /// Service-affecting
    High,
    /// Needs manual intervention
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A classified failure
///
/// Fields are public so scenario tests can override them; production code
/// treats a classified error as immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Taxonomy category
    pub category: ErrorCategory,
    /// Severity
    pub severity: ErrorSeverity,
    /// Whether in-process recovery is meaningful
    pub recoverable: bool,
    /// Original failure message
    pub message: String,
    /// Component that reported the failure
    pub component: Option<String>,
    /// When the failure was classified
    pub occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Build an error of a known category with the table's severity and recoverability
    pub fn of_category(
        category: ErrorCategory,
        message: impl Into<String>,
        component: Option<&str>,
    ) -> Self {
        Self {
            category,
            severity: category.default_severity(),
            recoverable: category.default_recoverable(),
            message: message.into(),
            component: component.map(str::to_string),
            occurred_at: Utc::now(),
        }
    }

    /// Whether consumers must be told to intervene manually
    #[must_use]
    pub fn requires_manual_action(&self) -> bool {
        !self.recoverable || self.severity == ErrorSeverity::Critical
    }

    /// User-facing guidance for this error
    #[must_use]
    pub fn guidance(&self) -> &'static str {
        if self.requires_manual_action() {
            return "This problem cannot be fixed automatically. Restart or reload the stream once the cause is addressed.";
        }
        match self.category {
            ErrorCategory::Network => "Connection lost. Reconnecting automatically.",
            ErrorCategory::Data | ErrorCategory::Validation => {
                "Some incoming data was discarded. The stream continues with valid samples."
            }
            ErrorCategory::Rendering => "Display degraded. A simplified view is used until it recovers.",
            ErrorCategory::Performance | ErrorCategory::Unknown => {
                "An unexpected problem occurred. Automatic recovery is in progress."
            }
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.category, self.severity, self.message)?;
        if let Some(ref component) = self.component {
            write!(f, " (in {component})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}

struct Rule {
    keywords: &'static [&'static str],
    category: ErrorCategory,
}

/// Priority-ordered classification rules
const RULES: &[Rule] = &[
    Rule {
        keywords: &["websocket", "connection", "timeout", "network is offline"],
        category: ErrorCategory::Network,
    },
    Rule {
        keywords: &["parse", "failed to parse", "invalid data format"],
        category: ErrorCategory::Data,
    },
    Rule {
        keywords: &["render", "canvas"],
        category: ErrorCategory::Rendering,
    },
    Rule {
        keywords: &["memory", "performance"],
        category: ErrorCategory::Performance,
    },
    Rule {
        keywords: &["validation"],
        category: ErrorCategory::Validation,
    },
];

/// Category a failure message maps to
#[must_use]
pub fn category_of(message: &str) -> ErrorCategory {
    let lowered = message.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.keywords.iter().any(|k| lowered.contains(k)))
        .map_or(ErrorCategory::Unknown, |rule| rule.category)
}

/// Classify a raw failure
///
/// Deterministic apart from `occurred_at`, which is stamped with the
/// current time.
pub fn classify<E>(error: &E, component: Option<&str>) -> ClassifiedError
where
    E: fmt::Display + ?Sized,
{
    let message = error.to_string();
    ClassifiedError::of_category(category_of(&message), message, component)
}
