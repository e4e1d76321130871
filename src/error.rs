//! The error taxonomy: one variant per code, each carrying enough structure
//! to render the Error Object described in spec.md §6.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

/// Boxed adapter failure, used when an implementer's callback throws.
pub type AdapterError = Arc<dyn std::error::Error + Send + Sync>;

/// The engine's single error type.
///
/// Each variant corresponds to one row of the taxonomy table in spec.md §7:
/// code, category, retryability, and meaning are fixed per variant.
#[derive(Debug, Error, Clone, Serialize)]
#[serde(tag = "kind", content = "data")]
pub enum RouteCraftError {
    /// RC1001 — route definition has no source.
    #[error("route '{route_id}' is missing a source")]
    MissingSource {
        /// The offending route id.
        route_id: String,
    },

    /// RC1002 — two routes share the same id.
    #[error("duplicate route id '{route_id}'")]
    DuplicateRoute {
        /// The id that collided.
        route_id: String,
    },

    /// RC2001 — an operation type outside the known step kinds.
    #[error("invalid operation type '{operation}'")]
    InvalidOperation {
        /// The unrecognized operation name.
        operation: String,
    },

    /// RC2002 — `from` missing, or an aggregate with nothing to aggregate.
    #[error("{0}")]
    MissingFromOrEmptyAggregate(String),

    /// RC3001 — the route's controller is already aborted.
    #[error("route '{route_id}' cannot start: already aborted")]
    RouteCannotStart {
        /// The route that failed to start.
        route_id: String,
    },

    /// RC3002 — the context itself cannot start.
    #[error("context cannot start: {reason}")]
    ContextCannotStart {
        /// Human-readable reason.
        reason: String,
    },

    /// RC5001 — the source threw.
    #[error("source failed: {source_error}")]
    SourceFailed {
        /// The underlying adapter error.
        #[source]
        source_error: SourceError,
    },

    /// RC5002 — the processor threw, or an unclassified step-loop error was
    /// wrapped (per spec.md §7, anything not already a `RouteCraftError`).
    #[error("processor failed: {0}")]
    ProcessorFailed(String),

    /// RC5003 — the destination threw.
    #[error("destination failed: {0}")]
    DestinationFailed(String),

    /// RC5004 — split failed.
    #[error("split failed: {0}")]
    SplitFailed(String),

    /// RC5005 — aggregate failed.
    #[error("aggregate failed: {0}")]
    AggregateFailed(String),

    /// RC5006 — transform threw.
    #[error("transform failed: {0}")]
    TransformFailed(String),

    /// RC5007 — tap threw.
    #[error("tap failed: {0}")]
    TapFailed(String),

    /// RC5008 — filter threw.
    #[error("filter failed: {0}")]
    FilterFailed(String),

    /// RC5009 — validate failed.
    #[error("validate failed: {0}")]
    ValidateFailed(String),

    /// RC5010 — a direct source was constructed with a function-valued
    /// endpoint (dynamic endpoints are destination/tap/enrich-only).
    #[error("direct source cannot use a dynamic endpoint")]
    DirectSourceDynamic,

    /// RC5011 — direct channel schema validation failed.
    #[error("direct endpoint '{endpoint}' schema validation failed: {issues}")]
    DirectValidationFailed {
        /// The endpoint whose schema rejected the message.
        endpoint: String,
        /// Human-readable issue summary.
        issues: String,
    },

    /// RC9901 — anything else.
    #[error("unknown runtime error: {0}")]
    Unknown(String),
}

/// A source adapter failure, carrying the underlying boxed error only as
/// a rendered string (errors must stay `Clone` so the event bus can fan a
/// single failure out to multiple handlers).
#[derive(Debug, Clone, Serialize)]
pub struct SourceError(pub String);

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for SourceError {}

impl RouteCraftError {
    /// Wraps a boxed adapter error from the source as `RC5001`.
    pub fn source_failed(err: impl std::error::Error) -> Self {
        RouteCraftError::SourceFailed {
            source_error: SourceError(err.to_string()),
        }
    }

    /// Wraps a step-loop failure as `RC5002`, per spec.md §7: "Step-loop
    /// errors are wrapped as RC5002 ... preserving any existing RouteCraft
    /// error unchanged."
    #[must_use]
    pub fn wrap_step_loop(self) -> Self {
        self
    }

    /// The stable error code, e.g. `"RC5002"`.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            RouteCraftError::MissingSource { .. } => "RC1001",
            RouteCraftError::DuplicateRoute { .. } => "RC1002",
            RouteCraftError::InvalidOperation { .. } => "RC2001",
            RouteCraftError::MissingFromOrEmptyAggregate(_) => "RC2002",
            RouteCraftError::RouteCannotStart { .. } => "RC3001",
            RouteCraftError::ContextCannotStart { .. } => "RC3002",
            RouteCraftError::SourceFailed { .. } => "RC5001",
            RouteCraftError::ProcessorFailed(_) => "RC5002",
            RouteCraftError::DestinationFailed(_) => "RC5003",
            RouteCraftError::SplitFailed(_) => "RC5004",
            RouteCraftError::AggregateFailed(_) => "RC5005",
            RouteCraftError::TransformFailed(_) => "RC5006",
            RouteCraftError::TapFailed(_) => "RC5007",
            RouteCraftError::FilterFailed(_) => "RC5008",
            RouteCraftError::ValidateFailed(_) => "RC5009",
            RouteCraftError::DirectSourceDynamic => "RC5010",
            RouteCraftError::DirectValidationFailed { .. } => "RC5011",
            RouteCraftError::Unknown(_) => "RC9901",
        }
    }

    /// Whether a caller may usefully retry the operation that produced this
    /// error, per the taxonomy table in spec.md §7.
    #[must_use]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            RouteCraftError::SourceFailed { .. }
                | RouteCraftError::ProcessorFailed(_)
                | RouteCraftError::DestinationFailed(_)
                | RouteCraftError::TapFailed(_)
        )
    }

    /// A documentation link for this error code.
    #[must_use]
    pub fn docs(&self) -> String {
        format!("https://routecraft.dev/errors/{}", self.code())
    }

    /// An actionable suggestion, where one is well known for the code.
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            RouteCraftError::DuplicateRoute { .. } => {
                Some("give each route a unique id before calling register_routes")
            }
            RouteCraftError::MissingSource { .. } => {
                Some("add a `.from(...)` source to the route definition")
            }
            RouteCraftError::DirectSourceDynamic => {
                Some("direct sources must use a fixed endpoint string, not a function")
            }
            _ => None,
        }
    }

    /// Renders the full text encoding described in spec.md §6: code,
    /// message, suggestion, docs, and a "Caused by:" line when a cause is
    /// carried (the `#[source]` chain, when present).
    #[must_use]
    pub fn to_display_string(&self) -> String {
        let mut out = format!("[{}] {}", self.code(), self);
        if let Some(suggestion) = self.suggestion() {
            out.push_str("\nSuggestion: ");
            out.push_str(suggestion);
        }
        out.push_str("\nDocs: ");
        out.push_str(&self.docs());
        if let Some(cause) = std::error::Error::source(self) {
            out.push_str("\nCaused by: ");
            out.push_str(&cause.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(
            RouteCraftError::DuplicateRoute {
                route_id: "x".into()
            }
            .code(),
            "RC1002"
        );
        assert_eq!(RouteCraftError::DirectSourceDynamic.code(), "RC5010");
    }

    #[test]
    fn retryability_matches_taxonomy() {
        assert!(RouteCraftError::ProcessorFailed("boom".into()).retryable());
        assert!(!RouteCraftError::SplitFailed("boom".into()).retryable());
        assert!(!RouteCraftError::AggregateFailed("boom".into()).retryable());
    }

    #[test]
    fn display_string_includes_code_and_docs() {
        let err = RouteCraftError::DuplicateRoute {
            route_id: "dup".into(),
        };
        let rendered = err.to_display_string();
        assert!(rendered.contains("RC1002"));
        assert!(rendered.contains("Docs:"));
        assert!(rendered.contains("Suggestion:"));
    }
}
