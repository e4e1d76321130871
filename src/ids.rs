//! Strongly-typed identifiers used throughout the engine.
//!
//! Primitive obsession (passing bare `String`/`Uuid` around for ids that must
//! not be confused with one another) is the easiest way to reintroduce the
//! bugs a type system exists to prevent. Every id below is a distinct newtype.

use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a [`crate::context::Context`].
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display
))]
pub struct ContextId(Uuid);

impl ContextId {
    /// Creates a new random context id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Non-empty, unique-within-context identifier for a route.
#[nutype(
    validate(len_char_min = 1),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct RouteId(String);

/// Identifier for an [`crate::exchange::Exchange`], unique per creation.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display
))]
pub struct ExchangeId(Uuid);

impl ExchangeId {
    /// Creates a new random exchange id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Default for ExchangeId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Correlation id assigned once at ingress and carried unchanged through
/// every exchange descended from that message, including split children.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display
))]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::generate()
    }
}

/// Identifier for one split group, pushed onto the split hierarchy stack by
/// `split` and popped by `aggregate`.
#[nutype(derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display
))]
pub struct GroupId(Uuid);

impl GroupId {
    /// Creates a new random group id.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4())
    }
}

/// Sanitized direct-endpoint name; the registry key.
///
/// Construction sanitizes any character outside `[A-Za-z0-9]` to `-`, per
/// the direct adapter's endpoint sanitization rule.
#[nutype(
    validate(len_char_min = 1),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct EndpointName(String);

impl EndpointName {
    /// Sanitizes a raw endpoint string and constructs the validated name.
    ///
    /// # Errors
    ///
    /// Returns an error only if the raw name is empty after sanitization
    /// (i.e. the input itself was empty).
    pub fn sanitize(raw: &str) -> Result<Self, EndpointNameError> {
        let sanitized: String = raw
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        Self::try_new(sanitized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_non_alphanumeric_characters() {
        let name = EndpointName::sanitize("orders.v1/created").unwrap();
        assert_eq!(name.into_inner(), "orders-v1-created");
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(EndpointName::sanitize("").is_err());
    }

    #[test]
    fn route_id_rejects_empty_string() {
        assert!(RouteId::try_new(String::new()).is_err());
    }
}
