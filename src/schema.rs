//! The "standard schema" protocol: the narrow contract the engine validates
//! against, independent of whichever schema library a host wires in.

use async_trait::async_trait;
use serde_json::Value;

/// The result of validating a value against a [`StandardSchema`].
///
/// Per spec.md §6: non-empty `issues` is failure; when `value` is present
/// it replaces the original (supporting coercion), even on success.
#[derive(Debug, Clone, Default)]
pub struct SchemaResult {
    /// The (possibly coerced) value, when validation produced one.
    pub value: Option<Value>,
    /// Human-readable validation issues; empty means success.
    pub issues: Vec<String>,
}

impl SchemaResult {
    /// A successful result with no coercion.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// A successful result that replaces the value (coercion).
    #[must_use]
    pub fn coerced(value: Value) -> Self {
        Self {
            value: Some(value),
            issues: Vec::new(),
        }
    }

    /// A failing result with the given issues.
    #[must_use]
    pub fn failed(issues: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            value: None,
            issues: issues.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this result represents a validation failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !self.issues.is_empty()
    }
}

/// A schema capable of validating (and optionally coercing) a JSON value.
///
/// Implementations may validate synchronously or asynchronously; the engine
/// always awaits the result, per spec.md §6.
#[async_trait]
pub trait StandardSchema: Send + Sync {
    /// Validates `value`, returning issues on failure or a (possibly
    /// coerced) value on success.
    async fn validate(&self, value: &Value) -> SchemaResult;
}

#[async_trait]
impl<F> StandardSchema for F
where
    F: Fn(&Value) -> SchemaResult + Send + Sync,
{
    async fn validate(&self, value: &Value) -> SchemaResult {
        self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_schema_can_validate() {
        let schema = |v: &Value| {
            if v.is_string() {
                SchemaResult::ok()
            } else {
                SchemaResult::failed(["expected a string"])
            }
        };
        assert!(!schema.validate(&Value::String("x".into())).await.is_failure());
        assert!(schema.validate(&Value::Null).await.is_failure());
    }
}
