//! Exchange header values and the reserved `routecraft.*` namespace.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{CorrelationId, GroupId, RouteId};

/// Reserved header key: the operation currently executing.
pub const HEADER_OPERATION: &str = "routecraft.operation";
/// Reserved header key: the id of the owning route.
pub const HEADER_ROUTE: &str = "routecraft.route";
/// Reserved header key: the correlation id assigned at ingress.
pub const HEADER_CORRELATION_ID: &str = "routecraft.correlation_id";
/// Reserved header key: the split hierarchy stack.
pub const HEADER_SPLIT_HIERARCHY: &str = "routecraft.split_hierarchy";
/// Reserved header key: timer-source scheduled fire time.
pub const HEADER_TIMER_TIME: &str = "routecraft.timer.time";
/// Reserved header key: timer-source actual fired time.
pub const HEADER_TIMER_FIRED_TIME: &str = "routecraft.timer.firedTime";
/// Reserved header key: timer-source configured period, in milliseconds.
pub const HEADER_TIMER_PERIOD_MS: &str = "routecraft.timer.periodMs";
/// Reserved header key: timer-source fire counter (1-based).
pub const HEADER_TIMER_COUNTER: &str = "routecraft.timer.counter";
/// Reserved header key: timer-source next scheduled fire time.
pub const HEADER_TIMER_NEXT_RUN: &str = "routecraft.timer.nextRun";

/// The value stored under a single header key.
///
/// Mirrors the closed set spec.md §3 allows: string, integer, boolean,
/// undefined, or an ordered sequence of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum HeaderValue {
    /// A string value.
    String(String),
    /// A signed integer value.
    Integer(i64),
    /// A boolean value.
    Boolean(bool),
    /// The explicit absence of a value, distinct from the key being unset.
    Undefined,
    /// An ordered sequence of strings (used for the split hierarchy).
    Sequence(Vec<String>),
}

impl HeaderValue {
    /// Returns the string view of this value, if it is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HeaderValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the sequence view of this value, if it is a `Sequence`.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[String]> {
        match self {
            HeaderValue::Sequence(seq) => Some(seq.as_slice()),
            _ => None,
        }
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::String(value)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::String(value.to_string())
    }
}

impl From<i64> for HeaderValue {
    fn from(value: i64) -> Self {
        HeaderValue::Integer(value)
    }
}

impl From<bool> for HeaderValue {
    fn from(value: bool) -> Self {
        HeaderValue::Boolean(value)
    }
}

impl From<serde_json::Value> for HeaderValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => HeaderValue::String(s),
            serde_json::Value::Bool(b) => HeaderValue::Boolean(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(HeaderValue::Integer)
                .unwrap_or(HeaderValue::Undefined),
            serde_json::Value::Null => HeaderValue::Undefined,
            serde_json::Value::Array(items) => HeaderValue::Sequence(
                items
                    .into_iter()
                    .map(|v| v.as_str().map(str::to_string).unwrap_or_default())
                    .collect(),
            ),
            serde_json::Value::Object(_) => HeaderValue::Undefined,
        }
    }
}

/// A mapping from string key to [`HeaderValue`], plus typed accessors for
/// the reserved `routecraft.*` keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Headers(HashMap<String, HeaderValue>);

impl Headers {
    /// Creates an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites a header value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Removes a header, returning its prior value if present.
    pub fn remove(&mut self, key: &str) -> Option<HeaderValue> {
        self.0.remove(key)
    }

    /// Returns the value stored for `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    /// Iterates over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HeaderValue)> {
        self.0.iter()
    }

    /// Merges `other` into `self`; keys present in both take `other`'s value
    /// ("later wins"), matching the BatchConsumer's default merge policy.
    pub fn merge_from(&mut self, other: &Headers) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Sets the `routecraft.operation` header.
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.set(HEADER_OPERATION, operation.into());
    }

    /// Sets the `routecraft.route` header.
    pub fn set_route(&mut self, route_id: &RouteId) {
        self.set(HEADER_ROUTE, route_id.to_string());
    }

    /// Sets the `routecraft.correlation_id` header.
    pub fn set_correlation_id(&mut self, correlation_id: CorrelationId) {
        self.set(HEADER_CORRELATION_ID, correlation_id.to_string());
    }

    /// Reads the `routecraft.correlation_id` header, if set and well-formed.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.get(HEADER_CORRELATION_ID)
            .and_then(HeaderValue::as_str)
            .and_then(|s| s.parse::<uuid::Uuid>().ok())
            .map(CorrelationId::new)
    }

    /// Returns the split hierarchy stack, outermost group first.
    #[must_use]
    pub fn split_hierarchy(&self) -> Vec<String> {
        self.get(HEADER_SPLIT_HIERARCHY)
            .and_then(HeaderValue::as_sequence)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Appends `group_id` to the tail of the split hierarchy stack.
    pub fn push_split_group(&mut self, group_id: GroupId) {
        let mut hierarchy = self.split_hierarchy();
        hierarchy.push(group_id.to_string());
        self.set(HEADER_SPLIT_HIERARCHY, HeaderValue::Sequence(hierarchy));
    }

    /// Pops the tail group id from the split hierarchy stack, deleting the
    /// header entirely when it becomes empty.
    pub fn pop_split_group(&mut self) -> Option<String> {
        let mut hierarchy = self.split_hierarchy();
        let popped = hierarchy.pop();
        if hierarchy.is_empty() {
            self.remove(HEADER_SPLIT_HIERARCHY);
        } else {
            self.set(HEADER_SPLIT_HIERARCHY, HeaderValue::Sequence(hierarchy));
        }
        popped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_hierarchy_push_pop_is_a_stack() {
        let mut h = Headers::new();
        assert!(h.split_hierarchy().is_empty());
        h.push_split_group(GroupId::generate());
        h.push_split_group(GroupId::generate());
        assert_eq!(h.split_hierarchy().len(), 2);
        h.pop_split_group();
        assert_eq!(h.split_hierarchy().len(), 1);
        h.pop_split_group();
        assert!(h.split_hierarchy().is_empty());
        assert!(h.get(HEADER_SPLIT_HIERARCHY).is_none());
    }

    #[test]
    fn merge_from_prefers_other() {
        let mut a = Headers::new();
        a.set("k", "a");
        let mut b = Headers::new();
        b.set("k", "b");
        a.merge_from(&b);
        assert_eq!(a.get("k").unwrap().as_str(), Some("b"));
    }
}
