//! Default aggregator and enrich-merge strategies, per spec.md §4.4.

use serde_json::{Map, Value};

use crate::exchange::Exchange;
use crate::step::capability::{Aggregator, BoxError, EnrichMerge};
use async_trait::async_trait;

/// The built-in aggregator used when a route's `aggregate` step is
/// constructed without an explicit aggregator.
///
/// Rule (spec.md §4.4): if any input body is a JSON array, the result is a
/// single-level flatten of all inputs (arrays expanded, scalars kept).
/// Otherwise the result is the ordered sequence of all bodies. Headers and
/// id are taken from the first input. Empty input is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAggregator;

#[async_trait]
impl Aggregator for DefaultAggregator {
    async fn aggregate(&self, exchanges: Vec<Exchange>) -> Result<Exchange, BoxError> {
        let Some(first) = exchanges.first() else {
            return Err("aggregate received no exchanges".into());
        };
        let headers = first.headers().clone();
        let id = first.id();

        let any_array = exchanges.iter().any(|e| e.body().is_array());
        let body = if any_array {
            let mut flat = Vec::new();
            for exchange in &exchanges {
                match exchange.body() {
                    Value::Array(items) => flat.extend(items.iter().cloned()),
                    other => flat.push(other.clone()),
                }
            }
            Value::Array(flat)
        } else {
            Value::Array(exchanges.iter().map(|e| e.body().clone()).collect())
        };

        Ok(Exchange::from_parts(id, body, headers))
    }
}

/// The built-in merge strategy for `enrich`.
///
/// Rule (spec.md §4.4): `null`/absent result leaves the original untouched;
/// otherwise non-object bodies are wrapped as `{"value": body}` before a
/// shallow merge of `{...original, ...result}` is written back onto the
/// original exchange's body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEnrichMerge;

impl EnrichMerge for DefaultEnrichMerge {
    fn merge(&self, mut original: Exchange, result: Option<Value>) -> Exchange {
        let Some(result) = result else {
            return original;
        };
        if result.is_null() {
            return original;
        }

        let original_obj = as_object(original.body().clone());
        let result_obj = as_object(result);

        let mut merged = original_obj;
        for (k, v) in result_obj {
            merged.insert(k, v);
        }
        original.set_body(Value::Object(merged));
        original
    }
}

fn as_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::Headers;
    use crate::ids::ExchangeId;

    fn exchange(body: Value) -> Exchange {
        Exchange::from_parts(ExchangeId::generate(), body, Headers::new())
    }

    #[tokio::test]
    async fn flattens_single_level_when_any_input_is_an_array() {
        let agg = DefaultAggregator;
        let result = agg
            .aggregate(vec![
                exchange(Value::Array(vec![Value::from(1), Value::from(2)])),
                exchange(Value::from(3)),
                exchange(Value::Array(vec![Value::Array(vec![Value::from(4)])])),
            ])
            .await
            .unwrap();
        assert_eq!(
            result.body(),
            &Value::Array(vec![
                Value::from(1),
                Value::from(2),
                Value::from(3),
                Value::Array(vec![Value::from(4)]),
            ])
        );
    }

    #[tokio::test]
    async fn collects_scalars_into_a_sequence_when_no_array_present() {
        let agg = DefaultAggregator;
        let result = agg
            .aggregate(vec![exchange(Value::from("a")), exchange(Value::from("b"))])
            .await
            .unwrap();
        assert_eq!(
            result.body(),
            &Value::Array(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[tokio::test]
    async fn empty_input_is_an_error() {
        let agg = DefaultAggregator;
        assert!(agg.aggregate(vec![]).await.is_err());
    }

    #[test]
    fn enrich_merge_leaves_original_unchanged_on_null_result() {
        let original = exchange(serde_json::json!({"a": 1}));
        let merged = DefaultEnrichMerge.merge(original.clone(), Some(Value::Null));
        assert_eq!(merged.body(), original.body());
    }

    #[test]
    fn enrich_merge_shallow_merges_objects() {
        let original = exchange(serde_json::json!({"a": 1, "b": 1}));
        let merged = DefaultEnrichMerge.merge(original, Some(serde_json::json!({"b": 2, "c": 3})));
        assert_eq!(merged.body(), &serde_json::json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn enrich_merge_wraps_non_object_result() {
        let original = exchange(serde_json::json!({"a": 1}));
        let merged = DefaultEnrichMerge.merge(original, Some(Value::from(42)));
        assert_eq!(merged.body(), &serde_json::json!({"a": 1, "value": 42}));
    }
}
