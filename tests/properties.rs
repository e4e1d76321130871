//! Property-based tests for the invariants SPEC_FULL.md calls out as
//! holding for any input, not just the fixed scenarios in
//! `tests/scenarios.rs`: split-hierarchy stack discipline, id validation,
//! correlation-id preservation across an arbitrary fan-out, and the direct
//! adapter's last-wins subscription rule.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use serde_json::Value;

use routecraft::adapters::IterSource;
use routecraft::direct::{DirectEndpointRef, DirectRegistry};
use routecraft::events::EventBus;
use routecraft::headers::Headers;
use routecraft::ids::{ContextId, EndpointName, GroupId, RouteId};
use routecraft::route::{Route, RouteDefinitionBuilder};
use routecraft::step::Step;
use routecraft::store::Store;

proptest! {
    /// Property: pushing `n` split groups then popping `n` times always
    /// empties the hierarchy, in the reverse order they were pushed.
    #[test]
    fn split_hierarchy_is_a_lifo_stack_for_any_depth(depth in 0usize..32) {
        let ids: Vec<GroupId> = (0..depth).map(|_| GroupId::generate()).collect();
        let mut headers = Headers::new();
        for id in &ids {
            headers.push_split_group(*id);
        }
        prop_assert_eq!(headers.split_hierarchy().len(), depth);

        let mut popped = Vec::with_capacity(depth);
        while let Some(id) = headers.pop_split_group() {
            popped.push(id);
        }
        let expected: Vec<String> = ids.iter().rev().map(ToString::to_string).collect();
        prop_assert_eq!(popped, expected);
        prop_assert!(headers.split_hierarchy().is_empty());
    }

    /// Property: `EndpointName::sanitize` never shrinks or grows a
    /// non-empty input, only maps non-alphanumeric characters to `-`, and
    /// is idempotent once applied.
    #[test]
    fn endpoint_sanitize_is_idempotent_and_length_preserving(raw in "\\PC{1,64}") {
        let Ok(sanitized) = EndpointName::sanitize(&raw) else {
            // Only possible when `raw` itself sanitizes to empty, which
            // can't happen for a non-empty `raw` since every character maps
            // to exactly one output character.
            prop_assert!(false, "non-empty input must sanitize to a non-empty name");
            return Ok(());
        };
        let sanitized_str = sanitized.to_string();
        prop_assert_eq!(sanitized_str.chars().count(), raw.chars().count());
        prop_assert!(sanitized_str.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));

        let twice = EndpointName::sanitize(&sanitized_str).unwrap();
        prop_assert_eq!(twice.into_inner(), sanitized.into_inner());
    }

    /// Property: a `RouteId` is accepted for any non-empty string and
    /// rejected only for the empty string.
    #[test]
    fn route_id_accepts_exactly_non_empty_strings(raw in ".*") {
        let result = RouteId::try_new(raw.clone());
        prop_assert_eq!(result.is_ok(), !raw.is_empty());
        if let Ok(id) = result {
            prop_assert_eq!(id.to_string(), raw);
        }
    }

    /// Property: fanning a message out into N siblings, for any N in
    /// range, still leaves every sibling sharing one correlation id and
    /// carrying a split hierarchy exactly one level deeper than ingress.
    #[test]
    fn split_of_any_width_preserves_one_shared_correlation_id(width in 1usize..12) {
        let captured: Arc<Mutex<Vec<(Value, Option<routecraft::CorrelationId>, usize)>>> =
            Arc::new(Mutex::new(Vec::new()));
        let for_closure = captured.clone();
        let sink = move |exchange: &routecraft::exchange::Exchange| {
            let captured = for_closure.clone();
            let body = exchange.body().clone();
            let correlation_id = exchange.correlation_id();
            let depth = exchange.headers().split_hierarchy().len();
            Box::pin(async move {
                captured.lock().unwrap().push((body, correlation_id, depth));
                Ok(None)
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Value>, routecraft::step::capability::BoxError>> + Send>>
        };

        let def = RouteDefinitionBuilder::new("fanout")
            .unwrap()
            .from(IterSource::once(Value::from(i64::try_from(width).unwrap())))
            .step(Step::split(move |body: &Value| {
                let n = body.as_i64().unwrap_or(0);
                Box::pin(async move { Ok((0..n).map(Value::from).collect::<Vec<_>>()) })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Value>, routecraft::step::capability::BoxError>> + Send>>
            }))
            .step(Step::to(sink))
            .build()
            .unwrap();

        let route = Route::new(def, EventBus::new(ContextId::generate()), Store::new());
        tokio::runtime::Runtime::new().unwrap().block_on(route.run()).unwrap();

        let seen = captured.lock().unwrap();
        prop_assert_eq!(seen.len(), width);

        let correlation_ids: HashSet<_> = seen.iter().map(|(_, c, _)| *c).collect();
        prop_assert_eq!(correlation_ids.len(), 1);
        prop_assert!(correlation_ids.iter().next().unwrap().is_some());

        prop_assert!(seen.iter().all(|(_, _, depth)| *depth == 1));
    }

    /// Property: for any sequence of subscriptions to the same direct
    /// endpoint, the channel forwards to whichever one subscribed last —
    /// each `DirectSource::subscribe` call replaces the previous
    /// subscriber without needing it to unsubscribe first.
    #[test]
    fn direct_channel_subscription_is_last_wins(tags in prop::collection::vec(0u32..1000, 1..8)) {
        let registry = DirectRegistry::new();
        let route_id = RouteId::try_new("r").unwrap();

        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let mut aborts = Vec::new();
            let mut last_seen = None;
            for tag in &tags {
                let tag = *tag;
                let route_id = route_id.clone();
                let handler: routecraft::step::capability::StepLoopHandler = Arc::new(move |body, headers: Option<Headers>| {
                    let route_id = route_id.clone();
                    Box::pin(async move {
                        Ok(routecraft::exchange::Exchange::new_ingress(
                            &route_id,
                            serde_json::json!({ "tag": tag, "body": body }),
                            headers.unwrap_or_default(),
                        ))
                    }) as routecraft::step::capability::HandlerFuture
                });

                let source = registry.source("fanin").unwrap();
                let ctx = routecraft::step::capability::RouteContext {
                    store: Store::new(),
                    events: EventBus::new(ContextId::generate()),
                    route_id: route_id.clone(),
                };
                let abort = tokio_util::sync::CancellationToken::new();
                let subscribe_abort = abort.clone();
                tokio::spawn(async move { source.subscribe(ctx, handler, subscribe_abort).await });
                // Let the spawned task run up through setting the channel's
                // subscriber before the next one in this sequence starts,
                // so "last subscribed" has an unambiguous, deterministic
                // meaning for this property.
                tokio::task::yield_now().await;
                aborts.push(abort);
                last_seen = Some(tag);
            }

            let destination = registry.destination(DirectEndpointRef::fixed("fanin").unwrap());
            let exchange = routecraft::exchange::Exchange::new_ingress(&route_id, Value::from("ping"), Headers::new());
            let result = destination.send(&exchange).await.unwrap().unwrap();
            assert_eq!(result["tag"].as_u64(), last_seen.map(u64::from));

            for abort in aborts {
                abort.cancel();
            }
        });
    }
}
