//! The step kit: the 11 step kinds and their shared execution contract.

pub mod capability;
pub mod defaults;

use std::sync::Arc;

use serde_json::Value;

use crate::error::RouteCraftError;
use crate::exchange::Exchange;
use crate::headers::HeaderValue;
use crate::route::RouteRuntimeHandle;
use crate::workqueue::{WorkItem, WorkQueue};

use capability::{
    classify_adapter_error, Aggregator, BoxError, Destination, EnrichMerge, Filter, HeaderSetter,
    Processor, Splitter, Transformer,
};

/// One operation in a route's ordered step chain, tagged by kind.
///
/// `adapter` holds the capability implementation for that kind; `execute`
/// is the shared entry point the route runner drives the step loop with.
pub struct Step {
    operation: &'static str,
    adapter: StepAdapter,
}

enum StepAdapter {
    Process(Arc<dyn Processor>),
    Transform(Arc<dyn Transformer>),
    To(Arc<dyn Destination>),
    Tap(Arc<dyn Destination>),
    Filter(Arc<dyn Filter>),
    Validate(Arc<dyn crate::schema::StandardSchema>),
    Split(Arc<dyn Splitter>),
    Aggregate(Arc<dyn Aggregator>),
    Enrich(Arc<dyn Destination>, Arc<dyn EnrichMerge>),
    Header(String, Arc<dyn HeaderSetter>),
}

impl Step {
    /// Builds a `process` step.
    pub fn process(adapter: impl Processor + 'static) -> Self {
        Self {
            operation: "process",
            adapter: StepAdapter::Process(Arc::new(adapter)),
        }
    }

    /// Builds a `transform` step.
    pub fn transform(adapter: impl Transformer + 'static) -> Self {
        Self {
            operation: "transform",
            adapter: StepAdapter::Transform(Arc::new(adapter)),
        }
    }

    /// Builds a `to` (destination) step.
    pub fn to(adapter: impl Destination + 'static) -> Self {
        Self {
            operation: "to",
            adapter: StepAdapter::To(Arc::new(adapter)),
        }
    }

    /// Builds a `tap` step (fire-and-forget destination).
    pub fn tap(adapter: impl Destination + 'static) -> Self {
        Self {
            operation: "tap",
            adapter: StepAdapter::Tap(Arc::new(adapter)),
        }
    }

    /// Builds a `filter` step.
    pub fn filter(adapter: impl Filter + 'static) -> Self {
        Self {
            operation: "filter",
            adapter: StepAdapter::Filter(Arc::new(adapter)),
        }
    }

    /// Builds a `validate` step over a [`crate::schema::StandardSchema`].
    pub fn validate(schema: impl crate::schema::StandardSchema + 'static) -> Self {
        Self {
            operation: "validate",
            adapter: StepAdapter::Validate(Arc::new(schema)),
        }
    }

    /// Builds a `split` step.
    pub fn split(adapter: impl Splitter + 'static) -> Self {
        Self {
            operation: "split",
            adapter: StepAdapter::Split(Arc::new(adapter)),
        }
    }

    /// Builds an `aggregate` step with an explicit aggregator.
    pub fn aggregate(adapter: impl Aggregator + 'static) -> Self {
        Self {
            operation: "aggregate",
            adapter: StepAdapter::Aggregate(Arc::new(adapter)),
        }
    }

    /// Builds an `aggregate` step using the built-in default aggregator
    /// (spec.md §4.4).
    #[must_use]
    pub fn aggregate_default() -> Self {
        Self::aggregate(defaults::DefaultAggregator)
    }

    /// Builds an `enrich` step with an explicit destination and merge
    /// strategy.
    pub fn enrich(destination: impl Destination + 'static, merge: impl EnrichMerge + 'static) -> Self {
        Self {
            operation: "enrich",
            adapter: StepAdapter::Enrich(Arc::new(destination), Arc::new(merge)),
        }
    }

    /// Builds an `enrich` step using the built-in default merge strategy
    /// (spec.md §4.4).
    pub fn enrich_default(destination: impl Destination + 'static) -> Self {
        Self::enrich(destination, defaults::DefaultEnrichMerge)
    }

    /// Builds a `header` step that writes `key` with whatever
    /// [`HeaderSetter`] computes.
    pub fn header(key: impl Into<String>, adapter: impl HeaderSetter + 'static) -> Self {
        Self {
            operation: "header",
            adapter: StepAdapter::Header(key.into(), Arc::new(adapter)),
        }
    }

    /// Builds a `header` step that writes a constant value.
    pub fn header_const(key: impl Into<String>, value: impl Into<HeaderValue> + Clone + Send + Sync + 'static) -> Self {
        Self::header(key, move |_: &Exchange| {
            let value = value.clone();
            async move { Ok(value.into()) }
        })
    }

    /// The operation name written to the `routecraft.operation` header
    /// before this step runs.
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        self.operation
    }

    /// Runs this step against `exchange`, enqueueing zero or more follow-up
    /// items onto `queue` (spec.md §4.3): exactly one for linear steps, N
    /// for split, one for aggregate, zero for a dropped filter/validate.
    ///
    /// Returns `Err` only for the step kinds whose failure should bubble to
    /// the route runner's generic catch (spec.md §4.3); `tap`, `filter`,
    /// and `validate` handle their own failures internally and always
    /// return `Ok`.
    pub async fn execute(
        &self,
        exchange: Exchange,
        next_index: usize,
        queue: &mut WorkQueue,
        runtime: &RouteRuntimeHandle,
    ) -> Result<(), RouteCraftError> {
        match &self.adapter {
            StepAdapter::Process(p) => {
                let result = p
                    .process(exchange)
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::ProcessorFailed(msg)))?;
                queue.push_back(WorkItem::continuing(result, next_index));
                Ok(())
            }
            StepAdapter::Transform(t) => {
                let mut exchange = exchange;
                let body = t
                    .transform(exchange.body().clone())
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::TransformFailed(msg)))?;
                exchange.set_body(body);
                queue.push_back(WorkItem::continuing(exchange, next_index));
                Ok(())
            }
            StepAdapter::To(d) => {
                let mut exchange = exchange;
                let result = d
                    .send(&exchange)
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::DestinationFailed(msg)))?;
                if let Some(value) = result {
                    exchange.set_body(value);
                }
                queue.push_back(WorkItem::continuing(exchange, next_index));
                Ok(())
            }
            StepAdapter::Tap(d) => {
                execute_tap(d.clone(), exchange.clone(), runtime);
                queue.push_back(WorkItem::continuing(exchange, next_index));
                Ok(())
            }
            StepAdapter::Filter(f) => {
                match f.filter(&exchange).await {
                    Ok(true) => queue.push_back(WorkItem::continuing(exchange, next_index)),
                    Ok(false) => {}
                    Err(err) => {
                        // Fail-open: log, emit, and forward, per spec.md §4.4/§9.
                        let error = classify_adapter_error(err, RouteCraftError::FilterFailed);
                        tracing::warn!(
                            route = %runtime.route_id,
                            exchange = %exchange.id(),
                            error = %error,
                            "filter predicate failed; forwarding exchange (fail-open)"
                        );
                        runtime.emit_error(error, Some(exchange.id()));
                        queue.push_back(WorkItem::continuing(exchange, next_index));
                    }
                }
                Ok(())
            }
            StepAdapter::Validate(schema) => {
                execute_validate(schema.clone(), exchange, next_index, queue, runtime).await;
                Ok(())
            }
            StepAdapter::Split(s) => {
                execute_split(s.clone(), exchange, next_index, queue)
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::SplitFailed(msg)))
            }
            StepAdapter::Aggregate(a) => {
                execute_aggregate(a.clone(), exchange, next_index, queue)
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::AggregateFailed(msg)))
            }
            StepAdapter::Enrich(d, merge) => {
                let result = d
                    .send(&exchange)
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::DestinationFailed(msg)))?;
                let merged = merge.merge(exchange, result);
                queue.push_back(WorkItem::continuing(merged, next_index));
                Ok(())
            }
            StepAdapter::Header(key, setter) => {
                let mut exchange = exchange;
                let value = setter
                    .value(&exchange)
                    .await
                    .map_err(|e| classify_adapter_error(e, |msg| RouteCraftError::ProcessorFailed(msg)))?;
                exchange.headers_mut().set(key.clone(), value);
                queue.push_back(WorkItem::continuing(exchange, next_index));
                Ok(())
            }
        }
    }
}

fn execute_tap(destination: Arc<dyn Destination>, original: Exchange, runtime: &RouteRuntimeHandle) {
    let snapshot = original.snapshot();
    let runtime = runtime.clone();
    runtime.tap_tasks.spawn(async move {
        if let Err(err) = destination.send(&snapshot).await {
            let error = classify_adapter_error(err, |msg| RouteCraftError::TapFailed(msg));
            tracing::warn!(
                route = %runtime.route_id,
                exchange = %snapshot.id(),
                error = %error,
                "tap destination failed"
            );
            runtime.emit_error(error, Some(snapshot.id()));
        }
    });
}

async fn execute_validate(
    schema: Arc<dyn crate::schema::StandardSchema>,
    exchange: Exchange,
    next_index: usize,
    queue: &mut WorkQueue,
    runtime: &RouteRuntimeHandle,
) {
    let mut exchange = exchange;
    let result = schema.validate(exchange.body()).await;
    if result.is_failure() {
        let error = RouteCraftError::ValidateFailed(result.issues.join("; "));
        tracing::warn!(
            route = %runtime.route_id,
            exchange = %exchange.id(),
            error = %error,
            "validate step dropped exchange"
        );
        runtime.emit_error(error, Some(exchange.id()));
        return;
    }
    if let Some(value) = result.value {
        exchange.set_body(value);
    }
    queue.push_back(WorkItem::continuing(exchange, next_index));
}

async fn execute_split(
    splitter: Arc<dyn Splitter>,
    exchange: Exchange,
    next_index: usize,
    queue: &mut WorkQueue,
) -> Result<(), BoxError> {
    let bodies = splitter.split(exchange.body()).await?;
    if bodies.is_empty() {
        return Ok(());
    }
    let group_id = crate::ids::GroupId::generate();
    for body in bodies {
        let mut headers = exchange.headers().clone();
        headers.push_split_group(group_id);
        let child = exchange.derive_split_child(body, headers);
        queue.push_back(WorkItem::continuing(child, next_index));
    }
    Ok(())
}

async fn execute_aggregate(
    aggregator: Arc<dyn Aggregator>,
    exchange: Exchange,
    next_index: usize,
    queue: &mut WorkQueue,
) -> Result<(), BoxError> {
    let group = exchange.headers().split_hierarchy().last().cloned();
    let mut members = vec![exchange];

    if let Some(ref group) = group {
        let mut i = 0;
        while i < queue.len() {
            let tail = queue[i].exchange.headers().split_hierarchy().last().cloned();
            if tail.as_deref() == Some(group.as_str()) {
                let item = queue.remove(i).expect("index in bounds");
                members.push(item.exchange);
            } else {
                i += 1;
            }
        }
    }

    let mut aggregated = aggregator.aggregate(members).await?;
    if group.is_some() {
        aggregated.headers_mut().pop_split_group();
    }
    queue.push_back(WorkItem::continuing(aggregated, next_index));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::headers::Headers;
    use crate::ids::{ContextId, ExchangeId, RouteId};
    use tokio_util::task::TaskTracker;

    fn test_runtime() -> RouteRuntimeHandle {
        RouteRuntimeHandle {
            route_id: RouteId::try_new("r1".to_string()).unwrap(),
            events: EventBus::new(ContextId::generate()),
            tap_tasks: TaskTracker::new(),
        }
    }

    fn exchange(body: Value) -> Exchange {
        Exchange::from_parts(ExchangeId::generate(), body, Headers::new())
    }

    #[tokio::test]
    async fn process_step_enqueues_single_continuation() {
        let step = Step::process(|mut e: Exchange| async move {
            e.set_body(Value::from("processed"));
            Ok(e)
        });
        let mut queue = WorkQueue::new();
        step.execute(exchange(Value::Null), 1, &mut queue, &test_runtime())
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].exchange.body(), &Value::from("processed"));
        assert_eq!(queue[0].next_index, 1);
    }

    #[tokio::test]
    async fn filter_false_drops_branch() {
        let step = Step::filter(|_: &Exchange| async { Ok(false) });
        let mut queue = WorkQueue::new();
        step.execute(exchange(Value::Null), 1, &mut queue, &test_runtime())
            .await
            .unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn filter_error_is_fail_open() {
        let step = Step::filter(|_: &Exchange| async { Err("boom".into()) });
        let mut queue = WorkQueue::new();
        step.execute(exchange(Value::Null), 1, &mut queue, &test_runtime())
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn split_enqueues_one_item_per_child_sharing_correlation_id() {
        let route_id = RouteId::try_new("r1".to_string()).unwrap();
        let ingress = Exchange::new_ingress(&route_id, Value::from("a-b-c"), Headers::new());
        let correlation_id = ingress.correlation_id();

        let step = Step::split(|body: &Value| {
            let body = body.clone();
            async move {
                let Value::String(s) = body else {
                    return Err("not a string".into());
                };
                Ok(s.split('-').map(Value::from).collect())
            }
        });
        let mut queue = WorkQueue::new();
        step.execute(ingress, 1, &mut queue, &test_runtime())
            .await
            .unwrap();
        assert_eq!(queue.len(), 3);
        for item in &queue {
            assert_eq!(item.exchange.correlation_id(), correlation_id);
            assert_eq!(item.exchange.headers().split_hierarchy().len(), 1);
        }
    }

    #[tokio::test]
    async fn aggregate_harvests_matching_siblings_and_pops_hierarchy() {
        let route_id = RouteId::try_new("r1".to_string()).unwrap();
        let ingress = Exchange::new_ingress(&route_id, Value::from("a-b"), Headers::new());

        let split_step = Step::split(|body: &Value| {
            let body = body.clone();
            async move {
                let Value::String(s) = body else {
                    return Err("not a string".into());
                };
                Ok(s.split('-').map(Value::from).collect())
            }
        });
        let mut queue = WorkQueue::new();
        split_step
            .execute(ingress, 1, &mut queue, &test_runtime())
            .await
            .unwrap();
        assert_eq!(queue.len(), 2);

        let driver = queue.pop_front().unwrap().exchange;
        let agg_step = Step::aggregate_default();
        agg_step
            .execute(driver, 2, &mut queue, &test_runtime())
            .await
            .unwrap();

        assert_eq!(queue.len(), 1);
        let result = &queue[0].exchange;
        assert_eq!(result.body(), &serde_json::json!(["a", "b"]));
        assert!(result.headers().split_hierarchy().is_empty());
    }

    #[tokio::test]
    async fn degenerate_aggregate_without_split_calls_aggregator_with_one_item() {
        let step = Step::aggregate_default();
        let mut queue = WorkQueue::new();
        step.execute(exchange(Value::from("solo")), 1, &mut queue, &test_runtime())
            .await
            .unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].exchange.body(), &serde_json::json!(["solo"]));
    }
}
