//! Route definitions, the runtime route, and the step loop that drives it.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::consumer::{Consumer, SimpleConsumer};
use crate::error::RouteCraftError;
use crate::events::{ErrorDetails, EventBus, EventName};
use crate::exchange::Exchange;
use crate::headers::Headers;
use crate::ids::{ExchangeId, RouteId};
use crate::step::capability::{HandlerFuture, RouteContext, Source, StepLoopHandler};
use crate::step::Step;
use crate::store::Store;
use crate::workqueue::{RouteSteps, WorkItem, WorkQueue};

/// The declarative definition of a route: a source, an ordered step chain,
/// and a consumer policy. Immutable once built; [`Route`] is the runtime
/// instance built from it.
pub struct RouteDefinition {
    id: RouteId,
    source: Arc<dyn Source>,
    steps: Vec<Step>,
    consumer: Arc<dyn Consumer>,
}

impl RouteDefinition {
    /// The route's id.
    #[must_use]
    pub fn id(&self) -> &RouteId {
        &self.id
    }
}

/// Fluent builder for a [`RouteDefinition`].
///
/// Mirrors the lineage's preference for explicit, validated construction
/// over partially-built public structs.
pub struct RouteDefinitionBuilder {
    id: RouteId,
    source: Option<Arc<dyn Source>>,
    steps: Vec<Step>,
    consumer: Arc<dyn Consumer>,
}

impl RouteDefinitionBuilder {
    /// Starts building a route with the given id.
    ///
    /// # Errors
    ///
    /// Returns `RC1001`-shaped validation only surfaces at [`Self::build`];
    /// this constructor itself only fails if `id` violates `RouteId`'s
    /// invariants (non-empty).
    pub fn new(id: impl Into<String>) -> Result<Self, crate::ids::RouteIdError> {
        Ok(Self {
            id: RouteId::try_new(id.into())?,
            source: None,
            steps: Vec::new(),
            consumer: Arc::new(SimpleConsumer::new()),
        })
    }

    /// Sets the route's source (`from`).
    #[must_use]
    pub fn from(mut self, source: impl Source + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Appends one step to the chain.
    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Overrides the default [`SimpleConsumer`] with a different consumer
    /// policy (e.g. [`crate::consumer::BatchConsumer`]). Per spec.md §4.5,
    /// `.batch(...)` must be staged before `.from(...)` is lint-enforced at
    /// the DSL layer (out of scope here); this builder accepts it at any
    /// point since both are set before [`Self::build`] assembles the route.
    #[must_use]
    pub fn consumer(mut self, consumer: impl Consumer + 'static) -> Self {
        self.consumer = Arc::new(consumer);
        self
    }

    /// Finalizes the definition.
    ///
    /// # Errors
    ///
    /// Returns `RC1001` ([`RouteCraftError::MissingSource`]) if no source
    /// was set.
    pub fn build(self) -> Result<RouteDefinition, RouteCraftError> {
        let source = self.source.ok_or_else(|| RouteCraftError::MissingSource {
            route_id: self.id.to_string(),
        })?;
        Ok(RouteDefinition {
            id: self.id,
            source,
            steps: self.steps,
            consumer: self.consumer,
        })
    }
}

/// The narrow handle the step loop and individual steps (tap, in
/// particular) use to emit errors and track background work. Cheap to
/// clone — everything inside is itself `Arc`-backed.
#[derive(Clone)]
pub struct RouteRuntimeHandle {
    /// This route's id.
    pub route_id: RouteId,
    /// The owning context's event bus.
    pub events: EventBus,
    /// Background (tap) task tracker; drained alongside in-flight handlers
    /// at `drain()`.
    pub tap_tasks: TaskTracker,
}

impl RouteRuntimeHandle {
    /// Logs and emits an `error` event carrying this route's id.
    pub fn emit_error(&self, error: RouteCraftError, exchange: Option<ExchangeId>) {
        self.events.emit(
            EventName::Error,
            ErrorDetails {
                error,
                route: Some(self.route_id.clone()),
                exchange,
            },
        );
    }
}

/// A runnable instance of a [`RouteDefinition`]: abort signal, in-flight
/// handler tracking, background (tap) task tracking, and the bound
/// consumer.
pub struct Route {
    id: RouteId,
    source: Arc<dyn Source>,
    steps: RouteSteps,
    consumer: Arc<dyn Consumer>,
    abort: CancellationToken,
    handler_tasks: TaskTracker,
    tap_tasks: TaskTracker,
    events: EventBus,
    store: Store,
}

impl Route {
    /// Builds a runtime route from its definition, bound to the owning
    /// context's event bus and store.
    #[must_use]
    pub fn new(definition: RouteDefinition, events: EventBus, store: Store) -> Arc<Self> {
        Arc::new(Self {
            id: definition.id,
            source: definition.source,
            steps: Arc::new(definition.steps),
            consumer: definition.consumer,
            abort: CancellationToken::new(),
            handler_tasks: TaskTracker::new(),
            tap_tasks: TaskTracker::new(),
            events,
            store,
        })
    }

    /// The route's id.
    #[must_use]
    pub fn id(&self) -> &RouteId {
        &self.id
    }

    /// The cancellation token aborting this route.
    #[must_use]
    pub fn abort_handle(&self) -> CancellationToken {
        self.abort.clone()
    }

    fn runtime_handle(&self) -> RouteRuntimeHandle {
        RouteRuntimeHandle {
            route_id: self.id.clone(),
            events: self.events.clone(),
            tap_tasks: self.tap_tasks.clone(),
        }
    }

    /// Runs the route: registers the consumer's step-loop handler, emits
    /// `routeStarted`, then subscribes the source. Resolves when the
    /// source's `subscribe` future resolves (normally only once the route
    /// is aborted, for a long-lived source).
    ///
    /// # Errors
    ///
    /// Returns `RC3001` if the route's controller is already aborted
    /// (spec.md §4.3 start sequence step 1). Otherwise propagates `RC5001`
    /// if the source itself fails.
    pub async fn run(self: Arc<Self>) -> Result<(), RouteCraftError> {
        if self.abort.is_cancelled() {
            return Err(RouteCraftError::RouteCannotStart {
                route_id: self.id.to_string(),
            });
        }

        let runtime = self.runtime_handle();
        let steps = self.steps.clone();
        let handler_tasks = self.handler_tasks.clone();
        let route_id_for_handler = self.id.clone();

        let step_loop_handler: StepLoopHandler = Arc::new(move |body: Value, headers: Option<Headers>| {
            let steps = steps.clone();
            let runtime = runtime.clone();
            let handler_tasks = handler_tasks.clone();
            let route_id = route_id_for_handler.clone();
            let fut: HandlerFuture = Box::pin(async move {
                let tracked = handler_tasks.spawn(run_step_loop(
                    route_id.clone(),
                    steps,
                    body,
                    headers.unwrap_or_default(),
                    runtime,
                ));
                tracked
                    .await
                    .unwrap_or_else(|_| Err(RouteCraftError::Unknown("handler task panicked".into())))
            });
            fut
        });
        self.consumer.register(step_loop_handler);

        self.events.emit(
            EventName::RouteStarting,
            serde_json::json!({ "routeId": self.id.to_string() }),
        );

        let ctx = RouteContext {
            store: self.store.clone(),
            events: self.events.clone(),
            route_id: self.id.clone(),
        };
        let consumer = self.consumer.clone();
        let handler_tasks_for_source = self.handler_tasks.clone();
        let source_handler: StepLoopHandler = Arc::new(move |body: Value, headers: Option<Headers>| {
            // Registering into `handler_tasks` happens here, synchronously,
            // the instant the source calls this closure — not once whatever
            // it returns is polled. A source that dispatches several
            // messages back-to-back without awaiting any of them (see
            // `adapters::IterSource`) still needs every one of them driven
            // to completion; tracking the task at spawn time (rather than
            // relying on the source to poll it) is what makes that happen
            // regardless of the source's own await pattern.
            let tracked = handler_tasks_for_source.spawn(consumer.handle(body, headers));
            let fut: HandlerFuture = Box::pin(async move {
                tracked
                    .await
                    .unwrap_or_else(|_| Err(RouteCraftError::Unknown("handler task panicked".into())))
            });
            fut
        });

        self.events.emit(
            EventName::RouteStarted,
            serde_json::json!({ "routeId": self.id.to_string() }),
        );

        let result = self.source.subscribe(ctx, source_handler, self.abort.clone()).await;
        self.consumer.flush_remaining().await;
        // Catches up with any step-loop invocation a consumer (e.g.
        // BatchConsumer) triggered from a background task rather than
        // inline — without this, `run` could return before such a flush's
        // destination actually ran.
        self.handler_tasks.close();
        self.handler_tasks.wait().await;
        result
    }

    /// Aborts the route (reason: `context.stop()` per spec.md §4.1) and
    /// waits for in-flight handlers and background tap tasks to settle.
    pub async fn stop(&self) {
        self.events.emit(
            EventName::RouteStopping,
            serde_json::json!({ "routeId": self.id.to_string() }),
        );
        self.abort.cancel();
        self.drain().await;
        self.events.emit(
            EventName::RouteStopped,
            serde_json::json!({ "routeId": self.id.to_string() }),
        );
    }

    /// Waits until both the in-flight handler set and the background task
    /// set are empty (spec.md §4.3). Closing both trackers lets
    /// `TaskTracker::wait` resolve once the count returns to zero, even if
    /// new tasks (e.g. taps spawned by an in-flight handler) are still
    /// being added when `drain` begins.
    pub async fn drain(&self) {
        self.handler_tasks.close();
        self.tap_tasks.close();
        tokio::join!(self.handler_tasks.wait(), self.tap_tasks.wait());
    }
}

/// Runs the FIFO step loop for one ingress message, returning the last
/// exchange to reach a terminal leaf (spec.md §4.3). Falls back to the
/// ingress exchange itself if every branch was dropped by a filter or
/// failed validation before reaching a terminal leaf.
async fn run_step_loop(
    route_id: RouteId,
    steps: RouteSteps,
    body: Value,
    headers: Headers,
    runtime: RouteRuntimeHandle,
) -> Result<Exchange, RouteCraftError> {
    let ingress = Exchange::new_ingress(&route_id, body, headers);
    let fallback = ingress.clone();
    let mut queue: WorkQueue = WorkQueue::new();
    queue.push_back(WorkItem::at_start(ingress));

    let mut last_processed: Option<Exchange> = None;

    while let Some(item) = queue.pop_front() {
        if item.is_terminal(&steps) {
            last_processed = Some(item.exchange);
            continue;
        }
        let step = &steps[item.next_index];
        let mut exchange = item.exchange;
        exchange.headers_mut().set_operation(step.operation_name());
        let next_index = item.next_index + 1;

        if let Err(error) = step.execute(exchange, next_index, &mut queue, &runtime).await {
            let error = error.wrap_step_loop();
            tracing::warn!(route = %route_id, operation = step.operation_name(), error = %error, "step failed");
            runtime.emit_error(error, None);
        }
    }

    Ok(last_processed.unwrap_or(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::VecSink;
    use crate::consumer::SimpleConsumer;
    use crate::ids::ContextId;

    struct OnceSource {
        body: Value,
    }

    #[async_trait::async_trait]
    impl Source for OnceSource {
        async fn subscribe(
            &self,
            _ctx: RouteContext,
            handler: StepLoopHandler,
            _abort: CancellationToken,
        ) -> Result<(), RouteCraftError> {
            let _ = handler(self.body.clone(), None).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn run_drives_one_message_through_the_step_chain() {
        let sink = VecSink::new();
        let def = RouteDefinitionBuilder::new("r1")
            .unwrap()
            .from(OnceSource {
                body: Value::from("hello"),
            })
            .step(Step::transform(|body: Value| async move {
                Ok(Value::from(body.as_str().unwrap_or_default().to_uppercase()))
            }))
            .step(Step::to(sink.clone()))
            .consumer(SimpleConsumer::new())
            .build()
            .unwrap();

        let route = Route::new(def, EventBus::new(ContextId::generate()), Store::new());
        route.run().await.unwrap();
        assert_eq!(sink.bodies(), vec![Value::from("HELLO")]);
    }
}
