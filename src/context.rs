//! The context: the top-level container owning routes, the shared store,
//! the event bus, and the direct-adapter registry (spec.md §4.1).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::json;

use crate::direct::DirectRegistry;
use crate::error::RouteCraftError;
use crate::events::{Disposer, ErrorDetails, EventBus, EventName};
use crate::ids::{ContextId, RouteId};
use crate::route::{Route, RouteDefinition};
use crate::store::Store;

/// The engine's top-level container: owns a set of routes, a shared typed
/// store, an event bus, and the direct-adapter registry.
///
/// Always held behind an `Arc` — [`Context::start`] spawns one background
/// task per route that needs to call back into the context (to emit
/// errors, and to auto-stop once every route has settled), so the context
/// must outlive any single call into it.
pub struct Context {
    id: ContextId,
    routes: DashMap<RouteId, Arc<Route>>,
    store: Store,
    events: EventBus,
    direct: DirectRegistry,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl Context {
    /// Creates an empty, unstarted context with a fresh id.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let id = ContextId::generate();
        Arc::new(Self {
            id,
            routes: DashMap::new(),
            store: Store::new(),
            events: EventBus::new(id),
            direct: DirectRegistry::new(),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    /// The context's id.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// The context's direct-adapter registry.
    #[must_use]
    pub fn direct(&self) -> DirectRegistry {
        self.direct.clone()
    }

    /// Reads a value from the context's typed store.
    #[must_use]
    pub fn get_store<T: std::any::Any + Send + Sync + Clone>(&self, key: &str) -> Option<T> {
        self.store.get(key)
    }

    /// Writes a value into the context's typed store.
    pub fn set_store<T: std::any::Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.store.set(key, value);
    }

    /// Looks up a registered route by id.
    #[must_use]
    pub fn get_route_by_id(&self, route_id: &RouteId) -> Option<Arc<Route>> {
        self.routes.get(route_id).map(|r| r.clone())
    }

    /// Registers a handler for one event name.
    pub fn on<F>(&self, name: EventName, handler: F) -> Disposer
    where
        F: Fn(&crate::events::EventPayload) + Send + Sync + 'static,
    {
        self.events.on(name, handler)
    }

    /// Emits an event to every registered handler.
    pub fn emit(&self, name: EventName, details: impl serde::Serialize) {
        self.events.emit(name, details);
    }

    /// Registers new routes, failing the whole batch if any id collides
    /// with an existing route or another route in the same batch
    /// (`RC1002`).
    ///
    /// # Errors
    ///
    /// Returns `RC1002` ([`RouteCraftError::DuplicateRoute`]) on any id
    /// collision. No routes from `definitions` are registered if this
    /// happens: registration is all-or-nothing.
    pub fn register_routes(&self, definitions: Vec<RouteDefinition>) -> Result<(), RouteCraftError> {
        let mut seen = std::collections::HashSet::new();
        for definition in &definitions {
            if !seen.insert(definition.id().clone()) || self.routes.contains_key(definition.id()) {
                return Err(RouteCraftError::DuplicateRoute {
                    route_id: definition.id().to_string(),
                });
            }
        }

        for definition in definitions {
            let id = definition.id().clone();
            let route = Route::new(definition, self.events.clone(), self.store.clone());
            self.routes.insert(id.clone(), route);
            self.events
                .emit(EventName::RouteRegistered, json!({ "routeId": id.to_string() }));
        }
        Ok(())
    }

    /// Starts every registered route concurrently.
    ///
    /// Each route runs in its own background task. If a route's source
    /// fails, or simply returns (a finite source), that counts as the
    /// route "settling". Once every route has settled, the context stops
    /// itself automatically — but only if every route settled without
    /// fault; if any route's `run()` returned `Err`, the context is left
    /// running so the surviving indefinite routes continue (spec.md §4.1).
    ///
    /// # Errors
    ///
    /// Returns `RC3002` ([`RouteCraftError::ContextCannotStart`]) if the
    /// context was already started.
    pub fn start(self: &Arc<Self>) -> Result<(), RouteCraftError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RouteCraftError::ContextCannotStart {
                reason: "context already started".into(),
            });
        }

        self.events
            .emit(EventName::ContextStarting, json!({ "contextId": self.id.to_string() }));

        let remaining = Arc::new(std::sync::atomic::AtomicUsize::new(self.routes.len()));
        let had_fault = Arc::new(AtomicBool::new(false));
        for entry in self.routes.iter() {
            let route = entry.value().clone();
            let context = self.clone();
            let remaining = remaining.clone();
            let had_fault = had_fault.clone();
            tokio::spawn(async move {
                let result = route.clone().run().await;
                if let Err(error) = result {
                    had_fault.store(true, Ordering::SeqCst);
                    context.events.emit(
                        EventName::Error,
                        ErrorDetails {
                            error,
                            route: Some(route.id().clone()),
                            exchange: None,
                        },
                    );
                }
                if remaining.fetch_sub(1, Ordering::SeqCst) == 1 && !had_fault.load(Ordering::SeqCst) {
                    context.stop().await;
                }
            });
        }

        self.events
            .emit(EventName::ContextStarted, json!({ "contextId": self.id.to_string() }));
        Ok(())
    }

    /// Stops every route (abort + drain) and emits the stop lifecycle
    /// events. Idempotent: a second call is a no-op.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.events
            .emit(EventName::ContextStopping, json!({ "contextId": self.id.to_string() }));

        let stops = self
            .routes
            .iter()
            .map(|entry| {
                let route = entry.value().clone();
                async move { route.stop().await }
            })
            .collect::<Vec<_>>();
        futures::future::join_all(stops).await;

        self.events
            .emit(EventName::ContextStopped, json!({ "contextId": self.id.to_string() }));
    }
}

/// Fluent builder for a [`Context`], matching [`crate::route::RouteDefinitionBuilder`]'s
/// style.
#[derive(Default)]
pub struct ContextBuilder {
    routes: Vec<RouteDefinition>,
}

impl ContextBuilder {
    /// Starts building an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one route definition.
    #[must_use]
    pub fn route(mut self, definition: RouteDefinition) -> Self {
        self.routes.push(definition);
        self
    }

    /// Builds the context and registers every route added so far.
    ///
    /// # Errors
    ///
    /// Propagates `RC1002` from [`Context::register_routes`] on a
    /// duplicate route id.
    pub fn build(self) -> Result<Arc<Context>, RouteCraftError> {
        let context = Context::new();
        context.register_routes(self.routes)?;
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::VecSink;
    use crate::route::RouteDefinitionBuilder;
    use crate::step::capability::{RouteContext, Source, StepLoopHandler};
    use crate::step::Step;
    use async_trait::async_trait;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;

    struct OnceSource(Value);

    #[async_trait]
    impl Source for OnceSource {
        async fn subscribe(
            &self,
            _ctx: RouteContext,
            handler: StepLoopHandler,
            _abort: CancellationToken,
        ) -> Result<(), RouteCraftError> {
            let _ = handler(self.0.clone(), None).await;
            Ok(())
        }
    }

    #[test]
    fn duplicate_route_ids_are_rejected() {
        let context = Context::new();
        let a = RouteDefinitionBuilder::new("dup")
            .unwrap()
            .from(OnceSource(Value::Null))
            .build()
            .unwrap();
        let b = RouteDefinitionBuilder::new("dup")
            .unwrap()
            .from(OnceSource(Value::Null))
            .build()
            .unwrap();
        let err = context.register_routes(vec![a, b]).unwrap_err();
        assert_eq!(err.code(), "RC1002");
    }

    #[tokio::test]
    async fn context_auto_stops_once_every_route_has_settled() {
        let sink = VecSink::new();
        let route = RouteDefinitionBuilder::new("r")
            .unwrap()
            .from(OnceSource(Value::from("x")))
            .step(Step::to(sink.clone()))
            .build()
            .unwrap();
        let context = Context::new();
        context.register_routes(vec![route]).unwrap();
        context.start().unwrap();

        for _ in 0..50 {
            if !sink.bodies().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.bodies(), vec![Value::from("x")]);
    }

    struct FaultingSource;

    #[async_trait]
    impl Source for FaultingSource {
        async fn subscribe(
            &self,
            _ctx: RouteContext,
            _handler: StepLoopHandler,
            _abort: CancellationToken,
        ) -> Result<(), RouteCraftError> {
            Err(RouteCraftError::DirectSourceDynamic)
        }
    }

    #[tokio::test]
    async fn a_faulted_route_blocks_auto_stop() {
        let sink = VecSink::new();
        let ok_route = RouteDefinitionBuilder::new("ok")
            .unwrap()
            .from(OnceSource(Value::from("x")))
            .step(Step::to(sink.clone()))
            .build()
            .unwrap();
        let faulting_route = RouteDefinitionBuilder::new("faulting")
            .unwrap()
            .from(FaultingSource)
            .build()
            .unwrap();
        let context = Context::new();
        context.register_routes(vec![ok_route, faulting_route]).unwrap();
        context.start().unwrap();

        for _ in 0..50 {
            if !sink.bodies().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(sink.bodies(), vec![Value::from("x")]);

        // Give the settlement check a moment to run; the context must stay
        // live (routes not aborted) because the faulting route never
        // settled cleanly.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let ok_route = context
            .get_route_by_id(&RouteId::try_new("ok".to_string()).unwrap())
            .unwrap();
        assert!(!ok_route.abort_handle().is_cancelled());
        context.stop().await;
    }

    #[test]
    fn starting_twice_is_rejected() {
        let context = Context::new();
        context.start().unwrap();
        let err = context.start().unwrap_err();
        assert_eq!(err.code(), "RC3002");
    }
}
