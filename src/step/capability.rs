//! The adapter capability surface (spec.md §6): the narrow contract each
//! step kind's adapter must satisfy.
//!
//! Every capability is a trait with a single async method, plus a blanket
//! impl over the matching `Fn` signature — implementers may supply "a rich
//! object exposing a named method or a bare function" (spec.md §4.4) and
//! the engine normalizes both to the same `Arc<dyn Trait>` at step
//! construction.
//!
//! Capability methods return a generic boxed error rather than
//! [`RouteCraftError`] directly: per spec.md §7 the *engine* decides which
//! taxonomy code an adapter failure becomes (RC5002 for a processor,
//! RC5004 for a split, ...), not the adapter itself. An adapter that wants
//! to surface a specific `RouteCraftError` may still do so — the engine
//! passes a boxed `RouteCraftError` through unmodified (spec.md §4.3).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RouteCraftError;
use crate::exchange::Exchange;
use crate::headers::{HeaderValue, Headers};
use crate::store::Store;

/// The error type every adapter capability (other than `Source`, which has
/// its own lifecycle-shaped contract) reports through.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Downcasts `err` to a [`RouteCraftError`] and returns it unmodified if it
/// already is one; otherwise applies `wrap` to its rendered message.
///
/// This is the single place spec.md §4.3's rule lives: "Any exception
/// thrown by execute is wrapped per §7 ... A RouteCraftError is passed
/// through unmodified."
pub fn classify_adapter_error(
    err: BoxError,
    wrap: impl FnOnce(String) -> RouteCraftError,
) -> RouteCraftError {
    match err.downcast::<RouteCraftError>() {
        Ok(already_classified) => *already_classified,
        Err(other) => wrap(other.to_string()),
    }
}

/// A future resolving to the final exchange produced by a route's step
/// loop for one ingress message, per spec.md §4.3: "The handler's returned
/// Exchange is the *final* exchange produced by the step loop for that
/// message."
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Exchange, RouteCraftError>> + Send>>;

/// The function a source (or a consumer, internally) calls per message.
pub type StepLoopHandler = Arc<dyn Fn(Value, Option<Headers>) -> HandlerFuture + Send + Sync>;

/// The narrow view of a running context/route a source needs to subscribe:
/// enough to read the shared store and emit events, without owning the
/// context itself (spec.md §9's non-owning back-reference guidance).
#[derive(Clone)]
pub struct RouteContext {
    /// The owning context's store.
    pub store: Store,
    /// The owning context's event bus.
    pub events: crate::events::EventBus,
    /// This route's id.
    pub route_id: crate::ids::RouteId,
}

/// `from`: a route-level capability, not a step. Produces messages and
/// calls `handler` for each, awaiting (or not) the resulting final exchange.
#[async_trait]
pub trait Source: Send + Sync {
    /// Subscribes to the upstream message producer. Must stop producing
    /// once `abort` is cancelled.
    async fn subscribe(
        &self,
        ctx: RouteContext,
        handler: StepLoopHandler,
        abort: CancellationToken,
    ) -> Result<(), RouteCraftError>;
}

/// `process`: may replace body and headers.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Processes `exchange`, returning the (possibly mutated) exchange.
    async fn process(&self, exchange: Exchange) -> Result<Exchange, BoxError>;
}

#[async_trait]
impl<F, Fut> Processor for F
where
    F: Fn(Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Exchange, BoxError>> + Send,
{
    async fn process(&self, exchange: Exchange) -> Result<Exchange, BoxError> {
        self(exchange).await
    }
}

/// `transform`: body-only; headers and id preserved.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Transforms the body, returning the new body.
    async fn transform(&self, body: Value) -> Result<Value, BoxError>;
}

#[async_trait]
impl<F, Fut> Transformer for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send,
{
    async fn transform(&self, body: Value) -> Result<Value, BoxError> {
        self(body).await
    }
}

/// `to` / `tap` / the `send` half of `enrich`: a destination that may
/// optionally return a replacement value.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Sends `exchange`. `Ok(None)` means "void" (body unchanged by `to`,
    /// result ignored by `tap`); `Ok(Some(value))` is the destination's
    /// result.
    async fn send(&self, exchange: &Exchange) -> Result<Option<Value>, BoxError>;
}

#[async_trait]
impl<F, Fut> Destination for F
where
    F: Fn(&Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<Value>, BoxError>> + Send,
{
    async fn send(&self, exchange: &Exchange) -> Result<Option<Value>, BoxError> {
        self(exchange).await
    }
}

/// `filter`: `false` drops the exchange.
#[async_trait]
pub trait Filter: Send + Sync {
    /// Evaluates the predicate against `exchange`.
    async fn filter(&self, exchange: &Exchange) -> Result<bool, BoxError>;
}

#[async_trait]
impl<F, Fut> Filter for F
where
    F: Fn(&Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    async fn filter(&self, exchange: &Exchange) -> Result<bool, BoxError> {
        self(exchange).await
    }
}

/// `split`: produces child bodies from a parent body.
#[async_trait]
pub trait Splitter: Send + Sync {
    /// Splits `body` into zero or more child bodies.
    async fn split(&self, body: &Value) -> Result<Vec<Value>, BoxError>;
}

#[async_trait]
impl<F, Fut> Splitter for F
where
    F: Fn(&Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Value>, BoxError>> + Send,
{
    async fn split(&self, body: &Value) -> Result<Vec<Value>, BoxError> {
        self(body).await
    }
}

/// `aggregate`: combines the exchanges gathered for one split group (or a
/// single degenerate exchange) into one driver exchange.
#[async_trait]
pub trait Aggregator: Send + Sync {
    /// Aggregates `exchanges` (in arrival order) into a single exchange.
    /// Never called with an empty `Vec` by the engine; implementations
    /// that are invoked directly in tests should still honor spec.md
    /// §4.4's "empty input fails" rule.
    async fn aggregate(&self, exchanges: Vec<Exchange>) -> Result<Exchange, BoxError>;
}

#[async_trait]
impl<F, Fut> Aggregator for F
where
    F: Fn(Vec<Exchange>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Exchange, BoxError>> + Send,
{
    async fn aggregate(&self, exchanges: Vec<Exchange>) -> Result<Exchange, BoxError> {
        self(exchanges).await
    }
}

/// `header`: computes one header value (or is itself a constant via the
/// blanket closure impl).
#[async_trait]
pub trait HeaderSetter: Send + Sync {
    /// Computes the value to store under the step's configured key.
    async fn value(&self, exchange: &Exchange) -> Result<HeaderValue, BoxError>;
}

#[async_trait]
impl<F, Fut> HeaderSetter for F
where
    F: Fn(&Exchange) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HeaderValue, BoxError>> + Send,
{
    async fn value(&self, exchange: &Exchange) -> Result<HeaderValue, BoxError> {
        self(exchange).await
    }
}

/// The aggregator half of `enrich`: `(original, result) -> original'`.
/// Synchronous by contract (spec.md describes it as a pure merge), unlike
/// the other capabilities which may suspend.
pub trait EnrichMerge: Send + Sync {
    /// Merges `result` (the destination's returned value, if any) into
    /// `original`, returning the merged exchange.
    fn merge(&self, original: Exchange, result: Option<Value>) -> Exchange;
}

impl<F> EnrichMerge for F
where
    F: Fn(Exchange, Option<Value>) -> Exchange + Send + Sync,
{
    fn merge(&self, original: Exchange, result: Option<Value>) -> Exchange {
        self(original, result)
    }
}
