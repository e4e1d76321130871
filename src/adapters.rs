//! Reference adapters (SPEC_FULL.md §11): small, dependency-free building
//! blocks useful in demos and tests, not meant to compete with a real
//! network adapter crate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RouteCraftError;
use crate::exchange::Exchange;
use crate::headers::{self, HeaderValue, Headers};
use crate::step::capability::{BoxError, Destination, RouteContext, Source, StepLoopHandler};
use crate::time_provider::{production_time_provider, SharedTimeProvider};

/// A destination that logs the exchange body via `tracing::info!` and
/// returns it unchanged (void).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl Destination for LogSink {
    async fn send(&self, exchange: &Exchange) -> Result<Option<Value>, BoxError> {
        tracing::info!(body = %exchange.body(), "log sink");
        Ok(None)
    }
}

/// A destination that discards its input and returns nothing. Useful as a
/// route terminator in demos where the result doesn't matter.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDestination;

#[async_trait]
impl Destination for NoopDestination {
    async fn send(&self, _exchange: &Exchange) -> Result<Option<Value>, BoxError> {
        Ok(None)
    }
}

/// An in-memory destination (and processor) that records every body it
/// receives, in order. Clone-cheap; clones share the same backing vector.
/// Exists solely for tests and demos.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    bodies: Arc<Mutex<Vec<Value>>>,
}

impl VecSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of every body received so far, in arrival order.
    #[must_use]
    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl Destination for VecSink {
    async fn send(&self, exchange: &Exchange) -> Result<Option<Value>, BoxError> {
        self.bodies.lock().expect("lock poisoned").push(exchange.body().clone());
        Ok(None)
    }
}

/// The reference `simple(...)` source used throughout spec.md §8's
/// scenarios: emits each of a fixed list of bodies once, in order, then
/// resolves. A single-value source is just `IterSource::once(body)`.
pub struct IterSource {
    items: Vec<Value>,
}

impl IterSource {
    /// A source that emits every item in `items`, in order.
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = Value>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// A source that emits exactly one message.
    #[must_use]
    pub fn once(body: impl Into<Value>) -> Self {
        Self::new([body.into()])
    }
}

#[async_trait]
impl Source for IterSource {
    async fn subscribe(
        &self,
        _ctx: RouteContext,
        handler: StepLoopHandler,
        abort: CancellationToken,
    ) -> Result<(), RouteCraftError> {
        // A windowed consumer (e.g. BatchConsumer) records each item, and
        // decides whether it closes the window, synchronously the moment
        // `handler` is *called* — not when the future it returns is polled.
        // So every item is dispatched without awaiting its future here: a
        // trailing, not-yet-full window is only flushed once this method
        // returns (`Route::run` then calls the consumer's
        // `flush_remaining`), so awaiting a not-yet-flushed item's future
        // inline would stall this loop forever.
        for item in &self.items {
            if abort.is_cancelled() {
                break;
            }
            let _ = handler(item.clone(), None);
        }
        Ok(())
    }
}

/// A source that fires on an interval (or once, with `period` unset),
/// writing `routecraft.timer.*` headers describing the fire. In scope per
/// SPEC_FULL.md §11: periodic/one-shot timers only, no cron expressions or
/// distributed scheduling.
pub struct TimerSource {
    period: Option<Duration>,
    time_provider: SharedTimeProvider,
}

impl TimerSource {
    /// A timer that fires repeatedly every `period`.
    #[must_use]
    pub fn interval(period: Duration) -> Self {
        Self {
            period: Some(period),
            time_provider: production_time_provider(),
        }
    }

    /// A timer that fires exactly once, immediately.
    #[must_use]
    pub fn one_shot() -> Self {
        Self {
            period: None,
            time_provider: production_time_provider(),
        }
    }

    /// Overrides the time provider, for deterministic tests
    /// (SPEC_FULL.md §10.4).
    #[must_use]
    pub fn with_time_provider(mut self, time_provider: SharedTimeProvider) -> Self {
        self.time_provider = time_provider;
        self
    }
}

#[async_trait]
impl Source for TimerSource {
    async fn subscribe(
        &self,
        _ctx: RouteContext,
        handler: StepLoopHandler,
        abort: CancellationToken,
    ) -> Result<(), RouteCraftError> {
        let mut counter: i64 = 0;
        loop {
            if abort.is_cancelled() {
                return Ok(());
            }
            if let Some(period) = self.period {
                tokio::select! {
                    () = self.time_provider.sleep(period) => {}
                    () = abort.cancelled() => return Ok(()),
                }
            }
            counter += 1;
            let now = std::time::SystemTime::now();
            let fired_at = crate::events::iso8601(now);
            let mut hdrs = Headers::new();
            hdrs.set(headers::HEADER_TIMER_TIME, HeaderValue::String(fired_at.clone()));
            hdrs.set(headers::HEADER_TIMER_FIRED_TIME, HeaderValue::String(fired_at));
            hdrs.set(headers::HEADER_TIMER_COUNTER, HeaderValue::Integer(counter));
            if let Some(period) = self.period {
                #[allow(clippy::cast_possible_wrap)]
                hdrs.set(
                    headers::HEADER_TIMER_PERIOD_MS,
                    HeaderValue::Integer(period.as_millis() as i64),
                );
                let next_run = crate::events::iso8601(now + period);
                hdrs.set(headers::HEADER_TIMER_NEXT_RUN, HeaderValue::String(next_run));
            }
            let _ = handler(Value::Null, Some(hdrs)).await;
            if self.period.is_none() {
                return Ok(());
            }
        }
    }
}
