//! Windowed batching consumer: accumulates messages by count and/or time,
//! then drives the step loop once per window (spec.md §4.5).

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::RouteCraftError;
use crate::headers::Headers;
use crate::step::capability::{HandlerFuture, StepLoopHandler};
use crate::time_provider::{production_time_provider, SharedTimeProvider};

use super::Consumer;

/// Windowing policy: `size` flushes once that many messages have
/// accumulated, `time_ms` flushes the current window after that many
/// milliseconds have elapsed since its first message — whichever comes
/// first. A consumer configured with neither behaves like
/// [`super::SimpleConsumer`] (flushes every message immediately), since a
/// window that never closes would stall every message indefinitely.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchConsumerOptions {
    /// Flush once the window holds this many messages.
    pub size: Option<usize>,
    /// Flush this many milliseconds after the window's first message.
    pub time_ms: Option<u64>,
}

impl BatchConsumerOptions {
    /// A window that flushes at exactly `size` messages.
    #[must_use]
    pub fn size(size: usize) -> Self {
        Self {
            size: Some(size),
            time_ms: None,
        }
    }

    /// A window that flushes `time_ms` milliseconds after it opens.
    #[must_use]
    pub fn time_ms(time_ms: u64) -> Self {
        Self {
            size: None,
            time_ms: Some(time_ms),
        }
    }

    /// A window that flushes at `size` messages or `time_ms` milliseconds,
    /// whichever comes first.
    #[must_use]
    pub fn size_or_time(size: usize, time_ms: u64) -> Self {
        Self {
            size: Some(size),
            time_ms: Some(time_ms),
        }
    }

    fn immediate(self) -> bool {
        self.size.is_none() && self.time_ms.is_none()
    }
}

struct PendingItem {
    body: Value,
    headers: Option<Headers>,
    tx: oneshot::Sender<Result<crate::exchange::Exchange, RouteCraftError>>,
}

#[derive(Default)]
struct Window {
    items: Vec<PendingItem>,
    generation: u64,
}

/// Buffers messages into windows and drives the step loop once per window,
/// resolving every buffered message with the same final exchange (or, on
/// handler failure, rejecting every one of them).
pub struct BatchConsumer {
    options: BatchConsumerOptions,
    handler: RwLock<Option<StepLoopHandler>>,
    window: Arc<Mutex<Window>>,
    time_provider: SharedTimeProvider,
}

impl BatchConsumer {
    /// Creates a batch consumer with the given windowing policy, using the
    /// production time provider for its window timers.
    #[must_use]
    pub fn new(options: BatchConsumerOptions) -> Self {
        Self::with_time_provider(options, production_time_provider())
    }

    /// Creates a batch consumer using an explicit [`SharedTimeProvider`],
    /// for deterministic window-timer tests (SPEC_FULL.md §10.4).
    #[must_use]
    pub fn with_time_provider(options: BatchConsumerOptions, time_provider: SharedTimeProvider) -> Self {
        Self {
            options,
            handler: RwLock::new(None),
            window: Arc::new(Mutex::new(Window::default())),
            time_provider,
        }
    }
}

impl Consumer for BatchConsumer {
    fn register(&self, handler: StepLoopHandler) {
        *self.handler.write().expect("lock poisoned") = Some(handler);
    }

    fn handle(&self, body: Value, headers: Option<Headers>) -> HandlerFuture {
        // The push AND, if this message fills the window, the claim (taking
        // the items out, bumping the generation) happen here, synchronously,
        // before any future is even constructed — not deferred into the
        // returned future. A caller that calls `handle()` for several
        // messages back-to-back without awaiting any of them in between
        // (e.g. `IterSource`) must see each push (and, once the window
        // fills, the window being cleared for the next one) land in call
        // order, or a later message could land in a window its predecessor
        // already claimed.
        //
        // The actual flush this message triggers (if any) runs inline in
        // *this* message's own returned future rather than on a detached
        // task: `Route::run` tracks every dispatched message's future via
        // its own task tracker from the instant it's created, so running
        // the flush there — instead of on an untracked `tokio::spawn` —
        // means that tracker can't observe "nothing outstanding" before the
        // flush it's actually waiting on has even started.
        let (tx, rx) = oneshot::channel();
        let mut claimed: Option<Vec<PendingItem>> = None;
        {
            let mut w = self.window.lock().expect("lock poisoned");
            w.items.push(PendingItem { body, headers, tx });
            let should_flush_now = self.options.immediate() || self.options.size.is_some_and(|n| w.items.len() >= n);

            if should_flush_now {
                w.generation += 1;
                claimed = Some(std::mem::take(&mut w.items));
            } else if w.items.len() == 1 {
                if let Some(time_ms) = self.options.time_ms {
                    let generation = w.generation;
                    let window = self.window.clone();
                    let handler = self.handler.read().expect("lock poisoned").clone();
                    let time_provider = self.time_provider.clone();
                    tokio::spawn(async move {
                        time_provider.sleep(Duration::from_millis(time_ms)).await;
                        flush_if_current(&window, handler, generation).await;
                    });
                }
            }
        }
        let handler_for_flush = claimed.is_some().then(|| self.handler.read().expect("lock poisoned").clone());

        Box::pin(async move {
            if let Some(items) = claimed {
                run_flush(items, handler_for_flush.flatten()).await;
            }
            rx.await
                .unwrap_or_else(|_| Err(RouteCraftError::Unknown("batch window was dropped before flushing".into())))
        })
    }

    fn flush_remaining(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let items = {
            let mut w = self.window.lock().expect("lock poisoned");
            w.generation += 1;
            std::mem::take(&mut w.items)
        };
        let handler = self.handler.read().expect("lock poisoned").clone();
        Box::pin(async move {
            run_flush(items, handler).await;
        })
    }
}

/// Claims the window's items if it's still on `generation` (i.e. no one else
/// has flushed it yet) and runs them through `handler`; otherwise this caller
/// lost the race (a size trigger already claimed the window) and does
/// nothing. Used by the window-timer path, where the claim can't happen
/// synchronously at push time because it fires later, off any `handle()` call.
async fn flush_if_current(window: &Mutex<Window>, handler: Option<StepLoopHandler>, generation: u64) {
    let items = {
        let mut w = window.lock().expect("lock poisoned");
        if w.generation != generation {
            return;
        }
        w.generation += 1;
        std::mem::take(&mut w.items)
    };
    run_flush(items, handler).await;
}

/// Merges a claimed window and drives the step loop once, resolving every
/// member's sender with the same result.
async fn run_flush(items: Vec<PendingItem>, handler: Option<StepLoopHandler>) {
    if items.is_empty() {
        return;
    }

    let Some(handler) = handler else {
        for item in items {
            let _ = item.tx.send(Err(RouteCraftError::Unknown(
                "consumer invoked before a handler was registered".into(),
            )));
        }
        return;
    };

    let (merged_body, merged_headers) = merge_window(&items);
    let result = handler(merged_body, Some(merged_headers)).await;
    for item in items {
        let _ = item.tx.send(result.clone());
    }
}

/// Default batch merge (SPEC_FULL.md §10.3): concatenate bodies into an
/// array in arrival order; shallow-merge headers with later messages
/// winning on key collision.
fn merge_window(items: &[PendingItem]) -> (Value, Headers) {
    let mut bodies = Vec::with_capacity(items.len());
    let mut headers = Headers::new();
    for item in items {
        bodies.push(item.body.clone());
        if let Some(h) = &item.headers {
            headers.merge_from(h);
        }
    }
    (Value::Array(bodies), headers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::ids::RouteId;
    use crate::time_provider::test_time_provider;

    fn echo_handler() -> StepLoopHandler {
        let route_id = RouteId::try_new("r").unwrap();
        Arc::new(move |body: Value, headers: Option<Headers>| {
            let route_id = route_id.clone();
            Box::pin(async move { Ok(Exchange::new_ingress(&route_id, body, headers.unwrap_or_default())) })
        })
    }

    #[tokio::test]
    async fn flushes_once_size_is_reached_and_resolves_every_sender() {
        let consumer = BatchConsumer::with_time_provider(BatchConsumerOptions::size(2), test_time_provider());
        consumer.register(echo_handler());

        let first = consumer.handle(Value::from(1), None);
        let second = consumer.handle(Value::from(2), None);
        let (a, b) = tokio::join!(first, second);
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.body(), &Value::Array(vec![Value::from(1), Value::from(2)]));
        assert_eq!(a.id(), b.id());
    }

    #[tokio::test]
    async fn with_neither_size_nor_time_behaves_like_simple_consumer() {
        let consumer = BatchConsumer::with_time_provider(BatchConsumerOptions::default(), test_time_provider());
        consumer.register(echo_handler());
        let result = consumer.handle(Value::from("solo"), None).await.unwrap();
        assert_eq!(result.body(), &Value::Array(vec![Value::from("solo")]));
    }
}
