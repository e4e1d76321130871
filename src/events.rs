//! The context's event bus: a fixed taxonomy of lifecycle and error events,
//! dispatched synchronously to handlers in registration order.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::RouteCraftError;
use crate::ids::{ContextId, ExchangeId, RouteId};

/// The fixed set of events the context and its routes emit.
///
/// Matches spec.md §4.2: context lifecycle, route lifecycle, and the single
/// cross-cutting `Error` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    /// Emitted before any route is launched.
    ContextStarting,
    /// Emitted once every route has been launched.
    ContextStarted,
    /// Emitted at the beginning of `stop()`.
    ContextStopping,
    /// Emitted once every route has drained.
    ContextStopped,
    /// Emitted when `register_routes` adds a route.
    RouteRegistered,
    /// Emitted just before a route's source is subscribed.
    RouteStarting,
    /// Emitted once a route's source subscription is active.
    RouteStarted,
    /// Emitted when a route's controller is aborted.
    RouteStopping,
    /// Emitted once a route has fully drained.
    RouteStopped,
    /// Emitted for any captured error, anywhere in the engine.
    Error,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventName::ContextStarting => "contextStarting",
            EventName::ContextStarted => "contextStarted",
            EventName::ContextStopping => "contextStopping",
            EventName::ContextStopped => "contextStopped",
            EventName::RouteRegistered => "routeRegistered",
            EventName::RouteStarting => "routeStarting",
            EventName::RouteStarted => "routeStarted",
            EventName::RouteStopping => "routeStopping",
            EventName::RouteStopped => "routeStopped",
            EventName::Error => "error",
        };
        f.write_str(s)
    }
}

/// The details carried by an `error` event, per spec.md §4.2.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetails {
    /// The captured error.
    pub error: RouteCraftError,
    /// The route that was executing when the error occurred, if any.
    pub route: Option<RouteId>,
    /// The exchange that was executing when the error occurred, if any.
    pub exchange: Option<ExchangeId>,
}

/// The envelope every handler receives, regardless of event name.
#[derive(Debug, Clone, Serialize)]
pub struct EventPayload {
    /// RFC 3339 / ISO-8601 timestamp of emission.
    pub ts: String,
    /// The emitting context's id.
    pub context: ContextId,
    /// Event-specific details, as arbitrary JSON.
    pub details: Value,
}

/// A handler registered via [`EventBus::on`].
pub type Handler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// A disposer returned by [`EventBus::on`]; dropping or calling it removes
/// the handler.
pub struct Disposer {
    bus: EventBus,
    name: EventName,
    token: u64,
}

impl Disposer {
    /// Removes the handler. Idempotent.
    pub fn dispose(self) {
        self.bus.remove(self.name, self.token);
    }
}

/// Ordered, synchronous, in-process event bus.
///
/// Handlers for one event name run in registration order on the calling
/// task. Handler panics are not caught (matching the engine's "no
/// undefined behavior from foreign panics" stance elsewhere) but handler
/// *logic* errors are the caller's concern — `emit` itself never fails.
#[derive(Clone)]
pub struct EventBus {
    context_id: ContextId,
    handlers: Arc<DashMap<EventName, Vec<(u64, Handler)>>>,
    next_token: Arc<AtomicU64>,
}

impl EventBus {
    /// Creates an empty event bus bound to a context id (stamped onto every
    /// payload).
    #[must_use]
    pub fn new(context_id: ContextId) -> Self {
        Self {
            context_id,
            handlers: Arc::new(DashMap::new()),
            next_token: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Registers a handler for `name`, returning a disposer that removes it.
    pub fn on<F>(&self, name: EventName, handler: F) -> Disposer
    where
        F: Fn(&EventPayload) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.handlers
            .entry(name)
            .or_default()
            .push((token, Arc::new(handler)));
        Disposer {
            bus: self.clone(),
            name,
            token,
        }
    }

    fn remove(&self, name: EventName, token: u64) {
        if let Some(mut handlers) = self.handlers.get_mut(&name) {
            handlers.retain(|(t, _)| *t != token);
        }
    }

    /// Emits `name` with `details` to every registered handler, in
    /// registration order.
    ///
    /// Per spec.md §4.1: a handler that panics/errors is caught, logged,
    /// and re-emitted as an `Error` event — unless `name` is already
    /// `Error`, which would loop. Since Rust closures can't "throw" the way
    /// JS callbacks do, this is enforced by catching unwinding panics via
    /// [`std::panic::catch_unwind`].
    pub fn emit(&self, name: EventName, details: impl Serialize) {
        let details = serde_json::to_value(details).unwrap_or(Value::Null);
        let payload = EventPayload {
            ts: now_iso8601(),
            context: self.context_id,
            details,
        };
        let Some(handlers) = self.handlers.get(&name) else {
            return;
        };
        let handlers: Vec<Handler> = handlers.iter().map(|(_, h)| h.clone()).collect();
        drop(self.handlers.get(&name));
        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&payload)));
            if let Err(panic) = result {
                let message = panic_message(&panic);
                tracing::warn!(event = %name, error = %message, "event handler panicked");
                if name != EventName::Error {
                    self.emit(
                        EventName::Error,
                        ErrorDetails {
                            error: RouteCraftError::Unknown(message),
                            route: None,
                            exchange: None,
                        },
                    );
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub(crate) fn now_iso8601() -> String {
    iso8601(std::time::SystemTime::now())
}

/// Renders an arbitrary [`std::time::SystemTime`] as RFC 3339, used by
/// `TimerSource` to stamp both the fire time and the next scheduled fire
/// time (`now + period`).
pub(crate) fn iso8601(time: std::time::SystemTime) -> String {
    let since_epoch = time
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    humantime_rfc3339(since_epoch.as_secs(), since_epoch.subsec_nanos())
}

/// Minimal RFC 3339 (UTC, `Z`-suffixed) formatter so the event bus doesn't
/// need a calendar/timezone dependency for a single timestamp field.
fn humantime_rfc3339(secs: u64, nanos: u32) -> String {
    const DAYS_PER_400Y: i64 = 146_097;
    const DAYS_PER_100Y: i64 = 36_524;
    const DAYS_PER_4Y: i64 = 1461;
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - DAYS_PER_400Y + 1 } / DAYS_PER_400Y;
    let doe = (z - era * DAYS_PER_400Y) as u64;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if month <= 2 { y + 1 } else { y };
    let _ = (DAYS_PER_100Y, DAYS_PER_4Y);

    format!(
        "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{nanos:03}Z",
        nanos = nanos / 1_000_000
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new(ContextId::generate());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        bus.on(EventName::ContextStarted, move |_| o1.lock().unwrap().push(1));
        bus.on(EventName::ContextStarted, move |_| o2.lock().unwrap().push(2));
        bus.emit(EventName::ContextStarted, serde_json::json!({}));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn disposer_removes_handler() {
        let bus = EventBus::new(ContextId::generate());
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let disposer = bus.on(EventName::ContextStarted, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(EventName::ContextStarted, serde_json::json!({}));
        disposer.dispose();
        bus.emit(EventName::ContextStarted, serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn timestamp_is_plausible_rfc3339() {
        let ts = now_iso8601();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
    }
}
