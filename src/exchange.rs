//! The exchange: the unit of work traveling through a route.

use serde_json::Value;
use tracing::Span;

use crate::headers::Headers;
use crate::ids::{CorrelationId, ExchangeId, RouteId};

/// The unit of work traveling through a route.
///
/// An exchange's `logger` is realized as a [`tracing::Span`] carrying
/// `context_id`, `route_id`, `exchange_id` and `correlation_id` fields (see
/// SPEC_FULL.md §10.1) rather than a boxed logger object, since `tracing`
/// spans already are the "logger bound to (context, route, exchange)"
/// capability spec.md §3 describes.
///
/// The back-reference to the owning context/route is non-owning by
/// construction: the exchange carries only the `route_id` header (spec.md
/// §9, "resolve exchange -> route via route_id header and a context-scoped
/// registry rather than storing pointers").
#[derive(Debug, Clone)]
pub struct Exchange {
    id: ExchangeId,
    body: Value,
    headers: Headers,
    span: Span,
}

impl Exchange {
    /// Creates a brand-new exchange at ingress: a fresh id and correlation
    /// id, matching spec.md §3's "correlation_id is assigned once at
    /// ingress".
    #[must_use]
    pub fn new_ingress(route_id: &RouteId, body: Value, mut headers: Headers) -> Self {
        let id = ExchangeId::generate();
        let correlation_id = CorrelationId::generate();
        headers.set_route(route_id);
        headers.set_correlation_id(correlation_id);
        let span = tracing::info_span!(
            "exchange",
            exchange_id = %id,
            route_id = %route_id,
            correlation_id = %correlation_id,
        );
        Self {
            id,
            body,
            headers,
            span,
        }
    }

    /// Builds an exchange directly, preserving whatever correlation id is
    /// already present in `headers`. Used by split (new id, same
    /// correlation id and route) and by direct consumers building their own
    /// ingress exchange from an externally-synthesized one.
    #[must_use]
    pub fn from_parts(id: ExchangeId, body: Value, headers: Headers) -> Self {
        let correlation_id = headers.correlation_id();
        let span = match correlation_id {
            Some(cid) => tracing::info_span!("exchange", exchange_id = %id, correlation_id = %cid),
            None => tracing::info_span!("exchange", exchange_id = %id),
        };
        Self {
            id,
            body,
            headers,
            span,
        }
    }

    /// The exchange's id.
    #[must_use]
    pub fn id(&self) -> ExchangeId {
        self.id
    }

    /// The exchange's body.
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    /// Replaces the body in place, preserving id and headers.
    pub fn set_body(&mut self, body: Value) {
        self.body = body;
    }

    /// The exchange's headers.
    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Mutable access to headers, for steps that need to write (`header`,
    /// `process`).
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// The tracing span bound to this exchange; steps should `.enter()` or
    /// instrument their work with this span for the duration of execution.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// The exchange's correlation id, assigned once at ingress and carried
    /// unchanged through every derived exchange.
    #[must_use]
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.headers.correlation_id()
    }

    /// Deep-copies body and headers into a fresh exchange with a new id but
    /// the same correlation id, per the `tap` step's snapshot semantics.
    #[must_use]
    pub fn snapshot(&self) -> Self {
        let id = ExchangeId::generate();
        let headers = self.headers.clone();
        let span = match self.correlation_id() {
            Some(cid) => tracing::info_span!("exchange.tap", exchange_id = %id, correlation_id = %cid),
            None => tracing::info_span!("exchange.tap", exchange_id = %id),
        };
        Self {
            id,
            body: self.body.clone(),
            headers,
            span,
        }
    }

    /// Derives a child exchange for a split output: a fresh id, the
    /// parent's headers (split hierarchy already extended by the caller),
    /// and `body` as the child payload.
    #[must_use]
    pub fn derive_split_child(&self, body: Value, headers: Headers) -> Self {
        Self::from_parts(ExchangeId::generate(), body, headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_assigns_fresh_correlation_id() {
        let route_id = RouteId::try_new("r1".to_string()).unwrap();
        let a = Exchange::new_ingress(&route_id, Value::Null, Headers::new());
        let b = Exchange::new_ingress(&route_id, Value::Null, Headers::new());
        assert_ne!(a.correlation_id(), b.correlation_id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn snapshot_preserves_correlation_id_but_not_exchange_id() {
        let route_id = RouteId::try_new("r1".to_string()).unwrap();
        let original = Exchange::new_ingress(&route_id, Value::Null, Headers::new());
        let snapshot = original.snapshot();
        assert_eq!(original.correlation_id(), snapshot.correlation_id());
        assert_ne!(original.id(), snapshot.id());
    }
}
