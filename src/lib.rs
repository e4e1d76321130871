//! RouteCraft: an embeddable integration engine for executing declarative
//! routes — source, ordered step chain, destination — over an in-process
//! exchange model.
//!
//! See `SPEC_FULL.md` in the repository root for the full design. The
//! short version: a [`context::Context`] owns one or more
//! [`route::RouteDefinition`]s; each route pulls messages from a
//! [`step::capability::Source`], wraps them as an [`exchange::Exchange`],
//! and drains a FIFO work queue through an ordered chain of [`step::Step`]s
//! until every branch reaches a terminal leaf.

pub mod adapters;
pub mod consumer;
pub mod context;
pub mod direct;
pub mod error;
pub mod events;
pub mod exchange;
pub mod headers;
pub mod ids;
pub mod route;
pub mod schema;
pub mod step;
pub mod store;
pub mod time_provider;
pub mod workqueue;

pub use context::{Context, ContextBuilder};
pub use error::RouteCraftError;
pub use exchange::Exchange;
pub use headers::{HeaderValue, Headers};
pub use ids::{ContextId, CorrelationId, EndpointName, ExchangeId, GroupId, RouteId};
pub use route::{RouteDefinition, RouteDefinitionBuilder};
pub use step::Step;
