//! The direct adapter: an in-process, single-subscriber channel used to
//! wire routes together without a network hop (spec.md §6).
//!
//! A [`DirectRegistry`] is the shared table of named channels; a [`Context`]
//! owns exactly one and hands out [`DirectSource`]/[`DirectDestination`]
//! adapters bound to it. Subscribing twice to the same endpoint is
//! "last-wins": the most recent `subscribe` replaces whatever handler was
//! registered before it, matching a single-consumer channel rather than a
//! fan-out topic.
//!
//! [`Context`]: crate::context::Context

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::RouteCraftError;
use crate::exchange::Exchange;
use crate::headers::Headers;
use crate::ids::{EndpointName, EndpointNameError};
use crate::schema::StandardSchema;
use crate::step::capability::{BoxError, Destination, RouteContext, Source, StepLoopHandler};

/// Discovery/validation configuration for one named channel.
#[derive(Default, Clone)]
pub struct ChannelOptions {
    /// Human-readable description surfaced by discovery.
    pub description: Option<String>,
    /// Free-text discovery keywords.
    pub keywords: Vec<String>,
    /// Schema validated against the message body on every `send`.
    pub body_schema: Option<Arc<dyn StandardSchema>>,
    /// Schema validated against the message headers on every `send`.
    pub header_schema: Option<Arc<dyn StandardSchema>>,
}

/// One entry of [`DirectRegistry::discovery`]; a trimmed, serializable view
/// of a channel's [`ChannelOptions`] (schemas themselves aren't
/// serializable, so discovery reports only whether one is configured).
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryEntry {
    /// The sanitized endpoint name.
    pub endpoint: String,
    /// The channel's description, if declared.
    pub description: Option<String>,
    /// The channel's discovery keywords.
    pub keywords: Vec<String>,
    /// Whether a body schema is configured.
    pub has_body_schema: bool,
    /// Whether a header schema is configured.
    pub has_header_schema: bool,
}

struct Channel {
    options: RwLock<ChannelOptions>,
    subscriber: RwLock<Option<StepLoopHandler>>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            options: RwLock::new(ChannelOptions::default()),
            subscriber: RwLock::new(None),
        }
    }
}

/// The shared table of named in-process channels a [`Context`] owns.
///
/// [`Context`]: crate::context::Context
#[derive(Clone, Default)]
pub struct DirectRegistry {
    channels: Arc<DashMap<EndpointName, Arc<Channel>>>,
}

impl DirectRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, name: &EndpointName) -> Arc<Channel> {
        self.channels.entry(name.clone()).or_default().clone()
    }

    /// Declares (or redeclares) a channel's discovery metadata and schemas,
    /// without disturbing any existing subscriber.
    pub fn declare(&self, endpoint: &EndpointName, options: ChannelOptions) {
        let channel = self.channel(endpoint);
        *channel.options.write().expect("lock poisoned") = options;
    }

    /// Builds a source bound to a fixed endpoint. Fails at `subscribe` time
    /// (not here) with `RC5010` if `endpoint` turns out to be dynamic —
    /// direct sources only exist over one fixed endpoint.
    ///
    /// # Errors
    ///
    /// Propagates [`EndpointNameError`] if `endpoint` sanitizes to empty.
    pub fn source(&self, endpoint: &str) -> Result<DirectSource, EndpointNameError> {
        Ok(DirectSource {
            registry: self.clone(),
            endpoint: DirectEndpointRef::fixed(endpoint)?,
        })
    }

    /// Builds a source exactly like [`Self::source`], first declaring
    /// `options` on the channel. If `options` carries a body or header
    /// schema, every incoming exchange is validated against it before the
    /// subscription handler sees it (spec.md §4.6).
    ///
    /// # Errors
    ///
    /// Propagates [`EndpointNameError`] if `endpoint` sanitizes to empty.
    pub fn source_with_options(
        &self,
        endpoint: &str,
        options: ChannelOptions,
    ) -> Result<DirectSource, EndpointNameError> {
        let source = self.source(endpoint)?;
        let DirectEndpointRef::Fixed(name) = &source.endpoint else {
            unreachable!("source() always builds a fixed endpoint")
        };
        self.declare(name, options);
        Ok(source)
    }

    /// Builds a destination over a (possibly dynamic) endpoint reference,
    /// for use as `to`/`tap`/the send half of `enrich`.
    #[must_use]
    pub fn destination(&self, endpoint: DirectEndpointRef) -> DirectDestination {
        DirectDestination {
            registry: self.clone(),
            endpoint,
        }
    }

    /// Lists discovery metadata for every declared or subscribed channel.
    #[must_use]
    pub fn discovery(&self) -> Vec<DiscoveryEntry> {
        self.channels
            .iter()
            .map(|entry| {
                let options = entry.value().options.read().expect("lock poisoned");
                DiscoveryEntry {
                    endpoint: entry.key().to_string(),
                    description: options.description.clone(),
                    keywords: options.keywords.clone(),
                    has_body_schema: options.body_schema.is_some(),
                    has_header_schema: options.header_schema.is_some(),
                }
            })
            .collect()
    }
}

/// Which endpoint a direct destination targets: a fixed name, or one
/// computed per-exchange. Only [`DirectDestination`] (never
/// [`DirectSource`]) may be dynamic, per spec.md §6's `RC5010` rule.
#[derive(Clone)]
pub enum DirectEndpointRef {
    /// A fixed, pre-sanitized endpoint name.
    Fixed(EndpointName),
    /// An endpoint computed from the outgoing exchange.
    Dynamic(Arc<dyn Fn(&Exchange) -> EndpointName + Send + Sync>),
}

impl DirectEndpointRef {
    /// A fixed endpoint, sanitizing `raw` first.
    ///
    /// # Errors
    ///
    /// Propagates [`EndpointNameError`] if `raw` sanitizes to empty.
    pub fn fixed(raw: &str) -> Result<Self, EndpointNameError> {
        Ok(Self::Fixed(EndpointName::sanitize(raw)?))
    }

    /// An endpoint computed per-exchange.
    pub fn dynamic(f: impl Fn(&Exchange) -> EndpointName + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }
}

/// `from(direct(...))`: subscribes to one fixed-endpoint channel for the
/// lifetime of the route.
pub struct DirectSource {
    registry: DirectRegistry,
    endpoint: DirectEndpointRef,
}

#[async_trait]
impl Source for DirectSource {
    async fn subscribe(
        &self,
        ctx: RouteContext,
        handler: StepLoopHandler,
        abort: CancellationToken,
    ) -> Result<(), RouteCraftError> {
        let DirectEndpointRef::Fixed(endpoint) = &self.endpoint else {
            return Err(RouteCraftError::DirectSourceDynamic);
        };
        let channel = self.registry.channel(endpoint);
        ctx.store
            .set(crate::store::STORE_DIRECT_REGISTRY, self.registry.discovery());

        let endpoint_for_wrapper = endpoint.clone();
        let channel_for_validation = channel.clone();
        let wrapped: StepLoopHandler = Arc::new(move |body, headers: Option<Headers>| {
            let channel = channel_for_validation.clone();
            let handler = handler.clone();
            let endpoint = endpoint_for_wrapper.clone();
            Box::pin(async move {
                let options = channel.options.read().expect("lock poisoned").clone();
                let (body, headers) =
                    validate_against_schema(&options, body, headers.unwrap_or_default(), &endpoint)
                        .await
                        .map_err(|err| {
                            crate::step::capability::classify_adapter_error(err, |msg| {
                                RouteCraftError::DirectValidationFailed {
                                    endpoint: endpoint.to_string(),
                                    issues: msg,
                                }
                            })
                        })?;
                handler(body, Some(headers)).await
            })
        });

        *channel.subscriber.write().expect("lock poisoned") = Some(wrapped);
        abort.cancelled().await;
        *channel.subscriber.write().expect("lock poisoned") = None;
        Ok(())
    }
}

/// `to(direct(...))` / `tap(direct(...))` / the send half of
/// `enrich(direct(...))`: validates against the target channel's schemas
/// (if any), then forwards to its current subscriber.
pub struct DirectDestination {
    registry: DirectRegistry,
    endpoint: DirectEndpointRef,
}

#[async_trait]
impl Destination for DirectDestination {
    async fn send(&self, exchange: &Exchange) -> Result<Option<Value>, BoxError> {
        let endpoint = match &self.endpoint {
            DirectEndpointRef::Fixed(name) => name.clone(),
            DirectEndpointRef::Dynamic(f) => f(exchange),
        };
        let channel = self.registry.channel(&endpoint);
        let (body, headers) = validate_against_schema(
            &channel.options.read().expect("lock poisoned").clone(),
            exchange.body().clone(),
            exchange.headers().clone(),
            &endpoint,
        )
        .await?;

        let subscriber = channel.subscriber.read().expect("lock poisoned").clone();
        let Some(subscriber) = subscriber else {
            // spec.md §4.6: with no subscriber registered, `send` returns
            // the message unchanged rather than failing.
            return Ok(Some(body));
        };
        let result = subscriber(body, Some(headers))
            .await
            .map_err(|e| Box::new(e) as BoxError)?;
        Ok(Some(result.body().clone()))
    }
}

async fn validate_against_schema(
    options: &ChannelOptions,
    body: Value,
    headers: Headers,
    endpoint: &EndpointName,
) -> Result<(Value, Headers), BoxError> {
    let mut body = body;
    if let Some(schema) = &options.body_schema {
        let result = schema.validate(&body).await;
        if result.is_failure() {
            return Err(Box::new(RouteCraftError::DirectValidationFailed {
                endpoint: endpoint.to_string(),
                issues: result.issues.join("; "),
            }));
        }
        if let Some(value) = result.value {
            body = value;
        }
    }

    let mut headers = headers;
    if let Some(schema) = &options.header_schema {
        let headers_value = serde_json::to_value(&headers).unwrap_or(Value::Null);
        let result = schema.validate(&headers_value).await;
        if result.is_failure() {
            return Err(Box::new(RouteCraftError::DirectValidationFailed {
                endpoint: endpoint.to_string(),
                issues: result.issues.join("; "),
            }));
        }
        if let Some(value) = result.value {
            if let Ok(coerced) = serde_json::from_value::<Headers>(value) {
                headers = coerced;
            }
        }
    }

    Ok((body, headers))
}
