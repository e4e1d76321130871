//! The default consumer: forwards every message to the step loop immediately.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::RouteCraftError;
use crate::headers::Headers;
use crate::step::capability::{HandlerFuture, StepLoopHandler};

use super::Consumer;

/// Forwards each message to the step loop as soon as it arrives; no
/// buffering, no batching. The default for every route unless `.batch(...)`
/// is configured.
#[derive(Default)]
pub struct SimpleConsumer {
    handler: RwLock<Option<StepLoopHandler>>,
}

impl SimpleConsumer {
    /// Creates an unregistered consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Consumer for SimpleConsumer {
    fn register(&self, handler: StepLoopHandler) {
        *self.handler.write().expect("lock poisoned") = Some(handler);
    }

    fn handle(&self, body: Value, headers: Option<Headers>) -> HandlerFuture {
        let handler = self.handler.read().expect("lock poisoned").clone();
        Box::pin(async move {
            match handler {
                Some(handler) => handler(body, headers).await,
                None => Err(RouteCraftError::Unknown(
                    "consumer invoked before a handler was registered".into(),
                )),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Exchange;
    use crate::ids::RouteId;

    #[tokio::test]
    async fn forwards_directly_to_the_registered_handler() {
        let consumer = SimpleConsumer::new();
        let route_id = RouteId::try_new("r").unwrap();
        consumer.register(Arc::new(move |body: Value, headers: Option<Headers>| {
            let route_id = route_id.clone();
            Box::pin(async move { Ok(Exchange::new_ingress(&route_id, body, headers.unwrap_or_default())) })
        }));

        let result = consumer.handle(Value::from(1), None).await.unwrap();
        assert_eq!(result.body(), &Value::from(1));
    }
}
