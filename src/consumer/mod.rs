//! Consumer policies: how a route turns source messages into step-loop
//! invocations (spec.md §4.5).

mod batch;
mod simple;

pub use batch::{BatchConsumer, BatchConsumerOptions};
pub use simple::SimpleConsumer;

use std::future::Future;
use std::pin::Pin;

use crate::step::capability::StepLoopHandler;

/// A consumer sits between a route's source and its step loop. `register`
/// wires the function that actually runs the step loop for one message;
/// `handle` is what the source calls per message, and decides *when* (and
/// with what batching) `register`'s handler actually runs.
pub trait Consumer: Send + Sync {
    /// Registers the step-loop handler this consumer drives once it
    /// decides to flush. Called exactly once, when the owning route starts.
    fn register(&self, handler: StepLoopHandler);

    /// Called by the source for every message. Returns a future resolving
    /// to the final exchange once this message's flush (immediate for
    /// [`SimpleConsumer`], windowed for [`BatchConsumer`]) completes.
    fn handle(
        &self,
        body: serde_json::Value,
        headers: Option<crate::headers::Headers>,
    ) -> crate::step::capability::HandlerFuture;

    /// Forces any partially-filled window to flush immediately. Called once
    /// the owning route's source has exhausted, so a finite source doesn't
    /// leave a partial batch stranded forever (spec.md §4.5). A no-op for
    /// consumers without windowing.
    fn flush_remaining(&self) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async {})
    }
}
