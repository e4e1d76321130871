//! A minimal demo binary: wires a timer source through a transform and a
//! log sink, runs briefly, then stops.

use std::time::Duration;

use routecraft::adapters::{LogSink, TimerSource};
use routecraft::context::ContextBuilder;
use routecraft::route::RouteDefinitionBuilder;
use routecraft::step::Step;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let route = RouteDefinitionBuilder::new("demo-heartbeat")
        .expect("valid route id")
        .from(TimerSource::interval(Duration::from_secs(1)))
        .step(Step::header_const("demo.source", "timer"))
        .step(Step::to(LogSink))
        .build()
        .expect("route has a source");

    let context = ContextBuilder::new()
        .route(route)
        .build()
        .expect("no duplicate route ids");

    context.start().expect("context not already started");

    tokio::time::sleep(Duration::from_secs(5)).await;
    context.stop().await;
}
