//! The per-message FIFO work queue the step loop drains.
//!
//! spec.md §9: "Implemented as a simple FIFO of (exchange, steps remaining)
//! pairs. Split enqueues N items; Aggregate scans the queue to harvest
//! sibling items."

use std::collections::VecDeque;
use std::sync::Arc;

use crate::exchange::Exchange;
use crate::step::Step;

/// The ordered steps of one route, shared (via `Arc`) by every in-flight
/// work item for that route so split/aggregate don't need to clone it.
pub type RouteSteps = Arc<Vec<Step>>;

/// One pending unit of work: an exchange and the index of the next step to
/// run against it (`steps[next_index..]` is "steps remaining").
#[derive(Clone)]
pub struct WorkItem {
    /// The exchange to process.
    pub exchange: Exchange,
    /// Index into the route's step list of the next step to execute.
    pub next_index: usize,
}

impl WorkItem {
    /// Creates a work item at the head of the step chain (index 0).
    #[must_use]
    pub fn at_start(exchange: Exchange) -> Self {
        Self {
            exchange,
            next_index: 0,
        }
    }

    /// Creates a work item continuing from `next_index`.
    #[must_use]
    pub fn continuing(exchange: Exchange, next_index: usize) -> Self {
        Self {
            exchange,
            next_index,
        }
    }

    /// Whether this item has no more steps to run (a terminal leaf).
    #[must_use]
    pub fn is_terminal(&self, steps: &[Step]) -> bool {
        self.next_index >= steps.len()
    }
}

/// The FIFO queue of pending work items for one message's step loop.
pub type WorkQueue = VecDeque<WorkItem>;
