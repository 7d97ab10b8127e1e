//! Lifecycle-event observation.
//!
//! A roster is an external observer of scheduler activity: block-layer
//! tracing, latency accounting, and debugging front-ends all hang off it.
//! The scheduler registers itself at init, unregisters at teardown, and
//! reports request/operation lifecycle events in between.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::operation::IoOperation;
use crate::request::IoRequest;

/// Identifier assigned to each scheduler instance.
pub type SchedulerId = u64;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next scheduler id.
pub fn next_scheduler_id() -> SchedulerId {
    NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed)
}

/// The kind of a [`SchedulerEvent`], for cheap matching and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    RequestScheduled,
    OperationStarted,
    OperationFinished,
    RequestFinished,
}

/// A lifecycle event delivered to a roster.
#[derive(Clone)]
pub enum SchedulerEvent {
    /// A request was accepted onto a shard queue.
    RequestScheduled { request: Arc<IoRequest> },
    /// An operation is about to be handed to the device callback. Fired for
    /// every trip to the device, including short-transfer retries.
    OperationStarted {
        request: Arc<IoRequest>,
        operation: Arc<IoOperation>,
    },
    /// An operation's completion has been accounted.
    OperationFinished {
        request: Arc<IoRequest>,
        operation: Arc<IoOperation>,
    },
    /// A request reached its terminal state and is about to be notified.
    RequestFinished { request: Arc<IoRequest> },
}

impl SchedulerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SchedulerEvent::RequestScheduled { .. } => EventKind::RequestScheduled,
            SchedulerEvent::OperationStarted { .. } => EventKind::OperationStarted,
            SchedulerEvent::OperationFinished { .. } => EventKind::OperationFinished,
            SchedulerEvent::RequestFinished { .. } => EventKind::RequestFinished,
        }
    }
}

/// Observer of scheduler lifecycle events. Implementations must be
/// thread-safe; events arrive from shard workers, completion threads and
/// the notifier concurrently.
pub trait Roster: Send + Sync {
    fn notify(&self, scheduler: SchedulerId, event: SchedulerEvent);

    /// A scheduler instance came up.
    fn add_scheduler(&self, scheduler: SchedulerId, name: &str) {
        let _ = (scheduler, name);
    }

    /// A scheduler instance is going away.
    fn remove_scheduler(&self, scheduler: SchedulerId) {
        let _ = scheduler;
    }
}

/// Roster that ignores all events.
pub struct NullRoster;

impl Roster for NullRoster {
    fn notify(&self, _scheduler: SchedulerId, _event: SchedulerEvent) {}
}
