//! Scheduler metrics.
//!
//! Counters for request/operation throughput and the backpressure paths,
//! registered with metriken for exposition by whatever admin surface the
//! embedding kernel or test harness provides.

use metriken::{Counter, Gauge, metric};

// ── Requests ─────────────────────────────────────────────────────

#[metric(
    name = "iosched/requests/scheduled",
    description = "Requests accepted onto a shard queue"
)]
pub static REQUESTS_SCHEDULED: Counter = Counter::new();

#[metric(
    name = "iosched/requests/finished",
    description = "Requests that reached a successful terminal state"
)]
pub static REQUESTS_FINISHED: Counter = Counter::new();

#[metric(
    name = "iosched/requests/failed",
    description = "Requests that reached a failed terminal state"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

#[metric(
    name = "iosched/requests/requeued",
    description = "Requests re-queued for a further slice after a completed round"
)]
pub static REQUESTS_REQUEUED: Counter = Counter::new();

// ── Operations ───────────────────────────────────────────────────

#[metric(
    name = "iosched/operations/dispatched",
    description = "Operations handed to the device callback"
)]
pub static OPERATIONS_DISPATCHED: Counter = Counter::new();

#[metric(
    name = "iosched/operations/completed",
    description = "Operation completions accounted (duplicates excluded)"
)]
pub static OPERATIONS_COMPLETED: Counter = Counter::new();

#[metric(
    name = "iosched/operations/retried",
    description = "In-place re-dispatches after a short transfer"
)]
pub static OPERATIONS_RETRIED: Counter = Counter::new();

// ── Backpressure ─────────────────────────────────────────────────

#[metric(
    name = "iosched/translate/busy",
    description = "Translator busy responses that re-queued a request"
)]
pub static TRANSLATE_BUSY: Counter = Counter::new();

#[metric(
    name = "iosched/pool/free",
    description = "Operations currently in the free pool"
)]
pub static POOL_FREE: Gauge = Gauge::new();

// ── Bytes ────────────────────────────────────────────────────────

#[metric(
    name = "iosched/bytes/transferred",
    description = "Client bytes moved by completed operations"
)]
pub static BYTES_TRANSFERRED: Counter = Counter::new();
