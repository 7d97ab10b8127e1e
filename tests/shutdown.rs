//! Integration tests: graceful shutdown.
//!
//! Stop must join every worker and the notifier, fail still-queued
//! requests instead of stranding them, and let in-flight operations
//! complete and be accounted afterwards.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use iosched::{
    ConfigBuilder, Error, IoDirection, IoOperation, IoRequest, IoStatus, PhysicalBuffer,
    SchedulerBuilder,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn read_request(offset: u64, length: u64) -> Arc<IoRequest> {
    Arc::new(IoRequest::new(
        offset,
        length,
        IoDirection::Read,
        Arc::new(PhysicalBuffer),
        1,
        1,
    ))
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

// ── Scenario 6: shutdown with an in-flight request ──────────────────

#[test]
fn in_flight_operation_completes_after_stop() {
    let config = ConfigBuilder::new()
        .shards(1)
        .fallback_operations(2)
        .build()
        .unwrap();
    let scheduler = SchedulerBuilder::new("t-stop")
        .config(config)
        .build()
        .unwrap();

    // Device that holds on to operations instead of completing them.
    let captured: Arc<Mutex<Option<Arc<IoOperation>>>> = Arc::new(Mutex::new(None));
    {
        let captured = captured.clone();
        scheduler.set_callback(move |operation| {
            *captured.lock().unwrap() = Some(operation);
        });
    }

    let request = read_request(0, 128 * 1024);
    scheduler.schedule_request(request.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        captured.lock().unwrap().is_some()
    }));

    // Stop with the operation still at the device. Must join promptly.
    let stopped = Instant::now();
    scheduler.stop();
    assert!(stopped.elapsed() < Duration::from_secs(5));

    // The device drains: its completion is still processed and the
    // request reaches a terminal state.
    let operation = captured.lock().unwrap().take().unwrap();
    let transferred = operation.length();
    scheduler.operation_completed(&operation, Ok(()), transferred);

    assert!(request.wait_timeout(Duration::from_secs(5)));
    assert_eq!(request.status(), IoStatus::Ok);
    assert_eq!(request.transferred_bytes(), 128 * 1024);
}

// ── Queued requests are failed, not stranded ────────────────────────

#[test]
fn stop_fails_queued_requests_with_shutting_down() {
    let config = ConfigBuilder::new()
        .shards(1)
        .fallback_operations(1)
        .build()
        .unwrap();
    let scheduler = SchedulerBuilder::new("t-drain")
        .config(config)
        .build()
        .unwrap();

    let captured: Arc<Mutex<Vec<Arc<IoOperation>>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let captured = captured.clone();
        scheduler.set_callback(move |operation| {
            captured.lock().unwrap().push(operation);
        });
    }

    // First request takes the only pooled operation; the rest back up
    // behind it.
    let in_flight = read_request(0, 4096);
    let queued: Vec<_> = (1..4u64).map(|i| read_request(i * 4096, 4096)).collect();
    scheduler.schedule_request(in_flight.clone()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        !captured.lock().unwrap().is_empty()
    }));
    for request in &queued {
        scheduler.schedule_request(request.clone()).unwrap();
    }

    scheduler.stop();

    // Everything that never reached the device is failed and notified.
    for request in &queued {
        assert!(request.wait_timeout(Duration::from_secs(5)));
        assert_eq!(request.status(), IoStatus::Failed(Error::ShuttingDown));
    }
    // No queued request was dispatched after stop.
    assert_eq!(captured.lock().unwrap().len(), 1);

    // The in-flight one still finishes on its own terms.
    let operation = captured.lock().unwrap().pop().unwrap();
    scheduler.operation_completed(&operation, Ok(()), 4096);
    assert!(in_flight.wait_timeout(Duration::from_secs(5)));
    assert_eq!(in_flight.status(), IoStatus::Ok);
}

// ── Scheduling after stop ───────────────────────────────────────────

#[test]
fn requests_scheduled_after_stop_are_failed_and_notified() {
    let config = ConfigBuilder::new().shards(1).build().unwrap();
    let scheduler = SchedulerBuilder::new("t-late")
        .config(config)
        .build()
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    {
        let calls = calls.clone();
        scheduler.set_callback(move |_operation| {
            calls.fetch_add(1, Ordering::SeqCst);
        });
    }

    scheduler.stop();

    let request = read_request(0, 4096);
    scheduler.schedule_request(request.clone()).unwrap();
    assert!(request.wait_timeout(Duration::from_secs(5)));
    assert_eq!(request.status(), IoStatus::Failed(Error::ShuttingDown));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// ── Dropping the last handle shuts down cleanly ─────────────────────

#[test]
fn dropping_the_scheduler_joins_its_threads() {
    let config = ConfigBuilder::new().shards(2).build().unwrap();
    let scheduler = SchedulerBuilder::new("t-drop")
        .config(config)
        .build()
        .unwrap();

    let completer = scheduler.clone();
    scheduler.set_callback(move |operation| {
        let transferred = operation.length();
        completer.operation_completed(&operation, Ok(()), transferred);
    });

    let request = read_request(0, 4096);
    scheduler.schedule_request(request.clone()).unwrap();
    assert!(request.wait_timeout(Duration::from_secs(5)));

    // The callback holds a scheduler clone; stop() breaks the cycle and
    // the final drop is then just memory teardown.
    scheduler.stop();
    drop(scheduler);
    assert_eq!(request.status(), IoStatus::Ok);
}
