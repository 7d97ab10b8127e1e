//! Client-visible I/O requests and the buffer capability they carry.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{Error, IoStatus};
use crate::operation::IoOperation;

/// Identifier of the team (address space) a request belongs to.
pub type TeamId = i32;
/// Identifier of the thread that submitted a request.
pub type ThreadId = i32;

/// Transfer direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

impl IoDirection {
    pub fn is_write(self) -> bool {
        matches!(self, IoDirection::Write)
    }
}

/// Client buffer capability consumed by the scheduler.
///
/// Virtual buffers must have their pages locked before the device touches
/// them; physically contiguous buffers report `is_virtual() == false` and
/// skip locking entirely.
pub trait IoBuffer: Send + Sync {
    /// Whether the buffer lives in pageable virtual memory.
    fn is_virtual(&self) -> bool;

    /// Pin the buffer's pages for I/O on behalf of `team`.
    fn lock_memory(&self, team: TeamId, is_write: bool) -> Result<(), Error>;

    /// Undo a successful [`lock_memory`](Self::lock_memory).
    fn unlock_memory(&self, team: TeamId, is_write: bool);
}

/// A buffer that is already physically contiguous and pinned.
pub struct PhysicalBuffer;

impl IoBuffer for PhysicalBuffer {
    fn is_virtual(&self) -> bool {
        false
    }

    fn lock_memory(&self, _team: TeamId, _is_write: bool) -> Result<(), Error> {
        Ok(())
    }

    fn unlock_memory(&self, _team: TeamId, _is_write: bool) {}
}

type FinishCallback = Box<dyn FnOnce(&IoRequest) + Send>;

/// A client-submitted unit of I/O spanning a contiguous byte range.
///
/// Created by the client, mutated only by the scheduler between
/// `schedule_request` and the finish notification, and destroyed by the
/// client afterwards. The remaining-bytes cursor decreases as operations
/// are carved off; the status stays [`IoStatus::Pending`] until the
/// current round of operations completes.
pub struct IoRequest {
    offset: u64,
    length: u64,
    direction: IoDirection,
    team: TeamId,
    thread: ThreadId,
    buffer: Arc<dyn IoBuffer>,
    state: Mutex<RequestState>,
    finished: Condvar,
}

impl std::fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoRequest")
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("direction", &self.direction)
            .field("team", &self.team)
            .field("thread", &self.thread)
            .finish()
    }
}

struct RequestState {
    remaining: u64,
    status: IoStatus,
    /// Highest request-relative end offset any operation has reached.
    transferred_end: u64,
    partial_transfer: bool,
    pending_operations: usize,
    memory_locked: bool,
    notified: bool,
    callback: Option<FinishCallback>,
}

impl IoRequest {
    pub fn new(
        offset: u64,
        length: u64,
        direction: IoDirection,
        buffer: Arc<dyn IoBuffer>,
        team: TeamId,
        thread: ThreadId,
    ) -> Self {
        Self {
            offset,
            length,
            direction,
            team,
            thread,
            buffer,
            state: Mutex::new(RequestState {
                remaining: length,
                status: IoStatus::Pending,
                transferred_end: 0,
                partial_transfer: false,
                pending_operations: 0,
                memory_locked: false,
                notified: false,
                callback: None,
            }),
            finished: Condvar::new(),
        }
    }

    /// Install a completion callback, invoked exactly once when the request
    /// reaches its terminal state. Requests with a callback are notified
    /// from the scheduler's notifier thread rather than the completion path.
    pub fn set_finished_callback(
        &self,
        callback: impl FnOnce(&IoRequest) + Send + 'static,
    ) {
        self.state.lock().unwrap().callback = Some(Box::new(callback));
    }

    // ── Immutable attributes ─────────────────────────────────────────

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn length(&self) -> u64 {
        self.length
    }

    pub fn direction(&self) -> IoDirection {
        self.direction
    }

    pub fn is_write(&self) -> bool {
        self.direction.is_write()
    }

    pub fn team_id(&self) -> TeamId {
        self.team
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub fn buffer(&self) -> Arc<dyn IoBuffer> {
        self.buffer.clone()
    }

    // ── Cursor and status ────────────────────────────────────────────

    /// Bytes not yet carved into operations.
    pub fn remaining_bytes(&self) -> u64 {
        self.state.lock().unwrap().remaining
    }

    /// Consume `bytes` from the remaining range. Called by the preparation
    /// path once a slice has been handed to an operation.
    pub fn advance(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        state.remaining = state.remaining.saturating_sub(bytes);
    }

    pub fn status(&self) -> IoStatus {
        self.state.lock().unwrap().status.clone()
    }

    /// Highest request-relative end offset reached by completed operations.
    pub fn transferred_bytes(&self) -> u64 {
        self.state.lock().unwrap().transferred_end
    }

    /// Whether any operation completed short of its original length.
    pub fn is_partial_transfer(&self) -> bool {
        self.state.lock().unwrap().partial_transfer
    }

    pub fn has_callbacks(&self) -> bool {
        self.state.lock().unwrap().callback.is_some()
    }

    /// Whether the current round of operations has completed and a verdict
    /// is in: no operations in flight and a terminal status.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.pending_operations == 0 && state.status.is_terminal()
    }

    /// Rewind the status to the in-flight sentinel. The scheduler calls this
    /// when a round of operations finished OK but bytes remain, just before
    /// re-queueing the request for its next slice.
    pub fn set_unfinished(&self) {
        self.state.lock().unwrap().status = IoStatus::Pending;
    }

    /// Record a terminal status and notify. Used by abort and by submission
    /// failures that never reach the device. Returns whether this call
    /// delivered the notification.
    pub fn set_status_and_notify(&self, status: IoStatus) -> bool {
        self.state.lock().unwrap().status = status;
        self.notify_finished()
    }

    // ── Operation bookkeeping (scheduler-internal) ───────────────────

    /// Account one operation as in flight on behalf of this request.
    pub(crate) fn register_operation(&self) {
        self.state.lock().unwrap().pending_operations += 1;
    }

    /// Fold one completed operation into the request.
    ///
    /// Records the first failing status, the partial-transfer flag and the
    /// transfer high-water mark; when the last in-flight operation lands
    /// with the status still pending, the round is complete and the status
    /// becomes `Ok`.
    pub fn operation_finished(
        &self,
        _operation: &IoOperation,
        status: IoStatus,
        is_short: bool,
        end_offset: u64,
    ) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.pending_operations > 0);
        state.pending_operations = state.pending_operations.saturating_sub(1);
        if is_short {
            state.partial_transfer = true;
        }
        if end_offset > state.transferred_end {
            state.transferred_end = end_offset;
        }
        if let IoStatus::Failed(err) = status
            && state.status.is_pending()
        {
            state.status = IoStatus::Failed(err);
        }
        if state.pending_operations == 0 && state.status.is_pending() {
            state.status = IoStatus::Ok;
        }
    }

    // ── Memory locking ───────────────────────────────────────────────

    /// Lock the buffer's pages if it is virtual and not already locked.
    /// The lock is undone when the finish notification fires.
    pub(crate) fn ensure_memory_locked(&self) -> Result<(), Error> {
        {
            let state = self.state.lock().unwrap();
            if state.memory_locked || !self.buffer.is_virtual() {
                return Ok(());
            }
        }
        self.buffer.lock_memory(self.team, self.is_write())?;
        self.state.lock().unwrap().memory_locked = true;
        Ok(())
    }

    // ── Notification ─────────────────────────────────────────────────

    /// Deliver the finish notification: unlock the buffer, invoke the
    /// completion callback, and wake any `wait` callers. A second call is
    /// a no-op; the return value says whether this call delivered.
    pub fn notify_finished(&self) -> bool {
        let (unlock, callback) = {
            let mut state = self.state.lock().unwrap();
            if state.notified {
                return false;
            }
            state.notified = true;
            let unlock = state.memory_locked;
            state.memory_locked = false;
            (unlock, state.callback.take())
        };
        if unlock {
            self.buffer.unlock_memory(self.team, self.is_write());
        }
        if let Some(callback) = callback {
            callback(self);
        }
        self.finished.notify_all();
        true
    }

    /// Block until the finish notification has been delivered.
    pub fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        while !state.notified {
            state = self.finished.wait(state).unwrap();
        }
    }

    /// Like [`wait`](Self::wait), bounded. Returns whether the request was
    /// notified within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        while !state.notified {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            let (next, result) = self
                .finished
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = next;
            if result.timed_out() && !state.notified {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(length: u64) -> IoRequest {
        IoRequest::new(0, length, IoDirection::Read, Arc::new(PhysicalBuffer), 1, 1)
    }

    fn dummy_operation() -> IoOperation {
        IoOperation::new(0)
    }

    #[test]
    fn advance_moves_the_cursor() {
        let request = request(4096);
        assert_eq!(request.remaining_bytes(), 4096);
        request.advance(1024);
        assert_eq!(request.remaining_bytes(), 3072);
        request.advance(10_000);
        assert_eq!(request.remaining_bytes(), 0);
    }

    #[test]
    fn round_completes_ok_when_last_operation_lands() {
        let request = request(4096);
        request.register_operation();
        assert!(!request.is_finished());
        request.operation_finished(&dummy_operation(), IoStatus::Ok, false, 4096);
        assert!(request.is_finished());
        assert_eq!(request.status(), IoStatus::Ok);
        assert_eq!(request.transferred_bytes(), 4096);
    }

    #[test]
    fn first_error_takes_precedence() {
        let request = request(8192);
        request.register_operation();
        request.register_operation();
        request.operation_finished(
            &dummy_operation(),
            IoStatus::Failed(Error::DeviceFault("crc".into())),
            true,
            0,
        );
        request.operation_finished(
            &dummy_operation(),
            IoStatus::Failed(Error::Aborted),
            false,
            8192,
        );
        assert_eq!(
            request.status(),
            IoStatus::Failed(Error::DeviceFault("crc".into()))
        );
        assert!(request.is_partial_transfer());
    }

    #[test]
    fn set_unfinished_rewinds_the_sentinel() {
        let request = request(8192);
        request.register_operation();
        request.operation_finished(&dummy_operation(), IoStatus::Ok, false, 4096);
        assert!(request.is_finished());
        request.set_unfinished();
        assert!(!request.is_finished());
        assert_eq!(request.status(), IoStatus::Pending);
    }

    #[test]
    fn notification_fires_exactly_once() {
        let request = request(512);
        let calls = Arc::new(AtomicU32::new(0));
        let seen = calls.clone();
        request.set_finished_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert!(request.has_callbacks());
        assert!(request.set_status_and_notify(IoStatus::Failed(Error::Aborted)));
        assert!(!request.notify_finished());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!request.has_callbacks());
    }

    #[test]
    fn wait_returns_after_notification() {
        let request = Arc::new(request(512));
        let waiter = {
            let request = request.clone();
            std::thread::spawn(move || request.wait())
        };
        std::thread::sleep(Duration::from_millis(50));
        request.set_status_and_notify(IoStatus::Ok);
        waiter.join().unwrap();
        assert!(request.wait_timeout(Duration::from_millis(10)));
    }

    struct CountingBuffer {
        locks: AtomicU32,
        unlocks: AtomicU32,
    }

    impl IoBuffer for CountingBuffer {
        fn is_virtual(&self) -> bool {
            true
        }

        fn lock_memory(&self, _team: TeamId, _is_write: bool) -> Result<(), Error> {
            self.locks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unlock_memory(&self, _team: TeamId, _is_write: bool) {
            self.unlocks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn memory_is_locked_once_and_unlocked_at_notification() {
        let buffer = Arc::new(CountingBuffer {
            locks: AtomicU32::new(0),
            unlocks: AtomicU32::new(0),
        });
        let request = IoRequest::new(0, 512, IoDirection::Write, buffer.clone(), 1, 1);
        request.ensure_memory_locked().unwrap();
        request.ensure_memory_locked().unwrap();
        assert_eq!(buffer.locks.load(Ordering::SeqCst), 1);
        request.set_status_and_notify(IoStatus::Ok);
        assert_eq!(buffer.unlocks.load(Ordering::SeqCst), 1);
    }
}
