//! Device-level operations carved out of client requests.

use std::sync::{Arc, Mutex};

use crate::dma::DmaBuffer;
use crate::error::{Error, IoStatus};
use crate::request::IoRequest;

/// A single device-level I/O implementing part or all of a request.
///
/// The device-visible range may be block-aligned wider than the client's
/// sub-range; `original_offset`/`original_length` always describe the slice
/// the client actually asked for, and transferred-byte accounting is net of
/// the leading alignment padding. Operations are owned by the
/// [`OperationPool`](crate::pool::OperationPool) while idle and by the
/// active request path while in flight.
pub struct IoOperation {
    state: Mutex<OpState>,
}

struct OpState {
    parent: Option<Arc<IoRequest>>,
    offset: u64,
    length: u64,
    original_offset: u64,
    original_length: u64,
    transferred: u64,
    status: IoStatus,
    buffer: Option<DmaBuffer>,
    retries_left: u32,
    retry_limit: u32,
}

impl IoOperation {
    pub fn new(short_retry_limit: u32) -> Self {
        Self {
            state: Mutex::new(OpState {
                parent: None,
                offset: 0,
                length: 0,
                original_offset: 0,
                original_length: 0,
                transferred: 0,
                status: IoStatus::Pending,
                buffer: None,
                retries_left: short_retry_limit,
                retry_limit: short_retry_limit,
            }),
        }
    }

    // ── Parent ───────────────────────────────────────────────────────

    pub fn parent(&self) -> Option<Arc<IoRequest>> {
        self.state.lock().unwrap().parent.clone()
    }

    /// Attach or detach the parent request. Attaching also accounts the
    /// operation as in flight on the request; detaching (pool release)
    /// does not touch the request's books.
    pub fn set_parent(&self, parent: Option<Arc<IoRequest>>) {
        if let Some(request) = &parent {
            request.register_operation();
        }
        self.state.lock().unwrap().parent = parent;
    }

    // ── Ranges ───────────────────────────────────────────────────────

    /// Device-visible start offset.
    pub fn offset(&self) -> u64 {
        self.state.lock().unwrap().offset
    }

    /// Device-visible length.
    pub fn length(&self) -> u64 {
        self.state.lock().unwrap().length
    }

    /// Set the device-visible range. Called by the preparation path.
    pub fn set_range(&self, offset: u64, length: u64) {
        let mut state = self.state.lock().unwrap();
        state.offset = offset;
        state.length = length;
    }

    /// Start of the client sub-range this operation serves.
    pub fn original_offset(&self) -> u64 {
        self.state.lock().unwrap().original_offset
    }

    /// Length of the client sub-range this operation serves.
    pub fn original_length(&self) -> u64 {
        self.state.lock().unwrap().original_length
    }

    /// Set the client sub-range. Must lie within the device-visible range.
    pub fn set_original_range(&self, offset: u64, length: u64) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(offset >= state.offset);
        debug_assert!(offset + length <= state.offset + state.length);
        state.original_offset = offset;
        state.original_length = length;
    }

    // ── Accounting ───────────────────────────────────────────────────

    /// Bytes transferred within the client sub-range.
    pub fn transferred_bytes(&self) -> u64 {
        self.state.lock().unwrap().transferred
    }

    pub fn set_transferred_bytes(&self, bytes: u64) {
        self.state.lock().unwrap().transferred = bytes;
    }

    pub fn status(&self) -> IoStatus {
        self.state.lock().unwrap().status.clone()
    }

    pub fn set_status(&self, status: IoStatus) {
        self.state.lock().unwrap().status = status;
    }

    // ── Buffer ───────────────────────────────────────────────────────

    /// Lend a translator buffer to this operation.
    pub fn set_buffer(&self, buffer: Option<DmaBuffer>) {
        self.state.lock().unwrap().buffer = buffer;
    }

    /// Take the buffer out for recycling.
    pub fn take_buffer(&self) -> Option<DmaBuffer> {
        self.state.lock().unwrap().buffer.take()
    }

    // ── Lifecycle hooks ──────────────────────────────────────────────

    /// Prepare this operation to cover the request's entire remaining range
    /// directly. Used when no DMA resource is configured; the caller sets
    /// the original range and advances the request cursor afterwards.
    pub fn prepare(&self, request: &Arc<IoRequest>) -> Result<(), Error> {
        let consumed = request.length() - request.remaining_bytes();
        let mut state = self.state.lock().unwrap();
        state.offset = request.offset() + consumed;
        state.length = request.remaining_bytes();
        state.buffer = None;
        Ok(())
    }

    /// Arm the operation for a trip to the device: in-flight sentinel on,
    /// accounting cleared, retry budget refilled.
    pub(crate) fn reset_for_dispatch(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = IoStatus::Pending;
        state.transferred = 0;
        state.retries_left = state.retry_limit;
    }

    /// Record a completion delivered by the device.
    ///
    /// Returns `false` when the operation was already completed, making a
    /// duplicate delivery a no-op. Transferred bytes are netted of the
    /// leading alignment padding and clamped to the client sub-range.
    pub(crate) fn try_complete(&self, status: IoStatus, transferred_bytes: u64) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.status.is_pending() {
            return false;
        }
        state.status = status;
        let partial_begin = state.original_offset - state.offset;
        state.transferred = transferred_bytes
            .saturating_sub(partial_begin)
            .min(state.original_length);
        true
    }

    /// Whether the operation is fully done.
    ///
    /// A failed operation is done. A successful one is done when it moved
    /// its whole client sub-range, or when the short-transfer retry budget
    /// is spent; otherwise one retry is consumed and the operation reports
    /// unfinished so the completion path re-dispatches it.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.status.is_ok() {
            return true;
        }
        if state.transferred >= state.original_length {
            return true;
        }
        if state.retries_left == 0 {
            return true;
        }
        state.retries_left -= 1;
        false
    }
}
