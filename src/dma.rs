//! DMA translation capability.
//!
//! The translator is an external collaborator: it owns the DMA/bounce
//! buffers and knows the device's alignment constraints. The scheduler
//! borrows one buffer per operation and hands it back on completion.

use std::sync::Arc;

use crate::error::Error;
use crate::operation::IoOperation;
use crate::request::IoRequest;

/// Opaque handle to a translator-owned DMA buffer.
///
/// Move-only so a buffer cannot be recycled twice: the operation holds the
/// handle while in flight and the completion path takes it out for
/// [`DmaTranslator::recycle_buffer`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DmaBuffer {
    id: u32,
}

impl DmaBuffer {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u32 {
        self.id
    }
}

/// A DMA resource that converts request slices into device operations.
pub trait DmaTranslator: Send + Sync {
    /// Number of DMA buffers. Sizes the scheduler's operation pool.
    fn buffer_count(&self) -> usize;

    /// Device block size in bytes. 0 means unknown; the scheduler then
    /// falls back to its configured default.
    fn block_size(&self) -> u64;

    /// Carve the next device operation out of the request's remaining range.
    ///
    /// On success the implementation populates the operation's device-visible
    /// range (which may be block-aligned wider than the client slice), its
    /// original sub-range, and its buffer, and advances the request cursor by
    /// the consumed length. At most `max_span` bytes may be consumed.
    ///
    /// Returns [`Error::Busy`] when no DMA buffer is available right now;
    /// the scheduler treats that as backpressure, not failure.
    fn translate_next(
        &self,
        request: &Arc<IoRequest>,
        operation: &Arc<IoOperation>,
        max_span: u64,
    ) -> Result<(), Error>;

    /// Return a buffer borrowed by a completed operation.
    fn recycle_buffer(&self, buffer: DmaBuffer);
}
