//! The scheduler core: submission, completion, notification, teardown.
//!
//! Control flow: `schedule_request` → shard queue → shard worker →
//! `submit_request` → DMA translation or direct preparation → device
//! callback. Data flows back through `operation_completed`: short
//! transfers retry in place, finished operations fold into their request,
//! and terminal requests are notified, on the notifier thread when they
//! carry callbacks and inline otherwise.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};

use crate::config::Config;
use crate::dma::DmaTranslator;
use crate::error::{Error, IoStatus};
use crate::metrics;
use crate::operation::IoOperation;
use crate::pool::OperationPool;
use crate::queue::BlockingQueue;
use crate::request::IoRequest;
use crate::roster::{self, NullRoster, Roster, SchedulerEvent, SchedulerId};
use crate::shard::{self, RequestQueue, Shard};

/// Device I/O callback. Receives each operation the scheduler dispatches;
/// the device (or its driver thread) later reports the outcome through
/// [`IoScheduler::operation_completed`]. Captured context replaces the
/// traditional `(fn, data)` pair.
pub type DeviceCallback = Arc<dyn Fn(Arc<IoOperation>) + Send + Sync>;

/// Builder for an [`IoScheduler`]. `build()` performs the whole
/// initialization: pool sizing, block-size probe, thread startup and
/// roster registration, unwinding partial state on any failure.
pub struct SchedulerBuilder {
    name: String,
    config: Config,
    dma: Option<Arc<dyn DmaTranslator>>,
    roster: Arc<dyn Roster>,
}

impl SchedulerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            dma: None,
            roster: Arc::new(NullRoster),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Attach a DMA resource. Its buffer count sizes the operation pool
    /// and its block size becomes the device block size.
    pub fn dma(mut self, translator: Arc<dyn DmaTranslator>) -> Self {
        self.dma = Some(translator);
        self
    }

    pub fn roster(mut self, roster: Arc<dyn Roster>) -> Self {
        self.roster = roster;
        self
    }

    pub fn build(self) -> Result<IoScheduler, Error> {
        self.config.validate()?;

        let pool_size = match &self.dma {
            Some(dma) => dma.buffer_count(),
            None => self.config.fallback_operations,
        };
        if pool_size == 0 {
            return Err(Error::InvalidSetup(
                "DMA resource reports no buffers".into(),
            ));
        }

        let mut block_size = self.dma.as_ref().map_or(0, |dma| dma.block_size());
        if block_size == 0 {
            block_size = self.config.fallback_block_size;
        }

        let shard_count = match self.config.worker.threads {
            0 => shard::num_cpus(),
            n => n,
        };

        let shared = Arc::new(Shared {
            name: self.name,
            id: roster::next_scheduler_id(),
            block_size,
            device_capacity: AtomicU64::new(0),
            dma: self.dma,
            roster: self.roster,
            callback: RwLock::new(None),
            pool: OperationPool::new(pool_size, self.config.short_retry_limit),
            shards: (0..shard_count).map(|_| Shard::new()).collect(),
            finished: Arc::new(BlockingQueue::new()),
            terminating: AtomicBool::new(false),
            notifier: Mutex::new(None),
            config: self.config,
        });

        shared.roster.add_scheduler(shared.id, &shared.name);

        if let Err(err) = spawn_threads(&shared) {
            shared.shutdown();
            return Err(err);
        }

        Ok(IoScheduler { shared })
    }
}

fn spawn_threads(shared: &Arc<Shared>) -> Result<(), Error> {
    let weak = Arc::downgrade(shared);
    let queue = shared.finished.clone();
    let handle = thread::Builder::new()
        .name(format!("{} notifier", shared.name))
        .spawn(move || notifier_worker(weak, queue))
        .map_err(|err| Error::InvalidSetup(format!("cannot spawn notifier: {err}")))?;
    *shared.notifier.lock().unwrap() = Some(handle);

    for (index, sh) in shared.shards.iter().enumerate() {
        let weak = Arc::downgrade(shared);
        let queue = sh.queue().clone();
        let pin = shared
            .config
            .worker
            .pin_to_core
            .then_some(shared.config.worker.core_offset + index);
        let handle = thread::Builder::new()
            .name(format!("{} scheduler {index}", shared.name))
            .spawn(move || {
                if let Some(core) = pin {
                    // Pinning is an optimization; run unpinned if it fails.
                    let _ = shard::pin_to_core(core);
                }
                shard_worker(weak, queue, index);
            })
            .map_err(|err| {
                Error::InvalidSetup(format!("cannot spawn shard worker {index}: {err}"))
            })?;
        sh.set_worker(handle);
    }
    Ok(())
}

fn shard_worker(shared: Weak<Shared>, queue: Arc<RequestQueue>, shard_index: usize) {
    while let Some(request) = queue.pop() {
        let Some(core) = shared.upgrade() else { break };
        core.submit_next(shard_index, request);
    }
}

fn notifier_worker(shared: Weak<Shared>, queue: Arc<BlockingQueue<Arc<IoRequest>>>) {
    while let Some(request) = queue.pop() {
        let Some(core) = shared.upgrade() else { break };
        core.finish_request(&request);
    }
}

struct Shared {
    name: String,
    id: SchedulerId,
    config: Config,
    block_size: u64,
    device_capacity: AtomicU64,
    dma: Option<Arc<dyn DmaTranslator>>,
    roster: Arc<dyn Roster>,
    callback: RwLock<Option<DeviceCallback>>,
    pool: OperationPool,
    shards: Vec<Shard>,
    finished: Arc<BlockingQueue<Arc<IoRequest>>>,
    terminating: AtomicBool,
    notifier: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn device_callback(&self) -> Option<DeviceCallback> {
        self.callback.read().unwrap().clone()
    }

    /// Terminally fail a request and notify. Counts the failure only when
    /// this call actually delivered the notification.
    fn fail_request(&self, request: &Arc<IoRequest>, error: Error) {
        if request.set_status_and_notify(IoStatus::Failed(error)) {
            metrics::REQUESTS_FAILED.increment();
        }
    }

    /// Shard-worker entry: pair the dequeued request with a pooled
    /// operation and submit. An empty pool blocks here, which is the
    /// scheduler's backpressure point.
    fn submit_next(&self, shard_index: usize, request: Arc<IoRequest>) {
        let Some(operation) = self.pool.acquire() else {
            // Pool stopped: shutting down.
            self.fail_request(&request, Error::ShuttingDown);
            return;
        };
        self.submit_request(shard_index, request, operation);
    }

    fn submit_request(
        &self,
        shard_index: usize,
        request: Arc<IoRequest>,
        operation: Arc<IoOperation>,
    ) {
        // The client may have aborted the request while it sat queued and
        // has already been notified; it must not reach the device or have
        // its buffer touched now.
        if request.status().is_terminal() {
            self.pool.release(operation);
            return;
        }

        // Degenerate zero-length request: nothing to carve.
        if request.remaining_bytes() == 0 {
            self.pool.release(operation);
            if request.set_status_and_notify(IoStatus::Ok) {
                metrics::REQUESTS_FINISHED.increment();
            }
            return;
        }

        let Some(callback) = self.device_callback() else {
            self.pool.release(operation);
            self.fail_request(
                &request,
                Error::InvalidSetup("no device callback installed".into()),
            );
            return;
        };

        // Pageable buffers must be pinned before the device touches them.
        if let Err(err) = request.ensure_memory_locked() {
            self.pool.release(operation);
            self.fail_request(&request, err);
            return;
        }

        match &self.dma {
            Some(dma) => {
                // Cap per-operation length so one large request cannot
                // monopolize the device.
                let max_span = self.block_size * self.config.max_span_blocks;
                match dma.translate_next(&request, &operation, max_span) {
                    Ok(()) => {}
                    Err(Error::Busy) => {
                        // No DMA buffer right now. Not a failure: put the
                        // operation back and retry the request later.
                        self.pool.release(operation);
                        metrics::TRANSLATE_BUSY.increment();
                        self.requeue(shard_index, request);
                        return;
                    }
                    Err(err) => {
                        self.pool.release(operation);
                        self.fail_request(&request, err);
                        return;
                    }
                }
            }
            None => {
                if let Err(err) = operation.prepare(&request) {
                    self.pool.release(operation);
                    self.fail_request(&request, err);
                    return;
                }
                let span = operation.length();
                operation.set_original_range(operation.offset(), span);
                request.advance(span);
            }
        }

        operation.set_parent(Some(request.clone()));
        operation.reset_for_dispatch();

        self.roster.notify(
            self.id,
            SchedulerEvent::OperationStarted {
                request,
                operation: operation.clone(),
            },
        );
        metrics::OPERATIONS_DISPATCHED.increment();
        // No scheduler lock is held across the device callback.
        callback(operation);
    }

    fn requeue(&self, shard_index: usize, request: Arc<IoRequest>) {
        if let Err(request) = self.shards[shard_index].queue().push(request) {
            self.fail_request(&request, Error::ShuttingDown);
        }
    }

    fn operation_completed(
        &self,
        operation: &Arc<IoOperation>,
        status: Result<(), Error>,
        transferred_bytes: u64,
    ) {
        // A completed operation has a terminal status; a second delivery
        // for the same trip is dropped here.
        if !operation.try_complete(IoStatus::from(status), transferred_bytes) {
            return;
        }
        metrics::OPERATIONS_COMPLETED.increment();

        let request = operation
            .parent()
            .expect("completed operation has no parent request");

        let finished = operation.finish();

        self.roster.notify(
            self.id,
            SchedulerEvent::OperationFinished {
                request: request.clone(),
                operation: operation.clone(),
            },
        );

        if !finished {
            // Short transfer with retry budget left: re-dispatch in place
            // on this thread, skipping a queue round-trip.
            operation.set_transferred_bytes(0);
            operation.set_status(IoStatus::Pending);
            metrics::OPERATIONS_RETRIED.increment();
            if let Some(callback) = self.device_callback() {
                self.roster.notify(
                    self.id,
                    SchedulerEvent::OperationStarted {
                        request,
                        operation: operation.clone(),
                    },
                );
                metrics::OPERATIONS_DISPATCHED.increment();
                callback(operation.clone());
                return;
            }
            // The callback disappeared mid-retry (shutdown); complete the
            // operation as failed and fall through to the finish path.
            operation.try_complete(IoStatus::Failed(Error::ShuttingDown), 0);
        }

        // Fold the operation into its request, in request-relative terms.
        let status = operation.status();
        let original_length = operation.original_length();
        let transferred = operation.transferred_bytes();
        let is_short = transferred < original_length;
        let relative_offset = operation.original_offset() - request.offset();
        let end_offset = if status.is_ok() {
            relative_offset + original_length
        } else {
            relative_offset
        };
        metrics::BYTES_TRANSFERRED.add(transferred);
        request.operation_finished(operation, status, is_short, end_offset);

        // Hand the DMA buffer back and return the operation to the pool.
        if let Some(dma) = &self.dma
            && let Some(buffer) = operation.take_buffer()
        {
            dma.recycle_buffer(buffer);
        }
        self.pool.release(operation.clone());

        if request.is_finished() {
            if request.status().is_ok() && request.remaining_bytes() > 0 {
                // This round went fine but bytes remain: rewind the
                // sentinel and queue the next slice.
                request.set_unfinished();
                metrics::REQUESTS_REQUEUED.increment();
                let index = shard::current_shard(self.shards.len());
                self.requeue(index, request);
            } else if request.has_callbacks() {
                // Client callbacks may take arbitrary time; hand over to
                // the notifier thread instead of stalling this one.
                if let Err(request) = self.finished.push(request) {
                    self.finish_request(&request);
                }
            } else {
                self.finish_request(&request);
            }
        }
    }

    /// Final notification: roster first, then the request's own delivery.
    fn finish_request(&self, request: &Arc<IoRequest>) {
        self.roster.notify(
            self.id,
            SchedulerEvent::RequestFinished {
                request: request.clone(),
            },
        );
        let ok = request.status().is_ok();
        if request.notify_finished() {
            if ok {
                metrics::REQUESTS_FINISHED.increment();
            } else {
                metrics::REQUESTS_FAILED.increment();
            }
        }
    }

    fn shutdown(&self) {
        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }

        // Stop intake and wake every blocked worker. Queued requests are
        // drained (and failed at the pool, which is also stopping) rather
        // than stranded.
        for shard in &self.shards {
            shard.stop();
        }
        self.pool.stop();

        let current = thread::current().id();
        for shard in &self.shards {
            if let Some(handle) = shard.take_worker()
                && handle.thread().id() != current
            {
                let _ = handle.join();
            }
        }

        // Shard workers are gone; late device completions fall back to
        // inline notification once this queue refuses new pushes.
        self.finished.stop();
        if let Some(handle) = self.notifier.lock().unwrap().take()
            && handle.thread().id() != current
        {
            let _ = handle.join();
        }

        // Drop the device callback so captured resources (channels, device
        // handles) are released.
        *self.callback.write().unwrap() = None;

        self.roster.remove_scheduler(self.id);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to a running scheduler instance. Cheap to clone; the device
/// driver keeps one to report completions.
pub struct IoScheduler {
    shared: Arc<Shared>,
}

impl Clone for IoScheduler {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl IoScheduler {
    pub fn builder(name: impl Into<String>) -> SchedulerBuilder {
        SchedulerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn id(&self) -> SchedulerId {
        self.shared.id
    }

    /// Device block size the scheduler spans operations with.
    pub fn block_size(&self) -> u64 {
        self.shared.block_size
    }

    pub fn shard_count(&self) -> usize {
        self.shared.shards.len()
    }

    /// Install the device I/O callback invoked once per dispatched
    /// operation. Any context travels inside the closure.
    pub fn set_callback(&self, callback: impl Fn(Arc<IoOperation>) + Send + Sync + 'static) {
        *self.shared.callback.write().unwrap() = Some(Arc::new(callback));
    }

    /// Accept a request onto the current CPU's shard.
    ///
    /// The returned status reflects acceptance only; failures surface later
    /// through the request's own status and notification. After `stop` the
    /// request is failed with [`Error::ShuttingDown`] and notified instead
    /// of being queued.
    pub fn schedule_request(&self, request: Arc<IoRequest>) -> Result<(), Error> {
        let shared = &self.shared;
        if shared.terminating.load(Ordering::SeqCst) {
            shared.fail_request(&request, Error::ShuttingDown);
            return Ok(());
        }
        let index = shard::current_shard(shared.shards.len());
        match shared.shards[index].queue().push(request.clone()) {
            Ok(()) => {
                metrics::REQUESTS_SCHEDULED.increment();
                shared
                    .roster
                    .notify(shared.id, SchedulerEvent::RequestScheduled { request });
                Ok(())
            }
            Err(request) => {
                shared.fail_request(&request, Error::ShuttingDown);
                Ok(())
            }
        }
    }

    /// Terminally fail a request that has no operations in flight and
    /// notify its owner.
    pub fn abort_request(&self, request: &Arc<IoRequest>, error: Error) {
        self.shared.fail_request(request, error);
    }

    /// Report the outcome of one dispatched operation.
    ///
    /// Called by the device callback (or its driver thread) with the raw
    /// transferred byte count, which may include block-alignment padding.
    /// Idempotent per dispatch: a duplicate delivery is a silent no-op.
    pub fn operation_completed(
        &self,
        operation: &Arc<IoOperation>,
        status: Result<(), Error>,
        transferred_bytes: u64,
    ) {
        self.shared
            .operation_completed(operation, status, transferred_bytes);
    }

    /// Record the device capacity reported by the driver.
    pub fn set_device_capacity(&self, capacity: u64) {
        self.shared
            .device_capacity
            .store(capacity, Ordering::Relaxed);
    }

    pub fn device_capacity(&self) -> u64 {
        self.shared.device_capacity.load(Ordering::Relaxed)
    }

    /// Hook for removable-media drivers. The FIFO family keeps no cached
    /// per-medium state, so there is nothing to invalidate.
    pub fn media_changed(&self) {}

    /// Human-readable snapshot of pool, queue and configuration state.
    /// The format is unstable.
    pub fn dump(&self) -> String {
        let shared = &self.shared;
        let mut out = String::new();
        let _ = writeln!(out, "io scheduler {} (id {})", shared.name, shared.id);
        let _ = writeln!(
            out,
            "  dma resource:    {}",
            if shared.dma.is_some() { "present" } else { "none" }
        );
        let _ = writeln!(out, "  block size:      {}", shared.block_size);
        let capacity = shared.device_capacity.load(Ordering::Relaxed);
        if capacity > 0 {
            let _ = writeln!(out, "  device capacity: {capacity}");
        }
        let _ = writeln!(
            out,
            "  operations free: {}/{}",
            shared.pool.free_count(),
            shared.pool.capacity()
        );
        for (index, sh) in shared.shards.iter().enumerate() {
            let _ = writeln!(out, "  shard {index} queued:  {}", sh.depth());
        }
        let _ = writeln!(out, "  finished queued: {}", shared.finished.len());
        out
    }

    /// Shut down: stop intake, drain the queues, join every worker and the
    /// notifier. Idempotent; requests still queued are failed with
    /// [`Error::ShuttingDown`], in-flight operations may complete normally
    /// afterwards.
    pub fn stop(&self) {
        self.shared.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::request::{IoDirection, PhysicalBuffer};
    use std::time::Duration;

    fn small_config() -> Config {
        ConfigBuilder::new()
            .shards(1)
            .fallback_operations(2)
            .build()
            .unwrap()
    }

    fn request(offset: u64, length: u64) -> Arc<IoRequest> {
        Arc::new(IoRequest::new(
            offset,
            length,
            IoDirection::Read,
            Arc::new(PhysicalBuffer),
            1,
            1,
        ))
    }

    #[test]
    fn builder_rejects_invalid_config() {
        let config = Config {
            fallback_operations: 0,
            ..Config::default()
        };
        let result = SchedulerBuilder::new("bad").config(config).build();
        assert!(matches!(result, Err(Error::InvalidSetup(_))));
    }

    #[test]
    fn dump_reports_configuration() {
        let scheduler = SchedulerBuilder::new("dumpy")
            .config(small_config())
            .build()
            .unwrap();
        let dump = scheduler.dump();
        assert!(dump.contains("io scheduler dumpy"));
        assert!(dump.contains("dma resource:    none"));
        assert!(dump.contains("block size:      512"));
        assert!(dump.contains("operations free: 2/2"));
        assert!(dump.contains("shard 0 queued:"));
        scheduler.stop();
    }

    #[test]
    fn requests_after_stop_are_failed_not_dispatched() {
        let scheduler = SchedulerBuilder::new("stopped")
            .config(small_config())
            .build()
            .unwrap();
        scheduler.set_callback(|_operation| panic!("device callback after stop"));
        scheduler.stop();

        let request = request(0, 4096);
        scheduler.schedule_request(request.clone()).unwrap();
        assert!(request.wait_timeout(Duration::from_secs(5)));
        assert_eq!(
            request.status(),
            IoStatus::Failed(Error::ShuttingDown)
        );
    }

    #[test]
    fn stop_is_idempotent() {
        let scheduler = SchedulerBuilder::new("twice")
            .config(small_config())
            .build()
            .unwrap();
        scheduler.stop();
        scheduler.stop();
    }

    #[test]
    fn scheduling_without_a_callback_fails_the_request() {
        let scheduler = SchedulerBuilder::new("no-callback")
            .config(small_config())
            .build()
            .unwrap();
        let request = request(0, 512);
        scheduler.schedule_request(request.clone()).unwrap();
        assert!(request.wait_timeout(Duration::from_secs(5)));
        assert!(matches!(
            request.status(),
            IoStatus::Failed(Error::InvalidSetup(_))
        ));
        scheduler.stop();
    }
}
