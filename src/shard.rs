//! Per-CPU shards: one request queue plus one worker thread.
//!
//! A submitter's current CPU picks the shard, which keeps queue contention
//! off the hot path on multi-core hosts. The CPU is an affinity hint, not
//! a binding: any worker may end up serving any request.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::Error;
use crate::queue::BlockingQueue;
use crate::request::IoRequest;

pub(crate) type RequestQueue = BlockingQueue<Arc<IoRequest>>;

/// One request queue and the worker thread draining it.
pub(crate) struct Shard {
    queue: Arc<RequestQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Shard {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(BlockingQueue::new()),
            worker: Mutex::new(None),
        }
    }

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    pub fn set_worker(&self, handle: JoinHandle<()>) {
        *self.worker.lock().unwrap() = Some(handle);
    }

    pub fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker.lock().unwrap().take()
    }

    /// Mark the queue terminating; the worker exits once it has drained.
    pub fn stop(&self) {
        self.queue.stop();
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }
}

/// Number of online CPUs.
pub(crate) fn num_cpus() -> usize {
    let ret = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if ret < 1 { 1 } else { ret as usize }
}

/// Shard index for the calling thread: the current CPU where the host
/// exposes it, a rotating counter otherwise.
pub(crate) fn current_shard(shard_count: usize) -> usize {
    debug_assert!(shard_count > 0);
    #[cfg(target_os = "linux")]
    {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu >= 0 {
            return cpu as usize % shard_count;
        }
    }
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    NEXT.fetch_add(1, Ordering::Relaxed) % shard_count
}

/// Pin the current thread to a specific CPU core.
#[cfg(target_os = "linux")]
pub(crate) fn pin_to_core(core: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(Error::InvalidSetup(format!(
                "cannot pin worker to core {core}: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn pin_to_core(_core: usize) -> Result<(), Error> {
    Ok(())
}
