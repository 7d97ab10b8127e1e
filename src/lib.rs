//! Block-device I/O request scheduler.
//!
//! `iosched` sits between block-layer clients (filesystems, page cache,
//! user I/O) and a low-level device callback. Clients hand it large
//! logical [`IoRequest`]s; the scheduler decomposes them into
//! DMA-constrained [`IoOperation`]s, dispatches those to the device, folds
//! completions back in (retrying short transfers in place) and notifies
//! the client once the whole request is served or aborted.
//!
//! # Architecture
//!
//! - One request queue + worker thread per CPU (a *shard*); submitters
//!   enqueue to the shard of their current CPU.
//! - A fixed [`OperationPool`] bounds in-flight operations and applies
//!   backpressure to the shard workers.
//! - An optional [`DmaTranslator`] carves block-aligned device operations
//!   out of request slices using its own buffers; without one, each
//!   request becomes a single direct operation.
//! - A notifier thread delivers completion callbacks off the submission
//!   and completion paths.
//! - A [`Roster`] observes the request/operation lifecycle.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use iosched::{ConfigBuilder, IoDirection, IoRequest, PhysicalBuffer, SchedulerBuilder};
//!
//! # fn main() -> Result<(), iosched::Error> {
//! let config = ConfigBuilder::new().shards(1).build()?;
//! let scheduler = SchedulerBuilder::new("disk0").config(config).build()?;
//!
//! // The device callback receives each prepared operation; this toy device
//! // completes synchronously.
//! let completer = scheduler.clone();
//! scheduler.set_callback(move |operation| {
//!     let transferred = operation.length();
//!     completer.operation_completed(&operation, Ok(()), transferred);
//! });
//!
//! let request = Arc::new(IoRequest::new(
//!     0,
//!     4096,
//!     IoDirection::Read,
//!     Arc::new(PhysicalBuffer),
//!     1,
//!     1,
//! ));
//! scheduler.schedule_request(request.clone())?;
//! request.wait();
//! scheduler.stop();
//! # Ok(())
//! # }
//! ```

mod config;
mod dma;
mod error;
pub mod metrics;
mod operation;
mod pool;
mod queue;
mod request;
mod roster;
mod scheduler;
mod shard;

pub use config::Config;
pub use config::ConfigBuilder;
pub use config::WorkerConfig;
pub use dma::DmaBuffer;
pub use dma::DmaTranslator;
pub use error::Error;
pub use error::IoStatus;
pub use operation::IoOperation;
pub use pool::OperationPool;
pub use queue::BlockingQueue;
pub use request::IoBuffer;
pub use request::IoDirection;
pub use request::IoRequest;
pub use request::PhysicalBuffer;
pub use request::TeamId;
pub use request::ThreadId;
pub use roster::EventKind;
pub use roster::NullRoster;
pub use roster::Roster;
pub use roster::SchedulerEvent;
pub use roster::SchedulerId;
pub use roster::next_scheduler_id;
pub use scheduler::DeviceCallback;
pub use scheduler::IoScheduler;
pub use scheduler::SchedulerBuilder;
