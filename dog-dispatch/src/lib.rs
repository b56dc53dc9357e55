//! # dog-dispatch: In-Process Work Dispatch
//!
//! **Queues, self-balancing worker pools and a dispatcher that ties them together**
//!
//! Callers enqueue work items of any type `T`, register one or more consumer
//! functions, and the dispatcher delivers every item to every consumer under a
//! configurable concurrency policy.
//!
//! ## 🎯 Features
//!
//! - **Lease Semantics**: every dequeued item is either finished or returned to
//!   its queue, exactly once, no matter how many threads race to resolve it
//! - **Three Queues**: unbounded in-memory, bounded (back-pressure on `add_work`)
//!   and polling (pulls from an external source with back-off)
//! - **Self-Balancing Pools**: worker threads grow and shrink with the live
//!   inflight limit; work parallel, task parallel and direct disciplines
//! - **Failure Isolation**: consumer errors and panics are caught per item and
//!   per consumer, reported to subscribers with the lease, and never end a worker
//! - **Cooperative Shutdown**: `stop` waits for in-progress work and reports
//!   threads that won't exit instead of killing them
//!
//! ## 🚀 Quick Start
//!
//! ```rust
//! use dog_dispatch::prelude::*;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let dispatcher = Dispatcher::work_parallel(DispatchConfig::for_host())?;
//!
//! let total = Arc::new(AtomicUsize::new(0));
//! let sum = total.clone();
//! dispatcher.add_consumer(move |n: &usize| {
//!     sum.fetch_add(*n, Ordering::SeqCst);
//!     Ok::<_, BoxError>(())
//! });
//! dispatcher.on_exception(|failure, item| {
//!     eprintln!("{:?} failed: {failure}", item.name());
//! });
//!
//! dispatcher.start()?;
//! dispatcher.add_work_batch(1..=10)?;
//! dispatcher.wait_for_empty_queue_and_stop(None);
//!
//! assert_eq!(total.load(Ordering::SeqCst), 55);
//! # Ok::<(), dog_dispatch::DispatchError>(())
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod pool;
pub mod queue;
pub mod sync;
pub mod types;

pub use config::{DispatchConfig, PoolConfig, QueueConfig, MAX_INFLIGHT_LIMIT};
pub use dispatch::{process_batch, Dispatcher, FailureHandler};
pub use error::{BoxError, ConsumerFailure, DispatchError, DispatchResult};
pub use observability::{DispatchMetrics, MetricsSnapshot};
pub use pool::{
    Consumer, DirectWorkerPool, DispatchHandle, StuckWorker, TaskParallelWorkerPool, ThreadedWorkerPool,
    WorkerPool,
};
pub use queue::{
    BackOffWaiter, BoundedWorkQueue, InMemoryWorkQueue, LinearBackOff, NoBackOff, PollSource, PollingWorkQueue,
    WorkItem, WorkQueue,
};
pub use sync::{ResetEvent, Semaphore, WaitHandle};
pub use types::{ConsumerId, GenerationId, Named, QueueState};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

/// Everything needed to build and run a dispatcher
pub mod prelude {
    pub use crate::{process_batch, DispatchConfig, Dispatcher, PoolConfig};

    pub use crate::{BoxError, ConsumerFailure, DispatchError, DispatchResult};

    pub use crate::{Named, StuckWorker, WorkItem};

    pub use crate::{WorkQueue, WorkerPool};
}
