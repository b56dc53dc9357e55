//! Worker pools pull leases from a [`WorkQueue`] and run the dispatcher's
//! consumers against them.
//!
//! Three pools are provided:
//!
//! - [`DirectWorkerPool`]: one background thread, items handled strictly in
//!   order. Useful for tests and for consumers that are not thread-safe.
//! - [`ThreadedWorkerPool`]: *work parallel*. Each admitted worker takes a
//!   whole item and runs every consumer against it in registration order.
//! - [`TaskParallelWorkerPool`]: *task parallel*. One item is in flight at a
//!   time and its consumers are spread across the workers.
//!
//! The threaded pools size themselves to the dispatcher's live inflight limit.

pub mod balance;
pub mod direct;
pub mod task_parallel;
pub mod threaded;

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::observability::DispatchMetrics;
use crate::sync::deadline_after;
use crate::queue::{WorkItem, WorkQueue};
use crate::{BoxError, ConsumerFailure, DispatchResult};

pub use direct::DirectWorkerPool;
pub use task_parallel::TaskParallelWorkerPool;
pub use threaded::ThreadedWorkerPool;

/// A registered consumer function
pub type Consumer<T> = Arc<dyn Fn(&T) -> Result<(), BoxError> + Send + Sync>;

/// The parts of a dispatcher a pool reads while running
pub trait DispatchHandle<T>: Send + Sync {
    /// Name used for worker threads and log fields
    fn name(&self) -> &str;

    /// Snapshot of the current consumers
    fn all_consumers(&self) -> Vec<Consumer<T>>;

    /// Live inflight limit
    fn maximum_inflight(&self) -> usize;

    /// Report a consumer failure to every subscriber
    fn raise_exception(&self, failure: &ConsumerFailure, item: &WorkItem<T>);

    fn metrics(&self) -> &DispatchMetrics;
}

/// A thread that did not exit within its join budget during `stop`.
/// It is left running; nothing forcibly ends it.
#[derive(Debug, Clone)]
pub struct StuckWorker {
    pub name: Option<String>,
    pub thread_id: ThreadId,
}

impl StuckWorker {
    fn of(thread: &thread::Thread) -> Self {
        Self {
            name: thread.name().map(str::to_owned),
            thread_id: thread.id(),
        }
    }
}

/// Strategy for running queued work on threads
pub trait WorkerPool<T>: Send + Sync {
    /// Wire the pool to its dispatcher and queue. Must happen before `start`.
    fn set_source(&self, dispatch: Arc<dyn DispatchHandle<T>>, queue: Arc<dyn WorkQueue<T>>);

    /// Begin processing. Starting a running pool does nothing.
    fn start(&self) -> DispatchResult<()>;

    /// Stop processing and wait, within the configured budget, for in-progress
    /// work and worker threads to end. Threads that outlive the budget are
    /// reported to `on_stuck`. Stopping a stopped pool does nothing.
    fn stop(&self, on_stuck: Option<&dyn Fn(&StuckWorker)>);

    /// Workers currently holding an inflight slot
    fn workers_inflight(&self) -> usize;

    /// Live worker threads (0 before the first start)
    fn pool_size(&self) -> usize;
}

/// Dispatcher and queue as seen by a pool
pub(crate) struct Source<T> {
    pub dispatch: Arc<dyn DispatchHandle<T>>,
    pub queue: Arc<dyn WorkQueue<T>>,
}

impl<T> Clone for Source<T> {
    fn clone(&self) -> Self {
        Self {
            dispatch: self.dispatch.clone(),
            queue: self.queue.clone(),
        }
    }
}

/// Run one consumer against a lease, turning errors and panics into a
/// reported failure. Returns false if the consumer failed.
pub(crate) fn run_consumer<T>(
    dispatch: &dyn DispatchHandle<T>,
    consumer: &Consumer<T>,
    lease: &WorkItem<T>,
) -> bool {
    let Some(value) = lease.item() else {
        return true;
    };
    dispatch.metrics().increment_consumer_invocations();

    let failure = match panic::catch_unwind(AssertUnwindSafe(|| consumer(value))) {
        Ok(Ok(())) => return true,
        Ok(Err(err)) => ConsumerFailure::Failed(err),
        Err(payload) => ConsumerFailure::from_panic(payload),
    };

    dispatch.metrics().increment_consumer_failures();
    warn!(
        dispatcher = dispatch.name(),
        item = lease.name().unwrap_or("-"),
        error = %failure,
        "Consumer failed"
    );
    if panic::catch_unwind(AssertUnwindSafe(|| dispatch.raise_exception(&failure, lease))).is_err() {
        warn!(dispatcher = dispatch.name(), "Failure reporting panicked; item continues");
    }
    false
}

/// Finish a lease unless a failure subscriber already resolved it
pub(crate) fn complete_lease<T>(dispatch: &dyn DispatchHandle<T>, lease: &WorkItem<T>) {
    if lease.is_resolved() {
        return;
    }
    lease.finish();
    dispatch.metrics().increment_items_processed();
}

/// Run every consumer in registration order, then finish the lease
pub(crate) fn process_lease<T>(dispatch: &dyn DispatchHandle<T>, lease: &WorkItem<T>) {
    trace!(item = lease.name().unwrap_or("-"), "Processing work item");
    for consumer in dispatch.all_consumers() {
        run_consumer(dispatch, &consumer, lease);
    }
    complete_lease(dispatch, lease);
}

/// Join a thread, giving it `attempts` windows of `attempt_timeout` to exit.
/// A thread that never exits is detached and described in the result.
pub(crate) fn join_with_attempts(
    handle: JoinHandle<()>,
    attempts: u32,
    attempt_timeout: Duration,
) -> Option<StuckWorker> {
    const CHECK_INTERVAL: Duration = Duration::from_millis(5);

    for _ in 0..attempts {
        let deadline = deadline_after(attempt_timeout);
        while !handle.is_finished() && deadline.map_or(true, |deadline| Instant::now() < deadline) {
            thread::sleep(CHECK_INTERVAL.min(attempt_timeout));
        }
        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("Worker thread ended with a panic");
            }
            return None;
        }
    }
    Some(StuckWorker::of(handle.thread()))
}

pub(crate) fn report_stuck(stuck: &StuckWorker, on_stuck: Option<&dyn Fn(&StuckWorker)>) {
    warn!(
        thread = stuck.name.as_deref().unwrap_or("<unnamed>"),
        thread_id = ?stuck.thread_id,
        "Worker thread did not stop in time; leaving it running"
    );
    if let Some(callback) = on_stuck {
        callback(stuck);
    }
}

/// Wait until `done` holds or `budget` runs out. Returns the final `done`.
pub(crate) fn wait_until(budget: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = deadline_after(budget);
    while !done() {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return done();
        }
        thread::sleep(Duration::from_millis(10));
    }
    true
}
