use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::config::{validate_inflight_limit, DispatchConfig};
use crate::observability::{DispatchMetrics, MetricsSnapshot};
use crate::pool::{
    Consumer, DirectWorkerPool, DispatchHandle, StuckWorker, TaskParallelWorkerPool, ThreadedWorkerPool,
    WorkerPool,
};
use crate::queue::{BoundedWorkQueue, InMemoryWorkQueue, PollSource, PollingWorkQueue, WorkItem, WorkQueue};
use crate::{BoxError, ConsumerFailure, ConsumerId, DispatchError, DispatchResult, Named};

/// Subscriber to consumer failures
pub type FailureHandler<T> = Arc<dyn Fn(&ConsumerFailure, &WorkItem<T>) + Send + Sync>;

/// State the worker pool reads while running
struct DispatchCore<T> {
    name: String,
    inflight_limit: AtomicUsize,
    consumers: RwLock<Vec<(ConsumerId, Consumer<T>)>>,
    handlers: RwLock<Vec<FailureHandler<T>>>,
    metrics: DispatchMetrics,
}

impl<T> DispatchHandle<T> for DispatchCore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn all_consumers(&self) -> Vec<Consumer<T>> {
        self.consumers.read().iter().map(|(_, consumer)| consumer.clone()).collect()
    }

    fn maximum_inflight(&self) -> usize {
        self.inflight_limit.load(Ordering::Acquire)
    }

    fn raise_exception(&self, failure: &ConsumerFailure, item: &WorkItem<T>) {
        let handlers = self.handlers.read().clone();
        for handler in handlers {
            if panic::catch_unwind(AssertUnwindSafe(|| handler(failure, item))).is_err() {
                warn!(dispatcher = %self.name, item = item.name().unwrap_or("-"), "Failure subscriber panicked");
            }
        }
    }

    fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }
}

/// Ties one work queue to one worker pool and hands every item to every
/// registered consumer.
///
/// Work may be added before or after `start`. `start` and `stop` can be
/// repeated; each is a no-op when the dispatcher is already in that state.
pub struct Dispatcher<T> {
    core: Arc<DispatchCore<T>>,
    queue: Arc<dyn WorkQueue<T>>,
    pool: Box<dyn WorkerPool<T>>,
    drain_poll_interval: Duration,
    lifecycle: Mutex<()>,
}

impl<T: Send + Sync + 'static> Dispatcher<T> {
    /// Dispatcher over any queue and pool
    pub fn new<Q, P>(queue: Q, pool: P, config: DispatchConfig) -> DispatchResult<Self>
    where
        Q: WorkQueue<T> + 'static,
        P: WorkerPool<T> + 'static,
    {
        config.validate()?;
        let core = Arc::new(DispatchCore {
            name: config.name,
            inflight_limit: AtomicUsize::new(config.inflight_limit),
            consumers: RwLock::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            metrics: DispatchMetrics::new(),
        });
        let queue: Arc<dyn WorkQueue<T>> = Arc::new(queue);
        pool.set_source(core.clone(), queue.clone());

        debug!(dispatcher = %core.name, inflight_limit = config.inflight_limit, "Created dispatcher");
        Ok(Self {
            core,
            queue,
            pool: Box::new(pool),
            drain_poll_interval: config.drain_poll_interval,
            lifecycle: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Register a consumer. Every item is delivered to every consumer.
    pub fn add_consumer<F, E>(&self, consumer: F) -> ConsumerId
    where
        F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError>,
    {
        let id = ConsumerId::new();
        let consumer: Consumer<T> = Arc::new(move |item: &T| consumer(item).map_err(Into::into));
        self.core.consumers.write().push((id, consumer));
        debug!(dispatcher = %self.core.name, consumer = %id, "Added consumer");
        id
    }

    /// Remove a consumer. Consumer order is not preserved afterwards.
    pub fn remove_consumer(&self, id: ConsumerId) -> bool {
        let mut consumers = self.core.consumers.write();
        match consumers.iter().position(|(existing, _)| *existing == id) {
            Some(index) => {
                consumers.swap_remove(index);
                true
            }
            None => false,
        }
    }

    /// Snapshot of the registered consumers
    pub fn all_consumers(&self) -> Vec<Consumer<T>> {
        self.core.all_consumers()
    }

    /// Subscribe to consumer failures. Subscribers receive the failed lease
    /// and may `cancel` it to have the item retried.
    pub fn on_exception<F>(&self, handler: F)
    where
        F: Fn(&ConsumerFailure, &WorkItem<T>) + Send + Sync + 'static,
    {
        self.core.handlers.write().push(Arc::new(handler));
    }

    /// Deliver a failure to every subscriber
    pub fn raise_exception(&self, failure: &ConsumerFailure, item: &WorkItem<T>) {
        self.core.raise_exception(failure, item);
    }

    pub fn maximum_inflight(&self) -> usize {
        self.core.maximum_inflight()
    }

    /// Change the inflight limit. Running pools resize to match.
    pub fn set_maximum_inflight(&self, limit: usize) -> DispatchResult<()> {
        validate_inflight_limit(limit)?;
        self.core.inflight_limit.store(limit, Ordering::Release);
        debug!(dispatcher = %self.core.name, limit, "Inflight limit changed");
        Ok(())
    }

    /// Items being processed right now
    pub fn current_inflight(&self) -> usize {
        self.pool.workers_inflight()
    }

    /// Items waiting in the queue
    pub fn current_queued(&self) -> usize {
        self.queue.len()
    }

    /// Live worker threads
    pub fn pool_size(&self) -> usize {
        self.pool.pool_size()
    }

    /// Names of queued items; unnamed items are left out
    pub fn list_named_tasks(&self) -> Vec<String> {
        self.queue.all_item_names()
    }

    pub fn add_work(&self, work: T) -> DispatchResult<()> {
        self.enqueue(work, None)
    }

    pub fn add_named_work(&self, name: impl Into<String>, work: T) -> DispatchResult<()> {
        self.enqueue(work, Some(name.into()))
    }

    /// Add items in order, stopping at the first one the queue refuses
    pub fn add_work_batch<I>(&self, batch: I) -> DispatchResult<()>
    where
        I: IntoIterator<Item = T>,
    {
        batch.into_iter().try_for_each(|work| self.enqueue(work, None))
    }

    /// Add named items in order, stopping at the first one the queue refuses
    pub fn add_named_work_batch<I>(&self, batch: I) -> DispatchResult<()>
    where
        I: IntoIterator<Item = Named<T>>,
    {
        batch.into_iter().try_for_each(|named| {
            let (work, name) = named.into_parts();
            self.enqueue(work, name)
        })
    }

    fn enqueue(&self, work: T, name: Option<String>) -> DispatchResult<()> {
        self.queue.enqueue(work, name)?;
        self.core.metrics.increment_items_enqueued(1);
        Ok(())
    }

    /// Begin processing queued work
    #[instrument(skip(self), fields(dispatcher = %self.core.name))]
    pub fn start(&self) -> DispatchResult<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.core.consumers.read().is_empty() {
            return Err(DispatchError::NoConsumers);
        }
        self.pool.start()?;
        info!("Dispatcher started");
        Ok(())
    }

    /// Stop processing and wait for in-progress work to end
    pub fn stop(&self) {
        self.stop_inner(None);
    }

    /// Like [`stop`](Self::stop), reporting each thread that would not exit
    pub fn stop_with<F>(&self, on_stuck: F)
    where
        F: Fn(&StuckWorker),
    {
        self.stop_inner(Some(&on_stuck));
    }

    #[instrument(skip(self, on_stuck), fields(dispatcher = %self.core.name))]
    fn stop_inner(&self, on_stuck: Option<&dyn Fn(&StuckWorker)>) {
        let _lifecycle = self.lifecycle.lock();
        self.pool.stop(on_stuck);
        info!("Dispatcher stopped");
    }

    /// Keep processing until the queue is empty and nothing is inflight, then
    /// stop. Polling queues stop fetching new work first. Gives up waiting
    /// after `max_wait`, if given, and stops anyway.
    pub fn wait_for_empty_queue_and_stop(&self, max_wait: Option<Duration>) {
        self.queue.stop_accepting_work();
        let started = Instant::now();

        while self.has_outstanding_work() {
            if max_wait.is_some_and(|limit| started.elapsed() >= limit) {
                warn!(
                    dispatcher = %self.core.name,
                    queued = self.current_queued(),
                    inflight = self.current_inflight(),
                    "Gave up waiting for the queue to empty"
                );
                break;
            }
            thread::sleep(self.drain_poll_interval);
        }
        self.stop();
    }

    fn has_outstanding_work(&self) -> bool {
        self.queue.block_until_ready().has_items()
            || !self.queue.is_empty()
            || self.pool.workers_inflight() > 0
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }
}

impl<T: Clone + Send + Sync + 'static> Dispatcher<T> {
    /// In-memory queue, each worker processing whole items
    pub fn work_parallel(config: DispatchConfig) -> DispatchResult<Self> {
        let pool = ThreadedWorkerPool::new(config.pool.clone());
        Self::new(InMemoryWorkQueue::new(), pool, config)
    }

    /// In-memory queue, consumers of each item spread over the workers
    pub fn task_parallel(config: DispatchConfig) -> DispatchResult<Self> {
        let pool = TaskParallelWorkerPool::new(config.pool.clone());
        Self::new(InMemoryWorkQueue::new(), pool, config)
    }

    /// In-memory queue drained in order by a single thread
    pub fn direct(config: DispatchConfig) -> DispatchResult<Self> {
        let pool = DirectWorkerPool::new(config.pool.clone());
        Self::new(InMemoryWorkQueue::new(), pool, config)
    }

    /// Work parallel over a queue holding at most `bound` waiting items;
    /// `add_work` blocks while it is full
    pub fn bounded(bound: usize, config: DispatchConfig) -> DispatchResult<Self> {
        let queue = BoundedWorkQueue::new(bound)?;
        let pool = ThreadedWorkerPool::new(config.pool.clone());
        Self::new(queue, pool, config)
    }

    /// Work parallel over items polled from `source`
    pub fn poll_and_process<S>(source: S, config: DispatchConfig) -> DispatchResult<Self>
    where
        S: PollSource<T> + 'static,
    {
        let pool = ThreadedWorkerPool::new(config.pool.clone());
        Self::new(PollingWorkQueue::new(source), pool, config)
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        if self.pool.pool_size() > 0 {
            debug!(dispatcher = %self.core.name, "Dispatcher dropped while running; its pool abandons the workers without joining them");
        }
    }
}

/// Run `consumer` over every item of `batch` on a work parallel dispatcher,
/// returning once all of them have been processed. Failures go to
/// `on_failure` and are counted in the returned snapshot.
pub fn process_batch<T, I, F, E, H>(
    config: DispatchConfig,
    batch: I,
    consumer: F,
    on_failure: H,
) -> DispatchResult<MetricsSnapshot>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator<Item = T>,
    F: Fn(&T) -> Result<(), E> + Send + Sync + 'static,
    E: Into<BoxError>,
    H: Fn(&ConsumerFailure) + Send + Sync + 'static,
{
    let dispatcher = Dispatcher::work_parallel(config)?;
    dispatcher.on_exception(move |failure, _| on_failure(failure));
    dispatcher.add_consumer(consumer);
    dispatcher.start()?;
    dispatcher.add_work_batch(batch)?;
    dispatcher.wait_for_empty_queue_and_stop(None);
    Ok(dispatcher.metrics())
}
