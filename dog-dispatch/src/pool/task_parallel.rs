use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::config::PoolConfig;
use crate::pool::balance::{Worker, WorkerBody, WorkerSet};
use crate::pool::{complete_lease, run_consumer, Consumer, DispatchHandle, Source, StuckWorker, WorkerPool};
use crate::queue::{WorkItem, WorkQueue};
use crate::{DispatchResult, QueueState};

/// Task parallel pool: one item is in progress at a time, and its consumers
/// are shared out across the workers.
///
/// The controller worker pulls an item only once the previous one has been
/// completed by every consumer, so each consumer sees items in enqueue order
/// while the consumers of a single item run concurrently. The inflight limit
/// caps concurrent consumer runs.
pub struct TaskParallelWorkerPool<T> {
    set: Arc<WorkerSet<T>>,
    body: Arc<TaskParallel<T>>,
}

/// Item being worked on and the consumers still owed to it
struct PullState<T> {
    current: Option<Arc<WorkItem<T>>>,
    pending: VecDeque<Consumer<T>>,
    /// Consumers of `current` that have not completed yet
    outstanding: usize,
}

struct TaskParallel<T> {
    pull: Mutex<PullState<T>>,
    changed: Condvar,
}

impl<T: Send + Sync + 'static> TaskParallel<T> {
    fn new() -> Self {
        Self {
            pull: Mutex::new(PullState {
                current: None,
                pending: VecDeque::new(),
                outstanding: 0,
            }),
            changed: Condvar::new(),
        }
    }

    fn has_current(&self) -> bool {
        self.pull.lock().current.is_some()
    }

    /// Controller only: load the next item and its consumers
    fn pull_next(&self, set: &WorkerSet<T>, worker: &Worker, source: &Source<T>) {
        if self.pull.lock().current.is_some() {
            return;
        }
        if source.queue.block_until_ready() == QueueState::Empty {
            return;
        }

        let mut state = self.pull.lock();
        if state.current.is_some() || !set.is_current(worker.generation) {
            return;
        }
        let lease = source.queue.try_dequeue();
        if !lease.has_item() {
            return;
        }

        let consumers = source.dispatch.all_consumers();
        if consumers.is_empty() {
            debug!("No consumers registered; returning item to the queue");
            drop(state);
            lease.cancel();
            set.idle();
            return;
        }

        trace!(item = lease.name().unwrap_or("-"), consumers = consumers.len(), "Pulled work item");
        state.outstanding = consumers.len();
        state.pending = consumers.into();
        state.current = Some(Arc::new(lease));
        self.changed.notify_all();
    }

    /// Take consumers of the current item until none are left
    fn drain(&self, dispatch: &dyn DispatchHandle<T>) {
        loop {
            let (consumer, lease) = {
                let mut state = self.pull.lock();
                let Some(lease) = state.current.clone() else {
                    return;
                };
                let Some(consumer) = state.pending.pop_front() else {
                    return;
                };
                (consumer, lease)
            };

            run_consumer(dispatch, &consumer, &lease);

            let mut state = self.pull.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            if state.outstanding == 0 {
                if let Some(done) = state.current.take() {
                    complete_lease(dispatch, &done);
                }
                self.changed.notify_all();
            }
        }
    }
}

impl<T: Send + Sync + 'static> WorkerBody<T> for TaskParallel<T> {
    fn step(&self, set: &WorkerSet<T>, worker: &Worker) {
        let Some(source) = set.source() else {
            set.idle();
            return;
        };

        if worker.is_controller() {
            self.pull_next(set, worker, &source);
        }

        {
            let mut state = self.pull.lock();
            if state.pending.is_empty() {
                self.changed.wait_for(&mut state, set.config().idle_wait);
                return;
            }
        }
        if !set.is_current(worker.generation) {
            return;
        }

        let Some(_inflight) = set.try_admit(source.dispatch.as_ref()) else {
            set.idle();
            return;
        };
        self.drain(source.dispatch.as_ref());
    }

    fn wake_all(&self) {
        self.changed.notify_all();
    }

    fn after_stop(&self, _source: &Source<T>) {
        let mut state = self.pull.lock();
        let untouched = state.current.is_some() && state.pending.len() == state.outstanding;
        if !untouched {
            return;
        }
        if let Some(lease) = state.current.take() {
            state.pending.clear();
            state.outstanding = 0;
            drop(state);
            debug!(item = lease.name().unwrap_or("-"), "Returning unstarted item to the queue");
            lease.cancel();
        }
    }
}

impl<T: Send + Sync + 'static> TaskParallelWorkerPool<T> {
    pub fn new(config: PoolConfig) -> Self {
        let body = Arc::new(TaskParallel::new());
        Self {
            set: Arc::new(WorkerSet::new("task", config, body.clone())),
            body,
        }
    }
}

impl<T: Send + Sync + 'static> Default for TaskParallelWorkerPool<T> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<T: Send + Sync + 'static> WorkerPool<T> for TaskParallelWorkerPool<T> {
    fn set_source(&self, dispatch: Arc<dyn DispatchHandle<T>>, queue: Arc<dyn WorkQueue<T>>) {
        self.set.set_source(dispatch, queue);
    }

    fn start(&self) -> DispatchResult<()> {
        self.set.start()
    }

    fn stop(&self, on_stuck: Option<&dyn Fn(&StuckWorker)>) {
        self.set.stop(on_stuck);
    }

    /// A pulled item whose consumers have not been picked up yet counts as
    /// one inflight
    fn workers_inflight(&self) -> usize {
        match self.set.inflight() {
            0 if self.body.has_current() => 1,
            inflight => inflight,
        }
    }

    fn pool_size(&self) -> usize {
        self.set.pool_size()
    }
}

impl<T> Drop for TaskParallelWorkerPool<T> {
    fn drop(&mut self) {
        self.set.abandon();
    }
}
