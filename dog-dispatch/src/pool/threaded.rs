use std::sync::Arc;

use crate::config::PoolConfig;
use crate::pool::balance::{Worker, WorkerBody, WorkerSet};
use crate::pool::{process_lease, DispatchHandle, StuckWorker, WorkerPool};
use crate::queue::WorkQueue;
use crate::{DispatchResult, QueueState};

/// Work parallel pool: every admitted worker takes a whole item and runs all
/// consumers against it, in registration order, on its own thread.
///
/// The pool never holds more items than the dispatcher's inflight limit
/// allows. Once a worker starts an item it completes it even if the pool is
/// being stopped.
pub struct ThreadedWorkerPool<T> {
    set: Arc<WorkerSet<T>>,
}

struct WorkParallel;

impl<T: Send + Sync + 'static> WorkerBody<T> for WorkParallel {
    fn step(&self, set: &WorkerSet<T>, worker: &Worker) {
        let Some(source) = set.source() else {
            set.idle();
            return;
        };
        let state = source.queue.block_until_ready();
        if state == QueueState::Empty {
            return;
        }
        if !set.is_current(worker.generation) {
            return;
        }

        let processed = {
            let Some(_inflight) = set.try_admit(source.dispatch.as_ref()) else {
                set.idle();
                return;
            };
            let mut processed = 0_usize;
            while set.is_current(worker.generation) {
                let lease = source.queue.try_dequeue();
                if !lease.has_item() {
                    break;
                }
                process_lease(source.dispatch.as_ref(), &lease);
                processed += 1;
            }
            processed
        };

        // queues that can't block for readiness would otherwise spin
        if processed == 0 && state == QueueState::Unknown {
            set.idle();
        }
    }
}

impl<T: Send + Sync + 'static> ThreadedWorkerPool<T> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            set: Arc::new(WorkerSet::new("worker", config, Arc::new(WorkParallel))),
        }
    }
}

impl<T: Send + Sync + 'static> Default for ThreadedWorkerPool<T> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<T: Send + Sync + 'static> WorkerPool<T> for ThreadedWorkerPool<T> {
    fn set_source(&self, dispatch: Arc<dyn DispatchHandle<T>>, queue: Arc<dyn WorkQueue<T>>) {
        self.set.set_source(dispatch, queue);
    }

    fn start(&self) -> DispatchResult<()> {
        self.set.start()
    }

    fn stop(&self, on_stuck: Option<&dyn Fn(&StuckWorker)>) {
        self.set.stop(on_stuck);
    }

    fn workers_inflight(&self) -> usize {
        self.set.inflight()
    }

    fn pool_size(&self) -> usize {
        self.set.pool_size()
    }
}

impl<T> Drop for ThreadedWorkerPool<T> {
    fn drop(&mut self) {
        self.set.abandon();
    }
}
