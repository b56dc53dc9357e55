use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace};

use crate::config::PoolConfig;
use crate::pool::{join_with_attempts, process_lease, report_stuck, DispatchHandle, Source, StuckWorker, WorkerPool};
use crate::queue::WorkQueue;
use crate::sync::{ResetEvent, WaitHandle};
use crate::{DispatchError, DispatchResult, QueueState};

/// Runs every item on a single background thread, strictly in queue order.
///
/// `start` returns once the thread is running. Useful where consumers must not
/// run concurrently with each other.
pub struct DirectWorkerPool<T> {
    shared: Arc<DirectShared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    config: PoolConfig,
}

struct DirectShared<T> {
    source: RwLock<Option<Source<T>>>,
    running: AtomicBool,
    inflight: AtomicUsize,
    idle_wait: Duration,
}

impl<T: Send + Sync + 'static> DirectShared<T> {
    fn run(&self, source: Source<T>, started: &ResetEvent) {
        started.set();
        trace!("Direct worker running");
        while self.running.load(Ordering::Acquire) {
            let lease = source.queue.try_dequeue();
            if !lease.has_item() {
                if source.queue.block_until_ready() == QueueState::Unknown {
                    thread::sleep(self.idle_wait);
                }
                continue;
            }
            self.inflight.store(1, Ordering::Release);
            process_lease(source.dispatch.as_ref(), &lease);
            self.inflight.store(0, Ordering::Release);
        }
        trace!("Direct worker exiting");
    }
}

impl<T: Send + Sync + 'static> DirectWorkerPool<T> {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(DirectShared {
                source: RwLock::new(None),
                running: AtomicBool::new(false),
                inflight: AtomicUsize::new(0),
                idle_wait: config.idle_wait,
            }),
            worker: Mutex::new(None),
            config,
        }
    }
}

impl<T: Send + Sync + 'static> Default for DirectWorkerPool<T> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<T: Send + Sync + 'static> WorkerPool<T> for DirectWorkerPool<T> {
    fn set_source(&self, dispatch: Arc<dyn DispatchHandle<T>>, queue: Arc<dyn WorkQueue<T>>) {
        *self.shared.source.write() = Some(Source { dispatch, queue });
    }

    #[instrument(skip(self))]
    fn start(&self) -> DispatchResult<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            debug!("Direct pool already running");
            return Ok(());
        }
        let source = self.shared.source.read().clone().ok_or(DispatchError::SourceNotConfigured)?;
        let name = format!("{}-direct", source.dispatch.name());

        self.shared.running.store(true, Ordering::Release);
        let started = Arc::new(ResetEvent::new(false));
        let shared = self.shared.clone();
        let signal = started.clone();
        let spawned = thread::Builder::new()
            .name(name.clone())
            .spawn(move || shared.run(source, &signal));

        match spawned {
            Ok(handle) => {
                started.wait_one();
                *worker = Some(handle);
                info!(thread = %name, "Direct pool started");
                Ok(())
            }
            Err(err) => {
                self.shared.running.store(false, Ordering::Release);
                Err(DispatchError::Spawn(err))
            }
        }
    }

    #[instrument(skip(self, on_stuck))]
    fn stop(&self, on_stuck: Option<&dyn Fn(&StuckWorker)>) {
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            debug!("Direct pool already stopped");
            return;
        };
        self.shared.running.store(false, Ordering::Release);

        if let Some(stuck) = join_with_attempts(handle, self.config.join_attempts, self.config.join_attempt_timeout) {
            report_stuck(&stuck, on_stuck);
        }
        info!("Direct pool stopped");
    }

    fn workers_inflight(&self) -> usize {
        self.shared.inflight.load(Ordering::Acquire)
    }

    fn pool_size(&self) -> usize {
        match self.worker.lock().as_ref() {
            Some(handle) if !handle.is_finished() => 1,
            _ => 0,
        }
    }
}

impl<T> Drop for DirectWorkerPool<T> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::FakeDispatch;
    use crate::pool::wait_until;
    use crate::queue::InMemoryWorkQueue;
    use std::time::Duration;

    fn fast_pool() -> DirectWorkerPool<u32> {
        DirectWorkerPool::new(PoolConfig::default().with_join(10, Duration::from_millis(100)))
    }

    #[test]
    fn start_without_source_fails() {
        let pool = fast_pool();
        assert!(matches!(pool.start(), Err(DispatchError::SourceNotConfigured)));
    }

    #[test]
    fn items_are_handled_in_order_on_one_thread() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let dispatch = Arc::new(FakeDispatch::new(1).with_consumer(move |v: &u32| {
            sink.lock().push((*v, thread::current().name().map(str::to_owned)));
            Ok(())
        }));
        let queue = Arc::new(InMemoryWorkQueue::<u32>::new());

        let pool = fast_pool();
        pool.set_source(dispatch.clone(), queue.clone());
        pool.start().unwrap();
        assert_eq!(pool.pool_size(), 1);

        for i in 0..50 {
            queue.enqueue(i, None).unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || dispatch.metrics.items_processed() == 50));
        pool.stop(None);

        let seen = seen.lock();
        assert_eq!(seen.iter().map(|(v, _)| *v).collect::<Vec<_>>(), (0..50).collect::<Vec<_>>());
        assert!(seen.iter().all(|(_, name)| name.as_deref() == Some("test-direct")));
    }

    #[test]
    fn failures_still_finish_the_item() {
        let dispatch = Arc::new(FakeDispatch::new(1).with_consumer(|_: &u32| Err("Yo!".into())));
        let queue = Arc::new(InMemoryWorkQueue::<u32>::new());
        queue.enqueue(1, None).unwrap();

        let pool = fast_pool();
        pool.set_source(dispatch.clone(), queue.clone());
        pool.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || dispatch.metrics.items_processed() == 1));
        pool.stop(None);

        assert!(queue.is_empty());
        assert_eq!(*dispatch.failures.lock(), vec!["Yo!".to_string()]);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let dispatch = Arc::new(FakeDispatch::<u32>::new(1));
        let pool = fast_pool();
        pool.set_source(dispatch, Arc::new(InMemoryWorkQueue::<u32>::new()));

        pool.start().unwrap();
        pool.start().unwrap();
        assert_eq!(pool.pool_size(), 1);
        pool.stop(None);
        pool.stop(None);
        assert_eq!(pool.pool_size(), 0);
    }
}
