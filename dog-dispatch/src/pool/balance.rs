//! Self-balancing set of worker threads shared by the threaded pools.
//!
//! A supervisor thread keeps the number of workers at
//! `min(max_pool_size, dispatcher.maximum_inflight())`. Workers occupy numbered
//! slots; growing fills the lowest free slots and shrinking is done by the
//! workers themselves, which exit once their slot is at or above the desired
//! size. Every start creates a new [`GenerationId`]; workers exit as soon as
//! the pool's generation no longer matches the one they were spawned under.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, instrument, trace};

use crate::config::PoolConfig;
use crate::pool::{join_with_attempts, report_stuck, wait_until, DispatchHandle, Source, StuckWorker};
use crate::queue::WorkQueue;
use crate::sync::{ResetEvent, WaitHandle};
use crate::{DispatchError, DispatchResult, GenerationId};

/// What a worker does each time round its loop
pub(crate) trait WorkerBody<T>: Send + Sync + 'static {
    /// One pass of work. Returns quickly when there is nothing to do.
    fn step(&self, set: &WorkerSet<T>, worker: &Worker);

    /// Wake workers parked inside `step`
    fn wake_all(&self) {}

    /// Called by `stop` once the workers have been joined
    fn after_stop(&self, _source: &Source<T>) {}
}

/// Identity of a running worker thread
#[derive(Debug, Clone, Copy)]
pub(crate) struct Worker {
    pub slot: usize,
    pub generation: GenerationId,
}

impl Worker {
    /// Slot 0 is never retired, so it can own pool-wide duties
    pub fn is_controller(&self) -> bool {
        self.slot == 0
    }
}

struct WorkerThread {
    slot: usize,
    handle: JoinHandle<()>,
}

/// Releases an inflight slot when dropped
pub(crate) struct InflightGuard<'a> {
    inflight: &'a AtomicUsize,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) struct WorkerSet<T> {
    kind: &'static str,
    config: PoolConfig,
    body: Arc<dyn WorkerBody<T>>,
    source: RwLock<Option<Source<T>>>,
    generation: RwLock<Option<GenerationId>>,
    desired: AtomicUsize,
    inflight: AtomicUsize,
    admission: Mutex<()>,
    threads: Mutex<Vec<WorkerThread>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    lifecycle: Mutex<()>,
    /// Cuts the supervisor's sleep short on stop
    stopping: ResetEvent,
}

impl<T: Send + Sync + 'static> WorkerSet<T> {
    pub fn new(kind: &'static str, config: PoolConfig, body: Arc<dyn WorkerBody<T>>) -> Self {
        Self {
            kind,
            config,
            body,
            source: RwLock::new(None),
            generation: RwLock::new(None),
            desired: AtomicUsize::new(0),
            inflight: AtomicUsize::new(0),
            admission: Mutex::new(()),
            threads: Mutex::new(Vec::new()),
            supervisor: Mutex::new(None),
            lifecycle: Mutex::new(()),
            stopping: ResetEvent::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn set_source(&self, dispatch: Arc<dyn DispatchHandle<T>>, queue: Arc<dyn WorkQueue<T>>) {
        *self.source.write() = Some(Source { dispatch, queue });
    }

    pub fn source(&self) -> Option<Source<T>> {
        self.source.read().clone()
    }

    /// True while `generation` is the pool's current one
    pub fn is_current(&self, generation: GenerationId) -> bool {
        *self.generation.read() == Some(generation)
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    pub fn pool_size(&self) -> usize {
        self.threads
            .lock()
            .iter()
            .filter(|worker| !worker.handle.is_finished())
            .count()
    }

    /// Take an inflight slot if the dispatcher's limit allows it
    pub fn try_admit(&self, dispatch: &dyn DispatchHandle<T>) -> Option<InflightGuard<'_>> {
        let _admission = self.admission.lock();
        if self.inflight.load(Ordering::Acquire) >= dispatch.maximum_inflight() {
            return None;
        }
        self.inflight.fetch_add(1, Ordering::AcqRel);
        Some(InflightGuard {
            inflight: &self.inflight,
        })
    }

    /// Back off after failing admission
    pub fn idle(&self) {
        thread::sleep(self.config.idle_wait);
    }

    #[instrument(skip(self), fields(kind = self.kind))]
    pub fn start(self: &Arc<Self>) -> DispatchResult<()> {
        let _lifecycle = self.lifecycle.lock();
        if self.generation.read().is_some() {
            debug!("Worker pool already running");
            return Ok(());
        }
        let source = self.source().ok_or(DispatchError::SourceNotConfigured)?;

        let generation = GenerationId::new();
        self.stopping.reset();
        *self.generation.write() = Some(generation);

        let started = self
            .maintain(generation, &source)
            .and_then(|()| self.spawn_supervisor(generation, &source));
        if let Err(err) = started {
            error!(error = %err, "Failed to start worker pool");
            drop(_lifecycle);
            self.stop(None);
            return Err(err);
        }

        info!(
            dispatcher = source.dispatch.name(),
            generation = %generation,
            workers = self.desired.load(Ordering::Acquire),
            "Worker pool started"
        );
        Ok(())
    }

    fn spawn_supervisor(self: &Arc<Self>, generation: GenerationId, source: &Source<T>) -> DispatchResult<()> {
        let set = self.clone();
        let supervisor_source = source.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}-supervisor", source.dispatch.name(), self.kind))
            .spawn(move || set.supervise(generation, supervisor_source))?;
        *self.supervisor.lock() = Some(handle);
        Ok(())
    }

    fn supervise(self: Arc<Self>, generation: GenerationId, source: Source<T>) {
        while self.is_current(generation) {
            if let Err(err) = self.maintain(generation, &source) {
                error!(error = %err, "Supervisor could not grow the worker pool");
            }
            self.stopping.wait_timeout(self.config.supervisor_interval);
        }
        trace!("Supervisor exiting");
    }

    /// Publish the desired size, prune dead threads and fill free slots
    fn maintain(self: &Arc<Self>, generation: GenerationId, source: &Source<T>) -> DispatchResult<()> {
        let desired = self
            .config
            .max_pool_size
            .min(source.dispatch.maximum_inflight())
            .max(1);
        let previous = self.desired.swap(desired, Ordering::AcqRel);
        if previous != desired {
            debug!(from = previous, to = desired, "Resizing worker pool");
        }

        let mut threads = self.threads.lock();
        threads.retain(|worker| !worker.handle.is_finished());
        if !self.is_current(generation) {
            return Ok(());
        }

        let mut occupied: Vec<usize> = threads.iter().map(|worker| worker.slot).collect();
        occupied.sort_unstable();
        for slot in 0..desired {
            if occupied.binary_search(&slot).is_ok() {
                continue;
            }
            let handle = self.spawn_worker(Worker { slot, generation }, source)?;
            threads.push(WorkerThread { slot, handle });
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>, worker: Worker, source: &Source<T>) -> DispatchResult<JoinHandle<()>> {
        let set = self.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-{}-{}", source.dispatch.name(), self.kind, worker.slot))
            .spawn(move || set.run_worker(worker))?;
        trace!(slot = worker.slot, "Spawned worker");
        Ok(handle)
    }

    fn run_worker(self: Arc<Self>, worker: Worker) {
        loop {
            if !self.is_current(worker.generation) {
                trace!(slot = worker.slot, "Worker from a stopped generation exiting");
                return;
            }
            if worker.slot >= self.desired.load(Ordering::Acquire) {
                debug!(slot = worker.slot, "Worker no longer needed; retiring");
                return;
            }
            self.body.step(&self, &worker);
        }
    }

    #[instrument(skip(self, on_stuck), fields(kind = self.kind))]
    pub fn stop(&self, on_stuck: Option<&dyn Fn(&StuckWorker)>) {
        let _lifecycle = self.lifecycle.lock();
        let Some(generation) = self.generation.write().take() else {
            debug!("Worker pool already stopped");
            return;
        };
        self.stopping.set();
        self.body.wake_all();

        let budget = self.config.join_budget();
        if !wait_until(budget, || self.inflight() == 0) {
            debug!(inflight = self.inflight(), "In-progress work did not finish within the join budget");
        }

        let supervisor = self.supervisor.lock().take();
        let workers: Vec<JoinHandle<()>> = self
            .threads
            .lock()
            .drain(..)
            .map(|worker| worker.handle)
            .collect();

        let mut stuck = 0;
        for handle in supervisor.into_iter().chain(workers) {
            if let Some(worker) = join_with_attempts(handle, self.config.join_attempts, self.config.join_attempt_timeout) {
                report_stuck(&worker, on_stuck);
                stuck += 1;
            }
        }

        if let Some(source) = self.source() {
            self.body.after_stop(&source);
        }
        info!(generation = %generation, stuck, "Worker pool stopped");
    }
}

impl<T> WorkerSet<T> {
    /// Signal every thread to exit without waiting for them. Workers parked
    /// in their body notice within one `idle_wait`.
    pub fn abandon(&self) {
        if self.generation.write().take().is_some() {
            self.stopping.set();
        }
    }
}
