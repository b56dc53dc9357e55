use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use crate::queue::item::LeaseParts;
use crate::queue::{InMemoryWorkQueue, WorkItem, WorkQueue};
use crate::sync::Semaphore;
use crate::{DispatchError, DispatchResult, QueueState};

/// Caps the number of items admitted to a queue but not yet leased.
///
/// `enqueue` blocks while the bound is reached. A permit is returned as soon as
/// a lease is handed out; cancelling that lease takes a permit back before the
/// item is re-queued, so a burst of cancels can never push the queue past its
/// bound.
pub struct BoundedWorkQueue<T, Q = InMemoryWorkQueue<T>> {
    inner: Q,
    permits: Arc<Semaphore>,
    bound: usize,
    _item: PhantomData<fn() -> T>,
}

impl<T> BoundedWorkQueue<T, InMemoryWorkQueue<T>> {
    /// Bounded in-memory queue
    pub fn new(bound: usize) -> DispatchResult<Self> {
        Self::wrap(InMemoryWorkQueue::new(), bound)
    }
}

impl<T, Q> BoundedWorkQueue<T, Q> {
    /// Bound an existing queue
    pub fn wrap(inner: Q, bound: usize) -> DispatchResult<Self> {
        if bound == 0 {
            return Err(DispatchError::InvalidBound(bound));
        }
        Ok(Self {
            inner,
            permits: Arc::new(Semaphore::new(bound, bound)),
            bound,
            _item: PhantomData,
        })
    }

    pub fn bound(&self) -> usize {
        self.bound
    }

    /// Free slots right now
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn inner(&self) -> &Q {
        &self.inner
    }
}

impl<T, Q> WorkQueue<T> for BoundedWorkQueue<T, Q>
where
    T: Send + 'static,
    Q: WorkQueue<T>,
{
    fn enqueue(&self, item: T, name: Option<String>) -> DispatchResult<()> {
        self.permits.acquire();
        if let Err(err) = self.inner.enqueue(item, name) {
            self.permits.release();
            debug!(error = %err, "Inner queue rejected item; returned slot");
            return Err(err);
        }
        Ok(())
    }

    fn try_dequeue(&self) -> WorkItem<T> {
        let lease = self.inner.try_dequeue();
        if !lease.has_item() {
            return lease;
        }
        self.permits.release();

        let Some(LeaseParts { value, name, finish, cancel }) = lease.into_parts() else {
            return WorkItem::empty();
        };
        let permits = self.permits.clone();
        WorkItem::new(value, name, finish, move |value: &T| {
            permits.acquire();
            cancel(value);
        })
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn block_until_ready(&self) -> QueueState {
        self.inner.block_until_ready()
    }

    fn all_item_names(&self) -> Vec<String> {
        self.inner.all_item_names()
    }

    fn stop_accepting_work(&self) {
        self.inner.stop_accepting_work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    /// Queue that refuses one specific value
    struct Picky {
        inner: InMemoryWorkQueue<u32>,
        refuse: u32,
        enqueues: AtomicUsize,
    }

    impl WorkQueue<u32> for Picky {
        fn enqueue(&self, item: u32, name: Option<String>) -> DispatchResult<()> {
            self.enqueues.fetch_add(1, Ordering::SeqCst);
            if item == self.refuse {
                return Err(DispatchError::rejected("refused"));
            }
            self.inner.enqueue(item, name)
        }

        fn try_dequeue(&self) -> WorkItem<u32> {
            self.inner.try_dequeue()
        }

        fn len(&self) -> usize {
            self.inner.len()
        }

        fn block_until_ready(&self) -> QueueState {
            self.inner.block_until_ready()
        }

        fn all_item_names(&self) -> Vec<String> {
            self.inner.all_item_names()
        }
    }

    #[test]
    fn zero_bound_is_rejected() {
        assert!(matches!(
            BoundedWorkQueue::<u32>::new(0),
            Err(DispatchError::InvalidBound(0))
        ));
    }

    #[test]
    fn delegates_to_inner_queue() {
        let queue = BoundedWorkQueue::new(4).unwrap();
        queue.enqueue(1, Some("one".into())).unwrap();
        queue.enqueue(2, None).unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.all_item_names(), vec!["one".to_string()]);
        assert_eq!(queue.block_until_ready(), QueueState::HasItems);
        assert_eq!(queue.available_slots(), 2);

        let lease = queue.try_dequeue();
        assert_eq!(lease.item(), Some(&1));
        assert_eq!(queue.available_slots(), 3);
        lease.finish();
        assert_eq!(queue.available_slots(), 3);
    }

    #[test]
    fn enqueue_waits_for_a_dequeue_when_full() {
        let queue = Arc::new(BoundedWorkQueue::new(2).unwrap());
        queue.enqueue(1, None).unwrap();
        queue.enqueue(2, None).unwrap();

        let dequeuer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                queue.try_dequeue().finish();
            })
        };

        let started = Instant::now();
        queue.enqueue(3, None).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(90));
        dequeuer.join().unwrap();
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn failed_enqueue_returns_its_slot() {
        let picky = Picky {
            inner: InMemoryWorkQueue::new(),
            refuse: 13,
            enqueues: AtomicUsize::new(0),
        };
        let queue = BoundedWorkQueue::wrap(picky, 1).unwrap();

        let err = queue.enqueue(13, None).unwrap_err();
        assert!(err.is_rejection());
        assert_eq!(queue.available_slots(), 1);

        // would block forever if the slot had leaked
        queue.enqueue(14, None).unwrap();
        assert_eq!(queue.inner().enqueues.load(Ordering::SeqCst), 2);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn cancel_waits_for_a_free_slot() {
        let queue = Arc::new(BoundedWorkQueue::new(1).unwrap());
        queue.enqueue(1, None).unwrap();
        let lease = queue.try_dequeue();
        queue.enqueue(2, None).unwrap();
        assert_eq!(queue.available_slots(), 0);

        let freer = {
            let queue = queue.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                queue.try_dequeue().finish();
            })
        };

        let started = Instant::now();
        lease.cancel();
        assert!(started.elapsed() >= Duration::from_millis(90));
        freer.join().unwrap();

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.try_dequeue().item(), Some(&1));
    }

    #[test]
    fn concurrent_cancels_never_overflow_the_bound() {
        const BOUND: usize = 3;
        const HOLDERS: usize = 8;
        let queue = Arc::new(BoundedWorkQueue::<u32>::new(BOUND).unwrap());

        let mut leases = Vec::new();
        for i in 0..HOLDERS as u32 {
            queue.enqueue(i, None).unwrap();
            leases.push(queue.try_dequeue());
        }
        for i in 100..100 + BOUND as u32 {
            queue.enqueue(i, None).unwrap();
        }
        assert_eq!(queue.available_slots(), 0);

        let sampling = Arc::new(AtomicBool::new(true));
        let peak = Arc::new(AtomicUsize::new(0));
        let sampler = {
            let (queue, sampling, peak) = (queue.clone(), sampling.clone(), peak.clone());
            thread::spawn(move || {
                while sampling.load(Ordering::SeqCst) {
                    peak.fetch_max(queue.len(), Ordering::SeqCst);
                    thread::yield_now();
                }
            })
        };

        let barrier = Arc::new(Barrier::new(HOLDERS));
        let cancellers: Vec<_> = leases
            .into_iter()
            .map(|lease| {
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    lease.cancel();
                })
            })
            .collect();

        // drain slowly so the cancellers keep finding the queue full
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut finished = 0;
        while finished < HOLDERS + BOUND {
            assert!(Instant::now() < deadline, "only {finished} items came back");
            let lease = queue.try_dequeue();
            if lease.has_item() {
                lease.finish();
                finished += 1;
            }
            thread::sleep(Duration::from_millis(2));
        }
        for canceller in cancellers {
            canceller.join().unwrap();
        }
        sampling.store(false, Ordering::SeqCst);
        sampler.join().unwrap();

        assert!(peak.load(Ordering::SeqCst) <= BOUND, "peak length {}", peak.load(Ordering::SeqCst));
        assert!(queue.is_empty());
        assert_eq!(queue.len() + queue.available_slots(), BOUND);
    }

    #[test]
    fn finish_is_immediate_when_full() {
        let queue = BoundedWorkQueue::new(1).unwrap();
        queue.enqueue(1, None).unwrap();
        let lease = queue.try_dequeue();
        queue.enqueue(2, None).unwrap();

        let started = Instant::now();
        lease.finish();
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(queue.available_slots(), 0);
    }
}
