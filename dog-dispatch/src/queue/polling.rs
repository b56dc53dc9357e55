use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::queue::{BackOffWaiter, LinearBackOff, WorkItem, WorkQueue};
use crate::{DispatchResult, Named, QueueState};

/// External source of work that can only be asked, not waited on
pub trait PollSource<T>: Send {
    /// Try to produce one item
    fn try_get(&mut self) -> Option<T>;
}

impl<T, F> PollSource<T> for F
where
    F: FnMut() -> Option<T> + Send,
{
    fn try_get(&mut self) -> Option<T> {
        self()
    }
}

type LocalBuffer<T> = Arc<Mutex<VecDeque<Named<T>>>>;

/// Queue fed by polling a [`PollSource`], rate-limited by a back-off waiter.
///
/// A local buffer is drained before the source is polled, so callers can
/// push retry or priority work ahead of polled items. Cancelled leases always
/// land in the local buffer.
pub struct PollingWorkQueue<T, S> {
    local: LocalBuffer<T>,
    source: Mutex<S>,
    misses: AtomicU32,
    back_off: RwLock<Arc<dyn BackOffWaiter>>,
    accepting: AtomicBool,
}

impl<T, S> PollingWorkQueue<T, S>
where
    S: PollSource<T>,
{
    pub fn new(source: S) -> Self {
        let back_off: Arc<dyn BackOffWaiter> = Arc::new(LinearBackOff::default());
        Self {
            local: Arc::new(Mutex::new(VecDeque::new())),
            source: Mutex::new(source),
            misses: AtomicU32::new(0),
            back_off: RwLock::new(back_off),
            accepting: AtomicBool::new(true),
        }
    }

    /// Use a specific back-off strategy from the start
    pub fn with_back_off(self, waiter: impl BackOffWaiter + 'static) -> Self {
        self.set_back_off(waiter);
        self
    }

    /// Replace the back-off strategy
    pub fn set_back_off(&self, waiter: impl BackOffWaiter + 'static) {
        let waiter: Arc<dyn BackOffWaiter> = Arc::new(waiter);
        *self.back_off.write() = waiter;
    }

    /// Empty polls since the last successful one
    pub fn consecutive_misses(&self) -> u32 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn is_accepting_work(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }
}

fn requeue_locally<T: Clone + Send + 'static>(
    local: &LocalBuffer<T>,
    name: Option<String>,
) -> impl FnOnce(&T) + Send + 'static {
    let local = local.clone();
    move |value: &T| {
        trace!("Returning cancelled item to local poll buffer");
        local.lock().push_back(Named::new(value.clone(), name));
    }
}

impl<T, S> WorkQueue<T> for PollingWorkQueue<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: PollSource<T>,
{
    fn enqueue(&self, item: T, name: Option<String>) -> DispatchResult<()> {
        self.local.lock().push_back(Named::new(item, name));
        Ok(())
    }

    fn try_dequeue(&self) -> WorkItem<T> {
        let buffered = self.local.lock().pop_front();
        if let Some(Named { value, name }) = buffered {
            let cancel = requeue_locally(&self.local, name.clone());
            return WorkItem::new(value, name, |_| {}, cancel);
        }

        if !self.is_accepting_work() {
            return WorkItem::empty();
        }

        let polled = self.source.lock().try_get();
        match polled {
            Some(value) => {
                self.misses.store(0, Ordering::Relaxed);
                WorkItem::new(value, None, |_| {}, requeue_locally(&self.local, None))
            }
            None => {
                let misses = self.misses.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                let waiter = self.back_off.read().clone();
                trace!(misses, "Poll source empty; backing off");
                waiter.wait(misses);
                WorkItem::empty()
            }
        }
    }

    /// Length of the local buffer only
    fn len(&self) -> usize {
        self.local.lock().len()
    }

    /// Poll sources can't report population without polling
    fn block_until_ready(&self) -> QueueState {
        QueueState::Unknown
    }

    fn all_item_names(&self) -> Vec<String> {
        self.local
            .lock()
            .iter()
            .filter_map(|item| item.name().map(str::to_owned))
            .collect()
    }

    fn stop_accepting_work(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            debug!("Polling queue stopped accepting new work");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::NoBackOff;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn counting_source(
        items: Vec<&'static str>,
        polls: Arc<AtomicUsize>,
    ) -> impl FnMut() -> Option<&'static str> + Send {
        let mut items: VecDeque<_> = items.into();
        move || {
            polls.fetch_add(1, Ordering::SeqCst);
            items.pop_front()
        }
    }

    #[test]
    fn enqueued_data_is_consumed() {
        let polls = Arc::new(AtomicUsize::new(0));
        let queue: PollingWorkQueue<&str, _> = PollingWorkQueue::new(counting_source(vec![], polls.clone())).with_back_off(NoBackOff);
        queue.enqueue("paul's mum", None).unwrap();

        let lease = queue.try_dequeue();
        assert_eq!(lease.item(), Some(&"paul's mum"));
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn polled_data_is_consumed() {
        let polls = Arc::new(AtomicUsize::new(0));
        let queue: PollingWorkQueue<&str, _> = PollingWorkQueue::new(counting_source(vec!["phil's face"], polls.clone()));

        let lease = queue.try_dequeue();
        assert_eq!(lease.item(), Some(&"phil's face"));
        assert_eq!(lease.name(), None);
    }

    #[test]
    fn queued_data_is_used_before_polled_data() {
        let polls = Arc::new(AtomicUsize::new(0));
        let queue: PollingWorkQueue<&str, _> = PollingWorkQueue::new(counting_source(vec![], polls.clone())).with_back_off(NoBackOff);
        queue.enqueue("one", None).unwrap();
        queue.enqueue("two", None).unwrap();

        queue.try_dequeue();
        queue.try_dequeue();
        queue.try_dequeue();

        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn misses_back_off_and_reset_on_hit() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut script = VecDeque::from(vec![None, None, Some(5_u32), None]);
        let queue: PollingWorkQueue<u32, _> = PollingWorkQueue::new(move || script.pop_front().flatten());
        let recorder = seen.clone();
        queue.set_back_off(move |count: u32| recorder.lock().push(count));

        assert!(!queue.try_dequeue().has_item());
        assert!(!queue.try_dequeue().has_item());
        assert_eq!(queue.consecutive_misses(), 2);
        assert_eq!(queue.try_dequeue().item(), Some(&5));
        assert_eq!(queue.consecutive_misses(), 0);
        assert!(!queue.try_dequeue().has_item());

        assert_eq!(*seen.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn default_back_off_sleeps_progressively() {
        let queue: PollingWorkQueue<u32, _> = PollingWorkQueue::new(|| None);
        let started = Instant::now();
        for _ in 0..25 {
            queue.try_dequeue();
        }
        // 2ms * (1 + 2 + ... + 25)
        assert!(started.elapsed() >= Duration::from_millis(600));
        assert_eq!(queue.consecutive_misses(), 25);
    }

    #[test]
    fn replaced_back_off_avoids_real_delay() {
        let total = Arc::new(AtomicUsize::new(0));
        let queue: PollingWorkQueue<u32, _> = PollingWorkQueue::new(|| None);
        let counter = total.clone();
        queue.set_back_off(move |count: u32| {
            counter.fetch_add(count as usize, Ordering::SeqCst);
        });

        let started = Instant::now();
        for _ in 0..10 {
            queue.try_dequeue();
        }
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(total.load(Ordering::SeqCst), 55);
    }

    #[test]
    fn stop_accepting_work_drains_local_then_stops_polling() {
        let polls = Arc::new(AtomicUsize::new(0));
        let queue: PollingWorkQueue<&str, _> = PollingWorkQueue::new(counting_source(vec!["polled"], polls.clone()));
        queue.enqueue("local", Some("named".into())).unwrap();

        queue.stop_accepting_work();
        queue.stop_accepting_work();
        assert!(!queue.is_accepting_work());

        assert_eq!(queue.try_dequeue().item(), Some(&"local"));
        assert!(!queue.try_dequeue().has_item());
        assert_eq!(polls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_returns_items_to_local_buffer() {
        let polls = Arc::new(AtomicUsize::new(0));
        let queue: PollingWorkQueue<&str, _> = PollingWorkQueue::new(counting_source(vec!["polled"], polls.clone())).with_back_off(NoBackOff);
        queue.enqueue("local", Some("keeps-name".into())).unwrap();

        let local = queue.try_dequeue();
        let polled = queue.try_dequeue();
        assert_eq!(queue.len(), 0);

        local.cancel();
        polled.cancel();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.all_item_names(), vec!["keeps-name".to_string()]);
        assert_eq!(queue.block_until_ready(), QueueState::Unknown);
    }
}
