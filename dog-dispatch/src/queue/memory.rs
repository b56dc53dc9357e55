use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::config::QueueConfig;
use crate::queue::{WorkItem, WorkQueue};
use crate::sync::{ResetEvent, WaitHandle};
use crate::{DispatchResult, Named, QueueState};

struct MemoryShared<T> {
    items: Mutex<VecDeque<Named<T>>>,
    /// Set while `items` is non-empty
    ready: ResetEvent,
}

impl<T> MemoryShared<T> {
    fn push(&self, named: Named<T>) {
        let mut items = self.items.lock();
        items.push_back(named);
        self.ready.set();
    }
}

/// Unbounded FIFO held in memory
pub struct InMemoryWorkQueue<T> {
    shared: Arc<MemoryShared<T>>,
    ready_timeout: Duration,
}

impl<T> InMemoryWorkQueue<T> {
    pub fn new() -> Self {
        Self::with_config(QueueConfig::default())
    }

    pub fn with_config(config: QueueConfig) -> Self {
        Self {
            shared: Arc::new(MemoryShared {
                items: Mutex::new(VecDeque::new()),
                ready: ResetEvent::new(false),
            }),
            ready_timeout: config.ready_timeout,
        }
    }
}

impl<T> Default for InMemoryWorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> for InMemoryWorkQueue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn enqueue(&self, item: T, name: Option<String>) -> DispatchResult<()> {
        self.shared.push(Named::new(item, name));
        Ok(())
    }

    fn try_dequeue(&self) -> WorkItem<T> {
        let popped = {
            let mut items = self.shared.items.lock();
            let popped = items.pop_front();
            if items.is_empty() {
                self.shared.ready.reset();
            }
            popped
        };

        let Some(Named { value, name }) = popped else {
            return WorkItem::empty();
        };

        let shared = self.shared.clone();
        let requeue_name = name.clone();
        WorkItem::new(
            value,
            name,
            |_| {},
            move |value: &T| {
                trace!("Returning cancelled item to in-memory queue");
                shared.push(Named::new(value.clone(), requeue_name));
            },
        )
    }

    fn len(&self) -> usize {
        self.shared.items.lock().len()
    }

    fn block_until_ready(&self) -> QueueState {
        if self.shared.ready.wait_timeout(self.ready_timeout) {
            QueueState::HasItems
        } else {
            QueueState::Empty
        }
    }

    fn all_item_names(&self) -> Vec<String> {
        self.shared
            .items
            .lock()
            .iter()
            .filter_map(|item| item.name().map(str::to_owned))
            .collect()
    }
}
