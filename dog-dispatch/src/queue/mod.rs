pub mod backoff;
pub mod bounded;
pub mod item;
pub mod memory;
pub mod polling;

use std::sync::Arc;

use crate::{DispatchResult, QueueState};

pub use backoff::{BackOffWaiter, LinearBackOff, NoBackOff};
pub use bounded::BoundedWorkQueue;
pub use item::WorkItem;
pub use memory::InMemoryWorkQueue;
pub use polling::{PollSource, PollingWorkQueue};

/// Ordered queue of work to be acted upon. All implementations are thread-safe.
pub trait WorkQueue<T>: Send + Sync {
    /// Add an item, optionally named for diagnostics
    fn enqueue(&self, item: T, name: Option<String>) -> DispatchResult<()>;

    /// Try to take an item. Success is reported by [`WorkItem::has_item`].
    fn try_dequeue(&self) -> WorkItem<T>;

    /// Approximate snapshot of items waiting (not counting leased ones)
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory wait for the queue to be populated. Implementations bound the
    /// wait so worker threads can re-check shutdown flags.
    fn block_until_ready(&self) -> QueueState;

    /// Names of waiting items; unnamed items are left out
    fn all_item_names(&self) -> Vec<String>;

    /// Stop pulling new work from external sources. Locally queued items
    /// still drain. Queues without an external source ignore this.
    fn stop_accepting_work(&self) {}
}

impl<T, Q> WorkQueue<T> for Arc<Q>
where
    Q: WorkQueue<T> + ?Sized,
{
    fn enqueue(&self, item: T, name: Option<String>) -> DispatchResult<()> {
        (**self).enqueue(item, name)
    }

    fn try_dequeue(&self) -> WorkItem<T> {
        (**self).try_dequeue()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn block_until_ready(&self) -> QueueState {
        (**self).block_until_ready()
    }

    fn all_item_names(&self) -> Vec<String> {
        (**self).all_item_names()
    }

    fn stop_accepting_work(&self) {
        (**self).stop_accepting_work()
    }
}
