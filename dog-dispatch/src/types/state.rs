use serde::{Deserialize, Serialize};

/// Population state reported by [`WorkQueue::block_until_ready`](crate::WorkQueue::block_until_ready)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueState {
    /// The queue cannot tell without trying to dequeue (polling sources)
    Unknown,

    /// Items were available when the wait ended
    HasItems,

    /// The wait timed out with nothing queued
    Empty,
}

impl QueueState {
    /// True only when the queue positively reported items
    pub fn has_items(&self) -> bool {
        matches!(self, Self::HasItems)
    }
}
