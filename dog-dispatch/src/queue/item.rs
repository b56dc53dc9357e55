use std::fmt;

use parking_lot::Mutex;

/// Callback run when a lease is resolved
pub type CompletionFn<T> = Box<dyn FnOnce(&T) + Send + 'static>;

struct Completion<T> {
    finish: CompletionFn<T>,
    cancel: CompletionFn<T>,
}

/// A dequeued work item and the obligation to resolve it.
///
/// Exactly one of [`finish`](WorkItem::finish) (remove permanently) or
/// [`cancel`](WorkItem::cancel) (return to the queue) takes effect, no matter
/// how many times or from how many threads they are called. The first caller
/// takes the completion slot; everyone else finds it empty and does nothing.
///
/// A lease without an item represents an unsuccessful dequeue.
pub struct WorkItem<T> {
    value: Option<T>,
    name: Option<String>,
    completion: Mutex<Option<Completion<T>>>,
}

/// Pieces of an unresolved lease, used by queue wrappers to re-wrap a lease
/// with extra behaviour around its callbacks.
pub(crate) struct LeaseParts<T> {
    pub value: T,
    pub name: Option<String>,
    pub finish: CompletionFn<T>,
    pub cancel: CompletionFn<T>,
}

impl<T> WorkItem<T> {
    /// Lease over a dequeued value
    pub fn new<F, C>(value: T, name: Option<String>, finish: F, cancel: C) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
        C: FnOnce(&T) + Send + 'static,
    {
        Self {
            value: Some(value),
            name,
            completion: Mutex::new(Some(Completion {
                finish: Box::new(finish),
                cancel: Box::new(cancel),
            })),
        }
    }

    /// Lease representing "no item available"
    pub fn empty() -> Self {
        Self {
            value: None,
            name: None,
            completion: Mutex::new(None),
        }
    }

    pub fn has_item(&self) -> bool {
        self.value.is_some()
    }

    /// The leased value, `None` for an empty lease
    pub fn item(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True once finish or cancel has taken effect (always true when empty)
    pub fn is_resolved(&self) -> bool {
        self.completion.lock().is_none()
    }

    /// Permanently remove the item from its queue
    pub fn finish(&self) {
        let taken = self.completion.lock().take();
        if let (Some(completion), Some(value)) = (taken, self.value.as_ref()) {
            (completion.finish)(value);
        }
    }

    /// Return the item to its queue. Where it lands (head, tail or somewhere
    /// in between) is up to the queue.
    pub fn cancel(&self) {
        let taken = self.completion.lock().take();
        if let (Some(completion), Some(value)) = (taken, self.value.as_ref()) {
            (completion.cancel)(value);
        }
    }

    pub(crate) fn into_parts(self) -> Option<LeaseParts<T>> {
        let completion = self.completion.into_inner();
        let name = self.name;
        self.value.map(|value| match completion {
            Some(Completion { finish, cancel }) => LeaseParts { value, name, finish, cancel },
            None => LeaseParts {
                value,
                name,
                finish: Box::new(|_| {}),
                cancel: Box::new(|_| {}),
            },
        })
    }
}

impl<T> Default for WorkItem<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for WorkItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("has_item", &self.has_item())
            .field("name", &self.name)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
