use serde::{Deserialize, Serialize};

/// A value paired with an optional name.
///
/// Names are diagnostic only: queues report the names of outstanding items
/// but never use them for ordering or identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Named<T> {
    /// Value of the item
    pub value: T,

    /// Optional name of this item
    pub name: Option<String>,
}

impl<T> Named<T> {
    /// Wrap a value with an optional name
    pub fn new(value: T, name: Option<String>) -> Self {
        Self { value, name }
    }

    /// Wrap a value without a name
    pub fn unnamed(value: T) -> Self {
        Self { value, name: None }
    }

    /// Get the name, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Split into value and name
    pub fn into_parts(self) -> (T, Option<String>) {
        (self.value, self.name)
    }
}

impl<T> From<T> for Named<T> {
    fn from(value: T) -> Self {
        Self::unnamed(value)
    }
}
