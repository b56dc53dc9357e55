use thiserror::Error;

/// Result type for dispatcher, queue and pool operations
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Boxed error returned by consumers
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Construction and lifecycle errors, surfaced at the call site
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid inflight limit: {requested} (must be between 1 and {max})")]
    InvalidInflightLimit { requested: usize, max: usize },

    #[error("Invalid queue bound: {0} (must be at least 1)")]
    InvalidBound(usize),

    #[error("A dispatcher can't be started until it has at least one consumer")]
    NoConsumers,

    #[error("Worker pool has not been given a dispatcher and queue")]
    SourceNotConfigured,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Work item rejected by queue: {0}")]
    Rejected(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DispatchError {
    /// Create a rejection error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Check if this error came from a queue refusing work
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Error> for DispatchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A consumer failed while handling a work item.
///
/// Never returned from the API; delivered to the dispatcher's failure
/// subscribers together with the offending lease.
#[derive(Error, Debug)]
pub enum ConsumerFailure {
    /// Consumer returned an error
    #[error("{0}")]
    Failed(BoxError),

    /// Consumer panicked; the payload message is kept when it was a string
    #[error("consumer panicked: {0}")]
    Panicked(String),
}

impl ConsumerFailure {
    /// Build a failure from a caught panic payload
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked(message)
    }

    /// Check if the consumer panicked rather than returning an error
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}
