pub mod metrics;
pub mod tracing;

pub use metrics::{DispatchMetrics, MetricsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use self::tracing::init_tracing;
