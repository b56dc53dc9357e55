//! Log bootstrap for binaries and tests that don't install their own
//! subscriber. Libraries embedding the dispatcher should leave this alone.

#[cfg(feature = "tracing-basic")]
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a formatting subscriber filtered by `RUST_LOG`, defaulting to
/// `info` for this crate. Returns false if a global subscriber was already set.
#[cfg(feature = "tracing-basic")]
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dog_dispatch=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .try_init()
        .is_ok()
}
