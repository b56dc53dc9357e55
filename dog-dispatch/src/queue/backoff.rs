use std::thread;
use std::time::Duration;

/// Strategy for pausing after consecutive empty polls.
///
/// `wait` sleeps the calling thread; `consecutive_misses` starts at 1 for the
/// first empty poll after a hit.
pub trait BackOffWaiter: Send + Sync {
    fn wait(&self, consecutive_misses: u32);
}

impl<F> BackOffWaiter for F
where
    F: Fn(u32) + Send + Sync,
{
    fn wait(&self, consecutive_misses: u32) {
        self(consecutive_misses)
    }
}

/// Linear back-off: 2ms per consecutive miss, capped at one second.
/// Timing is not precise.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackOff {
    pub step: Duration,
    pub cap: Duration,
    /// Miss count past which the cap applies
    pub cap_after: u32,
}

impl LinearBackOff {
    pub fn new(step: Duration, cap: Duration, cap_after: u32) -> Self {
        Self { step, cap, cap_after }
    }

    /// Delay for a given miss count
    pub fn delay(&self, consecutive_misses: u32) -> Duration {
        if consecutive_misses > self.cap_after {
            self.cap
        } else {
            self.step
                .checked_mul(consecutive_misses)
                .map_or(self.cap, |delay| delay.min(self.cap))
        }
    }
}

impl Default for LinearBackOff {
    fn default() -> Self {
        Self {
            step: Duration::from_millis(2),
            cap: Duration::from_secs(1),
            cap_after: 500,
        }
    }
}

impl BackOffWaiter for LinearBackOff {
    fn wait(&self, consecutive_misses: u32) {
        let delay = self.delay(consecutive_misses);
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

/// Waiter that never sleeps. Useful in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackOff;

impl BackOffWaiter for NoBackOff {
    fn wait(&self, _consecutive_misses: u32) {}
}
