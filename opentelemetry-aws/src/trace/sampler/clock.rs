use std::fmt::Debug;
use std::time::SystemTime;

/// Time source used for rate limiting, reservoir quota expiry and
/// statistics reporting windows.
///
/// Sampling decisions compare wall clock readings on every request, so
/// tests swap in a manual clock instead of sleeping.
pub trait Clock: Debug + Send + Sync + 'static {
    /// Returns the current wall clock time.
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Clone, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        opentelemetry::time::now()
    }
}
