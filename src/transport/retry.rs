//! Bounded retry on TRY_AGAIN.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use super::{StatusCode, TransportError};

/// Fixed-interval retry with a total wait cap.
///
/// Total time spent is at most `cap` plus one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    interval: Duration,
    cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_millis(2_000))
    }
}

impl RetryPolicy {
    pub const fn new(interval: Duration, cap: Duration) -> Self {
        Self { interval, cap }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Call `op` until it returns something other than TRY_AGAIN or the cap
    /// elapses. The last result is returned either way.
    pub fn run<T>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let start = Instant::now();
        let mut attempts = 1u32;
        loop {
            match op() {
                Err(e) if e.status == StatusCode::TryAgain => {
                    let elapsed = start.elapsed();
                    if elapsed >= self.cap {
                        debug!(
                            "Retry: {} gave up after {} attempts ({:?})",
                            what, attempts, elapsed
                        );
                        return Err(TransportError::new(
                            StatusCode::TryAgain,
                            format!("{} still busy after {:?}: {}", what, elapsed, e.message),
                        ));
                    }
                    thread::sleep(self.interval.min(self.cap - elapsed));
                    attempts += 1;
                }
                other => return other,
            }
        }
    }
}
