use std::time::Duration;
use tracing::debug;

use crate::error::{MonitorError, StoreError};
use crate::tick::Ticker;

/// Fixed-delay retry for store reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// The delay is only taken between attempts, never after the last one.
    pub fn run<T>(
        &self,
        ticker: &dyn Ticker,
        mut op: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, MonitorError> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op() {
                Ok(value) => return Ok(value),
                Err(source) if attempt >= max_attempts => {
                    return Err(MonitorError::TransientStore {
                        attempts: attempt,
                        source,
                    });
                }
                Err(e) => {
                    debug!(attempt, error = %e, "store read failed, retrying");
                    ticker.sleep(self.delay);
                }
            }
        }
    }
}
