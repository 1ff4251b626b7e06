//! Scheduler ticks: monotonic time plus cancellable waits.
//!
//! Every loop and timeout in the crate goes through a [`Ticker`], so the
//! reconciliation loop, store retries and worker probes can run against a
//! [`VirtualClock`] in tests instead of sleeping on the wall clock.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of a cancellable wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Elapsed,
    Cancelled,
}

/// Cloneable cancellation token shared between a signal handler and a loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request cancellation and wake every waiter.
    pub fn trigger(&self) {
        *self.flag() = true;
        self.inner.1.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.flag()
    }

    /// Block for at most `timeout`. Returns `true` if cancellation was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.flag();
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = match self.inner.1.wait_timeout(triggered, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

pub trait Ticker: Send + Sync {
    /// Monotonic time since the ticker was created.
    fn now(&self) -> Duration;

    /// Uninterruptible pause, used for retry back-off and join polling.
    fn sleep(&self, duration: Duration);

    /// Wait for `duration` unless the shutdown token fires first.
    fn wait(&self, duration: Duration) -> TickOutcome;

    fn shutdown(&self) -> &Shutdown;
}

/// Wall-clock ticker.
#[derive(Debug, Clone)]
pub struct SystemTicker {
    origin: Instant,
    shutdown: Shutdown,
}

impl SystemTicker {
    pub fn new(shutdown: Shutdown) -> Self {
        Self {
            origin: Instant::now(),
            shutdown,
        }
    }
}

impl Ticker for SystemTicker {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    fn wait(&self, duration: Duration) -> TickOutcome {
        if self.shutdown.wait_timeout(duration) {
            TickOutcome::Cancelled
        } else {
            TickOutcome::Elapsed
        }
    }

    fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    now: Duration,
    sleeps: Vec<Duration>,
    waits: Vec<Duration>,
    cancel_after_waits: Option<usize>,
}

/// Deterministic ticker: time only moves when something sleeps or waits.
#[derive(Debug, Default)]
pub struct VirtualClock {
    state: Mutex<VirtualState>,
    shutdown: Shutdown,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the shutdown token once `waits` cancellable waits have happened.
    pub fn cancel_after_waits(self, waits: usize) -> Self {
        self.lock().cancel_after_waits = Some(waits);
        self
    }

    fn lock(&self) -> MutexGuard<'_, VirtualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: Duration) {
        self.lock().now += duration;
    }

    /// Durations passed to [`Ticker::sleep`], in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    /// Durations passed to [`Ticker::wait`], in call order.
    pub fn waits(&self) -> Vec<Duration> {
        self.lock().waits.clone()
    }
}

impl Ticker for VirtualClock {
    fn now(&self) -> Duration {
        self.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.now += duration;
        state.sleeps.push(duration);
    }

    fn wait(&self, duration: Duration) -> TickOutcome {
        if self.shutdown.is_triggered() {
            return TickOutcome::Cancelled;
        }
        let cancel = {
            let mut state = self.lock();
            state.now += duration;
            state.waits.push(duration);
            state
                .cancel_after_waits
                .is_some_and(|limit| state.waits.len() >= limit)
        };
        if cancel {
            self.shutdown.trigger();
            TickOutcome::Cancelled
        } else {
            TickOutcome::Elapsed
        }
    }

    fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }
}
