#![forbid(unsafe_code)]
//! Clock abstraction driving every wait in the allocation protocol.
//!
//! The claim-verify protocol only needs two properties from time: a monotone
//! elapsed counter for budgets and a wall-clock timestamp stamped into claims.
//! [`SystemClock`] reads the OS clocks and sleeps on a condition variable so a
//! [`Shutdown`] can cut a wait short. [`ManualClock`] is virtual time: sleeping
//! advances it instantly, which keeps the protocol's ordering argument intact
//! while tests run without real delays.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};

/// Source of elapsed time, timestamps and sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Monotone time since the clock was created.
    fn elapsed(&self) -> Duration;

    /// Microseconds since the Unix epoch, stamped into claims.
    fn timestamp_micros(&self) -> u64;

    /// Sleeps for `duration` unless `shutdown` fires first.
    ///
    /// Returns `false` when the sleep was interrupted.
    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> bool;
}

/// Cooperative cancellation flag shared by an authority and its sleepers.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

#[derive(Debug, Default)]
struct ShutdownInner {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Shutdown {
    /// Creates an unfired signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal and wakes every sleeper.
    pub fn fire(&self) {
        let mut fired = self.inner.fired.lock();
        *fired = true;
        self.inner.cond.notify_all();
    }

    /// Returns true once [`Shutdown::fire`] has been called.
    pub fn is_fired(&self) -> bool {
        *self.inner.fired.lock()
    }

    /// Blocks for up to `duration`; returns `false` if fired before or during the wait.
    fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut fired = self.inner.fired.lock();
        while !*fired {
            if self.inner.cond.wait_until(&mut fired, deadline).timed_out() {
                return !*fired;
            }
        }
        false
    }
}

/// Wall clock backed by [`Instant`] and [`SystemTime`].
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a clock whose elapsed time starts now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    fn timestamp_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }

    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> bool {
        if duration.is_zero() {
            return !shutdown.is_fired();
        }
        shutdown.wait(duration)
    }
}

/// Virtual clock for deterministic tests.
///
/// All handles cloned from one `ManualClock` share the same time. Sleeping
/// advances the shared time and returns immediately, so concurrent threads
/// observe a single monotone timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_micros: Arc<AtomicU64>,
    epoch_micros: u64,
}

impl ManualClock {
    /// Starts virtual time at zero elapsed, with timestamps counted from `epoch_micros`.
    pub fn new(epoch_micros: u64) -> Self {
        Self {
            now_micros: Arc::new(AtomicU64::new(0)),
            epoch_micros,
        }
    }

    /// Moves virtual time forward.
    pub fn advance(&self, by: Duration) {
        self.now_micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_600_000_000_000_000)
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        Duration::from_micros(self.now_micros.load(Ordering::SeqCst))
    }

    fn timestamp_micros(&self) -> u64 {
        self.epoch_micros + self.now_micros.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration, shutdown: &Shutdown) -> bool {
        if shutdown.is_fired() {
            return false;
        }
        self.advance(duration);
        true
    }
}
