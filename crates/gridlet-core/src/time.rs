//! Clock abstraction for timestamps and backoff sleeps.
//!
//! The delivery processor sleeps a lot: idle polling, error backoff, retry
//! delays and pacing. Routing every sleep through [`Clock`] lets tests cycle
//! a task through all of its attempts without waiting real minutes.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Source of wall-clock time and sleeps.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current UTC time, used for received timestamps.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the specified duration.
    ///
    /// In production this maps to `tokio::time::sleep`; test clocks may
    /// advance virtual time and return immediately.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Production clock backed by the system time and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock instance.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Deterministic clock for tests.
///
/// Sleeping advances virtual time by the requested duration, records it,
/// and yields once so other tasks get to run. Clones share state.
#[derive(Debug, Clone)]
pub struct TestClock {
    /// Current time as nanoseconds since the UNIX epoch
    now_ns: Arc<AtomicI64>,
    /// Start time, for `elapsed`
    start_ns: i64,
    /// Every duration passed to `sleep`, in call order
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(Utc::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: DateTime<Utc>) -> Self {
        let start_ns = start.timestamp_nanos_opt().unwrap_or_default();
        Self {
            now_ns: Arc::new(AtomicI64::new(start_ns)),
            start_ns,
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Advances the clock without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let duration_ns = i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX);
        let _ = self.now_ns.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_add(duration_ns))
        });
    }

    /// Returns virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        let elapsed = self.now_ns.load(Ordering::Acquire).saturating_sub(self.start_ns);
        Duration::from_nanos(u64::try_from(elapsed).unwrap_or(0))
    }

    /// Returns every duration slept so far.
    pub fn recorded_sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|sleeps| sleeps.clone()).unwrap_or_default()
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.now_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        Box::pin(tokio::task::yield_now())
    }
}
