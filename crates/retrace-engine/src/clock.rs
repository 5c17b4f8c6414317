//! Time source and poll stepping.
//!
//! Every wait in the engine goes through a `Clock` so elapsed-time behaviour can be
//! driven by `ManualClock` in tests without real delays.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time since the clock's origin.
    fn now(&self) -> Duration;

    /// Suspend the current task, yielding to the host runtime.
    async fn sleep(&self, duration: Duration);

    fn now_ms(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// Monotonic tokio clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` advances time instantly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn advance(&self, duration: Duration) {
        self.now_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms.load(Ordering::SeqCst))
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await;
    }
}

/// Shared cancellation flag, checked between poll ticks.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Overall limit for a top-level operation, expressed in clock time.
#[derive(Debug, Clone, Default)]
pub struct Deadline {
    at: Option<Duration>,
    cancel: Option<CancelFlag>,
}

impl Deadline {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn after(clock: &dyn Clock, budget: Duration) -> Self {
        Self {
            at: Some(clock.now() + budget),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn at(&self) -> Option<Duration> {
        self.at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }

    pub fn expired(&self, clock: &dyn Clock) -> bool {
        self.is_cancelled() || self.at.is_some_and(|at| clock.now() >= at)
    }

    pub fn remaining(&self, clock: &dyn Clock) -> Option<Duration> {
        self.at.map(|at| at.saturating_sub(clock.now()))
    }
}

/// Why a poll loop stopped without its condition being met.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStop {
    TimedOut,
    Cancelled,
}

/// Explicit poll state machine.
///
/// ```ignore
/// let mut poll = Poller::start(clock, timeout, interval, deadline);
/// loop {
///     if check().await { break; }
///     if let Err(stop) = poll.tick().await { /* give up */ }
/// }
/// ```
///
/// `tick` sleeps at most one interval and never past the end of the budget, so a
/// failing wait returns no earlier than `timeout` and no later than `timeout + interval`.
pub struct Poller<'a> {
    clock: &'a dyn Clock,
    started: Duration,
    end: Duration,
    interval: Duration,
    deadline: &'a Deadline,
    ticks: u32,
}

impl<'a> Poller<'a> {
    pub fn start(
        clock: &'a dyn Clock,
        timeout: Duration,
        interval: Duration,
        deadline: &'a Deadline,
    ) -> Self {
        let started = clock.now();
        let mut end = started + timeout;
        if let Some(at) = deadline.at() {
            end = end.min(at);
        }
        Self {
            clock,
            started,
            end,
            interval: interval.max(Duration::from_millis(1)),
            deadline,
            ticks: 0,
        }
    }

    pub async fn tick(&mut self) -> Result<(), PollStop> {
        if self.deadline.is_cancelled() {
            return Err(PollStop::Cancelled);
        }
        let now = self.clock.now();
        if now >= self.end {
            return Err(self.stop_reason());
        }
        let step = self.interval.min(self.end - now);
        self.clock.sleep(step).await;
        self.ticks += 1;
        if self.deadline.is_cancelled() {
            return Err(PollStop::Cancelled);
        }
        Ok(())
    }

    fn stop_reason(&self) -> PollStop {
        if self.deadline.expired(self.clock) {
            PollStop::Cancelled
        } else {
            PollStop::TimedOut
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.now().saturating_sub(self.started)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 250);
    }

    #[tokio::test]
    async fn test_poller_stops_at_timeout() {
        let clock = ManualClock::new();
        let deadline = Deadline::none();
        let mut poll = Poller::start(
            &clock,
            Duration::from_millis(250),
            Duration::from_millis(100),
            &deadline,
        );
        let mut ticks = 0;
        while poll.tick().await.is_ok() {
            ticks += 1;
        }
        assert_eq!(ticks, 3);
        assert_eq!(clock.now_ms(), 250);
    }

    #[tokio::test]
    async fn test_deadline_caps_timeout() {
        let clock = ManualClock::new();
        let deadline = Deadline::after(&clock, Duration::from_millis(150));
        let mut poll = Poller::start(
            &clock,
            Duration::from_millis(10_000),
            Duration::from_millis(100),
            &deadline,
        );
        let stop = loop {
            if let Err(stop) = poll.tick().await {
                break stop;
            }
        };
        assert_eq!(stop, PollStop::Cancelled);
        assert_eq!(clock.now_ms(), 150);
    }

    #[tokio::test]
    async fn test_cancel_flag_stops_between_ticks() {
        let clock = ManualClock::new();
        let flag = CancelFlag::new();
        let deadline = Deadline::none().with_cancel(flag.clone());
        let mut poll = Poller::start(
            &clock,
            Duration::from_millis(1_000),
            Duration::from_millis(100),
            &deadline,
        );
        assert!(poll.tick().await.is_ok());
        flag.cancel();
        assert_eq!(poll.tick().await, Err(PollStop::Cancelled));
        assert_eq!(clock.now_ms(), 100);
    }
}
