//! Time source abstraction.
//!
//! Every component that reads "now" or waits for an instant goes through
//! [`Clock`], so tests can drive the engine deterministically with a
//! [`VirtualClock`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

/// Source of the current instant and of timed waits.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    /// Resolve after `duration` has elapsed on this clock.
    async fn sleep(&self, duration: Duration) {
        let deadline = deadline_after(self.now(), duration);
        self.sleep_until(deadline).await;
    }
}

/// `now + duration`, saturating at the maximum representable instant.
pub fn deadline_after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ═══════════════════════════════════════════════════════════════════════════════
// System Clock
// ═══════════════════════════════════════════════════════════════════════════════

/// Wall-clock time backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        // Re-check after waking: the wall clock can be adjusted while we sleep.
        loop {
            let now = Utc::now();
            if now >= deadline {
                return;
            }
            let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining).await;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Virtual Clock
// ═══════════════════════════════════════════════════════════════════════════════

/// Manually advanced clock for deterministic tests.
///
/// Time only moves when [`VirtualClock::advance`] or [`VirtualClock::set`] is
/// called. Sleepers are woken through a watch channel, so the clock works
/// across runtimes (including the dedicated scheduler thread).
#[derive(Debug)]
pub struct VirtualClock {
    now: watch::Sender<DateTime<Utc>>,
}

impl VirtualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.send_modify(|now| *now = deadline_after(*now, by));
    }

    /// Jump to `to`. Moving backwards is ignored.
    pub fn set(&self, to: DateTime<Utc>) {
        self.now.send_modify(|now| {
            if to > *now {
                *now = to;
            }
        });
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut rx = self.now.subscribe();
        loop {
            if *rx.borrow_and_update() >= deadline {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
