// ── Timers ──
//
// The session multiplexes these in one `select!` loop. Both work with
// tokio's paused clock.

use std::future::{self, Future};
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Fixed-period timer. A slow handler delays later ticks instead of
/// bunching them up.
#[derive(Debug)]
pub struct Recurring {
    interval: Interval,
}

impl Recurring {
    /// First tick fires immediately.
    pub fn immediate(period: Duration) -> Self {
        Self::starting_at(Instant::now(), period)
    }

    /// First tick fires after one full period.
    pub fn after(period: Duration) -> Self {
        Self::starting_at(Instant::now() + period, period)
    }

    fn starting_at(start: Instant, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Single deadline that can be armed, re-armed, or cancelled.
#[derive(Debug, Default)]
pub struct OneShot {
    deadline: Option<Instant>,
}

impl OneShot {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Resolves at the deadline; pends forever while idle. Disarms itself
    /// once fired.
    pub fn fired(&mut self) -> impl Future<Output = ()> + '_ {
        async move {
            match self.deadline {
                Some(at) => {
                    tokio::time::sleep_until(at).await;
                    self.deadline = None;
                }
                None => future::pending::<()>().await,
            }
        }
    }
}
