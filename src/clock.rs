use std::time::Duration;

use tokio::time::Instant;

/// Upper bound on any single sleep so a pending `tick()` future reacts to
/// cancellation within a bounded latency.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Fixed-period tick source for the control loop.
///
/// Tick N targets `start + N * period`, so scheduling error never
/// accumulates. A late wake does not fire catch-up ticks; the ticker skips
/// to the next future slot and counts the missed ones.
#[derive(Debug)]
pub struct Ticker {
    start: Instant,
    period: Duration,
    ticks: u64,
    missed: u64,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        assert!(!period.is_zero());
        Self {
            start: Instant::now(),
            period,
            ticks: 0,
            missed: 0,
        }
    }

    /// Waits until the next tick boundary.
    pub async fn tick(&mut self) {
        let mut next = self.ticks + 1;
        let elapsed = Instant::now() - self.start;
        let behind = (elapsed.as_nanos() / self.period.as_nanos()) as u64 + 1;
        if behind > next {
            self.missed += behind - next;
            next = behind;
        }

        let target = self.start + Duration::from_nanos(self.period.as_nanos() as u64 * next);
        loop {
            let now = Instant::now();
            if now >= target {
                break;
            }
            tokio::time::sleep((target - now).min(MAX_SLEEP_SLICE)).await;
        }
        self.ticks = next;
    }

    /// Ticks skipped because the loop woke too late to service them.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}
