//! Tick Pacing
//!
//! Two fixed-step accumulators on one monotonic clock: the simulation tick
//! and the (slower) snapshot cadence. The caller sleeps until
//! [`TickPacer::next_deadline`] and then asks what is due.

use std::time::{Duration, Instant};

/// Most ticks run in one catch-up burst.
pub const MAX_CATCH_UP_TICKS: u32 = 8;

/// Work due after [`TickPacer::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacerDue {
    /// Simulation ticks to run now
    pub ticks: u32,
    /// Broadcast a snapshot after the ticks
    pub snapshot: bool,
    /// Ticks dropped because the loop fell too far behind
    pub dropped: u32,
}

/// Fixed-rate simulation and snapshot clock.
#[derive(Debug, Clone)]
pub struct TickPacer {
    tick_interval: Duration,
    snapshot_interval: Duration,
    tick_acc: Duration,
    snapshot_acc: Duration,
    last: Instant,
}

impl TickPacer {
    /// Pacer starting at `now`. Rates are clamped to at least 1 Hz.
    pub fn new(tick_rate: u32, snapshot_rate: u32, now: Instant) -> Self {
        Self {
            tick_interval: Duration::from_secs(1) / tick_rate.max(1),
            snapshot_interval: Duration::from_secs(1) / snapshot_rate.max(1),
            tick_acc: Duration::ZERO,
            snapshot_acc: Duration::ZERO,
            last: now,
        }
    }

    /// Seconds per simulation tick.
    pub fn dt(&self) -> f32 {
        self.tick_interval.as_secs_f32()
    }

    /// Fold elapsed time into both accumulators and report what is due.
    pub fn advance(&mut self, now: Instant) -> PacerDue {
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        self.tick_acc += elapsed;
        self.snapshot_acc += elapsed;

        let mut due = PacerDue::default();
        while self.tick_acc >= self.tick_interval {
            self.tick_acc -= self.tick_interval;
            if due.ticks < MAX_CATCH_UP_TICKS {
                due.ticks += 1;
            } else {
                due.dropped += 1;
            }
        }

        if self.snapshot_acc >= self.snapshot_interval {
            // several missed broadcasts collapse into one
            while self.snapshot_acc >= self.snapshot_interval {
                self.snapshot_acc -= self.snapshot_interval;
            }
            due.snapshot = true;
        }
        due
    }

    /// Earliest instant at which either accumulator fills.
    pub fn next_deadline(&self) -> Instant {
        let tick_wait = self.tick_interval.saturating_sub(self.tick_acc);
        let snapshot_wait = self.snapshot_interval.saturating_sub(self.snapshot_acc);
        self.last + tick_wait.min(snapshot_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_and_snapshots_at_their_own_rates() {
        let start = Instant::now();
        let mut pacer = TickPacer::new(60, 30, start);
        let mut ticks = 0;
        let mut snapshots = 0;
        for ms in 1..=1000u64 {
            let due = pacer.advance(start + Duration::from_millis(ms));
            ticks += due.ticks;
            snapshots += due.snapshot as u32;
        }
        assert!((59..=60).contains(&ticks), "ticks {ticks}");
        assert!((29..=30).contains(&snapshots), "snapshots {snapshots}");
    }

    #[test]
    fn test_catch_up_is_bounded() {
        let start = Instant::now();
        let mut pacer = TickPacer::new(60, 30, start);
        let due = pacer.advance(start + Duration::from_secs(1));
        assert_eq!(due.ticks, MAX_CATCH_UP_TICKS);
        assert!(due.dropped >= 50);
        assert!(due.snapshot);

        // the backlog is gone, not deferred
        let due = pacer.advance(start + Duration::from_secs(1) + Duration::from_millis(1));
        assert_eq!(due.ticks, 0);
    }

    #[test]
    fn test_next_deadline_is_earlier_of_the_two() {
        let start = Instant::now();
        let pacer = TickPacer::new(60, 30, start);
        let wait = pacer.next_deadline() - start;
        assert_eq!(wait, Duration::from_secs(1) / 60);

        let slow_ticks = TickPacer::new(10, 30, start);
        assert_eq!(slow_ticks.next_deadline() - start, Duration::from_secs(1) / 30);
    }

    #[test]
    fn test_dt() {
        let pacer = TickPacer::new(60, 30, Instant::now());
        assert!((pacer.dt() - 1.0 / 60.0).abs() < 1e-6);
    }
}
