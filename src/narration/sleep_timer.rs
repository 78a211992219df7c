use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Durations offered by the reader UI, in minutes.
pub const SLEEP_TIMER_PRESETS: [u64; 4] = [15, 30, 45, 60];

/// Longer requests are shortened to this.
pub const MAX_SLEEP_TIMER: Duration = Duration::from_secs(24 * 60 * 60);

/// One-shot pause deadline. At most one is pending; setting a new one
/// replaces the old.
#[derive(Debug, Default)]
pub struct SleepTimer {
    deadline: Option<Instant>,
    ends_at: Option<SystemTime>,
}

impl SleepTimer {
    pub fn set(&mut self, duration: Duration, now: Instant) {
        if self.deadline.is_some() {
            debug!("Replacing pending sleep timer");
        }
        let duration = if duration > MAX_SLEEP_TIMER {
            warn!(requested = ?duration, "Sleep timer capped at 24 hours");
            MAX_SLEEP_TIMER
        } else {
            duration
        };
        self.deadline = now.checked_add(duration);
        self.ends_at = SystemTime::now().checked_add(duration);
        info!(seconds = duration.as_secs(), "Sleep timer set");
    }

    pub fn set_minutes(&mut self, minutes: u64, now: Instant) {
        self.set(Duration::from_secs(minutes.saturating_mul(60)), now);
    }

    pub fn clear(&mut self) {
        if self.deadline.take().is_some() {
            info!("Sleep timer cleared");
        }
        self.ends_at = None;
    }

    /// True exactly once, when the deadline has passed. The timer is gone
    /// afterwards.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.ends_at = None;
                info!("Sleep timer elapsed");
                true
            }
            _ => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    pub fn ends_at_unix(&self) -> Option<u64> {
        self.ends_at
            .and_then(|at| at.duration_since(UNIX_EPOCH).ok())
            .map(|since| since.as_secs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replacing_keeps_a_single_deadline() {
        let mut timer = SleepTimer::default();
        let start = Instant::now();
        timer.set_minutes(1, start);
        timer.set_minutes(5, start);

        assert!(!timer.poll(start + Duration::from_secs(60)));
        assert!(timer.deadline().is_some());
        assert!(timer.poll(start + Duration::from_secs(300)));
        assert!(timer.deadline().is_none());
        assert!(!timer.poll(start + Duration::from_secs(600)));
    }

    #[test]
    fn oversized_request_is_capped() {
        let mut timer = SleepTimer::default();
        let start = Instant::now();
        timer.set_minutes(u64::MAX / 60, start);

        assert_eq!(timer.remaining(start), Some(MAX_SLEEP_TIMER));
        assert!(!timer.poll(start + MAX_SLEEP_TIMER - Duration::from_secs(1)));
        assert!(timer.poll(start + MAX_SLEEP_TIMER));
    }

    #[test]
    fn cleared_timer_never_fires() {
        let mut timer = SleepTimer::default();
        let start = Instant::now();
        timer.set(Duration::from_secs(10), start);
        timer.clear();
        assert!(!timer.poll(start + Duration::from_secs(11)));
        assert_eq!(timer.ends_at_unix(), None);
    }

    #[test]
    fn remaining_counts_down() {
        let mut timer = SleepTimer::default();
        let start = Instant::now();
        timer.set_minutes(SLEEP_TIMER_PRESETS[0], start);
        assert_eq!(
            timer.remaining(start + Duration::from_secs(60)),
            Some(Duration::from_secs(14 * 60))
        );
        assert!(timer.ends_at_unix().is_some());
    }
}
