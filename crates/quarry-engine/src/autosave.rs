//! Auto-save timing.
//!
//! The engine polls an [`AutoSaveTimer`] from its main loop and saves the
//! world whenever the interval has elapsed since the last save.

use std::time::{Duration, Instant};

/// Default auto-save interval in seconds.
pub const DEFAULT_AUTOSAVE_INTERVAL: u32 = 300; // 5 minutes

/// Minimum auto-save interval in seconds.
pub const MIN_AUTOSAVE_INTERVAL: u32 = 30;

/// Tracks when the next automatic save is due.
#[derive(Debug, Clone)]
pub struct AutoSaveTimer {
    /// Interval between saves; `None` when disabled.
    interval: Option<Duration>,
    /// Last save instant.
    last_save_time: Instant,
    /// Saves performed.
    save_count: u32,
}

impl Default for AutoSaveTimer {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSAVE_INTERVAL, Instant::now())
    }
}

impl AutoSaveTimer {
    /// Creates a timer counting from `now`. An interval of 0 disables it.
    #[must_use]
    pub fn new(interval_seconds: u32, now: Instant) -> Self {
        let interval = (interval_seconds > 0)
            .then(|| Duration::from_secs(u64::from(interval_seconds.max(MIN_AUTOSAVE_INTERVAL))));
        Self {
            interval,
            last_save_time: now,
            save_count: 0,
        }
    }

    /// Returns whether auto-save is enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Returns whether a save is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.interval
            .is_some_and(|interval| now.saturating_duration_since(self.last_save_time) >= interval)
    }

    /// Returns time until next auto-save, or `None` when disabled.
    #[must_use]
    pub fn time_until_next_save(&self, now: Instant) -> Option<Duration> {
        self.interval
            .map(|interval| interval.saturating_sub(now.saturating_duration_since(self.last_save_time)))
    }

    /// Records a save at `now`.
    pub fn mark_saved(&mut self, now: Instant) {
        self.last_save_time = now;
        self.save_count += 1;
    }

    /// Saves performed so far.
    #[must_use]
    pub fn save_count(&self) -> u32 {
        self.save_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_due_after_interval() {
        let start = Instant::now();
        let mut timer = AutoSaveTimer::new(60, start);
        assert!(timer.is_enabled());
        assert!(!timer.is_due(start + Duration::from_secs(59)));
        assert!(timer.is_due(start + Duration::from_secs(60)));

        timer.mark_saved(start + Duration::from_secs(61));
        assert_eq!(timer.save_count(), 1);
        assert!(!timer.is_due(start + Duration::from_secs(100)));
        assert_eq!(
            timer.time_until_next_save(start + Duration::from_secs(100)),
            Some(Duration::from_secs(21))
        );
    }

    #[test]
    fn test_interval_clamped_to_minimum() {
        let start = Instant::now();
        let timer = AutoSaveTimer::new(1, start);
        assert!(!timer.is_due(start + Duration::from_secs(10)));
        assert!(timer.is_due(start + Duration::from_secs(u64::from(MIN_AUTOSAVE_INTERVAL))));
    }

    #[test]
    fn test_disabled_timer_never_fires() {
        let start = Instant::now();
        let timer = AutoSaveTimer::new(0, start);
        assert!(!timer.is_enabled());
        assert!(!timer.is_due(start + Duration::from_secs(1_000_000)));
        assert_eq!(timer.time_until_next_save(start), None);
    }

    #[test]
    fn test_clock_before_last_save() {
        let start = Instant::now() + Duration::from_secs(5);
        let timer = AutoSaveTimer::new(60, start);
        assert!(!timer.is_due(Instant::now()));
    }
}
