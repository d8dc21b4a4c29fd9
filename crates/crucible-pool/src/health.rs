use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Per-slot failure tracking, shaped like a `generation`/`last_error` pair
/// but repurposed for quarantine rather than optimistic concurrency: once
/// `threshold` consecutive driver failures are observed on a slot, it's
/// skipped by `try_reserve` until `cool_down` elapses.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    consecutive_failures: u32,
    quarantined_until: Option<DateTime<Utc>>,
    threshold: u32,
    cool_down: ChronoDuration,
}

impl HealthTracker {
    pub fn new(threshold: u32, cool_down: ChronoDuration) -> Self {
        Self { consecutive_failures: 0, quarantined_until: None, threshold, cool_down }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.quarantined_until = None;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.threshold {
            self.quarantined_until = Some(now + self.cool_down);
        }
    }

    pub fn is_quarantined(&self, now: DateTime<Utc>) -> bool {
        self.quarantined_until.map(|until| now < until).unwrap_or(false)
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(3, ChronoDuration::seconds(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantines_after_threshold_consecutive_failures() {
        let now = Utc::now();
        let mut tracker = HealthTracker::new(3, ChronoDuration::seconds(10));
        tracker.record_failure(now);
        tracker.record_failure(now);
        assert!(!tracker.is_quarantined(now));
        tracker.record_failure(now);
        assert!(tracker.is_quarantined(now));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let now = Utc::now();
        let mut tracker = HealthTracker::new(2, ChronoDuration::seconds(10));
        tracker.record_failure(now);
        tracker.record_success();
        tracker.record_failure(now);
        assert!(!tracker.is_quarantined(now));
    }

    #[test]
    fn quarantine_lifts_once_cool_down_elapses() {
        let now = Utc::now();
        let mut tracker = HealthTracker::new(1, ChronoDuration::seconds(10));
        tracker.record_failure(now);
        assert!(tracker.is_quarantined(now));
        assert!(!tracker.is_quarantined(now + ChronoDuration::seconds(11)));
    }
}
