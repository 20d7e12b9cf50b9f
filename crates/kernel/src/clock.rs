use std::sync::{Arc, Mutex};

use time::{Duration, OffsetDateTime};

/// Source of "now" for every time-dependent rule.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock {
    time: Mutex<OffsetDateTime>,
}

impl FixedClock {
    pub fn new(time: OffsetDateTime) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    pub fn set(&self, time: OffsetDateTime) {
        *self.time.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = time;
    }

    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *time += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        *self.time.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn fixed_clock_advances_only_when_told() {
        let clock = FixedClock::new(datetime!(2025-01-01 00:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-01-01 00:00 UTC));

        clock.advance(Duration::days(3));
        assert_eq!(clock.now(), datetime!(2025-01-04 00:00 UTC));

        clock.set(datetime!(2024-06-30 12:00 UTC));
        assert_eq!(clock.now(), datetime!(2024-06-30 12:00 UTC));
    }
}
