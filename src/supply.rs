//! Time and identifier sources injected into the engine.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> String;
}

/// Wall clock that never hands out a timestamp earlier than one it already
/// issued, so `last_validated_at` cannot move backwards across a clock step.
#[derive(Debug, Default)]
pub struct SystemClock {
    last_issued_micros: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let observed = Utc::now().timestamp_micros();
        let previous = self
            .last_issued_micros
            .fetch_max(observed, Ordering::SeqCst);
        let issued = previous.max(observed);
        Utc.timestamp_opt(
            issued.div_euclid(1_000_000),
            (issued.rem_euclid(1_000_000) * 1_000) as u32,
        )
        .single()
        .unwrap_or_else(Utc::now)
    }
}

/// Settable clock for tests and replay.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = *guard + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn new_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let future = Utc::now() + Duration::hours(1);
        clock
            .last_issued_micros
            .store(future.timestamp_micros(), Ordering::SeqCst);
        let first = clock.now();
        let second = clock.now();
        assert!(first >= future - Duration::microseconds(1));
        assert!(second >= first);
    }

    #[test]
    fn manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::days(31));
        assert_eq!(clock.now(), start + Duration::days(31));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn uuid_ids_are_unique() {
        let ids = UuidGenerator;
        assert_ne!(ids.new_id(), ids.new_id());
    }
}
