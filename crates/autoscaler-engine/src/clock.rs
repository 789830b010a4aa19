//! Time source for scaling decisions.

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock abstraction.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Nanoseconds since the unix epoch, saturating at the `i64` range.
pub fn unix_nanos(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fakes::FakeClock;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::at_unix_nanos(1_000);
        assert_eq!(unix_nanos(clock.now()), 1_000);

        clock.advance(Duration::from_secs(1));
        assert_eq!(unix_nanos(clock.now()), 1_000_001_000);

        clock.set(UNIX_EPOCH);
        assert_eq!(unix_nanos(clock.now()), 0);
    }

    #[test]
    fn unix_nanos_before_epoch_is_zero() {
        let before = UNIX_EPOCH - Duration::from_secs(5);
        assert_eq!(unix_nanos(before), 0);
    }

    #[test]
    fn unix_nanos_saturates() {
        let far = UNIX_EPOCH + Duration::from_secs(i64::MAX as u64 / 1_000);
        assert_eq!(unix_nanos(far), i64::MAX);
    }
}
