use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of the authoritative "now" for every lifecycle decision.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock of the server process
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Arc::new(Mutex::new(start)) }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Time left until `deadline`, clamped at zero.
pub fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    if deadline > now {
        deadline - now
    } else {
        Duration::zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let other = clock.clone();
        clock.advance(Duration::minutes(2));
        assert_eq!(other.now(), start + Duration::minutes(2));
    }

    #[test]
    fn remaining_never_goes_negative() {
        let now = Utc::now();
        assert_eq!(remaining(now - Duration::seconds(5), now), Duration::zero());
        assert_eq!(remaining(now + Duration::seconds(5), now), Duration::seconds(5));
    }
}
