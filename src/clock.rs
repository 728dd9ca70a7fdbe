//! Time source abstraction.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of the current time.
///
/// Implementations must be monotonically non-decreasing. The history never
/// reads the wall clock directly, which is what makes the age-based eviction
/// policy testable.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by [`Instant::now`].
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. For tests and simulations.
#[derive(Debug)]
pub struct SimulatedClock {
    now: Mutex<Instant>,
}

impl SimulatedClock {
    /// Create a clock stopped at `start`.
    pub fn new(start: Instant) -> Self {
        SimulatedClock {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simulated_clock_advances() {
        let start = Instant::now();
        let clock = SimulatedClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::from_millis(100));
        assert_eq!(clock.now(), start + Duration::from_millis(100));

        clock.advance(Duration::from_millis(1));
        assert_eq!(clock.now(), start + Duration::from_millis(101));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock;
        let t1 = clock.now();
        let t2 = clock.now();
        assert!(t2 >= t1);
    }
}
