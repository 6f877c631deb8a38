//! Logical trace time.

use crate::error::TrackerError;

/// Monotonic time cursor driven by event timestamps (nanoseconds).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    now: Option<u64>,
}

impl Clock {
    pub fn new() -> Self {
        Self { now: None }
    }

    /// Moves the clock to `time`. Fails if `time` is older than the current
    /// time; equal timestamps are accepted.
    pub fn advance(&mut self, time: u64) -> Result<(), TrackerError> {
        if let Some(now) = self.now {
            if time < now {
                return Err(TrackerError::Ordering { now, time });
            }
        }

        self.now = Some(time);

        Ok(())
    }

    /// Current time, `0` before the first event.
    pub fn now(&self) -> u64 {
        self.now.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::Clock;
    use crate::error::TrackerError;

    #[test]
    fn test_clock_monotonic() {
        let mut clock = Clock::new();

        assert_eq!(clock.now(), 0);

        clock.advance(10).unwrap();
        clock.advance(10).unwrap();
        clock.advance(25).unwrap();

        assert_eq!(clock.now(), 25);
        assert_eq!(
            clock.advance(24),
            Err(TrackerError::Ordering { now: 25, time: 24 })
        );
        assert_eq!(clock.now(), 25);
    }
}
