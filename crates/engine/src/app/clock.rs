use serde::{Deserialize, Serialize};

/// Millisecond timestamp on the session clock.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimInstant(pub u64);

impl SimInstant {
    pub const ZERO: SimInstant = SimInstant(0);

    pub fn from_ms(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_ms(self) -> u64 {
        self.0
    }

    pub fn after_ms(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn ms_since(self, earlier: SimInstant) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// True once `now` has reached this instant.
    pub fn has_passed(self, now: SimInstant) -> bool {
        now.0 >= self.0
    }
}

/// Monotonic session clock. Every deadline in the simulation is derived from it, so advancing
/// it is the only way time moves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimClock {
    now: SimInstant,
}

impl SimClock {
    pub fn starting_at(ms: u64) -> Self {
        Self {
            now: SimInstant(ms),
        }
    }

    pub fn now(&self) -> SimInstant {
        self.now
    }

    pub fn advance(&mut self, dt_ms: u64) -> SimInstant {
        self.now = self.now.after_ms(dt_ms);
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic_and_saturating() {
        let mut clock = SimClock::starting_at(u64::MAX - 5);
        assert_eq!(clock.advance(10), SimInstant(u64::MAX));
        assert_eq!(clock.advance(1), SimInstant(u64::MAX));
    }

    #[test]
    fn deadlines_pass_at_their_exact_instant() {
        let deadline = SimInstant(100).after_ms(50);
        assert!(!deadline.has_passed(SimInstant(149)));
        assert!(deadline.has_passed(SimInstant(150)));
        assert_eq!(SimInstant(150).ms_since(SimInstant(200)), 0);
    }
}
