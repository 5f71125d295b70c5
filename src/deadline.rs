use std::time::{Duration, Instant};

/// A single source of truth for how much time remains on a logical operation,
/// so that every RPC derives its timeout from one monotonic anchor rather
/// than juggling wall-clock timestamps.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    t0: Instant,
    duration: Duration,
}

impl Deadline {
    #[must_use]
    pub fn starting_now(duration: Duration) -> Self {
        Self {
            t0: Instant::now(),
            duration,
        }
    }

    /// A deadline that never passes, for `query_timeout = 0` (no timeout).
    #[must_use]
    pub fn never() -> Self {
        Self::starting_now(Duration::from_secs(u64::MAX / 2))
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.duration
            .checked_sub(self.t0.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn has_passed(&self) -> bool {
        self.t0.elapsed() >= self.duration
    }

    /// The shorter of this deadline's residual and a per-RPC network timeout.
    #[must_use]
    pub fn residual_or(&self, network_timeout: Option<Duration>) -> Duration {
        match network_timeout {
            Some(nt) => self.remaining().min(nt),
            None => self.remaining(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_shrinks_towards_zero() {
        let d = Deadline::starting_now(Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(5));
        assert!(d.remaining() < Duration::from_millis(20));
        assert!(!d.has_passed());
    }

    #[test]
    fn has_passed_after_duration_elapses() {
        let d = Deadline::starting_now(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(10));
        assert!(d.has_passed());
        assert_eq!(d.remaining(), Duration::ZERO);
    }

    #[test]
    fn residual_or_takes_the_shorter_bound() {
        let d = Deadline::starting_now(Duration::from_secs(10));
        assert_eq!(d.residual_or(Some(Duration::from_secs(1))), Duration::from_secs(1));
    }
}
