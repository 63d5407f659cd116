//! Exponential backoff between idle ticks of the main loop, so an empty
//! queue doesn't turn into a busy poll against the store.

use std::time::Duration;

/// `base * factor.powi(ticks)`, capped at `max`, reset to zero ticks on
/// every success.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Duration,
    ticks: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, factor: f64, max: Duration) -> Self {
        Self { base, factor, max, ticks: 0 }
    }

    /// The delay to sleep for the current tick count, then advances the
    /// tick count for next time.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.base.mul_f64(self.factor.powi(self.ticks as i32));
        self.ticks = self.ticks.saturating_add(1);
        delay.min(self.max)
    }

    /// Resets the tick count after a successful unit of work, so the next
    /// idle period starts backing off from `base` again.
    pub fn reset(&mut self) {
        self.ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_and_caps() {
        let mut b = Backoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_millis(100));
        assert_eq!(b.next_delay(), Duration::from_millis(200));
        assert_eq!(b.next_delay(), Duration::from_millis(400));
        for _ in 0..20 {
            b.next_delay();
        }
        assert_eq!(b.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn reset_restarts_from_base() {
        let mut b = Backoff::new(Duration::from_millis(100), 2.0, Duration::from_secs(5));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }
}
