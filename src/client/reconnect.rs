//! Reconnect backoff: `1s * 2^n`, capped, with jitter,
//! reset to the floor on a successful reconnect.

use std::time::Duration;

use rand::Rng;

pub struct Backoff {
    floor_ms: u64,
    cap_ms: u64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(floor_ms: u64, cap_ms: u64, jitter: f64) -> Self {
        Backoff {
            floor_ms,
            cap_ms,
            jitter,
            attempt: 0,
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// The delay for the next attempt, with the attempt counter advanced.
    pub fn next_delay(&mut self) -> Duration {
        let shift = self.attempt.min(20);
        self.attempt += 1;
        let base = self.floor_ms.saturating_mul(1u64 << shift).min(self.cap_ms);
        if self.jitter <= 0.0 {
            return Duration::from_millis(base);
        }
        let span = (base as f64 * self.jitter) as i64;
        let offset = if span > 0 {
            rand::thread_rng().gen_range(-span..=span)
        } else {
            0
        };
        let delayed = (base as i64 + offset).max(0) as u64;
        Duration::from_millis(delayed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_each_attempt_without_jitter() {
        let mut b = Backoff::new(1000, 30_000, 0.0);
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
        assert_eq!(b.next_delay(), Duration::from_millis(2000));
        assert_eq!(b.next_delay(), Duration::from_millis(4000));
    }

    #[test]
    fn delay_caps_at_ceiling() {
        let mut b = Backoff::new(1000, 5000, 0.0);
        for _ in 0..10 {
            let d = b.next_delay();
            assert!(d <= Duration::from_millis(5000));
        }
    }

    #[test]
    fn reset_returns_to_floor() {
        let mut b = Backoff::new(1000, 30_000, 0.0);
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(1000));
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let mut b = Backoff::new(1000, 30_000, 0.2);
        for _ in 0..50 {
            let d = b.next_delay().as_millis() as i64;
            assert!(d >= 0);
        }
    }
}
