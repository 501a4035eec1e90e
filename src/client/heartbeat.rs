//! Client-side heartbeat watchdog. Starts with no
//! timeout; the first `heartbeat` frame sets `frequency_ms`. Every
//! received frame of any type resets the last-message clock.

use std::time::{Duration, Instant};

pub struct Watchdog {
    frequency_ms: Option<u64>,
    last_message: Instant,
}

impl Watchdog {
    pub fn new() -> Self {
        Watchdog {
            frequency_ms: None,
            last_message: Instant::now(),
        }
    }

    pub fn note_message(&mut self) {
        self.last_message = Instant::now();
    }

    pub fn note_heartbeat(&mut self, frequency_ms: u64) {
        if self.frequency_ms.is_none() {
            self.frequency_ms = Some(frequency_ms);
        }
        self.note_message();
    }

    /// `now - last_message > 3 * frequency_ms`. `false` until the first
    /// heartbeat establishes a frequency.
    pub fn is_expired(&self) -> bool {
        match self.frequency_ms {
            Some(f) => self.last_message.elapsed() > Duration::from_millis(3 * f),
            None => false,
        }
    }

    pub fn check_interval(&self) -> Option<Duration> {
        self.frequency_ms.map(Duration::from_millis)
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_timeout_before_first_heartbeat() {
        let w = Watchdog::new();
        assert!(!w.is_expired());
        assert_eq!(w.check_interval(), None);
    }

    #[test]
    fn first_heartbeat_establishes_frequency() {
        let mut w = Watchdog::new();
        w.note_heartbeat(50);
        assert_eq!(w.check_interval(), Some(Duration::from_millis(50)));
        assert!(!w.is_expired());
    }

    #[test]
    fn second_heartbeat_does_not_change_frequency() {
        let mut w = Watchdog::new();
        w.note_heartbeat(50);
        w.note_heartbeat(999);
        assert_eq!(w.check_interval(), Some(Duration::from_millis(50)));
    }
}
