//! Sliding-window event rate meter.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Counts events inside a trailing time window.
#[derive(Clone, Debug)]
pub struct Frequency {
    window: Duration,
    ticks: VecDeque<Instant>,
}

impl Frequency {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ticks: VecDeque::new(),
        }
    }

    /// Record an event now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record an event at a given instant and evict ticks that fell out of
    /// the window ending there.
    pub fn tick_at(&mut self, at: Instant) {
        self.ticks.push_back(at);
        while let Some(&oldest) = self.ticks.front() {
            if at.saturating_duration_since(oldest) > self.window {
                self.ticks.pop_front();
            } else {
                break;
            }
        }
    }

    /// Events per second over the window.
    pub fn freq(&self) -> f64 {
        let secs = self.window.as_secs_f64();
        if self.ticks.is_empty() || secs == 0.0 {
            return 0.0;
        }
        self.ticks.len() as f64 / secs
    }

    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

impl Default for Frequency {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_ticks_inside_window() {
        let mut freq = Frequency::new(Duration::from_secs(1));
        let start = Instant::now();
        for i in 0..30 {
            freq.tick_at(start + Duration::from_millis(i * 10));
        }
        assert_eq!(freq.len(), 30);
        assert_eq!(freq.freq(), 30.0);
    }

    #[test]
    fn evicts_ticks_older_than_window() {
        let mut freq = Frequency::new(Duration::from_secs(1));
        let start = Instant::now();
        freq.tick_at(start);
        freq.tick_at(start + Duration::from_millis(500));
        freq.tick_at(start + Duration::from_millis(1600));
        assert_eq!(freq.len(), 1);
    }

    #[test]
    fn empty_meter_reports_zero() {
        assert_eq!(Frequency::default().freq(), 0.0);
    }
}
