//! Moving average over the last N rate samples.

/// Fixed-capacity ring buffer of rate samples.
///
/// Once full, each new sample overwrites the oldest one.
#[derive(Debug, Clone)]
pub struct RateTracker {
    samples: Vec<f64>,
    next: usize,
    filled: usize,
}

impl RateTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            next: 0,
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn add_rate(&mut self, rate: f64) {
        self.samples[self.next] = rate;
        self.next = (self.next + 1) % self.samples.len();
        if self.filled < self.samples.len() {
            self.filled += 1;
        }
    }

    /// Mean of the valid samples, 0 before any sample was added.
    pub fn get_rate(&self) -> f64 {
        if self.filled == 0 {
            return 0.0;
        }
        // Until the ring wraps the valid samples are exactly 0..filled
        let sum: f64 = self.samples[..self.filled].iter().sum();
        sum / self.filled as f64
    }

    pub fn reset(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
        self.next = 0;
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::RateTracker;

    #[test]
    fn single_slot_returns_last_sample() {
        let mut tracker = RateTracker::new(1);
        tracker.add_rate(1.0);
        assert_eq!(tracker.get_rate(), 1.0);
    }

    #[test]
    fn averages_all_samples_until_full() {
        let mut tracker = RateTracker::new(2);
        tracker.add_rate(1.0);
        tracker.add_rate(2.0);
        assert_eq!(tracker.get_rate(), 1.5);

        let mut wide = RateTracker::new(10);
        for r in [1.0, 2.0, 3.0] {
            wide.add_rate(r);
        }
        assert_eq!(wide.get_rate(), 2.0);
    }

    #[test]
    fn evicts_oldest_sample_when_full() {
        let mut tracker = RateTracker::new(2);
        for r in [1.0, 2.0, 3.0] {
            tracker.add_rate(r);
        }
        assert_eq!(tracker.get_rate(), 2.5);
    }

    #[test]
    fn reset_discards_samples_but_keeps_capacity() {
        let mut tracker = RateTracker::new(3);
        assert_eq!(tracker.get_rate(), 0.0);
        tracker.add_rate(5.0);
        tracker.add_rate(7.0);
        tracker.reset();
        assert_eq!(tracker.get_rate(), 0.0);
        assert_eq!(tracker.capacity(), 3);

        tracker.add_rate(1.0);
        assert_eq!(tracker.get_rate(), 1.0);
    }
}
