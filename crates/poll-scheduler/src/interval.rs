//! Poll Interval Controller
//!
//! Saturating control law mapping a signal's feature sum to its next
//! poll interval. The law is U-shaped over the clamped score: a sum at
//! the ceiling (maximally boring) or overshooting it lands on the
//! slowest interval, moderate nonzero change pulls toward the fastest.

use serde::{Deserialize, Serialize};

/// Feature sums are clamped to this before entering the law
pub const FEATURE_SUM_CEILING: f64 = 4.0;

/// Bounded poll interval state for one request (seconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    current: f64,
    last: f64,
    minimum: f64,
    maximum: f64,
}

impl Interval {
    /// New interval starting at the slowest rate
    pub fn new(minimum: f64, maximum: f64) -> Self {
        Self {
            current: maximum,
            last: maximum,
            minimum,
            maximum,
        }
    }

    /// Restore an interval from a persisted current value
    pub fn with_current(minimum: f64, maximum: f64, current: f64) -> Self {
        Self {
            current: current.clamp(minimum, maximum),
            last: current.clamp(minimum, maximum),
            minimum,
            maximum,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn minimum(&self) -> f64 {
        self.minimum
    }

    pub fn maximum(&self) -> f64 {
        self.maximum
    }

    /// Back off to the slowest interval (negative or missing response)
    pub fn force_maximum(&mut self) {
        self.last = self.current;
        self.current = self.maximum;
    }

    /// Apply the control law for a freshly scored history
    ///
    /// `next = min + (clamp(sum) − 4)² · (max − min) / 16`, clamped into
    /// the interval bounds.
    pub fn apply_feature_sum(&mut self, feature_sum: f64) {
        let score = feature_sum.clamp(0.0, FEATURE_SUM_CEILING);
        let span = self.maximum - self.minimum;
        let next = self.minimum + (score - FEATURE_SUM_CEILING).powi(2) * span / 16.0;
        self.last = self.current;
        self.current = next.clamp(self.minimum, self.maximum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_starts_at_maximum() {
        let interval = Interval::new(1.0, 100.0);
        assert_eq!(interval.current(), 100.0);
    }

    #[test]
    fn test_law_examples() {
        // clamped input 4 -> fastest; input 0 -> slowest
        let mut interval = Interval::new(1.0, 100.0);
        interval.apply_feature_sum(4.0);
        assert_eq!(interval.current(), 1.0);

        interval.apply_feature_sum(0.0);
        assert_eq!(interval.current(), 100.0);
    }

    #[test]
    fn test_overshoot_clamps_to_ceiling() {
        let mut interval = Interval::new(1.0, 100.0);
        interval.apply_feature_sum(7.5);
        assert_eq!(interval.current(), 1.0);
    }

    #[test]
    fn test_moderate_sum_lands_between() {
        let mut interval = Interval::new(1.0, 100.0);
        interval.apply_feature_sum(2.0);
        // 1 + 4 * 99/16 = 25.75
        assert!((interval.current() - 25.75).abs() < 1e-9);
    }

    #[test]
    fn test_force_maximum_is_immediate() {
        let mut interval = Interval::new(1.0, 100.0);
        interval.apply_feature_sum(3.5);
        assert!(interval.current() < 5.0);

        interval.force_maximum();
        assert_eq!(interval.current(), 100.0);
    }

    #[test]
    fn test_last_tracks_previous_current() {
        let mut interval = Interval::new(1.0, 100.0);
        interval.apply_feature_sum(2.0);
        let previous = interval.current();
        interval.apply_feature_sum(3.0);
        assert_eq!(interval.last(), previous);
    }

    #[test]
    fn test_restored_current_clamped() {
        let interval = Interval::with_current(1.0, 100.0, 400.0);
        assert_eq!(interval.current(), 100.0);
    }

    proptest! {
        #[test]
        fn prop_bounds_hold_for_any_sequence(sums in proptest::collection::vec(-10.0f64..10.0, 0..50)) {
            let mut interval = Interval::new(0.5, 60.0);
            for sum in sums {
                interval.apply_feature_sum(sum);
                prop_assert!(interval.current() >= interval.minimum());
                prop_assert!(interval.current() <= interval.maximum());
            }
            interval.force_maximum();
            prop_assert_eq!(interval.current(), interval.maximum());
        }
    }
}
