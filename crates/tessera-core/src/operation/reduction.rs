//! Power-of-two reduction factors.

use serde::{Deserialize, Serialize};

/// Number of times a resolution level has been halved relative to full
/// resolution.
///
/// A factor of `n` means a linear scale of roughly `2^-n`. Only monotonicity
/// is guaranteed: a larger factor always means a smaller level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ReductionFactor {
    pub factor: u32,
}

impl ReductionFactor {
    pub fn new(factor: u32) -> Self {
        Self { factor }
    }

    /// Nearest factor for a linear scale, capped at `max_factor`.
    ///
    /// Scales within `epsilon` of 1 (or larger) map to factor 0; invalid
    /// scales (zero, negative, NaN) also map to 0.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let rf = ReductionFactor::for_scale(0.25, 0.001, 10);
    /// assert_eq!(rf.factor, 2);
    /// ```
    pub fn for_scale(scale: f64, epsilon: f64, max_factor: u32) -> Self {
        if !(scale > 0.0) || scale >= 1.0 - epsilon {
            return Self::default();
        }
        let factor = (-scale.log2()).round().max(0.0) as u32;
        Self {
            factor: factor.min(max_factor),
        }
    }

    /// Linear scale represented by the factor: `0.5^factor`.
    pub fn scale(&self) -> f64 {
        0.5f64.powi(self.factor.min(i32::MAX as u32) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_powers_of_two() {
        assert_eq!(ReductionFactor::for_scale(1.0, 0.001, 10).factor, 0);
        assert_eq!(ReductionFactor::for_scale(0.5, 0.001, 10).factor, 1);
        assert_eq!(ReductionFactor::for_scale(0.25, 0.001, 10).factor, 2);
        assert_eq!(ReductionFactor::for_scale(0.125, 0.001, 10).factor, 3);
    }

    #[test]
    fn test_rounds_to_nearest() {
        // 0.3 lies closer to 0.25 than to 0.5 in log space
        assert_eq!(ReductionFactor::for_scale(0.3, 0.001, 10).factor, 2);
        assert_eq!(ReductionFactor::for_scale(0.45, 0.001, 10).factor, 1);
    }

    #[test]
    fn test_near_one_is_zero() {
        assert_eq!(ReductionFactor::for_scale(0.9995, 0.001, 10).factor, 0);
        assert_eq!(ReductionFactor::for_scale(2.0, 0.001, 10).factor, 0);
    }

    #[test]
    fn test_clamped_to_max() {
        assert_eq!(ReductionFactor::for_scale(1.0 / 64.0, 0.001, 3).factor, 3);
    }

    #[test]
    fn test_invalid_scale() {
        assert_eq!(ReductionFactor::for_scale(0.0, 0.001, 10).factor, 0);
        assert_eq!(ReductionFactor::for_scale(f64::NAN, 0.001, 10).factor, 0);
    }

    #[test]
    fn test_scale() {
        assert_eq!(ReductionFactor::new(0).scale(), 1.0);
        assert_eq!(ReductionFactor::new(2).scale(), 0.25);
    }

    #[test]
    fn test_monotonic() {
        let mut last = 0;
        for i in 1..200 {
            let scale = 1.0 / i as f64;
            let rf = ReductionFactor::for_scale(scale, 0.001, 32);
            assert!(rf.factor >= last);
            last = rf.factor;
        }
    }
}
