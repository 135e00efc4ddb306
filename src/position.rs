/// Positional bookkeeping: (mean, variance) arithmetic for scaffold coordinates.
///
/// Every position in a scaffold is an estimate. Contig ends, gap sizes and
/// mate-link distances all carry a mean and a variance, and every derived
/// position must keep its variance consistent with the positions it was
/// derived from. The scaffold-wide invariant is that end variances are
/// strictly increasing left to right; `force_increasing_variances` (in the
/// graph module) repairs violations using the epsilon defined here.
use std::ops::{Add, AddAssign, Sub};

/// Variance contributed per base of overlap or extrapolation.
pub const FUDGE_FACTOR: f64 = 0.026;

/// Floor for any computed variance. Anything smaller is numerical noise.
pub const MIN_VARIANCE: f64 = 1.0;

/// Slack added when repairing a variance inversion, large enough to
/// dominate floating-point round-off across a long scaffold.
pub const VAR_EPSILON: f64 = 1e-3;

/// A scaffold coordinate estimate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SeqPos {
    pub mean: f64,
    pub variance: f64,
}

impl SeqPos {
    pub fn new(mean: f64, variance: f64) -> Self {
        SeqPos { mean, variance }
    }

    /// Standard deviation, with the variance clamped to the floor first.
    pub fn stddev(&self) -> f64 {
        self.variance.max(MIN_VARIANCE).sqrt()
    }

    /// The 3-sigma interval around the mean.
    pub fn interval3(&self) -> (f64, f64) {
        let s = 3.0 * self.stddev();
        (self.mean - s, self.mean + s)
    }

    /// Clamp the variance up to `MIN_VARIANCE`.
    pub fn clamped(mut self) -> Self {
        if self.variance < MIN_VARIANCE {
            self.variance = MIN_VARIANCE;
        }
        self
    }
}

impl Add for SeqPos {
    type Output = SeqPos;
    fn add(self, rhs: SeqPos) -> SeqPos {
        SeqPos::new(self.mean + rhs.mean, self.variance + rhs.variance)
    }
}

impl AddAssign for SeqPos {
    fn add_assign(&mut self, rhs: SeqPos) {
        self.mean += rhs.mean;
        self.variance += rhs.variance;
    }
}

impl Sub for SeqPos {
    type Output = SeqPos;
    fn sub(self, rhs: SeqPos) -> SeqPos {
        SeqPos::new(self.mean - rhs.mean, self.variance - rhs.variance)
    }
}

/// Variance contribution of deriving a position across `n` bases of
/// overlap. Negative lengths contribute the same as positive ones.
pub fn fudge_variance(n: f64) -> f64 {
    (FUDGE_FACTOR * n.abs()).max(MIN_VARIANCE)
}

/// Do two 3-sigma intervals intersect, with `slop` extra on each side?
pub fn intervals_intersect(a: &SeqPos, b: &SeqPos, slop: f64) -> bool {
    let (alo, ahi) = a.interval3();
    let (blo, bhi) = b.interval3();
    alo - slop <= bhi && blo - slop <= ahi
}

/// Maximum-likelihood combination of independent estimates of the same
/// position. `estimates` pairs each position with its weight; callers weight
/// by inverse variance. Returns None when the total weight vanishes.
pub fn weighted_combine(estimates: &[(SeqPos, f64)]) -> Option<SeqPos> {
    let total: f64 = estimates.iter().map(|(_, w)| w).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    let mean = estimates.iter().map(|(p, w)| p.mean * w).sum::<f64>() / total;
    // The combined variance of an inverse-variance-weighted mean.
    let variance = (1.0 / total).max(MIN_VARIANCE);
    Some(SeqPos::new(mean, variance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fudge_variance_scales_with_length() {
        assert_eq!(fudge_variance(1000.0), FUDGE_FACTOR * 1000.0);
        assert_eq!(fudge_variance(-1000.0), FUDGE_FACTOR * 1000.0);
        // Short overlaps clamp to the floor.
        assert_eq!(fudge_variance(1.0), MIN_VARIANCE);
        assert_eq!(fudge_variance(0.0), MIN_VARIANCE);
    }

    #[test]
    fn test_interval_intersection() {
        let a = SeqPos::new(100.0, 100.0); // 3-sigma = 30
        let b = SeqPos::new(150.0, 100.0);
        let c = SeqPos::new(300.0, 100.0);
        assert!(intervals_intersect(&a, &b, 0.0));
        assert!(!intervals_intersect(&a, &c, 0.0));
        // Slop closes the gap: intervals are [70,130] and [270,330].
        assert!(intervals_intersect(&a, &c, 140.0));
    }

    #[test]
    fn test_weighted_combine_prefers_tight_estimates() {
        let tight = (SeqPos::new(100.0, 4.0), 1.0 / 4.0);
        let loose = (SeqPos::new(200.0, 400.0), 1.0 / 400.0);
        let combined = weighted_combine(&[tight, loose]).unwrap();
        assert!(combined.mean < 110.0, "mean {} pulled by loose estimate", combined.mean);
        assert!(combined.variance < 4.1);
    }

    #[test]
    fn test_weighted_combine_empty() {
        assert!(weighted_combine(&[]).is_none());
        assert!(weighted_combine(&[(SeqPos::default(), 0.0)]).is_none());
    }

    #[test]
    fn test_clamped() {
        assert_eq!(SeqPos::new(5.0, 0.1).clamped().variance, MIN_VARIANCE);
        assert_eq!(SeqPos::new(5.0, 9.0).clamped().variance, 9.0);
    }
}
