//! Numerically stable accumulators used by the reducers

/// Welford's online algorithm for mean and variance
///
/// Single pass, no catastrophic cancellation on large offsets.
#[derive(Debug, Clone, Default)]
pub struct WelfordState {
    /// Number of values seen
    pub count: u64,
    /// Running mean
    pub mean: f64,
    /// Sum of squared differences from the mean (M2)
    pub m2: f64,
}

impl WelfordState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value
    #[inline]
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance, `None` below two values
    pub fn variance_sample(&self) -> Option<f64> {
        (self.count >= 2).then(|| self.m2 / (self.count - 1) as f64)
    }

    /// Sample standard deviation, `None` below two values
    pub fn stddev_sample(&self) -> Option<f64> {
        self.variance_sample().map(f64::sqrt)
    }

    /// Merge a partial state computed over other rows
    pub fn merge(&mut self, other: &WelfordState) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other.clone();
            return;
        }
        let combined = self.count + other.count;
        let delta = other.mean - self.mean;
        self.mean += delta * (other.count as f64 / combined as f64);
        self.m2 += other.m2
            + delta * delta * (self.count as f64 * other.count as f64 / combined as f64);
        self.count = combined;
    }
}

/// Kahan compensated summation
#[derive(Debug, Clone, Default)]
pub struct KahanSum {
    sum: f64,
    compensation: f64,
}

impl KahanSum {
    /// Create a zero sum
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one value
    #[inline]
    pub fn add(&mut self, value: f64) {
        let y = value - self.compensation;
        let t = self.sum + y;
        self.compensation = (t - self.sum) - y;
        self.sum = t;
    }

    /// Current sum
    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum
    }
}

/// Linear interpolation of the value at `t` between two points
#[inline]
pub fn interpolate(t: i64, (t0, v0): (i64, f64), (t1, v1): (i64, f64)) -> f64 {
    if t1 == t0 {
        return v0;
    }
    v0 + (v1 - v0) * ((t - t0) as f64 / (t1 - t0) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_welford_matches_two_pass() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut w = WelfordState::new();
        for v in values {
            w.add(v);
        }
        assert!((w.mean - 5.0).abs() < 1e-12);
        // sample variance of the set is 32/7
        assert!((w.variance_sample().unwrap() - 32.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_welford_needs_two_values() {
        let mut w = WelfordState::new();
        w.add(1.0);
        assert!(w.stddev_sample().is_none());
    }

    #[test]
    fn test_welford_merge() {
        let mut a = WelfordState::new();
        let mut b = WelfordState::new();
        let mut all = WelfordState::new();
        for v in [1.0, 2.0, 3.0] {
            a.add(v);
            all.add(v);
        }
        for v in [10.0, 20.0] {
            b.add(v);
            all.add(v);
        }
        a.merge(&b);
        assert!((a.mean - all.mean).abs() < 1e-9);
        assert!((a.m2 - all.m2).abs() < 1e-9);
    }

    #[test]
    fn test_kahan_sum() {
        let mut k = KahanSum::new();
        for _ in 0..10 {
            k.add(0.1);
        }
        assert!((k.sum() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_interpolate() {
        assert!((interpolate(5, (0, 0.0), (10, 20.0)) - 10.0).abs() < 1e-12);
        assert!((interpolate(5, (5, 3.0), (5, 9.0)) - 3.0).abs() < 1e-12);
    }
}
