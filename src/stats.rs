use serde::Serialize;

/// Incremental mean/variance accumulator (Welford).
///
/// Mean and variance are undefined while the accumulator is empty, so the
/// accessors return `None` until the first sample is added.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunningStats {
    n: u32,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub const fn new() -> Self {
        Self { n: 0, mean: 0.0, m2: 0.0 }
    }

    pub fn add(&mut self, x: f64) {
        self.n = self.n.saturating_add(1);
        let delta = x - self.mean;
        self.mean += delta / f64::from(self.n);
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> u32 {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn mean(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }

    /// Population variance of the samples added so far.
    pub fn variance(&self) -> Option<f64> {
        (self.n > 0).then(|| self.m2 / f64::from(self.n))
    }

    pub fn std_dev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }
}
