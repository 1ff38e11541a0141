//! 1-D kernel density estimation for margin learning.
//!
//! The margin estimator only needs one numeric capability: "fit the best
//! bandwidth KDE to a sample set and integrate its density over a grid".
//! That capability is a trait seam ([`BandwidthSearch`] / [`DensityModel`])
//! so alternative estimators can be plugged in; the shipped implementation
//! is a Gaussian KDE with k-fold cross-validated log-likelihood bandwidth
//! selection over a fixed candidate grid.

const SQRT_TAU: f64 = 2.5066282746310002; // sqrt(2*pi)

/// Number of bandwidth candidates searched.
pub const BANDWIDTH_CANDIDATES: usize = 30;
/// Bandwidth search range.
pub const BANDWIDTH_RANGE: (f64, f64) = (0.01, 1.0);
/// Cross-validation folds. Also the minimum viable sample count.
pub const CV_FOLDS: usize = 5;

/// A fitted 1-D density model.
pub trait DensityModel {
    /// Density at a point.
    fn density(&self, x: f64) -> f64;

    /// Running trapezoid integral of the density over an ordered grid.
    /// Same length as the grid, starting at zero.
    fn cumulative_over(&self, grid: &[f64]) -> Vec<f64> {
        let mut cumulative = Vec::with_capacity(grid.len());
        let mut acc = 0.0;
        let mut prev: Option<(f64, f64)> = None;
        for &x in grid {
            let d = self.density(x);
            if let Some((px, pd)) = prev {
                acc += 0.5 * (pd + d) * (x - px);
            }
            cumulative.push(acc);
            prev = Some((x, d));
        }
        cumulative
    }
}

/// Fits the best-bandwidth density model for a sample set.
pub trait BandwidthSearch {
    /// `None` when the sample set is too small to cross-validate; callers
    /// then keep their heuristic bound.
    fn fit_best_bandwidth(&self, samples: &[f64]) -> Option<Box<dyn DensityModel>>;
}

/// Gaussian-kernel density estimate with a fixed bandwidth.
#[derive(Debug, Clone)]
pub struct GaussianKde {
    samples: Vec<f64>,
    bandwidth: f64,
}

impl GaussianKde {
    pub fn new(samples: Vec<f64>, bandwidth: f64) -> Self {
        debug_assert!(bandwidth > 0.0);
        Self { samples, bandwidth }
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }
}

impl DensityModel for GaussianKde {
    fn density(&self, x: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let h = self.bandwidth;
        let sum: f64 = self
            .samples
            .iter()
            .map(|&s| {
                let z = (x - s) / h;
                (-0.5 * z * z).exp()
            })
            .sum();
        sum / (self.samples.len() as f64 * h * SQRT_TAU)
    }
}

/// K-fold cross-validated bandwidth search over a fixed candidate grid.
#[derive(Debug, Clone)]
pub struct CvBandwidthSearch {
    bandwidths: Vec<f64>,
    folds: usize,
}

impl Default for CvBandwidthSearch {
    fn default() -> Self {
        Self {
            bandwidths: linspace(BANDWIDTH_RANGE.0, BANDWIDTH_RANGE.1, BANDWIDTH_CANDIDATES),
            folds: CV_FOLDS,
        }
    }
}

impl CvBandwidthSearch {
    pub fn new(bandwidths: Vec<f64>, folds: usize) -> Self {
        Self { bandwidths, folds }
    }

    /// Held-out log-likelihood of one candidate bandwidth.
    fn score(&self, samples: &[f64], bandwidth: f64) -> f64 {
        let mut total = 0.0;
        for fold in 0..self.folds {
            let train: Vec<f64> = samples
                .iter()
                .enumerate()
                .filter(|(i, _)| i % self.folds != fold)
                .map(|(_, &v)| v)
                .collect();
            if train.is_empty() {
                continue;
            }
            let kde = GaussianKde::new(train, bandwidth);
            for (_, &held_out) in samples
                .iter()
                .enumerate()
                .filter(|(i, _)| i % self.folds == fold)
            {
                // Floor keeps a zero density from collapsing the score to -inf.
                total += kde.density(held_out).max(f64::MIN_POSITIVE).ln();
            }
        }
        total
    }
}

impl BandwidthSearch for CvBandwidthSearch {
    fn fit_best_bandwidth(&self, samples: &[f64]) -> Option<Box<dyn DensityModel>> {
        if samples.len() < self.folds || self.bandwidths.is_empty() {
            return None;
        }
        let mut best: Option<(f64, f64)> = None; // (bandwidth, score)
        for &h in &self.bandwidths {
            let score = self.score(samples, h);
            let better = match best {
                Some((_, s)) => score > s,
                None => true,
            };
            if better {
                best = Some((h, score));
            }
        }
        let (bandwidth, _) = best?;
        Some(Box::new(GaussianKde::new(samples.to_vec(), bandwidth)))
    }
}

/// `n` evenly spaced points from `start` to `end` inclusive.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
