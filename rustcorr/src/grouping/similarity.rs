use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker, Statistics};

use crate::error::GroupingError;

/// Maps two equal-length vectors to a bounded similarity in [-1, 1].
///
/// Returns NaN if the similarity is undefined (fewer than two points,
/// zero variance), which never passes a threshold.
pub trait Similarity: Send + Sync + fmt::Debug {
    fn similarity(&self, a: &[f64], b: &[f64]) -> f64;
}

/// Built-in similarity measures, chosen once per run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimilarityMeasure {
    Pearson,
    Spearman,
    Cosine,
}

impl Default for SimilarityMeasure {
    fn default() -> Self {
        SimilarityMeasure::Pearson
    }
}

impl Similarity for SimilarityMeasure {
    fn similarity(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            SimilarityMeasure::Pearson => pearson(a, b),
            SimilarityMeasure::Spearman => spearman(a, b),
            SimilarityMeasure::Cosine => cosine(a, b),
        }
    }
}

impl Display for SimilarityMeasure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SimilarityMeasure::Pearson => write!(f, "pearson"),
            SimilarityMeasure::Spearman => write!(f, "spearman"),
            SimilarityMeasure::Cosine => write!(f, "cosine"),
        }
    }
}

impl FromStr for SimilarityMeasure {
    type Err = GroupingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pearson" => Ok(SimilarityMeasure::Pearson),
            "spearman" => Ok(SimilarityMeasure::Spearman),
            "cosine" => Ok(SimilarityMeasure::Cosine),
            _ => Err(GroupingError::UnknownSimilarityMeasure(s.to_string())),
        }
    }
}

/// Pearson product-moment correlation.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return f64::NAN;
    }
    let cov = a.iter().covariance(b.iter());
    let sd_a = a.iter().std_dev();
    let sd_b = b.iter().std_dev();
    let denom = sd_a * sd_b;
    if !(denom > 0.0) {
        return f64::NAN;
    }
    (cov / denom).clamp(-1.0, 1.0)
}

/// Spearman rank correlation (average ranks for ties).
pub fn spearman(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return f64::NAN;
    }
    let ranks_a = Data::new(a.to_vec()).ranks(RankTieBreaker::Average);
    let ranks_b = Data::new(b.to_vec()).ranks(RankTieBreaker::Average);
    pearson(&ranks_a, &ranks_b)
}

/// Cosine similarity of the two vectors.
pub fn cosine(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::NAN;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    let denom = norm_a * norm_b;
    if !(denom > 0.0) {
        return f64::NAN;
    }
    (dot / denom).clamp(-1.0, 1.0)
}

/// Paired data points of two rows (x from the first, y from the second).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CorrelationData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl CorrelationData {
    pub fn with_capacity(n: usize) -> Self {
        Self { x: Vec::with_capacity(n), y: Vec::with_capacity(n) }
    }

    #[inline]
    pub fn push(&mut self, x: f64, y: f64) {
        self.x.push(x);
        self.y.push(y);
    }

    pub fn extend_from(&mut self, other: &CorrelationData) {
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
    }

    #[inline]
    pub fn dp_count(&self) -> usize {
        self.x.len()
    }

    pub fn similarity(&self, measure: &dyn Similarity) -> f64 {
        measure.similarity(&self.x, &self.y)
    }

    /// Least-squares slope of y over x.
    pub fn slope(&self) -> f64 {
        if self.dp_count() < 2 {
            return f64::NAN;
        }
        let var_x = self.x.iter().variance();
        if !(var_x > 0.0) {
            return f64::NAN;
        }
        self.x.iter().covariance(self.y.iter()) / var_x
    }

    /// Two-sided p-value of the slope being different from zero.
    pub fn regression_significance(&self) -> f64 {
        let n = self.dp_count();
        if n < 3 {
            return f64::NAN;
        }
        let r = pearson(&self.x, &self.y);
        if r.is_nan() {
            return f64::NAN;
        }
        if r.abs() >= 1.0 {
            return 0.0;
        }
        let dof = (n - 2) as f64;
        let t = r * (dof / (1.0 - r * r)).sqrt();
        match StudentsT::new(0.0, 1.0, dof) {
            Ok(dist) => 2.0 * (1.0 - dist.cdf(t.abs())),
            Err(_) => f64::NAN,
        }
    }

    /// Largest max/min ratio over the x or y axis.
    pub fn max_fold_change(&self) -> f64 {
        fold_change(&self.x).max(fold_change(&self.y))
    }

    /// Enough points and dynamic range for the regression to mean something.
    pub fn is_sufficient(&self, min_dp: usize, min_fold_change: f64) -> bool {
        self.dp_count() >= min_dp.max(3) && self.max_fold_change() >= min_fold_change
    }

    /// True if this is a clearly bad relationship: negative slope,
    /// insignificant slope or low similarity. Insufficient data is never negative.
    pub fn is_negative_regression(
        &self,
        min_fold_change: f64,
        max_slope_significance: f64,
        min_dp: usize,
        min_similarity: f64,
        measure: &dyn Similarity,
    ) -> bool {
        if !self.is_sufficient(min_dp, min_fold_change) {
            return false;
        }
        let significance = self.regression_significance();
        if significance.is_nan() {
            return false;
        }
        self.slope() <= 0.0
            || significance > max_slope_significance
            || self.similarity(measure) < min_similarity
    }
}

fn fold_change(values: &[f64]) -> f64 {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min > 0.0 && max.is_finite() { max / min } else { 0.0 }
}
