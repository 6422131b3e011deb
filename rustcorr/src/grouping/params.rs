//! Parameters for correlation grouping.
//!
//! All parameter objects are plain values: they can be built in code, taken
//! from their `Default`, or parsed from JSON. `validate` must succeed before
//! a run starts; the task calls it for you.

use serde::{Deserialize, Serialize};

use crate::error::{GroupingError, Result};
use crate::grouping::similarity::SimilarityMeasure;

/// Unit of a retention time tolerance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtToleranceUnit {
    /// Tolerance in minutes.
    Absolute,
    /// Tolerance in percent of the larger retention time.
    Relative,
}

/// Retention time tolerance (scalar + unit).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RtTolerance {
    pub tolerance: f64,
    pub unit: RtToleranceUnit,
}

impl RtTolerance {
    pub fn absolute(minutes: f64) -> Self {
        Self { tolerance: minutes, unit: RtToleranceUnit::Absolute }
    }

    pub fn relative(percent: f64) -> Self {
        Self { tolerance: percent, unit: RtToleranceUnit::Relative }
    }

    /// Allowed retention time difference for a pair whose later time is `rt_max`.
    #[inline]
    pub fn tolerance_at(&self, rt_max: f64) -> f64 {
        match self.unit {
            RtToleranceUnit::Absolute => self.tolerance,
            RtToleranceUnit::Relative => rt_max.abs() * self.tolerance / 100.0,
        }
    }

    /// `|a - b| <= tolerance`, symmetric in `a` and `b`.
    #[inline]
    pub fn check_within(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.tolerance_at(a.max(b))
    }

    fn validate(&self) -> Result<()> {
        if !self.tolerance.is_finite() || self.tolerance < 0.0 {
            return Err(GroupingError::InvalidParameter {
                name: "rt_tolerance",
                reason: format!("must be a finite value >= 0, got {}", self.tolerance),
            });
        }
        Ok(())
    }
}

impl Default for RtTolerance {
    fn default() -> Self {
        RtTolerance::absolute(0.1)
    }
}

/// A minimum number of samples, given as an absolute count and a fraction.
///
/// The effective minimum for `n` samples is `max(abs, ceil(rel * n))`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinSamples {
    pub abs: usize,
    /// Fraction in [0, 1].
    pub rel: f64,
}

impl MinSamples {
    pub fn absolute(abs: usize) -> Self {
        Self { abs, rel: 0.0 }
    }

    pub fn relative(rel: f64) -> Self {
        Self { abs: 0, rel }
    }

    #[inline]
    pub fn required(&self, n: usize) -> usize {
        let rel = (self.rel * n as f64).ceil() as usize;
        self.abs.max(rel)
    }

    fn validate(&self, name: &'static str) -> Result<()> {
        if !self.rel.is_finite() || !(0.0..=1.0).contains(&self.rel) {
            return Err(GroupingError::InvalidParameter {
                name,
                reason: format!("relative minimum must be in [0, 1], got {}", self.rel),
            });
        }
        Ok(())
    }
}

/// Minimum samples filter: a row (or a row pair) needs enough qualifying
/// samples overall OR enough in at least one sample group.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinimumSamplesFilterParams {
    /// Minimum over all samples.
    pub min_samples_all: MinSamples,
    /// Minimum within one sample group, `None` disables the group rule.
    pub min_samples_in_group: Option<MinSamples>,
    /// Above this many samples the pair overlap check only looks at retention time.
    pub large_dataset_sample_limit: Option<usize>,
}

impl Default for MinimumSamplesFilterParams {
    fn default() -> Self {
        Self {
            min_samples_all: MinSamples::absolute(1),
            min_samples_in_group: None,
            large_dataset_sample_limit: None,
        }
    }
}

impl MinimumSamplesFilterParams {
    pub fn validate(&self) -> Result<()> {
        self.min_samples_all.validate("min_samples_all")?;
        if let Some(g) = &self.min_samples_in_group {
            g.validate("min_samples_in_group")?;
        }
        if self.large_dataset_sample_limit == Some(0) {
            return Err(GroupingError::InvalidParameter {
                name: "large_dataset_sample_limit",
                reason: "must be > 0 when set".to_string(),
            });
        }
        Ok(())
    }
}

/// Feature shape correlation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureShapeCorrelationParams {
    pub enabled: bool,
    pub measure: SimilarityMeasure,
    /// Minimum correlation per sample (inclusive).
    pub min_correlation: f64,
    /// Minimum number of correlated data points per sample.
    pub min_data_points: usize,
    /// Minimum number of data points on each side of the apex.
    pub min_dp_feature_edge: usize,
    /// Gate on the correlation of all pooled data points, `None` disables it.
    pub min_total_correlation: Option<f64>,
}

impl Default for FeatureShapeCorrelationParams {
    fn default() -> Self {
        Self {
            enabled: true,
            measure: SimilarityMeasure::Pearson,
            min_correlation: 0.85,
            min_data_points: 5,
            min_dp_feature_edge: 2,
            min_total_correlation: None,
        }
    }
}

impl FeatureShapeCorrelationParams {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        check_correlation("shape.min_correlation", self.min_correlation)?;
        if let Some(total) = self.min_total_correlation {
            check_correlation("shape.min_total_correlation", total)?;
        }
        if self.min_data_points < 2 {
            return Err(GroupingError::InvalidParameter {
                name: "shape.min_data_points",
                reason: format!("a correlation needs at least 2 points, got {}", self.min_data_points),
            });
        }
        Ok(())
    }
}

/// Height correlation across samples.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeightCorrelationParams {
    pub enabled: bool,
    pub measure: SimilarityMeasure,
    /// Minimum correlation (inclusive).
    pub min_correlation: f64,
    /// Minimum number of samples (at least 2 are always required).
    pub min_samples: usize,
    /// Estimate heights missing in exactly one of the two rows.
    pub impute_missing: bool,
    /// Reject clearly negative or insignificant regressions.
    pub negative_regression_guard: bool,
}

impl Default for HeightCorrelationParams {
    fn default() -> Self {
        Self {
            enabled: true,
            measure: SimilarityMeasure::Pearson,
            min_correlation: 0.7,
            min_samples: 5,
            impute_missing: false,
            negative_regression_guard: true,
        }
    }
}

impl HeightCorrelationParams {
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        check_correlation("height.min_correlation", self.min_correlation)
    }
}

/// Full parameter set of one correlation grouping run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationGroupingParams {
    pub rt_tolerance: RtTolerance,
    /// Minimum height for a sample to count as qualifying.
    pub min_height: f64,
    /// Intensities below this level are ignored in shape correlation.
    pub noise_level: f64,
    pub min_samples_filter: MinimumSamplesFilterParams,
    pub shape: FeatureShapeCorrelationParams,
    pub height: HeightCorrelationParams,
    /// Worker threads, 0 uses the number of logical cores.
    #[serde(default)]
    pub num_threads: usize,
}

impl Default for CorrelationGroupingParams {
    fn default() -> Self {
        Self {
            rt_tolerance: RtTolerance::default(),
            min_height: 0.0,
            noise_level: 0.0,
            min_samples_filter: MinimumSamplesFilterParams::default(),
            shape: FeatureShapeCorrelationParams::default(),
            height: HeightCorrelationParams::default(),
            num_threads: 0,
        }
    }
}

impl CorrelationGroupingParams {
    /// Loose settings for small or noisy data sets.
    pub fn permissive() -> Self {
        Self {
            rt_tolerance: RtTolerance::absolute(0.2),
            shape: FeatureShapeCorrelationParams {
                min_correlation: 0.6,
                min_data_points: 3,
                min_dp_feature_edge: 1,
                ..FeatureShapeCorrelationParams::default()
            },
            height: HeightCorrelationParams {
                min_correlation: 0.5,
                min_samples: 3,
                ..HeightCorrelationParams::default()
            },
            ..Self::default()
        }
    }

    /// Tight settings that only keep strongly co-eluting rows.
    pub fn strict() -> Self {
        Self {
            rt_tolerance: RtTolerance::absolute(0.05),
            shape: FeatureShapeCorrelationParams {
                min_correlation: 0.9,
                min_data_points: 7,
                min_dp_feature_edge: 3,
                min_total_correlation: Some(0.9),
                ..FeatureShapeCorrelationParams::default()
            },
            height: HeightCorrelationParams {
                min_correlation: 0.8,
                ..HeightCorrelationParams::default()
            },
            ..Self::default()
        }
    }

    /// Parse parameters from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        self.rt_tolerance.validate()?;
        check_non_negative("min_height", self.min_height)?;
        check_non_negative("noise_level", self.noise_level)?;
        self.min_samples_filter.validate()?;
        self.shape.validate()?;
        self.height.validate()?;
        Ok(())
    }

    /// Neither shape nor height correlation is enabled: rows are grouped by retention time only.
    pub fn is_rt_only(&self) -> bool {
        !self.shape.enabled && !self.height.enabled
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(GroupingError::InvalidParameter {
            name,
            reason: format!("must be a finite value >= 0, got {}", value),
        });
    }
    Ok(())
}

fn check_correlation(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
        return Err(GroupingError::InvalidParameter {
            name,
            reason: format!("must be in [-1, 1], got {}", value),
        });
    }
    Ok(())
}
