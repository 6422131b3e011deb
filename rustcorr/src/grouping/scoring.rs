//! Pairwise scoring of two feature list rows.
//!
//! Two independent sub-scores:
//!   - feature shape correlation, per sample, walking outwards from the apex
//!     of the higher feature over scans both features share,
//!   - height correlation of the per-sample maximum intensities.
//!
//! Every correlation gate uses `>=`: a value equal to the configured minimum
//! is accepted.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GroupingError, Result};
use crate::grouping::params::{CorrelationGroupingParams, FeatureShapeCorrelationParams, HeightCorrelationParams};
use crate::grouping::relationship::{RelationshipEdge, RowPair};
use crate::grouping::row::{Feature, PreparedRow};
use crate::grouping::sample_filter::MinimumSamplesFilter;
use crate::grouping::similarity::{CorrelationData, Similarity, SimilarityMeasure};

// Per-sample shape guard: drop the whole shape result if one sample is clearly anti-correlated.
const SHAPE_GUARD_FOLD_CHANGE: f64 = 5.0;
const SHAPE_GUARD_SIGNIFICANCE: f64 = 0.2;
const SHAPE_GUARD_MIN_DP: usize = 7;
const SHAPE_GUARD_MIN_SIMILARITY: f64 = 0.5;

const HEIGHT_GUARD_FOLD_CHANGE: f64 = 10.0;
const HEIGHT_GUARD_SIGNIFICANCE: f64 = 0.3;

/// Shape correlation of two features in one sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleShapeCorrelation {
    /// Index into the sample list of the run.
    pub sample: usize,
    pub correlation: f64,
    pub data_points: usize,
    /// Smaller number of points on the left or right of the apex.
    pub edge_points: usize,
}

/// Accepted feature shape correlation of a row pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShapeCorrelation {
    pub per_sample: Vec<SampleShapeCorrelation>,
    /// Mean of the per-sample correlations.
    pub avg_correlation: f64,
    /// Correlation over the pooled points of all accepted samples.
    pub total_correlation: f64,
    /// Pooled number of data points.
    pub data_points: usize,
    pub min_edge_points: usize,
}

/// Accepted height correlation of a row pair.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightCorrelation {
    pub correlation: f64,
    /// Samples used, including imputed ones.
    pub samples: usize,
    pub slope: f64,
}

/// Computes the relationship of two rows.
///
/// Pairs are scored in canonical order (lower row id first), so
/// `score(a, b)` and `score(b, a)` return the same edge.
pub struct PairScorer<'a> {
    filter: &'a MinimumSamplesFilter,
    shape: Option<FeatureShapeCorrelationParams>,
    height: Option<HeightCorrelationParams>,
    shape_measure: Arc<dyn Similarity>,
    height_measure: Arc<dyn Similarity>,
    min_height: f64,
    noise_level: f64,
}

impl<'a> PairScorer<'a> {
    pub fn new(params: &CorrelationGroupingParams, filter: &'a MinimumSamplesFilter) -> Self {
        Self {
            filter,
            shape: params.shape.enabled.then(|| params.shape.clone()),
            height: params.height.enabled.then(|| params.height.clone()),
            shape_measure: Arc::new(params.shape.measure),
            height_measure: Arc::new(params.height.measure),
            min_height: params.min_height,
            noise_level: params.noise_level,
        }
    }

    /// Replace the shape similarity with any other measure.
    pub fn with_shape_measure(mut self, measure: Arc<dyn Similarity>) -> Self {
        self.shape_measure = measure;
        self
    }

    /// Replace the height similarity with any other measure.
    pub fn with_height_measure(mut self, measure: Arc<dyn Similarity>) -> Self {
        self.height_measure = measure;
        self
    }

    /// No sub-scorer enabled: every pair handed in is accepted.
    pub fn is_rt_only(&self) -> bool {
        self.shape.is_none() && self.height.is_none()
    }

    /// Score a pair that already passed the overlap check.
    ///
    /// Returns `Ok(None)` if no enabled sub-score was accepted and an error
    /// if a row carries non-finite data.
    pub fn score(&self, a: &PreparedRow<'_>, b: &PreparedRow<'_>) -> Result<Option<RelationshipEdge>> {
        let (a, b) = if a.id <= b.id { (a, b) } else { (b, a) };
        let pair = RowPair::new(a.id, b.id);
        let rt_delta = (a.rt - b.rt).abs();

        if self.is_rt_only() {
            return Ok(Some(RelationshipEdge::rt_only(pair, rt_delta)));
        }

        let shape = match &self.shape {
            Some(p) => self.shape_correlation(a, b, p)?,
            None => None,
        };
        let height = match &self.height {
            Some(p) => self.height_correlation(a, b, p)?,
            None => None,
        };

        if shape.is_none() && height.is_none() {
            return Ok(None);
        }
        Ok(Some(RelationshipEdge { pair, rt_delta, shape, height, rt_only: false }))
    }

    fn shape_correlation(
        &self,
        a: &PreparedRow<'_>,
        b: &PreparedRow<'_>,
        p: &FeatureShapeCorrelationParams,
    ) -> Result<Option<ShapeCorrelation>> {
        let mut accepted: Vec<(SampleShapeCorrelation, CorrelationData)> = Vec::new();

        for (sample, (fa, fb)) in a.features.iter().zip(&b.features).enumerate() {
            let (fa, fb) = match (fa, fb) {
                (Some(fa), Some(fb)) => (*fa, *fb),
                _ => continue,
            };
            let walked = match self.walk_shapes(a.id, fa, b.id, fb, p)? {
                Some(w) => w,
                None => continue,
            };
            let (data, edge_points) = walked;

            if data.is_negative_regression(
                SHAPE_GUARD_FOLD_CHANGE,
                SHAPE_GUARD_SIGNIFICANCE,
                SHAPE_GUARD_MIN_DP,
                SHAPE_GUARD_MIN_SIMILARITY,
                &SimilarityMeasure::Pearson,
            ) {
                return Ok(None);
            }

            let correlation = data.similarity(self.shape_measure.as_ref());
            if correlation >= p.min_correlation {
                accepted.push((
                    SampleShapeCorrelation { sample, correlation, data_points: data.dp_count(), edge_points },
                    data,
                ));
            }
        }

        if accepted.is_empty() {
            return Ok(None);
        }
        if !self.filter.passes_samples(|s| accepted.iter().any(|(c, _)| c.sample == s)) {
            return Ok(None);
        }

        let mut pooled = CorrelationData::default();
        for (_, data) in &accepted {
            pooled.extend_from(data);
        }
        let total_correlation = pooled.similarity(self.shape_measure.as_ref());
        if let Some(min_total) = p.min_total_correlation {
            if !(total_correlation >= min_total) {
                return Ok(None);
            }
        }

        let per_sample: Vec<SampleShapeCorrelation> = accepted.into_iter().map(|(c, _)| c).collect();
        let avg_correlation = per_sample.iter().map(|c| c.correlation).sum::<f64>() / per_sample.len() as f64;
        let min_edge_points = per_sample.iter().map(|c| c.edge_points).min().unwrap_or(0);

        Ok(Some(ShapeCorrelation {
            avg_correlation,
            total_correlation,
            data_points: pooled.dp_count(),
            min_edge_points,
            per_sample,
        }))
    }

    /// Collect intensity pairs of two features of one sample.
    ///
    /// The higher feature (lower row id on ties) is the anchor. Starting at
    /// its apex scan, points are added to the left and then to the right while
    /// both features sit on the same scan above the noise level. Data is
    /// returned as (first row, second row) regardless of the anchor.
    fn walk_shapes(
        &self,
        id_a: u32,
        fa: &Feature,
        id_b: u32,
        fb: &Feature,
        p: &FeatureShapeCorrelationParams,
    ) -> Result<Option<(CorrelationData, usize)>> {
        let (pa, pb) = match (&fa.profile, &fb.profile) {
            (Some(pa), Some(pb)) => (pa, pb),
            _ => return Ok(None),
        };
        if pa.len() < p.min_data_points || pb.len() < p.min_data_points {
            return Ok(None);
        }
        check_finite(id_a, fa.height, "feature height")?;
        check_finite(id_b, fb.height, "feature height")?;

        // (anchor, other, anchor is the first row)
        let (anchor, other, anchor_first) = if fa.height >= fb.height { (pa, pb, true) } else { (pb, pa, false) };
        let (anchor_id, other_id) = if anchor_first { (id_a, id_b) } else { (id_b, id_a) };

        let apex = match anchor.apex_index() {
            Some(i) => i,
            None => return Ok(None),
        };
        let other_apex = match other.index_of_scan(anchor.scans[apex]) {
            Some(i) => i,
            None => return Ok(None),
        };

        let mut points: Vec<(f64, f64)> = Vec::new();
        let take = |i1: usize, i2: usize, points: &mut Vec<(f64, f64)>| -> Result<bool> {
            let (y1, y2) = (anchor.intensity[i1], other.intensity[i2]);
            check_finite(anchor_id, y1, "profile intensity")?;
            check_finite(other_id, y2, "profile intensity")?;
            if anchor.scans[i1] == other.scans[i2] && y1 >= self.noise_level && y2 >= self.noise_level {
                points.push((y1, y2));
                Ok(true)
            } else {
                Ok(false)
            }
        };

        // apex and everything to its left
        let (mut i1, mut i2) = (apex as isize, other_apex as isize);
        while i1 >= 0 && i2 >= 0 {
            if !take(i1 as usize, i2 as usize, &mut points)? {
                break;
            }
            i1 -= 1;
            i2 -= 1;
        }
        if points.is_empty() {
            return Ok(None);
        }
        let left = points.len() - 1;
        if left < p.min_dp_feature_edge {
            return Ok(None);
        }

        let (mut i1, mut i2) = (apex + 1, other_apex + 1);
        while i1 < anchor.len() && i2 < other.len() {
            if !take(i1, i2, &mut points)? {
                break;
            }
            i1 += 1;
            i2 += 1;
        }
        let right = points.len() - 1 - left;
        if points.len() < p.min_data_points || right < p.min_dp_feature_edge {
            return Ok(None);
        }

        let mut data = CorrelationData::with_capacity(points.len());
        for (y_anchor, y_other) in points {
            if anchor_first {
                data.push(y_anchor, y_other);
            } else {
                data.push(y_other, y_anchor);
            }
        }
        Ok(Some((data, left.min(right))))
    }

    fn height_correlation(
        &self,
        a: &PreparedRow<'_>,
        b: &PreparedRow<'_>,
        p: &HeightCorrelationParams,
    ) -> Result<Option<HeightCorrelation>> {
        let n = a.features.len();
        let mut data = CorrelationData::with_capacity(n);
        let mut ratio_sum = 0.0;

        for s in 0..n {
            if let (Some(ha), Some(hb)) = (a.height(s), b.height(s)) {
                check_finite(a.id, ha, "feature height")?;
                check_finite(b.id, hb, "feature height")?;
                if ha >= self.min_height && hb >= self.min_height {
                    data.push(ha, hb);
                    ratio_sum += ha / hb;
                }
            }
        }

        if p.impute_missing && data.dp_count() > 0 {
            let ratio = ratio_sum / data.dp_count() as f64;
            if ratio.is_finite() && ratio != 0.0 {
                self.impute_missing_heights(a, b, ratio, &mut data)?;
            }
        }

        if data.dp_count() < p.min_samples.max(2) {
            return Ok(None);
        }

        let measure = self.height_measure.as_ref();
        let correlation = data.similarity(measure);
        if !(correlation >= p.min_correlation) {
            return Ok(None);
        }
        if p.negative_regression_guard
            && data.is_negative_regression(
                HEIGHT_GUARD_FOLD_CHANGE,
                HEIGHT_GUARD_SIGNIFICANCE,
                p.min_samples,
                p.min_correlation,
                measure,
            )
        {
            return Ok(None);
        }

        Ok(Some(HeightCorrelation { correlation, samples: data.dp_count(), slope: data.slope() }))
    }

    /// Fill samples where exactly one row is missing (or below the minimum
    /// height) if the ratio-based estimate of the missing height would reach
    /// the minimum height. The missing side is then set to the noise level.
    fn impute_missing_heights(
        &self,
        a: &PreparedRow<'_>,
        b: &PreparedRow<'_>,
        ratio: f64,
        data: &mut CorrelationData,
    ) -> Result<()> {
        for s in 0..a.features.len() {
            let ha = a.height(s);
            let hb = b.height(s);
            if let Some(h) = ha {
                check_finite(a.id, h, "feature height")?;
            }
            if let Some(h) = hb {
                check_finite(b.id, h, "feature height")?;
            }
            let a_missing = !matches!(ha, Some(h) if h >= self.min_height);
            let b_missing = !matches!(hb, Some(h) if h >= self.min_height);
            if a_missing == b_missing {
                continue;
            }

            let observed_a = ha.unwrap_or(0.0);
            let observed_b = hb.unwrap_or(0.0);
            let est_a = if a_missing { observed_b * ratio } else { observed_a };
            let est_b = if b_missing { observed_a / ratio } else { observed_b };
            if est_a >= self.min_height && est_b >= self.min_height {
                let x = if a_missing { self.noise_level.max(observed_a) } else { observed_a };
                let y = if b_missing { self.noise_level.max(observed_b) } else { observed_b };
                data.push(x, y);
            }
        }
        Ok(())
    }
}

#[inline]
fn check_finite(row_id: u32, value: f64, what: &'static str) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(GroupingError::NonFiniteData { row_id, what })
    }
}
