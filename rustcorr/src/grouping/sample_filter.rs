//! Minimum samples filtering.
//!
//! Decides which rows have enough well-measured samples to be grouped at all
//! and which row pairs share enough of them to be worth correlating.

use rayon::prelude::*;

use crate::grouping::params::{MinimumSamplesFilterParams, RtTolerance};
use crate::grouping::row::{PreparedRow, PreparedTable};

/// Result of the pair overlap check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlapResult {
    True,
    False,
}

impl OverlapResult {
    #[inline]
    pub fn is_true(self) -> bool {
        self == OverlapResult::True
    }
}

impl From<bool> for OverlapResult {
    fn from(b: bool) -> Self {
        if b { OverlapResult::True } else { OverlapResult::False }
    }
}

/// Minimum samples filter bound to the sample list of one run.
///
/// A sample qualifies for a row if the row has a feature there with
/// `height >= min_height`. A sample set passes if it holds at least the
/// required number overall OR within at least one sample group.
#[derive(Clone, Debug)]
pub struct MinimumSamplesFilter {
    params: MinimumSamplesFilterParams,
    min_height: f64,
    rt_tolerance: RtTolerance,
    n_samples: usize,
    sample_groups: Vec<Vec<usize>>,
}

impl MinimumSamplesFilter {
    pub fn new(
        params: &MinimumSamplesFilterParams,
        min_height: f64,
        rt_tolerance: RtTolerance,
        table: &PreparedTable<'_>,
    ) -> Self {
        Self {
            params: params.clone(),
            min_height,
            rt_tolerance,
            n_samples: table.n_samples(),
            sample_groups: table.sample_groups.iter().map(|(_, idx)| idx.clone()).collect(),
        }
    }

    /// Pair overlap checks only compare retention times for this many samples.
    pub fn is_approximate(&self) -> bool {
        matches!(self.params.large_dataset_sample_limit, Some(limit) if self.n_samples > limit)
    }

    #[inline]
    fn is_qualifying(&self, row: &PreparedRow<'_>, sample: usize) -> bool {
        matches!(row.height(sample), Some(h) if h >= self.min_height)
    }

    /// Check an arbitrary sample predicate against the overall-or-group rule.
    pub fn passes_samples<F>(&self, qualifying: F) -> bool
    where
        F: Fn(usize) -> bool,
    {
        let required_all = self.params.min_samples_all.required(self.n_samples);
        if required_all <= 1 {
            return true;
        }
        let count = (0..self.n_samples).filter(|&s| qualifying(s)).count();
        if count >= required_all {
            return true;
        }

        if let Some(min_group) = &self.params.min_samples_in_group {
            for group in &self.sample_groups {
                let required = min_group.required(group.len());
                if required <= 1 {
                    return true;
                }
                let in_group = group.iter().filter(|&&s| qualifying(s)).count();
                if in_group >= required {
                    return true;
                }
            }
        }
        false
    }

    /// The row has enough qualifying samples to be considered at all.
    #[inline]
    pub fn qualifies(&self, row: &PreparedRow<'_>) -> bool {
        self.passes_samples(|s| self.is_qualifying(row, s))
    }

    /// Both rows are within retention time tolerance and share enough commonly
    /// qualifying samples.
    pub fn overlap_qualifies(&self, a: &PreparedRow<'_>, b: &PreparedRow<'_>) -> OverlapResult {
        if !self.rt_tolerance.check_within(a.rt, b.rt) {
            return OverlapResult::False;
        }
        if self.is_approximate() {
            return OverlapResult::True;
        }
        self.passes_samples(|s| self.is_qualifying(a, s) && self.is_qualifying(b, s)).into()
    }

    /// Indices (into `table.rows`) of all qualifying rows, in row order.
    pub fn filter_par(&self, table: &PreparedTable<'_>) -> Vec<usize> {
        table
            .rows
            .par_iter()
            .enumerate()
            .filter(|(_, row)| self.qualifies(row))
            .map(|(i, _)| i)
            .collect()
    }

    /// Get statistics about which rule let rows pass.
    pub fn diagnose(&self, table: &PreparedTable<'_>) -> FilterDiagnostics {
        let mut diag = FilterDiagnostics { total: table.rows.len(), ..FilterDiagnostics::default() };
        let required_all = self.params.min_samples_all.required(self.n_samples);

        for row in &table.rows {
            let count = (0..self.n_samples).filter(|&s| self.is_qualifying(row, s)).count();
            if required_all <= 1 || count >= required_all {
                diag.passed_all_samples += 1;
            } else if self.qualifies(row) {
                diag.passed_in_group += 1;
            } else {
                diag.failed += 1;
            }
        }
        diag
    }
}

/// Diagnostics about filter outcomes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterDiagnostics {
    pub total: usize,
    pub passed_all_samples: usize,
    pub passed_in_group: usize,
    pub failed: usize,
}

impl FilterDiagnostics {
    pub fn passed(&self) -> usize {
        self.passed_all_samples + self.passed_in_group
    }

    pub fn summary(&self) -> String {
        let pct = if self.total > 0 {
            (self.passed() as f64 / self.total as f64) * 100.0
        } else {
            100.0
        };

        format!(
            "FilterDiagnostics: {}/{} passed ({:.1}%), {} failed\n\
             - passed over all samples: {}\n\
             - passed within a sample group: {}",
            self.passed(),
            self.total,
            pct,
            self.failed,
            self.passed_all_samples,
            self.passed_in_group,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::params::MinSamples;
    use crate::grouping::row::{FeatureListRow, Sample};

    fn samples() -> Vec<Sample> {
        vec![
            Sample::with_group("a1", "A"),
            Sample::with_group("a2", "A"),
            Sample::with_group("b1", "B"),
            Sample::with_group("b2", "B"),
        ]
    }

    fn params(all: usize, group: Option<usize>) -> MinimumSamplesFilterParams {
        MinimumSamplesFilterParams {
            min_samples_all: MinSamples::absolute(all),
            min_samples_in_group: group.map(MinSamples::absolute),
            large_dataset_sample_limit: None,
        }
    }

    #[test]
    fn test_overall_or_group_rule() {
        let samples = samples();
        let rows = vec![
            // qualifying in a1, a2 only
            FeatureListRow::from_heights(1, 1.0, &samples, &[10.0, 10.0, 0.0, 0.0]),
            // qualifying in a1, b1
            FeatureListRow::from_heights(2, 1.0, &samples, &[10.0, 0.0, 10.0, 0.0]),
        ];
        let table = PreparedTable::new(&rows, &samples).unwrap();

        let overall = MinimumSamplesFilter::new(&params(3, None), 1.0, RtTolerance::absolute(0.1), &table);
        assert!(!overall.qualifies(&table.rows[0]));
        assert!(!overall.qualifies(&table.rows[1]));

        let with_group = MinimumSamplesFilter::new(&params(3, Some(2)), 1.0, RtTolerance::absolute(0.1), &table);
        assert!(with_group.qualifies(&table.rows[0]));
        assert!(!with_group.qualifies(&table.rows[1]));

        let diag = with_group.diagnose(&table);
        assert_eq!(diag.passed_in_group, 1);
        assert_eq!(diag.failed, 1);
    }

    #[test]
    fn test_min_one_or_zero_always_passes() {
        let samples = samples();
        let rows = vec![FeatureListRow::new(1, 1.0)];
        let table = PreparedTable::new(&rows, &samples).unwrap();
        for n in [0, 1] {
            let f = MinimumSamplesFilter::new(&params(n, None), 1.0, RtTolerance::absolute(0.1), &table);
            assert!(f.qualifies(&table.rows[0]));
        }
    }

    #[test]
    fn test_overlap_requires_shared_samples_and_rt() {
        let samples = samples();
        let rows = vec![
            FeatureListRow::from_heights(1, 1.00, &samples, &[10.0, 10.0, 0.0, 0.0]),
            FeatureListRow::from_heights(2, 1.05, &samples, &[0.0, 0.0, 10.0, 10.0]),
            FeatureListRow::from_heights(3, 1.02, &samples, &[10.0, 10.0, 10.0, 0.0]),
            FeatureListRow::from_heights(4, 2.00, &samples, &[10.0, 10.0, 10.0, 10.0]),
        ];
        let table = PreparedTable::new(&rows, &samples).unwrap();
        let f = MinimumSamplesFilter::new(&params(2, None), 1.0, RtTolerance::absolute(0.1), &table);
        let row = |id: u32| table.rows.iter().find(|r| r.id == id).unwrap();

        assert_eq!(f.overlap_qualifies(row(1), row(2)), OverlapResult::False);
        assert_eq!(f.overlap_qualifies(row(1), row(3)), OverlapResult::True);
        assert_eq!(f.overlap_qualifies(row(3), row(1)), OverlapResult::True);
        // shares samples but too far apart
        assert_eq!(f.overlap_qualifies(row(3), row(4)), OverlapResult::False);
    }

    #[test]
    fn test_overlap_passes_through_one_group() {
        let samples = samples();
        let rows = vec![
            FeatureListRow::from_heights(1, 1.00, &samples, &[10.0, 10.0, 0.0, 0.0]),
            FeatureListRow::from_heights(2, 1.01, &samples, &[10.0, 10.0, 10.0, 0.0]),
            FeatureListRow::from_heights(3, 1.02, &samples, &[10.0, 0.0, 10.0, 10.0]),
        ];
        let table = PreparedTable::new(&rows, &samples).unwrap();
        let f = MinimumSamplesFilter::new(&params(3, Some(2)), 1.0, RtTolerance::absolute(0.1), &table);
        let row = |id: u32| table.rows.iter().find(|r| r.id == id).unwrap();

        // a1 and a2 shared: too few overall, enough within group A
        assert!(f.overlap_qualifies(row(1), row(2)).is_true());
        // a1 and b1 shared: one per group
        assert_eq!(f.overlap_qualifies(row(2), row(3)), OverlapResult::False);
    }

    #[test]
    fn test_large_dataset_mode_skips_sample_overlap() {
        let samples = samples();
        let rows = vec![
            FeatureListRow::from_heights(1, 1.00, &samples, &[10.0, 10.0, 0.0, 0.0]),
            FeatureListRow::from_heights(2, 1.05, &samples, &[0.0, 0.0, 10.0, 10.0]),
        ];
        let table = PreparedTable::new(&rows, &samples).unwrap();
        let mut p = params(2, None);
        p.large_dataset_sample_limit = Some(3);
        let f = MinimumSamplesFilter::new(&p, 1.0, RtTolerance::absolute(0.1), &table);
        assert!(f.is_approximate());
        assert!(f.overlap_qualifies(&table.rows[0], &table.rows[1]).is_true());
    }

    #[test]
    fn test_filter_par_keeps_row_order() {
        let samples = samples();
        let rows = vec![
            FeatureListRow::from_heights(1, 3.0, &samples, &[10.0, 10.0, 0.0, 0.0]),
            FeatureListRow::from_heights(2, 1.0, &samples, &[10.0, 0.0, 0.0, 0.0]),
            FeatureListRow::from_heights(3, 2.0, &samples, &[10.0, 10.0, 10.0, 0.0]),
        ];
        let table = PreparedTable::new(&rows, &samples).unwrap();
        let f = MinimumSamplesFilter::new(&params(2, None), 1.0, RtTolerance::absolute(0.1), &table);
        // sorted by rt: ids 2, 3, 1
        assert_eq!(f.filter_par(&table), vec![1, 2]);
    }
}
