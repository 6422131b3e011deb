//! Orchestration of one correlation grouping run.
//!
//! filter rows -> candidate windows -> score pairs in parallel -> relationship
//! map -> connected components -> summaries and optional refinement.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::error::Result;
use crate::grouping::candidates::CandidateWindow;
use crate::grouping::group::{GroupBuilder, RowGroups};
use crate::grouping::params::CorrelationGroupingParams;
use crate::grouping::refine::{GroupCorrelationSummary, GroupRefiner, RefinePolicy};
use crate::grouping::relationship::{RelationshipEdge, RelationshipMap, RowPair};
use crate::grouping::row::{FeatureListRow, PreparedTable, Sample};
use crate::grouping::sample_filter::MinimumSamplesFilter;
use crate::grouping::scoring::PairScorer;
use crate::grouping::similarity::Similarity;

// candidates scored between two cancellation checks inside one window
const CANCEL_CHECK_INTERVAL: usize = 64;

/// Cooperative cancellation flag, shared between the caller and the workers.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Advisory progress: outer rows completed out of the total.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    done: Arc<AtomicUsize>,
    total: Arc<AtomicUsize>,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    fn start(&self, total: usize) {
        self.done.store(0, Ordering::Relaxed);
        self.total.store(total, Ordering::Relaxed);
    }

    #[inline]
    fn row_done(&self) {
        self.done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> usize {
        self.done.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Fraction in `[0, 1]`, 1 when there is nothing to do.
    pub fn fraction(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            1.0
        } else {
            (self.completed() as f64 / total as f64).min(1.0)
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupingSummary {
    pub relationships: usize,
    pub groups: usize,
    /// Rows removed by the minimum samples filter.
    pub excluded_rows: usize,
    /// Pairs within retention time tolerance, before the overlap check.
    pub candidate_pairs: usize,
}

impl fmt::Display for GroupingSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} relationships, {} groups, {} rows excluded by the minimum samples filter ({} candidate pairs)",
            self.relationships, self.groups, self.excluded_rows, self.candidate_pairs
        )
    }
}

#[derive(Clone, Debug)]
pub struct GroupingResult {
    /// Accepted edges sorted by pair.
    pub relationships: Vec<RelationshipEdge>,
    /// Groups of all qualifying rows, singletons included.
    pub groups: RowGroups,
    /// One summary per entry of `groups`.
    pub summaries: Vec<GroupCorrelationSummary>,
    /// Edges removed by the refine policy, still present in `relationships`.
    pub pruned: Vec<RowPair>,
    /// Ids of rows removed by the minimum samples filter, ascending.
    pub excluded_rows: Vec<u32>,
    pub summary: GroupingSummary,
}

/// A run either finishes or is cancelled; errors are reported separately.
#[derive(Clone, Debug)]
pub enum GroupingOutcome {
    Finished(GroupingResult),
    /// Incomplete: holds whatever was accepted before cancellation was seen.
    Cancelled { relationships: Vec<RelationshipEdge>, rows_processed: usize },
}

impl GroupingOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GroupingOutcome::Cancelled { .. })
    }

    pub fn finished(self) -> Option<GroupingResult> {
        match self {
            GroupingOutcome::Finished(r) => Some(r),
            GroupingOutcome::Cancelled { .. } => None,
        }
    }
}

/// Groups feature list rows that are related by retention time, feature shape
/// and height correlation.
///
/// # Example
///
/// ```rust
/// # use rustcorr::grouping::params::{CorrelationGroupingParams, FeatureShapeCorrelationParams, RtTolerance};
/// # use rustcorr::grouping::row::{FeatureListRow, Sample};
/// # use rustcorr::grouping::task::CorrelationGroupingTask;
/// let samples = vec![Sample::new("s1"), Sample::new("s2"), Sample::new("s3")];
/// let rows = vec![
///     FeatureListRow::from_heights(1, 5.00, &samples, &[10.0, 12.0, 11.0]),
///     FeatureListRow::from_heights(2, 5.02, &samples, &[9.0, 13.0, 10.0]),
///     FeatureListRow::from_heights(3, 9.00, &samples, &[100.0, 90.0, 95.0]),
/// ];
/// let mut params = CorrelationGroupingParams {
///     rt_tolerance: RtTolerance::absolute(0.05),
///     min_height: 1.0,
///     shape: FeatureShapeCorrelationParams::disabled(),
///     ..CorrelationGroupingParams::default()
/// };
/// params.height.min_correlation = 0.5;
/// params.height.min_samples = 3;
///
/// let result = CorrelationGroupingTask::new(params).run_to_completion(&rows, &samples).unwrap();
/// assert_eq!(result.groups.len(), 2);
/// assert!(result.groups.same_group(1, 2));
/// ```
#[derive(Clone, Debug)]
pub struct CorrelationGroupingTask {
    params: CorrelationGroupingParams,
    refiner: GroupRefiner,
    shape_measure: Option<Arc<dyn Similarity>>,
    height_measure: Option<Arc<dyn Similarity>>,
}

/// Edges and bookkeeping of the scoring phase.
struct ScoredRun {
    relationships: Vec<RelationshipEdge>,
    /// Ids of the rows that passed the minimum samples filter.
    qualifying: Vec<u32>,
    excluded_rows: Vec<u32>,
    candidate_pairs: usize,
    rows_processed: usize,
}

impl CorrelationGroupingTask {
    pub fn new(params: CorrelationGroupingParams) -> Self {
        Self { params, refiner: GroupRefiner::summaries_only(), shape_measure: None, height_measure: None }
    }

    pub fn with_refine_policy(mut self, policy: RefinePolicy) -> Self {
        self.refiner = GroupRefiner::new(policy);
        self
    }

    /// Score feature shapes with `measure` instead of `params.shape.measure`.
    pub fn with_shape_measure(mut self, measure: Arc<dyn Similarity>) -> Self {
        self.shape_measure = Some(measure);
        self
    }

    /// Score heights with `measure` instead of `params.height.measure`.
    pub fn with_height_measure(mut self, measure: Arc<dyn Similarity>) -> Self {
        self.height_measure = Some(measure);
        self
    }

    pub fn params(&self) -> &CorrelationGroupingParams {
        &self.params
    }

    /// Run without cancellation or progress reporting.
    pub fn run_to_completion(&self, rows: &[FeatureListRow], samples: &[Sample]) -> Result<GroupingResult> {
        let scored = self.score(rows, samples, None, &Progress::new())?;
        Ok(self.assemble(scored))
    }

    pub fn run(
        &self,
        rows: &[FeatureListRow],
        samples: &[Sample],
        cancel: &CancellationToken,
        progress: &Progress,
    ) -> Result<GroupingOutcome> {
        let scored = self.score(rows, samples, Some(cancel), progress)?;
        if cancel.is_cancelled() {
            warn!(
                "Correlation grouping cancelled after {}/{} rows, {} relationships so far",
                scored.rows_processed,
                scored.qualifying.len(),
                scored.relationships.len()
            );
            return Ok(GroupingOutcome::Cancelled {
                relationships: scored.relationships,
                rows_processed: scored.rows_processed,
            });
        }
        Ok(GroupingOutcome::Finished(self.assemble(scored)))
    }

    fn score(
        &self,
        rows: &[FeatureListRow],
        samples: &[Sample],
        cancel: Option<&CancellationToken>,
        progress: &Progress,
    ) -> Result<ScoredRun> {
        self.params.validate()?;
        if let Some(policy) = self.refiner.policy() {
            policy.validate()?;
        }
        info!("Correlation grouping of {} rows in {} samples", rows.len(), samples.len());

        let table = PreparedTable::new(rows, samples)?;
        let filter = MinimumSamplesFilter::new(
            &self.params.min_samples_filter,
            self.params.min_height,
            self.params.rt_tolerance,
            &table,
        );
        if filter.is_approximate() {
            warn!(
                "{} samples exceed the large data set limit, pair overlap is checked by retention time only",
                table.n_samples()
            );
        }
        if self.params.is_rt_only() {
            warn!("Shape and height correlation are disabled, grouping by retention time only");
        }

        let qualifying = filter.filter_par(&table);
        if log::log_enabled!(log::Level::Debug) {
            debug!("{}", filter.diagnose(&table).summary());
        }
        let mut excluded_rows: Vec<u32> = {
            let mut keep = vec![false; table.rows.len()];
            qualifying.iter().for_each(|&i| keep[i] = true);
            table.rows.iter().zip(keep).filter(|(_, k)| !k).map(|(r, _)| r.id).collect()
        };
        excluded_rows.sort_unstable();

        let rts: Vec<f64> = qualifying.iter().map(|&i| table.rows[i].rt).collect();
        let window = CandidateWindow::new(&rts, self.params.rt_tolerance)?;
        let candidate_pairs = window.pair_count();
        debug!("{} qualifying rows, {} candidate pairs", qualifying.len(), candidate_pairs);

        let mut scorer = PairScorer::new(&self.params, &filter);
        if let Some(measure) = &self.shape_measure {
            scorer = scorer.with_shape_measure(Arc::clone(measure));
        }
        if let Some(measure) = &self.height_measure {
            scorer = scorer.with_height_measure(Arc::clone(measure));
        }
        let map = RelationshipMap::new();
        progress.start(qualifying.len());
        let cancelled = || cancel.is_some_and(|c| c.is_cancelled());

        let pool = ThreadPoolBuilder::new().num_threads(self.params.num_threads).build()?;
        pool.install(|| {
            (0..qualifying.len()).into_par_iter().try_for_each(|i| -> Result<()> {
                if cancelled() {
                    return Ok(());
                }
                let a = &table.rows[qualifying[i]];
                for (k, j) in window.window(i).enumerate() {
                    if k % CANCEL_CHECK_INTERVAL == CANCEL_CHECK_INTERVAL - 1 && cancelled() {
                        return Ok(());
                    }
                    let b = &table.rows[qualifying[j]];
                    if !filter.overlap_qualifies(a, b).is_true() {
                        continue;
                    }
                    if let Some(edge) = scorer.score(a, b)? {
                        map.add(a.id, b.id, edge);
                    }
                }
                progress.row_done();
                Ok(())
            })
        })?;

        Ok(ScoredRun {
            relationships: map.into_values(),
            qualifying: qualifying.iter().map(|&i| table.rows[i].id).collect(),
            excluded_rows,
            candidate_pairs,
            rows_processed: progress.completed(),
        })
    }

    fn assemble(&self, scored: ScoredRun) -> GroupingResult {
        let ScoredRun { relationships, qualifying, excluded_rows, candidate_pairs, .. } = scored;
        let builder = GroupBuilder::new(qualifying);
        let groups = builder.build(relationships.iter().map(|e| &e.pair));
        debug!("{} connected components", groups.len());

        let refined = self.refiner.refine(&builder, &groups, &relationships);
        if !refined.pruned.is_empty() {
            debug!("Refinement pruned {} edges, {} -> {} groups", refined.pruned.len(), groups.len(), refined.groups.len());
        }
        let groups = refined.groups;
        let summaries = self.refiner.summarize(&groups, &relationships);

        let summary = GroupingSummary {
            relationships: relationships.len(),
            groups: groups.len(),
            excluded_rows: excluded_rows.len(),
            candidate_pairs,
        };
        info!("Correlation grouping finished: {}", summary);

        GroupingResult { relationships, groups, summaries, pruned: refined.pruned, excluded_rows, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GroupingError;
    use crate::grouping::params::{FeatureShapeCorrelationParams, HeightCorrelationParams, MinSamples, RtTolerance};

    /// Reports every pair as perfectly anti-correlated.
    #[derive(Debug)]
    struct Opposed;

    impl Similarity for Opposed {
        fn similarity(&self, _a: &[f64], _b: &[f64]) -> f64 {
            -1.0
        }
    }

    /// Accepts everything and cancels the run after `limit` calls.
    #[derive(Debug)]
    struct CancelAfter {
        calls: AtomicUsize,
        limit: usize,
        cancel: CancellationToken,
    }

    impl Similarity for CancelAfter {
        fn similarity(&self, _a: &[f64], _b: &[f64]) -> f64 {
            if self.calls.fetch_add(1, Ordering::Relaxed) + 1 >= self.limit {
                self.cancel.cancel();
            }
            1.0
        }
    }

    fn samples(n: usize) -> Vec<Sample> {
        (0..n).map(|i| Sample::new(format!("s{}", i))).collect()
    }

    fn height_params() -> CorrelationGroupingParams {
        let mut params = CorrelationGroupingParams {
            rt_tolerance: RtTolerance::absolute(0.05),
            min_height: 1.0,
            shape: FeatureShapeCorrelationParams::disabled(),
            ..CorrelationGroupingParams::default()
        };
        params.height.min_correlation = 0.5;
        params.height.min_samples = 3;
        params
    }

    #[test]
    fn test_progress_fraction() {
        let p = Progress::new();
        assert_eq!(p.fraction(), 1.0);
        p.start(4);
        p.row_done();
        assert_eq!(p.completed(), 1);
        assert!((p.fraction() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_summary_display() {
        let s = GroupingSummary { relationships: 1, groups: 2, excluded_rows: 3, candidate_pairs: 4 };
        assert_eq!(
            s.to_string(),
            "1 relationships, 2 groups, 3 rows excluded by the minimum samples filter (4 candidate pairs)"
        );
    }

    #[test]
    fn test_invalid_params_fail_before_work() {
        let samples = samples(3);
        let mut params = height_params();
        params.rt_tolerance = RtTolerance::absolute(-1.0);
        let err = CorrelationGroupingTask::new(params).run_to_completion(&[], &samples).unwrap_err();
        assert!(matches!(err, GroupingError::InvalidParameter { .. }));
    }

    #[test]
    fn test_pre_cancelled_run_is_marked() {
        let samples = samples(3);
        let rows = vec![
            FeatureListRow::from_heights(1, 5.00, &samples, &[10.0, 12.0, 11.0]),
            FeatureListRow::from_heights(2, 5.02, &samples, &[9.0, 13.0, 10.0]),
        ];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let progress = Progress::new();
        let outcome = CorrelationGroupingTask::new(height_params()).run(&rows, &samples, &cancel, &progress).unwrap();
        match outcome {
            GroupingOutcome::Cancelled { relationships, rows_processed } => {
                assert!(relationships.is_empty());
                assert_eq!(rows_processed, 0);
            }
            other => panic!("expected a cancelled run, got {:?}", other),
        }
    }

    #[test]
    fn test_worker_error_aborts_run() {
        let samples = samples(3);
        let rows = vec![
            FeatureListRow::from_heights(1, 5.00, &samples, &[10.0, f64::INFINITY, 11.0]),
            FeatureListRow::from_heights(2, 5.02, &samples, &[9.0, 13.0, 10.0]),
        ];
        let err = CorrelationGroupingTask::new(height_params()).run_to_completion(&rows, &samples).unwrap_err();
        assert!(matches!(err, GroupingError::NonFiniteData { row_id: 1, .. }));
    }

    #[test]
    fn test_group_filter_and_refine_flow_through() {
        let samples = samples(4);
        let mut params = CorrelationGroupingParams {
            rt_tolerance: RtTolerance::absolute(0.1),
            min_height: 1.0,
            shape: FeatureShapeCorrelationParams::disabled(),
            height: HeightCorrelationParams::disabled(),
            ..CorrelationGroupingParams::default()
        };
        params.min_samples_filter.min_samples_all = MinSamples::absolute(2);
        let rows = vec![
            FeatureListRow::from_heights(1, 1.00, &samples, &[5.0, 5.0, 0.0, 0.0]),
            FeatureListRow::from_heights(2, 1.05, &samples, &[5.0, 5.0, 5.0, 0.0]),
            FeatureListRow::from_heights(3, 1.08, &samples, &[5.0, 0.0, 0.0, 0.0]),
        ];
        let result = CorrelationGroupingTask::new(params)
            .with_refine_policy(RefinePolicy::MinAverageCorrelation { min_shape: Some(0.9), min_height: Some(0.9) })
            .run_to_completion(&rows, &samples)
            .unwrap();
        assert_eq!(result.excluded_rows, vec![3]);
        assert_eq!(result.relationships.len(), 1);
        assert!(result.relationships[0].rt_only);
        // retention-time-only edges carry no averages and are never dissolved
        assert!(result.pruned.is_empty());
        assert_eq!(result.groups.len(), 1);
        assert_eq!(result.summaries[0].edges, 1);
        assert_eq!(result.summary.candidate_pairs, 1);
    }

    #[test]
    fn test_custom_height_measure_decides_acceptance() {
        let samples = samples(3);
        let rows = vec![
            FeatureListRow::from_heights(1, 5.00, &samples, &[10.0, 12.0, 11.0]),
            FeatureListRow::from_heights(2, 5.02, &samples, &[9.0, 13.0, 10.0]),
        ];
        let pearson = CorrelationGroupingTask::new(height_params()).run_to_completion(&rows, &samples).unwrap();
        assert_eq!(pearson.relationships.len(), 1);
        assert_eq!(pearson.groups.len(), 1);

        let opposed = CorrelationGroupingTask::new(height_params())
            .with_height_measure(Arc::new(Opposed))
            .run_to_completion(&rows, &samples)
            .unwrap();
        assert!(opposed.relationships.is_empty());
        assert_eq!(opposed.groups.len(), 2);
    }

    #[test]
    fn test_cancellation_inside_a_window() {
        let samples = samples(3);
        let rows: Vec<FeatureListRow> =
            (1..=300).map(|id| FeatureListRow::from_heights(id, 5.0, &samples, &[10.0, 10.0, 10.0])).collect();
        let mut params = height_params();
        params.num_threads = 1;
        params.height.min_correlation = -1.0;
        params.height.negative_regression_guard = false;

        let cancel = CancellationToken::new();
        let measure = CancelAfter { calls: AtomicUsize::new(0), limit: 100, cancel: cancel.clone() };
        let progress = Progress::new();
        let outcome = CorrelationGroupingTask::new(params)
            .with_height_measure(Arc::new(measure))
            .run(&rows, &samples, &cancel, &progress)
            .unwrap();
        match outcome {
            GroupingOutcome::Cancelled { relationships, rows_processed } => {
                // the first row has 299 candidates and stops before reaching them all
                assert!(!relationships.is_empty());
                assert!(relationships.len() < 299);
                assert_eq!(rows_processed, 0);
            }
            other => panic!("expected a cancelled run, got {:?}", other),
        }
        assert_eq!(progress.total(), 300);
    }
}
