//! Per-group correlation summaries and optional post-filtering of groups.
//!
//! Refinement never touches the scoring phase: it selects edges to prune and
//! lets [`GroupBuilder`] rebuild the components without them.

use std::collections::{HashMap, HashSet};

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

use crate::error::{GroupingError, Result};
use crate::grouping::group::{GroupBuilder, RowGroup, RowGroups};
use crate::grouping::relationship::{RelationshipEdge, RowPair};

/// Correlation strength of the edges inside one group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupCorrelationSummary {
    pub group_id: u32,
    pub rows: usize,
    /// Edges with both rows in the group.
    pub edges: usize,
    pub avg_shape_correlation: Option<f64>,
    pub min_shape_correlation: Option<f64>,
    pub max_shape_correlation: Option<f64>,
    pub avg_height_correlation: Option<f64>,
}

impl GroupCorrelationSummary {
    /// Mean of the available per-scorer averages, `None` for singletons and
    /// groups linked by retention time only.
    pub fn strength(&self) -> Option<f64> {
        mean(self.avg_shape_correlation.iter().chain(self.avg_height_correlation.iter()).copied())
    }
}

/// Strength of a single edge: mean of its present correlations.
pub fn edge_strength(edge: &RelationshipEdge) -> Option<f64> {
    mean(edge.shape_correlation().into_iter().chain(edge.height_correlation()))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// How to post-filter groups.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinePolicy {
    /// Dissolve groups into singletons if an average correlation is below
    /// its minimum. `None` skips that scorer.
    MinAverageCorrelation { min_shape: Option<f64>, min_height: Option<f64> },
    /// Remove bridge edges weaker than `below` whose removal leaves at least
    /// `min_side_rows` rows on each side.
    DropWeakBridges { below: f64, min_side_rows: usize },
}

impl RefinePolicy {
    pub fn validate(&self) -> Result<()> {
        let check = |name: &'static str, v: f64| {
            if v.is_finite() && (-1.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(GroupingError::InvalidParameter { name, reason: format!("must be within [-1, 1], got {}", v) })
            }
        };
        match self {
            RefinePolicy::MinAverageCorrelation { min_shape, min_height } => {
                if let Some(v) = min_shape {
                    check("refine.min_shape", *v)?;
                }
                if let Some(v) = min_height {
                    check("refine.min_height", *v)?;
                }
            }
            RefinePolicy::DropWeakBridges { below, .. } => check("refine.below", *below)?,
        }
        Ok(())
    }
}

/// Outcome of a refinement pass.
#[derive(Clone, Debug)]
pub struct Refinement {
    pub groups: RowGroups,
    /// Edges no longer used for grouping, sorted.
    pub pruned: Vec<RowPair>,
}

#[derive(Clone, Debug, Default)]
pub struct GroupRefiner {
    policy: Option<RefinePolicy>,
}

impl GroupRefiner {
    pub fn new(policy: RefinePolicy) -> Self {
        Self { policy: Some(policy) }
    }

    /// Summaries only, groups stay as built.
    pub fn summaries_only() -> Self {
        Self { policy: None }
    }

    pub fn policy(&self) -> Option<&RefinePolicy> {
        self.policy.as_ref()
    }

    /// One summary per group, in group order.
    pub fn summarize(&self, groups: &RowGroups, edges: &[RelationshipEdge]) -> Vec<GroupCorrelationSummary> {
        let mut by_group = internal_edges(groups, edges);
        groups
            .iter()
            .map(|g| summarize_group(g, by_group.remove(&g.id).unwrap_or_default()))
            .collect()
    }

    /// Apply the policy and rebuild the groups through `builder`.
    pub fn refine(&self, builder: &GroupBuilder, groups: &RowGroups, edges: &[RelationshipEdge]) -> Refinement {
        let policy = match &self.policy {
            Some(p) => p,
            None => return Refinement { groups: groups.clone(), pruned: Vec::new() },
        };

        let by_group = internal_edges(groups, edges);
        let mut pruned: Vec<RowPair> = Vec::new();
        for group in groups.iter().filter(|g| !g.is_singleton()) {
            let internal = match by_group.get(&group.id) {
                Some(e) => e,
                None => continue,
            };
            match policy {
                RefinePolicy::MinAverageCorrelation { min_shape, min_height } => {
                    let summary = summarize_group(group, internal.clone());
                    if below(summary.avg_shape_correlation, *min_shape) || below(summary.avg_height_correlation, *min_height) {
                        pruned.extend(internal.iter().map(|e| e.pair));
                    }
                }
                RefinePolicy::DropWeakBridges { below: max_r, min_side_rows } => {
                    pruned.extend(weak_bridges(group, internal, *max_r, *min_side_rows));
                }
            }
        }
        pruned.sort_unstable();
        pruned.dedup();

        if pruned.is_empty() {
            return Refinement { groups: groups.clone(), pruned };
        }
        let dropped: HashSet<RowPair> = pruned.iter().copied().collect();
        let groups = builder.build(edges.iter().map(|e| &e.pair).filter(|p| !dropped.contains(*p)));
        Refinement { groups, pruned }
    }
}

#[inline]
fn below(value: Option<f64>, min: Option<f64>) -> bool {
    matches!((value, min), (Some(v), Some(m)) if v < m)
}

fn internal_edges<'e>(groups: &RowGroups, edges: &'e [RelationshipEdge]) -> HashMap<u32, Vec<&'e RelationshipEdge>> {
    edges
        .iter()
        .filter_map(|e| {
            let g = groups.group_of(e.pair.low)?;
            g.contains(e.pair.high).then_some((g.id, e))
        })
        .into_group_map()
}

fn summarize_group(group: &RowGroup, internal: Vec<&RelationshipEdge>) -> GroupCorrelationSummary {
    let shape: Vec<f64> = internal.iter().filter_map(|e| e.shape_correlation()).collect();
    let (min_shape, max_shape) = match shape.iter().copied().minmax_by(|a, b| a.total_cmp(b)) {
        MinMaxResult::NoElements => (None, None),
        MinMaxResult::OneElement(v) => (Some(v), Some(v)),
        MinMaxResult::MinMax(lo, hi) => (Some(lo), Some(hi)),
    };
    GroupCorrelationSummary {
        group_id: group.id,
        rows: group.len(),
        edges: internal.len(),
        avg_shape_correlation: mean(shape.iter().copied()),
        min_shape_correlation: min_shape,
        max_shape_correlation: max_shape,
        avg_height_correlation: mean(internal.iter().filter_map(|e| e.height_correlation())),
    }
}

/// Weak edges of `group` whose removal splits it into two parts of at least
/// `min_side_rows` rows each. Retention-time-only edges have no strength and
/// are never weak.
///
/// Bridges are found in one depth-first pass (Tarjan), tracking subtree sizes
/// so both sides of a bridge are known when it is found.
fn weak_bridges(group: &RowGroup, internal: &[&RelationshipEdge], max_r: f64, min_side_rows: usize) -> Vec<RowPair> {
    const UNSEEN: usize = usize::MAX;
    let n = group.len();
    let local = |id: u32| group.rows.binary_search(&id).ok();

    // neighbor, edge index
    let mut adjacency: Vec<Vec<(usize, usize)>> = vec![Vec::new(); n];
    for (e, edge) in internal.iter().enumerate() {
        if let (Some(a), Some(b)) = (local(edge.pair.low), local(edge.pair.high)) {
            adjacency[a].push((b, e));
            adjacency[b].push((a, e));
        }
    }

    let mut disc = vec![UNSEEN; n];
    let mut low = vec![0usize; n];
    let mut size = vec![1usize; n];
    let mut timer = 0usize;
    let mut out = Vec::new();
    // node, edge to its parent, next adjacency position
    let mut stack: Vec<(usize, Option<usize>, usize)> = Vec::new();

    for root in 0..n {
        if disc[root] != UNSEEN {
            continue;
        }
        disc[root] = timer;
        low[root] = timer;
        timer += 1;
        stack.push((root, None, 0));

        while let Some(top) = stack.last_mut() {
            let (u, parent_edge) = (top.0, top.1);
            if let Some(&(v, e)) = adjacency[u].get(top.2) {
                top.2 += 1;
                if Some(e) == parent_edge {
                    continue;
                }
                if disc[v] == UNSEEN {
                    disc[v] = timer;
                    low[v] = timer;
                    timer += 1;
                    stack.push((v, Some(e), 0));
                } else {
                    low[u] = low[u].min(disc[v]);
                }
                continue;
            }

            stack.pop();
            if let (Some(e), Some(&(p, _, _))) = (parent_edge, stack.last()) {
                low[p] = low[p].min(low[u]);
                size[p] += size[u];
                let weak = matches!(edge_strength(internal[e]), Some(s) if s < max_r);
                if weak && low[u] > disc[p] && size[u] >= min_side_rows && n - size[u] >= min_side_rows {
                    out.push(internal[e].pair);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::scoring::{HeightCorrelation, ShapeCorrelation};

    fn edge(a: u32, b: u32, shape: Option<f64>, height: Option<f64>) -> RelationshipEdge {
        RelationshipEdge {
            pair: RowPair::new(a, b),
            rt_delta: 0.0,
            shape: shape.map(|r| ShapeCorrelation {
                per_sample: Vec::new(),
                avg_correlation: r,
                total_correlation: r,
                data_points: 10,
                min_edge_points: 2,
            }),
            height: height.map(|r| HeightCorrelation { correlation: r, samples: 5, slope: 1.0 }),
            rt_only: false,
        }
    }

    /// Two triangles {1,2,3} and {4,5,6} joined by a weak 3-4 edge.
    fn dumbbell() -> (GroupBuilder, Vec<RelationshipEdge>) {
        let edges = vec![
            edge(1, 2, Some(0.95), None),
            edge(2, 3, Some(0.97), None),
            edge(1, 3, Some(0.93), None),
            edge(3, 4, Some(0.86), None),
            edge(4, 5, Some(0.99), None),
            edge(5, 6, Some(0.98), None),
            edge(4, 6, Some(0.96), None),
        ];
        (GroupBuilder::new(1..=7), edges)
    }

    #[test]
    fn test_summaries() {
        let (builder, edges) = dumbbell();
        let groups = builder.build(edges.iter().map(|e| &e.pair));
        let summaries = GroupRefiner::summaries_only().summarize(&groups, &edges);
        assert_eq!(summaries.len(), 2);

        let big = &summaries[0];
        assert_eq!((big.group_id, big.rows, big.edges), (1, 6, 7));
        assert_eq!(big.min_shape_correlation, Some(0.86));
        assert_eq!(big.max_shape_correlation, Some(0.99));
        assert!(big.avg_height_correlation.is_none());
        assert!((big.strength().unwrap() - 6.64 / 7.0).abs() < 1e-12);

        let single = &summaries[1];
        assert_eq!((single.group_id, single.edges), (7, 0));
        assert!(single.strength().is_none());
    }

    #[test]
    fn test_drop_weak_bridges_splits_dumbbell() {
        let (builder, edges) = dumbbell();
        let groups = builder.build(edges.iter().map(|e| &e.pair));
        let refiner = GroupRefiner::new(RefinePolicy::DropWeakBridges { below: 0.9, min_side_rows: 2 });
        let refined = refiner.refine(&builder, &groups, &edges);
        assert_eq!(refined.pruned, vec![RowPair::new(3, 4)]);
        assert!(refined.groups.same_group(1, 3));
        assert!(refined.groups.same_group(4, 6));
        assert!(!refined.groups.same_group(3, 4));
        assert_eq!(refined.groups.len(), 3);
    }

    #[test]
    fn test_strong_or_leaf_bridges_are_kept() {
        let (builder, mut edges) = dumbbell();
        // leaf row 7 hangs off a weak edge
        edges.push(edge(6, 7, Some(0.5), None));
        let groups = builder.build(edges.iter().map(|e| &e.pair));
        let refiner = GroupRefiner::new(RefinePolicy::DropWeakBridges { below: 0.8, min_side_rows: 2 });
        let refined = refiner.refine(&builder, &groups, &edges);
        assert!(refined.pruned.is_empty());
        assert_eq!(refined.groups.len(), 1);
    }

    #[test]
    fn test_min_average_dissolves_weak_groups() {
        let edges = vec![edge(1, 2, None, Some(0.6)), edge(3, 4, None, Some(0.95))];
        let builder = GroupBuilder::new([1, 2, 3, 4]);
        let groups = builder.build(edges.iter().map(|e| &e.pair));
        let refiner = GroupRefiner::new(RefinePolicy::MinAverageCorrelation { min_shape: None, min_height: Some(0.7) });
        let refined = refiner.refine(&builder, &groups, &edges);
        assert_eq!(refined.pruned, vec![RowPair::new(1, 2)]);
        assert_eq!(refined.groups.len(), 3);
        assert!(refined.groups.same_group(3, 4));
    }

    #[test]
    fn test_policy_validation() {
        assert!(RefinePolicy::DropWeakBridges { below: 1.5, min_side_rows: 2 }.validate().is_err());
        assert!(RefinePolicy::MinAverageCorrelation { min_shape: Some(0.5), min_height: None }.validate().is_ok());
    }

    #[test]
    fn test_every_weak_bridge_of_a_chain() {
        // 1 - 2 - ... - 2000, every link weak
        let edges: Vec<RelationshipEdge> = (1..2000).map(|i| edge(i, i + 1, Some(0.5), None)).collect();
        let builder = GroupBuilder::new(1..=2000);
        let groups = builder.build(edges.iter().map(|e| &e.pair));
        let refiner = GroupRefiner::new(RefinePolicy::DropWeakBridges { below: 0.9, min_side_rows: 100 });
        let refined = refiner.refine(&builder, &groups, &edges);
        // links with fewer than 100 rows on one side stay
        assert_eq!(refined.pruned.len(), 1999 - 2 * 99);
        assert_eq!(refined.pruned.first(), Some(&RowPair::new(100, 101)));
        assert_eq!(refined.pruned.last(), Some(&RowPair::new(1900, 1901)));
        assert_eq!(refined.groups.len(), 1 + 1999 - 2 * 99);
    }

    #[test]
    fn test_weak_cycle_has_no_bridges() {
        let edges: Vec<RelationshipEdge> =
            (1..=6).map(|i| edge(i, i % 6 + 1, Some(0.4), None)).collect();
        let builder = GroupBuilder::new(1..=6);
        let groups = builder.build(edges.iter().map(|e| &e.pair));
        let refiner = GroupRefiner::new(RefinePolicy::DropWeakBridges { below: 0.9, min_side_rows: 1 });
        let refined = refiner.refine(&builder, &groups, &edges);
        assert!(refined.pruned.is_empty());
        assert_eq!(refined.groups.len(), 1);
    }
}
