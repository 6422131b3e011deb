use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::grouping::scoring::{HeightCorrelation, ShapeCorrelation};

/// Unordered row pair, stored as `(min(id), max(id))`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowPair {
    pub low: u32,
    pub high: u32,
}

impl RowPair {
    #[inline]
    pub fn new(a: u32, b: u32) -> Self {
        if a <= b { RowPair { low: a, high: b } } else { RowPair { low: b, high: a } }
    }

    #[inline]
    pub fn contains(&self, id: u32) -> bool {
        self.low == id || self.high == id
    }
}

/// Accepted relationship of one row pair.
///
/// Outside of retention-time-only mode at least one of `shape` and `height`
/// is present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub pair: RowPair,
    /// |rt_a - rt_b|, already confirmed to be within tolerance.
    pub rt_delta: f64,
    pub shape: Option<ShapeCorrelation>,
    pub height: Option<HeightCorrelation>,
    /// Accepted without any correlation because no sub-scorer was enabled.
    pub rt_only: bool,
}

impl RelationshipEdge {
    pub fn rt_only(pair: RowPair, rt_delta: f64) -> Self {
        RelationshipEdge { pair, rt_delta, shape: None, height: None, rt_only: true }
    }

    pub fn is_accepted(&self) -> bool {
        self.rt_only || self.shape.is_some() || self.height.is_some()
    }

    pub fn shape_correlation(&self) -> Option<f64> {
        self.shape.as_ref().map(|s| s.avg_correlation)
    }

    pub fn height_correlation(&self) -> Option<f64> {
        self.height.as_ref().map(|h| h.correlation)
    }
}

/// Sparse, symmetric row-to-row relationship map.
///
/// Safe to write from many workers at once. Every pair is written at most
/// once; a second insert of the same pair is ignored and reported.
#[derive(Debug, Default)]
pub struct RelationshipMap {
    edges: DashMap<RowPair, RelationshipEdge>,
}

impl RelationshipMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the edge of `(a, b)`. Returns false if the pair was already present.
    pub fn add(&self, a: u32, b: u32, mut edge: RelationshipEdge) -> bool {
        let pair = RowPair::new(a, b);
        edge.pair = pair;
        match self.edges.entry(pair) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(edge);
                true
            }
        }
    }

    pub fn get(&self, a: u32, b: u32) -> Option<RelationshipEdge> {
        self.edges.get(&RowPair::new(a, b)).map(|e| e.value().clone())
    }

    pub fn contains(&self, a: u32, b: u32) -> bool {
        self.edges.contains_key(&RowPair::new(a, b))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// All edges sorted by pair. Call once all writers are done.
    pub fn values(&self) -> Vec<RelationshipEdge> {
        let mut out: Vec<RelationshipEdge> = self.edges.iter().map(|e| e.value().clone()).collect();
        out.sort_unstable_by_key(|e| e.pair);
        out
    }

    /// Consume the map, edges sorted by pair.
    pub fn into_values(self) -> Vec<RelationshipEdge> {
        let mut out: Vec<RelationshipEdge> = self.edges.into_iter().map(|(_, e)| e).collect();
        out.sort_unstable_by_key(|e| e.pair);
        out
    }
}
