use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::error::{GroupingError, Result};

/// One acquisition, optionally tagged with a sample group label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub group: Option<String>,
}

impl Sample {
    pub fn new(name: impl Into<String>) -> Self {
        Sample { name: name.into(), group: None }
    }

    pub fn with_group(name: impl Into<String>, group: impl Into<String>) -> Self {
        Sample { name: name.into(), group: Some(group.into()) }
    }
}

/// Intensity over time of one feature, one point per scan.
///
/// Scans are sorted ascending. Uses `Arc<Vec<T>>` so clones are cheap.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureProfile {
    pub scans: Arc<Vec<u32>>,
    pub intensity: Arc<Vec<f64>>,
}

impl FeatureProfile {
    /// Constructs a new `FeatureProfile`.
    ///
    /// # Arguments
    ///
    /// * `scans` - scan numbers, ascending
    /// * `intensity` - one intensity per scan
    ///
    /// # Example
    ///
    /// ```rust
    /// # use rustcorr::grouping::row::FeatureProfile;
    /// let profile = FeatureProfile::new(vec![10, 11, 12], vec![5.0, 20.0, 4.0]);
    /// assert_eq!(profile.apex_index(), Some(1));
    /// ```
    pub fn new(scans: Vec<u32>, intensity: Vec<f64>) -> Self {
        FeatureProfile { scans: Arc::new(scans), intensity: Arc::new(intensity) }
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the highest intensity, the first one on ties.
    pub fn apex_index(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &v) in self.intensity.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((i, v)),
            }
        }
        best.map(|(i, _)| i)
    }

    pub fn index_of_scan(&self, scan: u32) -> Option<usize> {
        self.scans.binary_search(&scan).ok()
    }

    /// Scans and intensities pair up and scans are strictly ascending.
    fn check(&self) -> std::result::Result<(), &'static str> {
        if self.scans.len() != self.intensity.len() {
            return Err("scan and intensity counts differ");
        }
        if !self.scans.windows(2).all(|w| w[0] < w[1]) {
            return Err("scans are not strictly ascending");
        }
        Ok(())
    }
}

/// A feature of one row in one sample.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Feature {
    /// Maximum intensity, the per-sample abundance of the row.
    pub height: f64,
    pub profile: Option<FeatureProfile>,
}

impl Feature {
    pub fn new(height: f64) -> Self {
        Feature { height, profile: None }
    }

    pub fn with_profile(height: f64, profile: FeatureProfile) -> Self {
        Feature { height, profile: Some(profile) }
    }
}

/// A row of the feature table: one feature per sample where detected.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeatureListRow {
    pub id: u32,
    /// Representative retention time in minutes.
    pub rt: f64,
    /// Sample name -> feature.
    pub features: BTreeMap<String, Feature>,
}

impl FeatureListRow {
    pub fn new(id: u32, rt: f64) -> Self {
        FeatureListRow { id, rt, features: BTreeMap::new() }
    }

    pub fn with_feature(mut self, sample: impl Into<String>, feature: Feature) -> Self {
        self.features.insert(sample.into(), feature);
        self
    }

    /// Convenience for rows that only carry heights, `heights[i]` belongs to `samples[i]`.
    pub fn from_heights(id: u32, rt: f64, samples: &[Sample], heights: &[f64]) -> Self {
        let mut row = FeatureListRow::new(id, rt);
        for (s, &h) in samples.iter().zip(heights) {
            row.features.insert(s.name.clone(), Feature::new(h));
        }
        row
    }
}

/// Dense view of a row: features indexed by sample position.
#[derive(Debug)]
pub struct PreparedRow<'a> {
    pub id: u32,
    pub rt: f64,
    pub features: Vec<Option<&'a Feature>>,
}

impl<'a> PreparedRow<'a> {
    #[inline]
    pub fn height(&self, sample: usize) -> Option<f64> {
        self.features[sample].map(|f| f.height)
    }
}

/// Read-only, validated view on the rows and samples of one run.
///
/// Rows are sorted by retention time ascending (ties by row id), which is the
/// order the candidate window relies on.
#[derive(Debug)]
pub struct PreparedTable<'a> {
    pub samples: &'a [Sample],
    pub rows: Vec<PreparedRow<'a>>,
    /// Group label -> sample indices, sorted by label.
    pub sample_groups: Vec<(String, Vec<usize>)>,
}

impl<'a> PreparedTable<'a> {
    /// Validate rows against the sample list and build the dense view.
    pub fn new(rows: &'a [FeatureListRow], samples: &'a [Sample]) -> Result<Self> {
        let mut sample_index: HashMap<&str, usize> = HashMap::with_capacity(samples.len());
        for (i, s) in samples.iter().enumerate() {
            if sample_index.insert(s.name.as_str(), i).is_some() {
                return Err(GroupingError::DuplicateSample(s.name.clone()));
            }
        }

        let mut seen_ids = HashSet::with_capacity(rows.len());
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            if !seen_ids.insert(row.id) {
                return Err(GroupingError::DuplicateRowId(row.id));
            }
            if !row.rt.is_finite() {
                return Err(GroupingError::NonFiniteData { row_id: row.id, what: "retention time" });
            }
            // relative tolerance windows need rt >= 0
            if row.rt < 0.0 {
                return Err(GroupingError::NegativeRetentionTime { row_id: row.id, rt: row.rt });
            }
            let mut features = vec![None; samples.len()];
            for (name, feature) in &row.features {
                let idx = *sample_index.get(name.as_str()).ok_or_else(|| GroupingError::UnknownSample {
                    row_id: row.id,
                    sample: name.clone(),
                })?;
                if let Some(profile) = &feature.profile {
                    profile.check().map_err(|reason| GroupingError::InvalidProfile {
                        row_id: row.id,
                        sample: name.clone(),
                        reason,
                    })?;
                }
                features[idx] = Some(feature);
            }
            prepared.push(PreparedRow { id: row.id, rt: row.rt, features });
        }

        prepared.sort_by_key(|r| (OrderedFloat(r.rt), r.id));

        let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, s) in samples.iter().enumerate() {
            if let Some(g) = &s.group {
                groups.entry(g.clone()).or_default().push(i);
            }
        }

        Ok(PreparedTable { samples, rows: prepared, sample_groups: groups.into_iter().collect() })
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        vec![Sample::with_group("s1", "A"), Sample::with_group("s2", "B"), Sample::new("s3")]
    }

    #[test]
    fn test_prepared_table_sorts_by_rt() {
        let samples = samples();
        let rows = vec![
            FeatureListRow::from_heights(3, 5.0, &samples, &[1.0, 2.0, 3.0]),
            FeatureListRow::from_heights(1, 2.0, &samples, &[1.0, 2.0, 3.0]),
            FeatureListRow::from_heights(2, 5.0, &samples, &[1.0, 2.0, 3.0]),
        ];
        let table = PreparedTable::new(&rows, &samples).unwrap();
        let ids: Vec<u32> = table.rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(table.sample_groups.len(), 2);
        assert_eq!(table.rows[0].height(2), Some(3.0));
    }

    #[test]
    fn test_unknown_sample_is_an_error() {
        let samples = samples();
        let rows = vec![FeatureListRow::new(7, 1.0).with_feature("s9", Feature::new(10.0))];
        match PreparedTable::new(&rows, &samples) {
            Err(GroupingError::UnknownSample { row_id, sample }) => {
                assert_eq!(row_id, 7);
                assert_eq!(sample, "s9");
            }
            other => panic!("expected unknown sample, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_row_id_is_an_error() {
        let samples = samples();
        let rows = vec![FeatureListRow::new(1, 1.0), FeatureListRow::new(1, 2.0)];
        assert!(matches!(PreparedTable::new(&rows, &samples), Err(GroupingError::DuplicateRowId(1))));
    }

    #[test]
    fn test_inconsistent_profiles_are_errors() {
        let samples = samples();
        let short = FeatureProfile::new((0..11).collect(), vec![1.0; 7]);
        let reversed = FeatureProfile::new((0..11).rev().collect(), vec![1.0; 11]);
        for profile in [short, reversed] {
            let rows = vec![FeatureListRow::new(4, 1.0).with_feature("s2", Feature::with_profile(1.0, profile))];
            match PreparedTable::new(&rows, &samples) {
                Err(GroupingError::InvalidProfile { row_id, sample, .. }) => {
                    assert_eq!(row_id, 4);
                    assert_eq!(sample, "s2");
                }
                other => panic!("expected invalid profile, got {:?}", other),
            }
        }

        let valid = FeatureProfile::new((0..11).collect(), vec![1.0; 11]);
        let rows = vec![FeatureListRow::new(4, 1.0).with_feature("s2", Feature::with_profile(1.0, valid))];
        assert!(PreparedTable::new(&rows, &samples).is_ok());
    }

    #[test]
    fn test_negative_retention_time_is_an_error() {
        let samples = samples();
        let rows = vec![FeatureListRow::new(2, -0.5)];
        assert!(matches!(
            PreparedTable::new(&rows, &samples),
            Err(GroupingError::NegativeRetentionTime { row_id: 2, .. })
        ));
    }

    #[test]
    fn test_profile_apex() {
        let p = FeatureProfile::new(vec![1, 2, 3, 4], vec![1.0, 5.0, 5.0, 2.0]);
        assert_eq!(p.apex_index(), Some(1));
        assert_eq!(p.index_of_scan(3), Some(2));
        assert_eq!(p.index_of_scan(9), None);
        assert_eq!(FeatureProfile::new(vec![], vec![]).apex_index(), None);
    }

    #[test]
    fn test_rows_load_from_json() {
        let json = r#"{"id": 3, "rt": 4.5, "features": {"s1": {"height": 20.0, "profile": {"scans": [1, 2, 3], "intensity": [2.0, 20.0, 4.0]}}}}"#;
        let row: FeatureListRow = serde_json::from_str(json).unwrap();
        let profile = row.features["s1"].profile.as_ref().unwrap();
        assert_eq!(profile.apex_index(), Some(1));
        assert!(PreparedTable::new(std::slice::from_ref(&row), &samples()).is_ok());
    }
}
