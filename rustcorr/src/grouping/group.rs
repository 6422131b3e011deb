use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::grouping::relationship::RowPair;

/// Union-find over dense indices.
#[derive(Clone, Debug)]
pub struct Dsu {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl Dsu {
    #[inline]
    pub fn new(n: usize) -> Self {
        Self { parent: (0..n).collect(), size: vec![1; n] }
    }

    #[inline]
    pub fn find(&mut self, mut x: usize) -> usize {
        let mut root = self.parent[x];
        while root != self.parent[root] {
            root = self.parent[root];
        }
        // path compression
        while x != self.parent[x] {
            let next = self.parent[x];
            self.parent[x] = root;
            x = next;
        }
        root
    }

    /// Merge the sets of `a` and `b`. Returns false if already merged.
    #[inline]
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let mut ra = self.find(a);
        let mut rb = self.find(b);
        if ra == rb {
            return false;
        }
        // union by size
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }

    /// Components as index lists, each ascending, ordered by their first index.
    pub fn groups(mut self) -> Vec<Vec<usize>> {
        let n = self.parent.len();
        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        let mut out: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let r = self.find(i);
            let slot = *slot_of_root.entry(r).or_insert_with(|| {
                out.push(Vec::new());
                out.len() - 1
            });
            out[slot].push(i);
        }
        out
    }
}

/// A connected component of rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowGroup {
    /// Lowest row id of the component.
    pub id: u32,
    /// Row ids, ascending.
    pub rows: Vec<u32>,
}

impl RowGroup {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.rows.len() == 1
    }

    pub fn contains(&self, row_id: u32) -> bool {
        self.rows.binary_search(&row_id).is_ok()
    }
}

/// Partition of the qualifying rows, groups sorted by id.
#[derive(Clone, Debug, Default)]
pub struct RowGroups {
    groups: Vec<RowGroup>,
    index: HashMap<u32, usize>,
}

impl RowGroups {
    fn from_groups(mut groups: Vec<RowGroup>) -> Self {
        groups.sort_unstable_by_key(|g| g.id);
        let index = groups
            .iter()
            .enumerate()
            .flat_map(|(gi, g)| g.rows.iter().map(move |&r| (r, gi)))
            .collect();
        Self { groups, index }
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RowGroup> {
        self.groups.iter()
    }

    pub fn as_slice(&self) -> &[RowGroup] {
        &self.groups
    }

    /// Group holding `row_id`, if the row took part in grouping.
    pub fn group_of(&self, row_id: u32) -> Option<&RowGroup> {
        self.index.get(&row_id).map(|&gi| &self.groups[gi])
    }

    /// Both rows ended up in the same group.
    pub fn same_group(&self, a: u32, b: u32) -> bool {
        match (self.index.get(&a), self.index.get(&b)) {
            (Some(ga), Some(gb)) => ga == gb,
            _ => false,
        }
    }

    pub fn singleton_count(&self) -> usize {
        self.groups.iter().filter(|g| g.is_singleton()).count()
    }

    /// Drop all groups of a single row.
    pub fn without_singletons(self) -> Self {
        Self::from_groups(self.groups.into_iter().filter(|g| !g.is_singleton()).collect())
    }
}

impl<'g> IntoIterator for &'g RowGroups {
    type Item = &'g RowGroup;
    type IntoIter = std::slice::Iter<'g, RowGroup>;

    fn into_iter(self) -> Self::IntoIter {
        self.groups.iter()
    }
}

/// Builds connected components from accepted row pairs.
///
/// Only which pairs exist matters, never their scores: the same edge set
/// always yields the same partition. Group ids are the lowest row id of each
/// component, so they do not depend on edge or row order.
#[derive(Clone, Debug)]
pub struct GroupBuilder {
    row_ids: Vec<u32>,
    index: HashMap<u32, usize>,
}

impl GroupBuilder {
    /// # Arguments
    ///
    /// * `row_ids` - ids of every row that takes part, each becomes a node
    ///
    /// # Example
    ///
    /// ```rust
    /// # use rustcorr::grouping::group::GroupBuilder;
    /// # use rustcorr::grouping::relationship::RowPair;
    /// let builder = GroupBuilder::new([7, 3, 5]);
    /// let groups = builder.build(&[RowPair::new(7, 5)]);
    /// assert_eq!(groups.len(), 2);
    /// assert_eq!(groups.group_of(7).map(|g| g.id), Some(5));
    /// ```
    pub fn new(row_ids: impl IntoIterator<Item = u32>) -> Self {
        let mut row_ids: Vec<u32> = row_ids.into_iter().collect();
        row_ids.sort_unstable();
        row_ids.dedup();
        let index = row_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        Self { row_ids, index }
    }

    /// Connected components over `pairs`. Pairs touching unknown rows are ignored.
    pub fn build<'p>(&self, pairs: impl IntoIterator<Item = &'p RowPair>) -> RowGroups {
        let mut dsu = Dsu::new(self.row_ids.len());
        for pair in pairs {
            if let (Some(&a), Some(&b)) = (self.index.get(&pair.low), self.index.get(&pair.high)) {
                dsu.union(a, b);
            }
        }
        // row_ids is ascending, so the first member of each component is its lowest id
        let groups = dsu
            .groups()
            .into_iter()
            .map(|members| {
                let rows: Vec<u32> = members.into_iter().map(|i| self.row_ids[i]).collect();
                RowGroup { id: rows[0], rows }
            })
            .collect();
        RowGroups::from_groups(groups)
    }
}
