use std::ops::Range;

use crate::error::{GroupingError, Result};
use crate::grouping::params::RtTolerance;

/// Retention time window over rows sorted ascending by retention time.
///
/// For row `i` the window is `[i + 1, j)`: every later row within tolerance.
/// Rows before `i` are never yielded, so each unordered pair shows up exactly
/// once, from its lower index.
///
/// The input MUST be sorted ascending, `new` checks this and refuses unsorted
/// input. For non-negative retention times the window stays contiguous with
/// relative tolerances too, `rt_j - rt_i <= rt_j * p` is monotone in `rt_j`.
#[derive(Clone, Debug)]
pub struct CandidateWindow<'a> {
    rts: &'a [f64],
    tolerance: RtTolerance,
}

impl<'a> CandidateWindow<'a> {
    pub fn new(rts: &'a [f64], tolerance: RtTolerance) -> Result<Self> {
        if let Some(index) = rts.windows(2).position(|w| !(w[0] <= w[1])) {
            return Err(GroupingError::UnsortedRows { index: index + 1 });
        }
        Ok(Self { rts, tolerance })
    }

    pub fn len(&self) -> usize {
        self.rts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rts.is_empty()
    }

    /// Candidate index range for row `i`.
    #[inline]
    pub fn window(&self, i: usize) -> Range<usize> {
        if i >= self.rts.len() {
            return self.rts.len()..self.rts.len();
        }
        let rt_i = self.rts[i];
        let tail = &self.rts[i + 1..];
        let end = tail.partition_point(|&rt_j| self.tolerance.check_within(rt_i, rt_j));
        (i + 1)..(i + 1 + end)
    }

    /// Lazily yields `(i, window(i))` for every row. Restart by calling again.
    pub fn iter(&self) -> CandidateWindowIter<'_, 'a> {
        CandidateWindowIter { window: self, next: 0 }
    }

    /// Total number of candidate pairs.
    pub fn pair_count(&self) -> usize {
        self.iter().map(|(_, r)| r.len()).sum()
    }
}

pub struct CandidateWindowIter<'w, 'a> {
    window: &'w CandidateWindow<'a>,
    next: usize,
}

impl<'w, 'a> Iterator for CandidateWindowIter<'w, 'a> {
    type Item = (usize, Range<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.window.len() {
            return None;
        }
        let i = self.next;
        self.next += 1;
        Some((i, self.window.window(i)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.window.len().saturating_sub(self.next);
        (left, Some(left))
    }
}

impl<'w, 'a> ExactSizeIterator for CandidateWindowIter<'w, 'a> {}
