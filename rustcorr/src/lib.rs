// src/lib.rs
pub mod error;

pub mod grouping {
    pub mod params;
    pub mod row;
    pub mod similarity;
    pub mod sample_filter;
    pub mod candidates;
    pub mod scoring;
    pub mod relationship;
    pub mod group;
    pub mod refine;
    pub mod task;
}

pub use error::{GroupingError, Result};
pub use grouping::task::{CancellationToken, CorrelationGroupingTask, GroupingOutcome, GroupingResult, Progress};
