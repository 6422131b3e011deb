/// Errors that can occur while grouping feature list rows by correlation.
#[derive(Debug, thiserror::Error)]
pub enum GroupingError {
    /// A parameter is out of its valid range
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Name of the offending parameter
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// A similarity measure name that is not known
    #[error("Unknown similarity measure: {0}")]
    UnknownSimilarityMeasure(String),

    /// Parameters could not be parsed
    #[error("Failed to parse parameters: {0}")]
    ParameterParse(#[from] serde_json::Error),

    /// A row references a sample that is not part of the sample list
    #[error("Row {row_id} has a feature in sample '{sample}' which is not in the sample list")]
    UnknownSample {
        /// Row holding the feature
        row_id: u32,
        /// Name of the unknown sample
        sample: String,
    },

    /// The same sample name was supplied twice
    #[error("Duplicate sample '{0}'")]
    DuplicateSample(String),

    /// The same row id was supplied twice
    #[error("Duplicate row id {0}")]
    DuplicateRowId(u32),

    /// A feature profile is not usable for shape correlation
    #[error("Row {row_id} has an invalid profile in sample '{sample}': {reason}")]
    InvalidProfile {
        /// Row holding the feature
        row_id: u32,
        /// Sample of the feature
        sample: String,
        /// What is wrong with the profile
        reason: &'static str,
    },

    /// Retention times must not be negative
    #[error("Row {row_id} has a negative retention time {rt}")]
    NegativeRetentionTime {
        /// Offending row
        row_id: u32,
        /// The retention time
        rt: f64,
    },

    /// Rows handed to the candidate window are not sorted by retention time
    #[error("Rows are not sorted by retention time at index {index}")]
    UnsortedRows {
        /// First index that breaks the ascending order
        index: usize,
    },

    /// A row carries a NaN or infinite value
    #[error("Row {row_id} contains a non-finite {what}")]
    NonFiniteData {
        /// Offending row
        row_id: u32,
        /// Which value was not finite
        what: &'static str,
    },

    /// The worker pool could not be created
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

pub type Result<T> = std::result::Result<T, GroupingError>;
