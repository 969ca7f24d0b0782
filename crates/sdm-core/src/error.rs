//! Error taxonomy for the modelling pipeline.
//!
//! Every stage validates its own preconditions and returns one of these
//! variants instead of a degenerate result. Nothing is retried.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SdmError {
    /// A stage that needs at least one record or score received none.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// A band id named in the configuration is missing from a stack.
    #[error("unknown band '{band}'")]
    UnknownBand { band: String },

    /// The crop box does not overlap the raster extent at all.
    #[error("bounding box {requested} does not intersect raster extent {extent}")]
    DisjointExtent { requested: String, extent: String },

    /// Fewer records than folds.
    #[error("insufficient data: {records} records cannot form {folds} non-empty folds")]
    InsufficientData { records: usize, folds: usize },

    /// The estimator could not be fitted.
    #[error("model fit failed: {0}")]
    ModelFit(String),

    #[error("insufficient valid cells: {available} available, {requested} requested")]
    InsufficientValidCells { available: usize, requested: usize },

    /// Two grids that must share geometry do not.
    #[error("mismatched grids: {0}")]
    MismatchedGrid(String),

    #[error("invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, SdmError>;
