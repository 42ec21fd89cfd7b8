use thiserror::Error;

/// Error type for invalid operations across the AGEM crates.
#[derive(Error, Debug)]
pub enum AgemError {
    /// An XML parameter document is missing an element or attribute, or a
    /// value in it could not be parsed. `path` locates the offending element.
    #[error("schema error at {path}: {message}")]
    Schema { path: String, message: String },
    /// A structural constraint of a parameter object was violated on load.
    #[error("invariant violated: {0}")]
    Invariant(String),
    /// Two datasets that must share cell topology disagree on cell count.
    #[error("dataset topology mismatch: expected {expected} cells, got {actual}")]
    Topology { expected: usize, actual: usize },
    /// A factor or weight references an array that the input dataset lacks.
    #[error("array '{name}' not found in dataset")]
    NameBinding { name: String },
    /// A numerical failure that cannot be substituted by the null value.
    #[error("numerical error: {0}")]
    Numerical(String),
    /// The calibration error stayed above the divergence guard.
    #[error("calibration diverged: error {error:e} after {iterations} iterations")]
    Divergence { error: f64, iterations: usize },
    #[error("{0}")]
    Error(String),
}

/// Convenience type for `Result<T, AgemError>`.
pub type AgemResult<T> = Result<T, AgemError>;
