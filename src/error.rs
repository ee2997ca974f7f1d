use thiserror::Error;

/// Errors raised while configuring or running a rank-preserving embedding.
#[derive(Debug, Error)]
pub enum RankMapError {
    /// Unknown strategy name, out-of-range parameter or caller data that does
    /// not fit the bound image.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Input that leaves the optimization without anything to rank against.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),
    /// Buffer length does not match the declared dimensions.
    #[error("shape mismatch: expected {expected} values, got {got}")]
    Shape { expected: usize, got: usize },
    /// Operation not allowed in the current engine state.
    #[error("invalid engine state: {0}")]
    InvalidState(String),
    /// The k-means backend failed to fit or predict.
    #[error("clustering failed: {0}")]
    Clustering(String),
}

pub type Result<T> = std::result::Result<T, RankMapError>;
