use thiserror::Error;

/// A result type for GP interpolation algorithms
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`Interpolator`](crate::Interpolator) or a
/// [`NearestNeighborInterpolator`](crate::NearestNeighborInterpolator) algorithm
#[derive(Error, Debug)]
pub enum GpError {
    /// When LikelihoodComputation computation fails
    #[error("LikelihoodComputation computation error: {0}")]
    LikelihoodComputationError(String),
    /// When a covariance matrix expected to be positive definite is not
    #[error("Covariance is not positive definite: {0}")]
    NotPositiveDefinite(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    #[error(transparent)]
    /// When array reshaping fails
    ShapeError(#[from] ndarray::ShapeError),
    /// When point sets do not share the expected dimension
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// When a combined kernel parameter name cannot be routed to a child kernel
    #[error("Invalid parameter name: {0}")]
    InvalidParamName(String),
    /// When an interpolator is asked for a configuration it does not support
    #[error("Unsupported configuration: {0}")]
    UnsupportedConfiguration(String),
    /// When error dur to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
