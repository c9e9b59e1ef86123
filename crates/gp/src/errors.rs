use thiserror::Error;

/// A result type for sparse GP operations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when fitting or querying a [`SparseVariationalGp`](crate::SparseVariationalGp)
#[derive(Error, Debug)]
pub enum GpError {
    /// When a covariance factorization fails even after jitter
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// When the training loss becomes non-finite
    #[error("Training diverged at epoch {epoch}: loss={loss}")]
    TrainingDiverged {
        /// Epoch at which the non-finite loss was detected
        epoch: usize,
        /// Last loss value
        loss: f64,
    },
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
