use thiserror::Error;

/// A result type for bayesian optimization operations
pub type Result<T> = std::result::Result<T, OptError>;

/// An error when running latent-space bayesian optimization.
///
/// Per-candidate trouble (an undecodable latent point, an oracle call that
/// fails or times out) is deliberately *not* represented here: those outcomes
/// are converted to sentinel observations by the runner and never abort a run.
#[derive(Error, Debug)]
pub enum OptError {
    /// When the surrogate signals a numerical failure; fatal for the run
    #[error(transparent)]
    GpError(#[from] molbo_gp::GpError),
    /// When the run configuration is inconsistent or names an unimplemented objective
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When an IO operation on run artifacts fails
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// When serializing or deserializing run artifacts fails
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
    /// When reading an array data file fails
    #[error(transparent)]
    ReadNpyError(#[from] ndarray_npy::ReadNpyError),
    /// When writing an array data file fails
    #[error(transparent)]
    WriteNpyError(#[from] ndarray_npy::WriteNpyError),
}
