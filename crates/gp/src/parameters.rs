use crate::errors::{GpError, Result};
use ndarray::{Array1, Array2, array};

/// Inducing points specification
#[derive(Clone, Debug, PartialEq)]
pub enum Inducings {
    /// `usize` pseudo-inputs are selected randomly in the training dataset
    Randomized(usize),
    /// Pseudo-inputs are given as a (npoints, nx) matrix
    Located(Array2<f64>),
}

impl Default for Inducings {
    fn default() -> Inducings {
        Self::Randomized(10)
    }
}

/// The set of hyperparameters that can be specified for the construction of
/// a [`SparseVariationalGp`](crate::SparseVariationalGp).
#[derive(Clone, Debug)]
pub struct SvgpParams {
    /// Inducing points specification
    pub(crate) inducings: Inducings,
    /// Initial inverse length-scales, either one shared value or one per input dimension
    pub(crate) theta_init: Array1<f64>,
    /// Jitter added to the inducing covariance diagonal before factorization
    pub(crate) jitter: f64,
    /// Floor applied to predictive variances
    pub(crate) variance_floor: f64,
    /// Random generator seed used for inducing point selection
    pub(crate) seed: Option<u64>,
}

impl Default for SvgpParams {
    fn default() -> SvgpParams {
        SvgpParams {
            inducings: Inducings::default(),
            theta_init: array![1e-1],
            jitter: 1e-6,
            variance_floor: 1e-15,
            seed: None,
        }
    }
}

impl SvgpParams {
    /// Specify the number of inducing points picked randomly in the training inputs.
    pub fn n_inducings(mut self, nz: usize) -> Self {
        self.inducings = Inducings::Randomized(nz);
        self
    }

    /// Specify nz inducing points as a (nz, x_dim) matrix.
    pub fn inducings(mut self, z: Array2<f64>) -> Self {
        self.inducings = Inducings::Located(z);
        self
    }

    /// Set initial inverse length-scales (one shared value or one per dimension).
    pub fn theta_init(mut self, theta_init: Array1<f64>) -> Self {
        self.theta_init = theta_init;
        self
    }

    /// Set jitter value used to improve numerical stability.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Set the floor applied to predictive variances.
    pub fn variance_floor(mut self, floor: f64) -> Self {
        self.variance_floor = floor;
        self
    }

    /// Set a seed for reproducible inducing point selection.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Validate parameters against a (nt, nx) training set shape.
    pub(crate) fn check(&self, nt: usize, nx: usize) -> Result<()> {
        if nt == 0 {
            return Err(GpError::InvalidValueError(
                "Cannot initialize with an empty training set".to_string(),
            ));
        }
        match &self.inducings {
            Inducings::Randomized(nz) => {
                if *nz == 0 || *nz > nt {
                    return Err(GpError::InvalidValueError(format!(
                        "Number of inducing points should be in [1, {nt}], got {nz}"
                    )));
                }
            }
            Inducings::Located(z) => {
                if z.nrows() == 0 || z.ncols() != nx {
                    return Err(GpError::InvalidValueError(format!(
                        "Located inducing points should be a non-empty (nz, {nx}) matrix, got ({}, {})",
                        z.nrows(),
                        z.ncols()
                    )));
                }
            }
        }
        if self.theta_init.len() != 1 && self.theta_init.len() != nx {
            return Err(GpError::InvalidValueError(format!(
                "Initial theta should be either 1-dim or dim of training input ({nx}), got {}",
                self.theta_init.len()
            )));
        }
        if self.jitter <= 0. || self.variance_floor <= 0. {
            return Err(GpError::InvalidValueError(
                "jitter and variance floor should be strictly positive".to_string(),
            ));
        }
        Ok(())
    }
}
