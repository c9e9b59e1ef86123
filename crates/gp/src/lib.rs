//! This library implements sparse variational gaussian process regression,
//! the surrogate model used by [molbo-opt](https://crates.io/crates/molbo-opt)
//! to drive bayesian optimization over generative latent spaces where the
//! training set (tens of thousands of latent points) rules out exact GP
//! regression.
//!
//! The approximation follows Hensman et al.: a set of inducing points carries
//! an explicit gaussian variational posterior, and all parameters (variational
//! posterior, kernel hyperparameters, observation noise) are fitted jointly by
//! maximizing the evidence lower bound with minibatch Adam.
//!
//! # Usage
//!
//! ```no_run
//! use ndarray::{Array, Axis};
//! use ndarray_rand::RandomExt;
//! use ndarray_rand::rand_distr::Uniform;
//! use molbo_gp::{SvgpParams, SvgpSurrogate, TrainConfig};
//!
//! let xt = Array::random((1000, 4), Uniform::new(-2., 2.));
//! let yt = xt.map_axis(Axis(1), |x| x.dot(&x));
//!
//! let mut gp = SvgpSurrogate::initialize(
//!     &xt,
//!     &yt,
//!     SvgpParams::default().n_inducings(50).seed(Some(42)),
//! )
//! .expect("SVGP initialized");
//! gp.train(&xt, &yt, &TrainConfig::default().n_epochs(20).minibatch(100))
//!     .expect("SVGP trained");
//!
//! let mu = gp.predict(&xt).expect("predictions");
//! let var = gp.predict_var(&xt).expect("variances");
//! ```

mod algorithm;
mod errors;
mod kernel;
mod parameters;
mod trainer;

pub mod metrics;
pub mod utils;

pub use algorithm::{SparseVariationalGp, SvgpSurrogate};
pub use errors::{GpError, Result};
pub use kernel::{CorrelationModel, SquaredExponentialCorr};
pub use parameters::{Inducings, SvgpParams};
pub use trainer::TrainConfig;
