//! Latent-space bayesian optimization of molecules.
//!
//! This library drives sequential model-based optimization over the latent
//! space of an external generative model: a sparse variational GP surrogate
//! from [molbo-gp](https://crates.io/crates/molbo-gp) is refit on all
//! observations each outer iteration, a diverse batch of latent points is
//! selected by greedy expected improvement with fantasized observations, the
//! points are decoded into molecules and scored by external oracles, and the
//! results are appended and persisted before the next round.
//!
//! The optimizer minimizes; domain objectives (penalized logP, QED, docking
//! scores) are standardized against reference population statistics and
//! negated into the minimized target by the [`objective`] layer.
//!
//! Decode and oracle failures are observations too: they enter the training
//! set under a sentinel penalty target instead of shrinking the batch, which
//! keeps iterations aligned and steers acquisition away from unproductive
//! regions.
//!
//! The `molbo` binary wires the pieces together behind a CLI; library users
//! assemble a [`solver::BoRunner`] from a [`generative::GenerativeModel`],
//! an [`objective::Objective`], and initial latent observations.

pub mod acquisition;
pub mod errors;
pub mod generative;
pub mod objective;
pub mod sampling;
pub mod solver;

pub use errors::{OptError, Result};
