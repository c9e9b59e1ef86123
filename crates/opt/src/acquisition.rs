//! Batched greedy expected-improvement acquisition.
//!
//! Expected improvement is computed analytically from the surrogate's
//! predictive mean and variance. Batches are assembled greedily: after each
//! selection a fantasized observation (predictive mean plugged in at the
//! selected point) is added so the posterior used for the next slot carries
//! reduced uncertainty there, which keeps the batch from collapsing onto the
//! single EI maximizer.

use crate::errors::{OptError, Result};
use crate::sampling::{Lhs, Random, SamplingMethod};
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use molbo_gp::{CorrelationModel, GpError, SparseVariationalGp};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix2};
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;
use rayon::prelude::*;

const SQRT_2PI: f64 = 2.5066282746310007;

/// Number of restarts of the sampling search per batch slot
const N_START: usize = 20;
/// Number of candidate points per input dimension and per restart
const N_POINTS: usize = 100;

pub(crate) fn norm_cdf(x: f64) -> f64 {
    0.5 * libm::erfc(-x / std::f64::consts::SQRT_2)
}

pub(crate) fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / SQRT_2PI
}

/// Analytic expected improvement over the incumbent minimum `fmin` at a point
/// with predictive mean `mean` and variance `var`.
pub fn expected_improvement(fmin: f64, mean: f64, var: f64) -> f64 {
    if var <= 0. {
        return 0.;
    }
    let sigma = var.sqrt();
    let u = (fmin - mean) / sigma;
    sigma * (u * norm_cdf(u) + norm_pdf(u))
}

/// A trained surrogate augmented with fantasized observations at
/// already-selected batch points.
///
/// Each fantasy plugs the predictive mean in as the observed value, so the
/// posterior mean is unchanged while the predictive variance shrinks near the
/// selected points through exact Gaussian conditioning.
pub struct FantasySurrogate<'a, Corr: CorrelationModel> {
    gp: &'a SparseVariationalGp<Corr>,
    fantasies: Array2<f64>,
    /// Lower Cholesky factor of the fantasy covariance Cff + noise I
    chol_ff: Option<Array2<f64>>,
    fmin: f64,
}

impl<'a, Corr: CorrelationModel> FantasySurrogate<'a, Corr> {
    /// Wrap a surrogate with no fantasy yet; `fmin` is the incumbent best
    /// (minimized) observed target.
    pub fn new(gp: &'a SparseVariationalGp<Corr>, fmin: f64) -> Self {
        let dim = gp.inducings().ncols();
        FantasySurrogate {
            gp,
            fantasies: Array2::zeros((0, dim)),
            chol_ff: None,
            fmin,
        }
    }

    /// Incumbent best target, fantasized observations included.
    pub fn fmin(&self) -> f64 {
        self.fmin
    }

    /// Predictive means and variances under the fantasy-conditioned posterior.
    pub fn predict(
        &self,
        x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        let mean = self.gp.predict(x)?;
        let mut var = self.gp.predict_var(x)?;
        if let Some(chol) = &self.chol_ff {
            let c = self.gp.posterior_cov(x, &self.fantasies)?;
            // v = L^-1 c^T, reduction_i = || v_i ||^2
            let v = chol
                .solve_triangular(&c.t().to_owned(), UPLO::Lower)
                .map_err(GpError::from)?;
            let reduction = v.mapv(|e| e * e).sum_axis(Axis(0));
            var = ndarray::Zip::from(&var).and(&reduction).map_collect(|v, r| {
                (v - r).max(self.gp.variance_floor())
            });
        }
        Ok((mean, var))
    }

    /// Expected improvement at each row of `x` under the fantasy-conditioned
    /// posterior.
    pub fn ei(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        let (mean, var) = self.predict(x)?;
        Ok(ndarray::Zip::from(&mean)
            .and(&var)
            .map_collect(|&m, &v| expected_improvement(self.fmin, m, v)))
    }

    /// Add a fantasized observation at `x` (predictive mean as plug-in value).
    pub fn push(&mut self, x: &Array1<f64>) -> Result<()> {
        let xr = x.view().insert_axis(Axis(0)).to_owned();
        let mu = self.gp.predict(&xr)?[0];
        self.fmin = self.fmin.min(mu);

        self.fantasies.push_row(x.view()).map_err(|e| {
            OptError::InvalidValueError(format!("Fantasy point has wrong dimension: {e}"))
        })?;
        let k = self.fantasies.nrows();
        let cff = self.gp.posterior_cov(&self.fantasies, &self.fantasies)?
            + Array2::<f64>::eye(k) * self.gp.noise_variance();
        let chol = cff.cholesky().map_err(|e| {
            GpError::NumericalInstability(format!("Cholesky of fantasy covariance failed: {e}"))
        })?;
        self.chol_ff = Some(chol);
        Ok(())
    }
}

/// Select `batch_size` query points by greedy sequential EI maximization with
/// fantasized observations, within the `(nx, 2)` bounds matrix `xlimits`.
///
/// Each slot runs a multi-restart sampling search (latin hypercube restarts,
/// best point kept; ties broken by restart order, first seen wins). When the
/// EI surface is numerically flat over every restart the slot falls back to a
/// uniform random point within bounds and a degenerate-acquisition warning is
/// logged. Always returns exactly `batch_size` in-bounds points.
pub fn batched_greedy_ei<Corr: CorrelationModel>(
    gp: &SparseVariationalGp<Corr>,
    fmin: f64,
    xlimits: &Array2<f64>,
    batch_size: usize,
    rng: &mut Xoshiro256Plus,
) -> Result<Array2<f64>> {
    check_xlimits(xlimits, gp.inducings().ncols())?;
    if batch_size == 0 {
        return Err(OptError::InvalidValueError(
            "Batch size should be at least 1".to_string(),
        ));
    }

    let dim = xlimits.nrows();
    let n_points = N_POINTS * dim;
    let mut surrogate = FantasySurrogate::new(gp, fmin);
    let mut batch = Array2::zeros((batch_size, dim));

    for slot in 0..batch_size {
        let seeds = (0..N_START).map(|_| rng.gen::<u64>()).collect::<Vec<_>>();
        let restarts = seeds
            .into_par_iter()
            .map(|seed| {
                let doe =
                    Lhs::new_with_rng(xlimits, Xoshiro256Plus::seed_from_u64(seed)).sample(n_points);
                let ei = surrogate.ei(&doe)?;
                // first seen wins on ties, restart samples are ordered
                let mut best = (0, ei[0]);
                for (i, &v) in ei.iter().enumerate().skip(1) {
                    if v > best.1 {
                        best = (i, v);
                    }
                }
                Ok((doe.row(best.0).to_owned(), best.1))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut best: Option<(Array1<f64>, f64)> = None;
        for (x, ei) in restarts {
            let better = match &best {
                Some((_, best_ei)) => ei > *best_ei,
                None => true,
            };
            if better {
                best = Some((x, ei));
            }
        }

        let (x_new, ei_best) = best.ok_or_else(|| {
            OptError::InvalidValueError("No restart produced a candidate".to_string())
        })?;
        let x_new = if ei_best.is_finite() && ei_best > 0. {
            x_new
        } else {
            log::warn!(
                "Degenerate acquisition at batch slot {slot}: EI numerically flat, \
                 falling back to uniform sampling"
            );
            Random::new_with_rng(xlimits, &mut *rng).sample(1).row(0).to_owned()
        };

        surrogate.push(&x_new)?;
        batch.row_mut(slot).assign(&x_new);
    }
    Ok(batch)
}

fn check_xlimits(xlimits: &Array2<f64>, dim: usize) -> Result<()> {
    if xlimits.ncols() != 2 || xlimits.nrows() != dim {
        return Err(OptError::ConfigurationError(format!(
            "Bounds should be a ({dim}, 2) matrix, got ({}, {})",
            xlimits.nrows(),
            xlimits.ncols()
        )));
    }
    if xlimits.rows().into_iter().any(|r| r[0] > r[1]) {
        return Err(OptError::ConfigurationError(
            "Every lower bound should not exceed its upper bound".to_string(),
        ));
    }
    Ok(())
}
