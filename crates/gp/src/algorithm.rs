use crate::errors::{GpError, Result};
use crate::kernel::{CorrelationModel, SquaredExponentialCorr};
use crate::parameters::{Inducings, SvgpParams};
use crate::utils::pairwise_differences;
use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256Plus;
use std::fmt;

/// The default surrogate: a sparse variational GP with a squared exponential kernel.
pub type SvgpSurrogate = SparseVariationalGp<SquaredExponentialCorr>;

/// Sparse variational gaussian process regressor over latent-space inputs.
///
/// The posterior over the latent function is approximated through `M` inducing
/// points carrying an explicit variational distribution `q(u) = N(m, S)` over
/// the corresponding function values (S diagonal, stored as log-variances).
/// With `M < N` training points, training costs `O(N M^2)` per pass instead of
/// the `O(N^3)` of exact GP regression, which is what makes refitting on a
/// training set that grows by a full batch every outer iteration affordable.
///
/// Lifecycle: [`SparseVariationalGp::initialize`] selects the inducing inputs
/// and default hyperparameters, [`train`](SparseVariationalGp::train) runs
/// stochastic variational inference on them. Predictions are available right
/// after `initialize` but reflect the prior only and should be treated as
/// low-confidence until the first `train` call.
///
/// # Reference
///
/// James Hensman, Nicolò Fusi, Neil D. Lawrence.
/// [Gaussian Processes for Big Data](https://arxiv.org/abs/1309.6835). UAI 2013.
pub struct SparseVariationalGp<Corr: CorrelationModel = SquaredExponentialCorr> {
    /// Correlation kernel
    corr: Corr,
    /// Inverse length-scales, one per input dimension
    pub(crate) theta: Array1<f64>,
    /// Signal variance
    pub(crate) sigma2: f64,
    /// Gaussian observation noise variance
    pub(crate) noise: f64,
    /// Inducing inputs (m, nx), fixed after initialization
    z: Array2<f64>,
    /// Variational posterior mean over inducing outputs
    pub(crate) vmean: Array1<f64>,
    /// Log of the diagonal variational posterior variances
    pub(crate) vlogvar: Array1<f64>,
    /// Lower Cholesky factor of Kzz + jitter
    pub(crate) chol_zz: Array2<f64>,
    /// Inverse of Kzz + jitter
    pub(crate) kzz_inv: Array2<f64>,
    jitter: f64,
    variance_floor: f64,
    trained: bool,
}

impl<Corr: CorrelationModel> Clone for SparseVariationalGp<Corr> {
    fn clone(&self) -> Self {
        Self {
            corr: self.corr,
            theta: self.theta.to_owned(),
            sigma2: self.sigma2,
            noise: self.noise,
            z: self.z.to_owned(),
            vmean: self.vmean.to_owned(),
            vlogvar: self.vlogvar.to_owned(),
            chol_zz: self.chol_zz.to_owned(),
            kzz_inv: self.kzz_inv.to_owned(),
            jitter: self.jitter,
            variance_floor: self.variance_floor,
            trained: self.trained,
        }
    }
}

impl<Corr: CorrelationModel> fmt::Display for SparseVariationalGp<Corr> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SVGP(corr={}, m={}, theta={}, variance={}, noise variance={})",
            self.corr,
            self.z.nrows(),
            self.theta,
            self.sigma2,
            self.noise
        )
    }
}

impl<Corr: CorrelationModel> SparseVariationalGp<Corr> {
    /// Initialize the surrogate on a (nt, nx) training input matrix and nt targets.
    ///
    /// Inducing locations are selected according to the [`Inducings`]
    /// specification (random subsampling of the training inputs by default)
    /// and kernel hyperparameters get data-driven defaults: signal variance
    /// from the target spread, noise variance at 1% of it. The variational
    /// posterior starts at the prior marginals (zero mean).
    pub fn initialize(
        xt: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        yt: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        params: SvgpParams,
    ) -> Result<Self> {
        if xt.nrows() != yt.len() {
            return Err(GpError::InvalidValueError(format!(
                "Mismatched training set: {} input rows for {} targets",
                xt.nrows(),
                yt.len()
            )));
        }
        params.check(xt.nrows(), xt.ncols())?;

        let mut rng = match params.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        let z = match &params.inducings {
            Inducings::Randomized(n) => make_inducings(*n, &xt.view(), &mut rng),
            Inducings::Located(z) => z.to_owned(),
        };

        let theta = if params.theta_init.len() == 1 {
            Array1::from_elem(xt.ncols(), params.theta_init[0])
        } else {
            params.theta_init.to_owned()
        };

        let y_std = if yt.len() > 1 { yt.std(1.) } else { 1. };
        let sigma2 = (y_std * y_std).max(1e-12);
        let noise = 1e-2 * sigma2;

        let m = z.nrows();
        let mut gp = SparseVariationalGp {
            corr: Corr::default(),
            theta,
            sigma2,
            noise,
            z,
            vmean: Array1::zeros(m),
            vlogvar: Array1::from_elem(m, sigma2.ln()),
            chol_zz: Array2::zeros((m, m)),
            kzz_inv: Array2::zeros((m, m)),
            jitter: params.jitter,
            variance_floor: params.variance_floor,
            trained: false,
        };
        gp.factorize()?;
        Ok(gp)
    }

    /// Refresh the Cholesky factorization of the inducing covariance.
    /// Must be called after any kernel hyperparameter change.
    pub(crate) fn factorize(&mut self) -> Result<()> {
        let m = self.z.nrows();
        let kzz =
            self.compute_k(&self.z, &self.z) + Array2::<f64>::eye(m) * (self.jitter * self.sigma2);
        let chol = kzz.cholesky().map_err(|e| {
            GpError::NumericalInstability(format!(
                "Cholesky of inducing covariance failed even with jitter {}: {e}",
                self.jitter
            ))
        })?;
        let li = chol.solve_triangular(&Array2::eye(m), UPLO::Lower)?;
        self.kzz_inv = li.t().dot(&li);
        self.chol_zz = chol;
        Ok(())
    }

    /// Compute covariance matrix between rows of a and rows of b
    pub(crate) fn compute_k(
        &self,
        a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        b: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Array2<f64> {
        let dx = pairwise_differences(a, b);
        let r = self.corr.value(&dx, &self.theta);
        r.into_shape((a.nrows(), b.nrows()))
            .unwrap()
            .mapv(|v| v * self.sigma2)
    }

    fn check_query(&self, x: &ArrayView2<f64>) -> Result<()> {
        if x.ncols() != self.z.ncols() {
            return Err(GpError::InvalidValueError(format!(
                "Query dimension {} does not match model dimension {}",
                x.ncols(),
                self.z.ncols()
            )));
        }
        Ok(())
    }

    /// Predictive means at n given `x` points specified as a (n, nx) matrix.
    pub fn predict(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        self.check_query(&x.view())?;
        let kx = self.compute_k(x, &self.z);
        let alpha = self.kzz_inv.dot(&self.vmean);
        Ok(kx.dot(&alpha))
    }

    /// Predictive variances (including observation noise) at n given `x` points.
    /// Values are clipped to a small positive floor, never negative.
    pub fn predict_var(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Array1<f64>> {
        self.check_query(&x.view())?;
        let kx = self.compute_k(x, &self.z);
        let ax = kx.dot(&self.kzz_inv);
        let q = (&kx * &ax).sum_axis(Axis(1));
        let svar = self.vlogvar.mapv(f64::exp);
        let vs = ax.mapv(|v| v * v).dot(&svar);
        let var = Zip::from(&q).and(&vs).map_collect(|q, vs| self.sigma2 - q + vs);
        Ok(var.mapv(|v| {
            if v < self.variance_floor {
                self.variance_floor + self.noise
            } else {
                v + self.noise
            }
        }))
    }

    /// Posterior covariance (without observation noise) between rows of `a`
    /// and rows of `b`. Used by batch acquisition to condition on fantasized
    /// observations.
    pub fn posterior_cov(
        &self,
        a: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        b: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    ) -> Result<Array2<f64>> {
        self.check_query(&a.view())?;
        self.check_query(&b.view())?;
        let kab = self.compute_k(a, b);
        let ka = self.compute_k(a, &self.z);
        let kb = self.compute_k(b, &self.z);
        let aa = ka.dot(&self.kzz_inv);
        let ab = kb.dot(&self.kzz_inv);
        let svar = self.vlogvar.mapv(f64::exp);
        let aa_s = &aa * &svar;
        Ok(kab - aa.dot(&kb.t()) + aa_s.dot(&ab.t()))
    }

    /// Inverse length-scales
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Signal variance
    pub fn variance(&self) -> f64 {
        self.sigma2
    }

    /// Observation noise variance
    pub fn noise_variance(&self) -> f64 {
        self.noise
    }

    /// Inducing inputs
    pub fn inducings(&self) -> &Array2<f64> {
        &self.z
    }

    /// Floor applied to predictive variances
    pub fn variance_floor(&self) -> f64 {
        self.variance_floor
    }

    /// Jitter factor applied to covariance diagonals before factorization
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Whether [`train`](crate::SparseVariationalGp::train) has been run at
    /// least once; before that, predictions reflect the prior only.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    pub(crate) fn set_trained(&mut self) {
        self.trained = true;
    }
}

fn make_inducings(n_inducing: usize, xt: &ArrayView2<f64>, rng: &mut Xoshiro256Plus) -> Array2<f64> {
    let mut indices = (0..xt.nrows()).collect::<Vec<_>>();
    indices.shuffle(rng);
    let n = n_inducing.min(xt.nrows());
    let mut z = Array2::zeros((n, xt.ncols()));
    Zip::from(z.rows_mut())
        .and(&Array1::from_vec(indices[..n].to_vec()))
        .for_each(|mut zi, i| zi.assign(&xt.row(*i)));
    z
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, ArrayView1, array};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand_distr::Uniform;

    fn make_data(nt: usize, rng: &mut Xoshiro256Plus) -> (Array2<f64>, Array1<f64>) {
        let xt = Array::random_using((nt, 2), Uniform::new(-3., 3.), rng);
        let yt = xt.map_axis(Axis(1), |x: ArrayView1<f64>| {
            -(x[0] - 1.).powi(2) - (x[1] - 2.).powi(2)
        });
        (xt, yt)
    }

    #[test]
    fn test_initialize_then_predict_is_finite() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let (xt, yt) = make_data(200, &mut rng);
        let gp = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default().n_inducings(20).seed(Some(42)),
        )
        .expect("SVGP initialized");
        assert!(!gp.is_trained());

        let mu = gp.predict(&xt).expect("prediction");
        let var = gp.predict_var(&xt).expect("variance prediction");
        assert!(mu.iter().all(|v| v.is_finite()));
        assert!(var.iter().all(|v| v.is_finite() && *v > 0.));
    }

    #[test]
    fn test_prior_mean_is_zero() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let (xt, yt) = make_data(50, &mut rng);
        let gp = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default().n_inducings(10).seed(Some(0)),
        )
        .unwrap();
        // variational mean starts at zero, so does the predictive mean
        let mu = gp.predict(&array![[0.5, 0.5], [2., -1.]]).unwrap();
        assert_abs_diff_eq!(mu, Array1::zeros(2), epsilon = 1e-12);
    }

    #[test]
    fn test_initialize_rejects_mismatched_targets() {
        let xt = Array2::<f64>::zeros((10, 2));
        let yt = Array1::<f64>::zeros(9);
        let res = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default().n_inducings(5),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_initialize_rejects_too_many_inducings() {
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        let (xt, yt) = make_data(10, &mut rng);
        let res = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default().n_inducings(50),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_posterior_cov_diagonal_matches_variance() {
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let (xt, yt) = make_data(100, &mut rng);
        let gp = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default().n_inducings(15).seed(Some(7)),
        )
        .unwrap();
        let xq = array![[0., 0.], [1., 1.], [-2., 2.]];
        let cov = gp.posterior_cov(&xq, &xq).unwrap();
        let var = gp.predict_var(&xq).unwrap();
        for i in 0..xq.nrows() {
            // predict_var adds the observation noise on top of the latent variance
            assert_abs_diff_eq!(cov[[i, i]] + gp.noise_variance(), var[i], epsilon = 1e-8);
        }
    }

    #[test]
    fn test_inducings_subsampled_from_training_inputs() {
        let mut rng = Xoshiro256Plus::seed_from_u64(3);
        let (xt, yt) = make_data(30, &mut rng);
        let gp = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default().n_inducings(8).seed(Some(3)),
        )
        .unwrap();
        assert_eq!(gp.inducings().nrows(), 8);
        for zi in gp.inducings().rows() {
            assert!(
                xt.rows().into_iter().any(|xi| xi
                    .iter()
                    .zip(zi.iter())
                    .all(|(a, b)| (a - b).abs() < 1e-12)),
                "inducing point not found in training inputs"
            );
        }
    }
}
