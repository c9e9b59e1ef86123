//! Stochastic variational training of the sparse GP.
//!
//! The evidence lower bound (ELBO) is maximized with minibatch Adam over a
//! single flat parameter vector holding the variational posterior (mean and
//! diagonal log-variances over the inducing outputs) and the kernel
//! hyperparameters in log-space. Variational parameters and the noise get
//! analytic gradients; signal variance and inverse length-scales enter through
//! the covariance factorization and are differentiated by central finite
//! differences.

use crate::algorithm::SparseVariationalGp;
use crate::errors::{GpError, Result};
use crate::kernel::CorrelationModel;
use finitediff::FiniteDiff;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2, concatenate, s};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256Plus;

/// Settings of a [`SparseVariationalGp::train`] run.
#[derive(Clone, Debug)]
pub struct TrainConfig {
    /// Number of full passes over the training set
    pub(crate) n_epochs: usize,
    /// Number of training points per stochastic gradient step
    pub(crate) minibatch: usize,
    /// Fixed Adam learning rate
    pub(crate) learning_rate: f64,
    /// Adam first moment decay
    pub(crate) beta1: f64,
    /// Adam second moment decay
    pub(crate) beta2: f64,
    /// Adam denominator regularizer
    pub(crate) epsilon: f64,
    /// Random generator seed used for epoch shuffling
    pub(crate) seed: Option<u64>,
}

impl Default for TrainConfig {
    fn default() -> TrainConfig {
        TrainConfig {
            n_epochs: 20,
            minibatch: 100,
            learning_rate: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            seed: None,
        }
    }
}

impl TrainConfig {
    /// Set the number of passes over the training set.
    pub fn n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    /// Set the minibatch size. Clipped to the training set size at train time.
    pub fn minibatch(mut self, minibatch: usize) -> Self {
        self.minibatch = minibatch;
        self
    }

    /// Set the Adam learning rate, kept fixed for the whole run.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set a seed for reproducible minibatch shuffling.
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    fn check(&self) -> Result<()> {
        if self.minibatch == 0 {
            return Err(GpError::InvalidValueError(
                "Minibatch size should be at least 1".to_string(),
            ));
        }
        if self.learning_rate <= 0. {
            return Err(GpError::InvalidValueError(format!(
                "Learning rate should be strictly positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Adam accumulators over the flat parameter vector.
struct AdamState {
    m: Array1<f64>,
    v: Array1<f64>,
    t: i32,
}

impl AdamState {
    fn new(n: usize) -> Self {
        AdamState {
            m: Array1::zeros(n),
            v: Array1::zeros(n),
            t: 0,
        }
    }

    fn step(&mut self, params: &mut Array1<f64>, grad: &ArrayView1<f64>, config: &TrainConfig) {
        self.t += 1;
        self.m = &self.m * config.beta1 + &grad.mapv(|g| (1. - config.beta1) * g);
        self.v = &self.v * config.beta2 + &grad.mapv(|g| (1. - config.beta2) * g * g);
        let m_hat = &self.m / (1. - config.beta1.powi(self.t));
        let v_hat = &self.v / (1. - config.beta2.powi(self.t));
        *params -= &(config.learning_rate * m_hat / (v_hat.mapv(f64::sqrt) + config.epsilon));
    }
}

impl<Corr: CorrelationModel> SparseVariationalGp<Corr> {
    /// Maximize the evidence lower bound with minibatch Adam.
    ///
    /// Each epoch shuffles the training set and walks it in minibatches whose
    /// log-likelihood contribution is rescaled by `n / minibatch` so every
    /// step works on an unbiased estimate of the full-data bound. Returns the
    /// per-epoch mean losses (negative ELBO). A zero-epoch run is a no-op
    /// and leaves the model untouched.
    ///
    /// Fails with [`GpError::TrainingDiverged`] as soon as a non-finite loss
    /// is observed, and with [`GpError::NumericalInstability`] when an update
    /// pushes the kernel hyperparameters somewhere the inducing covariance no
    /// longer factorizes.
    pub fn train(
        &mut self,
        xt: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        yt: &ArrayBase<impl Data<Elem = f64>, Ix1>,
        config: &TrainConfig,
    ) -> Result<Vec<f64>> {
        config.check()?;
        if xt.nrows() != yt.len() {
            return Err(GpError::InvalidValueError(format!(
                "Mismatched training set: {} input rows for {} targets",
                xt.nrows(),
                yt.len()
            )));
        }
        if xt.ncols() != self.inducings().ncols() {
            return Err(GpError::InvalidValueError(format!(
                "Training input dimension {} does not match model dimension {}",
                xt.ncols(),
                self.inducings().ncols()
            )));
        }

        let n = xt.nrows();
        let minibatch = config.minibatch.min(n);
        let mut rng = match config.seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };

        let mut params = self.param_vector();
        let mut adam = AdamState::new(params.len());
        let mut losses = Vec::with_capacity(config.n_epochs);
        let mut indices = (0..n).collect::<Vec<_>>();

        for epoch in 0..config.n_epochs {
            indices.shuffle(&mut rng);
            let mut epoch_loss = 0.;
            let mut n_batches = 0;
            for chunk in indices.chunks(minibatch) {
                let xb = xt.select(Axis(0), chunk);
                let yb = yt.select(Axis(0), chunk);
                let scale = n as f64 / chunk.len() as f64;

                let (loss, grad) = self.loss_with_grads(&xb, &yb, scale);
                if !loss.is_finite() {
                    return Err(GpError::TrainingDiverged { epoch, loss });
                }
                epoch_loss += loss;
                n_batches += 1;

                adam.step(&mut params, &grad.view(), config);
                self.apply_param_vector(&params)?;
            }
            let mean_loss = epoch_loss / n_batches as f64;
            log::debug!("SVGP epoch {epoch}: loss={mean_loss}");
            losses.push(mean_loss);
        }

        if config.n_epochs > 0 {
            self.set_trained();
        }
        Ok(losses)
    }

    /// Evidence lower bound over the full given dataset.
    pub fn elbo(
        &self,
        xt: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        yt: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Result<f64> {
        if xt.nrows() != yt.len() {
            return Err(GpError::InvalidValueError(format!(
                "Mismatched dataset: {} input rows for {} targets",
                xt.nrows(),
                yt.len()
            )));
        }
        Ok(self.bound(&xt.view().to_owned(), &yt.view().to_owned(), 1.))
    }

    /// Minibatch estimate of the ELBO: rescaled expected log-likelihood of
    /// the batch minus the KL divergence of the variational posterior from
    /// the prior over inducing outputs.
    fn bound(&self, xb: &Array2<f64>, yb: &Array1<f64>, scale: f64) -> f64 {
        let (ell, _, _, _) = self.likelihood_terms(xb, yb);
        scale * ell - self.kl_divergence()
    }

    /// Loss (negative minibatch ELBO) and its gradient in the
    /// [`param_vector`](Self::param_vector) layout.
    fn loss_with_grads(&self, xb: &Array2<f64>, yb: &Array1<f64>, scale: f64) -> (f64, Array1<f64>) {
        let svar = self.vlogvar.mapv(f64::exp);
        let (ell, a, residual, c) = self.likelihood_terms(xb, yb);
        let elbo = scale * ell - self.kl_divergence();

        // d ell_i / d mu_i = residual_i / noise, mu = A m
        let kzz_inv_m = self.kzz_inv.dot(&self.vmean);
        let grad_vmean = a.t().dot(&residual).mapv(|v| scale * v / self.noise) - &kzz_inv_m;

        // A_ij^2 weights both the likelihood variance correction and tr(Kzz^-1 S)
        let a2_sums = a.mapv(|v| v * v).sum_axis(Axis(0));
        let kzz_inv_diag = self.kzz_inv.diag();
        let grad_vlogvar = ndarray::Zip::from(&svar)
            .and(&a2_sums)
            .and(kzz_inv_diag)
            .map_collect(|sv, a2, kd| {
                -scale * sv * a2 / (2. * self.noise) - 0.5 * (kd * sv - 1.)
            });

        let grad_ln_noise = scale
            * (c.iter().map(|ci| ci / (2. * self.noise)).sum::<f64>() - 0.5 * yb.len() as f64);

        // sigma2 and theta reach the bound through the factorization of Kzz,
        // so their gradients come from central finite differences in log-space
        let base = self.clone();
        let xb_fd = xb.to_owned();
        let yb_fd = yb.to_owned();
        let f = |h: &Array1<f64>| -> f64 {
            let mut gp = base.clone();
            gp.sigma2 = h[0].exp();
            gp.theta = h.slice(s![1..]).mapv(f64::exp);
            if gp.factorize().is_err() {
                return f64::INFINITY;
            }
            -gp.bound(&xb_fd, &yb_fd, scale)
        };
        let h0 = concatenate![Axis(0), Array1::from_elem(1, self.sigma2.ln()), self.theta.mapv(f64::ln)];
        let grad_hypers = h0.central_diff(&f);

        let grad = concatenate![
            Axis(0),
            grad_vmean.mapv(|v| -v),
            grad_vlogvar.mapv(|v| -v),
            Array1::from_elem(1, -grad_ln_noise),
            grad_hypers
        ];
        (-elbo, grad)
    }

    /// Expected Gaussian log-likelihood of the batch under the variational
    /// posterior, plus the intermediates its gradients reuse: the projection
    /// matrix `A = Kxz Kzz^-1`, the residuals `y - mu`, and the per-point
    /// quadratic terms `c_i = residual_i^2 + ktilde_i + v_i`.
    fn likelihood_terms(
        &self,
        xb: &Array2<f64>,
        yb: &Array1<f64>,
    ) -> (f64, Array2<f64>, Array1<f64>, Array1<f64>) {
        let kx = self.compute_k(xb, self.inducings());
        let a = kx.dot(&self.kzz_inv);
        let mu = a.dot(&self.vmean);
        let q = (&kx * &a).sum_axis(Axis(1));
        let svar = self.vlogvar.mapv(f64::exp);
        let v = a.mapv(|x| x * x).dot(&svar);

        let residual = yb - &mu;
        let c = ndarray::Zip::from(&residual)
            .and(&q)
            .and(&v)
            .map_collect(|r, q, v| r * r + (self.sigma2 - q) + v);
        let ell = c
            .iter()
            .map(|ci| -0.5 * (2. * std::f64::consts::PI * self.noise).ln() - ci / (2. * self.noise))
            .sum::<f64>();
        (ell, a, residual, c)
    }

    /// KL(q(u) || p(u)) with p(u) = N(0, Kzz) and diagonal q covariance.
    fn kl_divergence(&self) -> f64 {
        let m = self.vmean.len() as f64;
        let svar = self.vlogvar.mapv(f64::exp);
        let trace = self.kzz_inv.diag().dot(&svar);
        let maha = self.vmean.dot(&self.kzz_inv.dot(&self.vmean));
        let ln_det_kzz = 2. * self.chol_zz.diag().mapv(f64::ln).sum();
        let ln_det_s = self.vlogvar.sum();
        0.5 * (trace + maha - m + ln_det_kzz - ln_det_s)
    }

    /// Flat parameter layout: variational mean, variational log-variances,
    /// log noise, log signal variance, log inverse length-scales.
    fn param_vector(&self) -> Array1<f64> {
        concatenate![
            Axis(0),
            self.vmean.to_owned(),
            self.vlogvar.to_owned(),
            Array1::from_elem(1, self.noise.ln()),
            Array1::from_elem(1, self.sigma2.ln()),
            self.theta.mapv(f64::ln)
        ]
    }

    fn apply_param_vector(&mut self, params: &Array1<f64>) -> Result<()> {
        let m = self.vmean.len();
        self.vmean = params.slice(s![..m]).to_owned();
        self.vlogvar = params.slice(s![m..2 * m]).to_owned();
        self.noise = params[2 * m].exp();
        self.sigma2 = params[2 * m + 1].exp();
        self.theta = params.slice(s![2 * m + 2..]).mapv(f64::exp);
        self.factorize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::SquaredExponentialCorr;
    use crate::parameters::SvgpParams;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, ArrayView1};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand_distr::Uniform;

    fn make_gp(
        nt: usize,
        seed: u64,
    ) -> (
        SparseVariationalGp<SquaredExponentialCorr>,
        Array2<f64>,
        Array1<f64>,
    ) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let xt = Array::random_using((nt, 2), Uniform::new(-2., 2.), &mut rng);
        let yt = xt.map_axis(Axis(1), |x: ArrayView1<f64>| {
            5. + (x[0] * 2.).sin() + 0.5 * x[1]
        });
        let gp = SparseVariationalGp::<SquaredExponentialCorr>::initialize(
            &xt,
            &yt,
            SvgpParams::default()
                .n_inducings(15)
                .theta_init(ndarray::array![0.5])
                .seed(Some(seed)),
        )
        .expect("SVGP initialized");
        (gp, xt, yt)
    }

    #[test]
    fn test_train_improves_elbo() {
        let (mut gp, xt, yt) = make_gp(120, 42);
        let before = gp.elbo(&xt, &yt).unwrap();
        gp.train(
            &xt,
            &yt,
            &TrainConfig::default()
                .n_epochs(30)
                .minibatch(30)
                .learning_rate(5e-2)
                .seed(Some(42)),
        )
        .expect("training converged");
        let after = gp.elbo(&xt, &yt).unwrap();
        assert!(
            after > before,
            "ELBO did not improve: before={before}, after={after}"
        );
        assert!(gp.is_trained());
    }

    #[test]
    fn test_train_moves_mean_towards_targets() {
        let (mut gp, xt, yt) = make_gp(120, 7);
        let rmse_before = rmse(&gp.predict(&xt).unwrap(), &yt);
        gp.train(
            &xt,
            &yt,
            &TrainConfig::default()
                .n_epochs(60)
                .minibatch(40)
                .learning_rate(1e-1)
                .seed(Some(7)),
        )
        .unwrap();
        let rmse_after = rmse(&gp.predict(&xt).unwrap(), &yt);
        assert!(
            rmse_after < rmse_before,
            "training did not reduce error: before={rmse_before}, after={rmse_after}"
        );
    }

    #[test]
    fn test_zero_epochs_is_a_noop() {
        let (mut gp, xt, yt) = make_gp(50, 3);
        let mu_before = gp.predict(&xt).unwrap();
        let losses = gp.train(&xt, &yt, &TrainConfig::default().n_epochs(0)).unwrap();
        assert!(losses.is_empty());
        assert!(!gp.is_trained());
        assert_abs_diff_eq!(gp.predict(&xt).unwrap(), mu_before, epsilon = 1e-12);
    }

    #[test]
    fn test_train_is_deterministic_given_seed() {
        let config = TrainConfig::default()
            .n_epochs(5)
            .minibatch(20)
            .learning_rate(1e-2)
            .seed(Some(11));
        let (mut gp1, xt, yt) = make_gp(80, 11);
        let (mut gp2, _, _) = make_gp(80, 11);
        let losses1 = gp1.train(&xt, &yt, &config).unwrap();
        let losses2 = gp2.train(&xt, &yt, &config).unwrap();
        assert_eq!(losses1, losses2);
        assert_abs_diff_eq!(
            gp1.predict(&xt).unwrap(),
            gp2.predict(&xt).unwrap(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_losses_are_finite_and_one_per_epoch() {
        let (mut gp, xt, yt) = make_gp(60, 5);
        let losses = gp
            .train(
                &xt,
                &yt,
                &TrainConfig::default().n_epochs(8).minibatch(25).seed(Some(5)),
            )
            .unwrap();
        assert_eq!(losses.len(), 8);
        assert!(losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_absurd_learning_rate_is_reported() {
        let (mut gp, xt, yt) = make_gp(60, 9);
        let res = gp.train(
            &xt,
            &yt,
            &TrainConfig::default()
                .n_epochs(50)
                .minibatch(20)
                .learning_rate(1e3)
                .seed(Some(9)),
        );
        assert!(res.is_err(), "expected divergence or instability");
    }

    #[test]
    fn test_bad_config_is_rejected() {
        let (mut gp, xt, yt) = make_gp(30, 1);
        assert!(gp.train(&xt, &yt, &TrainConfig::default().minibatch(0)).is_err());
        assert!(gp
            .train(&xt, &yt, &TrainConfig::default().learning_rate(0.))
            .is_err());
    }

    fn rmse(pred: &Array1<f64>, truth: &Array1<f64>) -> f64 {
        let d = pred - truth;
        (d.dot(&d) / d.len() as f64).sqrt()
    }
}
