use crate::acquisition::batched_greedy_ei;
use crate::errors::{OptError, Result};
use crate::generative::GenerativeModel;
use crate::objective::Objective;
use crate::solver::config::{BoConfig, InvalidScorePolicy};
use crate::solver::recorder::{IterationRecord, RunRecorder};
use crate::solver::state::{RunState, split_holdout};
use molbo_gp::{SvgpParams, SvgpSurrogate, TrainConfig, metrics};
use ndarray::{Array1, Array2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use std::time::Instant;

/// The outer optimization loop: refit surrogate → acquire batch → decode →
/// score → append → persist, for a configured number of iterations.
///
/// The runner owns the growable training set; each iteration appends exactly
/// `batch_size` observations, with failed candidates carried as sentinel
/// targets so the set size stays aligned across iterations. Per-candidate
/// decode and oracle failures never abort the run; surrogate numerical
/// failures do.
pub struct BoRunner<G: GenerativeModel, O: Objective> {
    config: BoConfig,
    model: G,
    objective: O,
    state: RunState,
    recorder: RunRecorder,
}

impl<G: GenerativeModel, O: Objective> BoRunner<G, O> {
    /// Start a fresh run from initial observations `(x0, y0)`, `y0` being the
    /// minimized targets. The held-out split is carved out once, here.
    pub fn new(
        config: BoConfig,
        model: G,
        objective: O,
        x0: Array2<f64>,
        y0: Array1<f64>,
    ) -> Result<Self> {
        config.check(x0.nrows(), x0.ncols())?;
        if model.latent_dim() != x0.ncols() {
            return Err(OptError::ConfigurationError(format!(
                "Generative model has latent dimension {}, initial data has {}",
                model.latent_dim(),
                x0.ncols()
            )));
        }
        let (train, holdout) = split_holdout(&x0, &y0, config.holdout_fraction, config.seed)?;
        let recorder = RunRecorder::new(&config)?;
        Ok(BoRunner {
            state: RunState::new(train, holdout),
            config,
            model,
            objective,
            recorder,
        })
    }

    /// Resume from the latest snapshot in the run directory.
    pub fn resume(config: BoConfig, model: G, objective: O) -> Result<Self> {
        let recorder = RunRecorder::new(&config)?;
        let state = recorder.load_state()?.ok_or_else(|| {
            OptError::ConfigurationError(format!(
                "No snapshot to resume from in {}",
                recorder.dir().display()
            ))
        })?;
        config.check(state.train.len() + state.holdout.len(), state.train.x.ncols())?;
        if model.latent_dim() != state.train.x.ncols() {
            return Err(OptError::ConfigurationError(format!(
                "Generative model has latent dimension {}, snapshot has {}",
                model.latent_dim(),
                state.train.x.ncols()
            )));
        }
        Ok(BoRunner {
            config,
            model,
            objective,
            state,
            recorder,
        })
    }

    /// Current run state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Per-simulation artifact directory
    pub fn recorder(&self) -> &RunRecorder {
        &self.recorder
    }

    /// The objective scoring acquired candidates
    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// Run the remaining outer iterations. Completing the iteration budget is
    /// the only normal exit; surrogate numerical failures abort with the
    /// error.
    pub fn run(&mut self) -> Result<()> {
        let run_start = Instant::now();
        let elapsed_before = self.state.elapsed_secs;

        for iteration in self.state.iteration..self.config.n_iterations {
            // iteration-derived seed, well-defined at iteration 0
            let iter_seed = self.config.seed.wrapping_mul(iteration as u64 + 1);
            let sentinel = self.sentinel_target()?;

            // 1. full refit on the accumulated training set
            let gp = self.fit_surrogate(iter_seed)?;
            let diag = self.diagnostics(&gp)?;
            log::info!(
                "Iteration {iteration}: n_train={}, train RMSE={:.4}, holdout RMSE={}",
                self.state.train.len(),
                diag.train_rmse,
                diag.holdout_rmse
                    .map_or_else(|| "n/a".to_string(), |v| format!("{v:.4}")),
            );

            // 2. acquisition within the observed latent envelope
            let fmin = self.state.observed_best().ok_or_else(|| {
                OptError::ConfigurationError("Cannot optimize without observations".to_string())
            })?;
            let xlimits = self.state.train.bounds();
            let mut rng = Xoshiro256Plus::seed_from_u64(iter_seed);
            let batch =
                batched_greedy_ei(&gp, fmin, &xlimits, self.config.batch_size, &mut rng)?;

            // 3. decode; a whole-batch decoder failure degrades to all-invalid
            let molecules: Vec<Option<String>> = match self.model.decode(&batch.view()) {
                Ok(sequences) => sequences
                    .iter()
                    .map(|s| self.model.sequence_to_string(s))
                    .collect(),
                Err(err) => {
                    log::error!("Decoder failed for the whole batch: {err}");
                    vec![None; batch.nrows()]
                }
            };

            // 4. score; failures become sentinel observations
            let scored = self.objective.score_batch(&molecules);
            let n_invalid = scored.iter().filter(|s| s.is_none()).count();
            let targets =
                Array1::from_iter(scored.iter().map(|s| s.unwrap_or(sentinel)));
            if n_invalid > 0 {
                log::info!(
                    "Iteration {iteration}: {n_invalid}/{} candidates took the sentinel target {sentinel:.6}",
                    targets.len()
                );
            }

            // 5. append and persist before advancing
            if self.config.grow_holdout {
                let (new_train, new_holdout) =
                    split_holdout(&batch, &targets, self.config.holdout_fraction, iter_seed)?;
                self.state.train.append(&new_train.x, &new_train.y)?;
                self.state.holdout.append(&new_holdout.x, &new_holdout.y)?;
            } else {
                self.state.train.append(&batch, &targets)?;
            }

            let best = self.state.observed_best().ok_or_else(|| {
                OptError::InvalidValueError("Training set emptied mid-run".to_string())
            })?;
            self.state.best_trace.push(best);
            self.state.iteration = iteration + 1;
            self.state.elapsed_secs = elapsed_before + run_start.elapsed().as_secs_f64();

            self.recorder.record(
                &IterationRecord {
                    iteration,
                    n_train: self.state.train.len(),
                    molecules,
                    targets: targets.to_vec(),
                    n_invalid,
                    best,
                    train_rmse: diag.train_rmse,
                    train_log_density: diag.train_log_density,
                    holdout_rmse: diag.holdout_rmse,
                    holdout_log_density: diag.holdout_log_density,
                    elapsed_secs: self.state.elapsed_secs,
                },
                &self.state,
            )?;
            log::info!("Iteration {iteration}: best observed target {best:.6}");
        }
        Ok(())
    }

    fn sentinel_target(&self) -> Result<f64> {
        match self.config.invalid_score {
            InvalidScorePolicy::NegatedBest => {
                let best = self.state.observed_best().ok_or_else(|| {
                    OptError::ConfigurationError(
                        "Sentinel policy needs at least one observation".to_string(),
                    )
                })?;
                Ok(-best)
            }
            InvalidScorePolicy::Fixed(v) => Ok(v),
        }
    }

    fn fit_surrogate(&self, seed: u64) -> Result<SvgpSurrogate> {
        let mut gp = SvgpSurrogate::initialize(
            &self.state.train.x,
            &self.state.train.y,
            SvgpParams::default()
                .n_inducings(self.config.n_inducings.min(self.state.train.len()))
                .seed(Some(seed)),
        )?;
        gp.train(
            &self.state.train.x,
            &self.state.train.y,
            &TrainConfig::default()
                .n_epochs(self.config.n_epochs)
                .minibatch(self.config.minibatch)
                .learning_rate(self.config.learning_rate)
                .seed(Some(seed)),
        )?;
        Ok(gp)
    }

    fn diagnostics(&self, gp: &SvgpSurrogate) -> Result<Diagnostics> {
        let mu = gp.predict(&self.state.train.x)?;
        let var = gp.predict_var(&self.state.train.x)?;
        let mut diag = Diagnostics {
            train_rmse: metrics::rmse(&self.state.train.y, &mu),
            train_log_density: metrics::mean_log_density(&self.state.train.y, &mu, &var),
            holdout_rmse: None,
            holdout_log_density: None,
        };
        if !self.state.holdout.is_empty() {
            let mu = gp.predict(&self.state.holdout.x)?;
            let var = gp.predict_var(&self.state.holdout.x)?;
            diag.holdout_rmse = Some(metrics::rmse(&self.state.holdout.y, &mu));
            diag.holdout_log_density =
                Some(metrics::mean_log_density(&self.state.holdout.y, &mu, &var));
        }
        Ok(diag)
    }
}

struct Diagnostics {
    train_rmse: f64,
    train_log_density: f64,
    holdout_rmse: Option<f64>,
    holdout_log_density: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, ArrayView1, ArrayView2, Axis};
    use ndarray_rand::RandomExt;
    use ndarray_rand::rand_distr::Uniform;

    /// Identity "generative model": latent points decode to their own
    /// coordinates, so the oracle can score them exactly.
    struct BowlModel {
        reject_negative: bool,
    }

    impl GenerativeModel for BowlModel {
        type Sequence = String;

        fn latent_dim(&self) -> usize {
            2
        }

        fn decode(&self, z: &ArrayView2<f64>) -> Result<Vec<String>> {
            Ok(z.rows()
                .into_iter()
                .map(|r| {
                    if self.reject_negative && r[0] < 0. {
                        String::new()
                    } else {
                        format!("{};{}", r[0], r[1])
                    }
                })
                .collect())
        }

        fn sequence_to_string(&self, sequence: &String) -> Option<String> {
            if sequence.is_empty() {
                None
            } else {
                Some(sequence.clone())
            }
        }

        fn sample_prior(&self, n: usize, rng: &mut Xoshiro256Plus) -> Array2<f64> {
            Array::random_using((n, 2), Uniform::new(-3., 3.), rng)
        }
    }

    /// Quadratic bowl with optimum at (1, 2), already phrased as a minimized
    /// target.
    struct BowlObjective;

    impl Objective for BowlObjective {
        fn score_batch(&self, molecules: &[Option<String>]) -> Vec<Option<f64>> {
            molecules
                .iter()
                .map(|m| {
                    let m = m.as_deref()?;
                    let mut coords = m.split(';');
                    let x1: f64 = coords.next()?.parse().ok()?;
                    let x2: f64 = coords.next()?.parse().ok()?;
                    Some((x1 - 1.).powi(2) + (x2 - 2.).powi(2))
                })
                .collect()
        }
    }

    fn initial_data(n: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
        let mut rng = Xoshiro256Plus::seed_from_u64(seed);
        let x = Array::random_using((n, 2), Uniform::new(-3., 3.), &mut rng);
        let y = x.map_axis(Axis(1), |r: ArrayView1<f64>| {
            (r[0] - 1.).powi(2) + (r[1] - 2.).powi(2)
        });
        (x, y)
    }

    fn test_config(outdir: &std::path::Path) -> BoConfig {
        BoConfig::default()
            .name("bowl")
            .seed(42)
            .n_iterations(3)
            .batch_size(10)
            .n_inducings(20)
            .n_epochs(5)
            .minibatch(50)
            .learning_rate(5e-2)
            .outdir(outdir)
    }

    #[test]
    fn test_run_grows_training_set_and_improves() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(200, 42);
        let initial_best = y0.iter().cloned().fold(f64::INFINITY, f64::min);

        let mut runner = BoRunner::new(
            test_config(tmp.path()),
            BowlModel {
                reject_negative: false,
            },
            BowlObjective,
            x0,
            y0,
        )
        .unwrap();
        runner.run().unwrap();

        let state = runner.state();
        // 10% held out once, then 3 iterations of 10 appended to training
        assert_eq!(state.holdout.len(), 20);
        assert_eq!(state.train.len(), 180 + 3 * 10);
        assert_eq!(state.iteration, 3);
        assert_eq!(state.best_trace.len(), 3);
        // best-so-far over a growing set cannot worsen
        assert!(state.best_trace[0] <= initial_best);
        for w in state.best_trace.windows(2) {
            assert!(w[1] <= w[0]);
        }
        assert!(state.best_trace[2] < 0.5);

        let dir = runner.recorder().dir();
        assert!(dir.join("config.json").exists());
        assert!(dir.join("iteration_2.json").exists());
        assert!(dir.join("state.json").exists());
        let time = std::fs::read_to_string(dir.join("time.txt")).unwrap();
        assert_eq!(time.lines().count(), 3);
    }

    #[test]
    fn test_long_run_converges_to_bowl_optimum() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(200, 42);

        let mut runner = BoRunner::new(
            test_config(tmp.path()).n_iterations(20),
            BowlModel {
                reject_negative: false,
            },
            BowlObjective,
            x0,
            y0,
        )
        .unwrap();
        runner.run().unwrap();

        let trace = &runner.state().best_trace;
        assert_eq!(trace.len(), 20);
        for w in trace.windows(2) {
            assert!(w[1] <= w[0], "best trace worsened: {} -> {}", w[0], w[1]);
        }
        // the bowl minimum sits at (1, 2) with target 0
        assert!(
            trace[19] <= 0.1,
            "did not close in on the optimum: best target {}",
            trace[19]
        );
    }

    #[test]
    fn test_sentinel_negated_best_for_invalid_decodes() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(150, 7);
        let initial_best = y0.iter().cloned().fold(f64::INFINITY, f64::min);

        let mut runner = BoRunner::new(
            test_config(tmp.path()).seed(7).n_iterations(1),
            BowlModel {
                reject_negative: true,
            },
            BowlObjective,
            x0,
            y0,
        )
        .unwrap();
        runner.run().unwrap();

        // each invalid candidate still contributed one row, with the
        // negation of the best target observed before the iteration
        let state = runner.state();
        assert_eq!(state.train.len(), 135 + 10);
        let appended = state.train.y.slice(ndarray::s![135..]);
        let n_sentinel = appended
            .iter()
            .filter(|&&v| (v - (-initial_best)).abs() < 1e-12)
            .count();
        let record: IterationRecord = serde_json::from_str(
            &std::fs::read_to_string(runner.recorder().dir().join("iteration_0.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(record.n_invalid, n_sentinel);
        assert!(record.molecules.iter().filter(|m| m.is_none()).count() == n_sentinel);
    }

    #[test]
    fn test_sentinel_fixed_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(150, 9);

        struct NeverValid;
        impl Objective for NeverValid {
            fn score_batch(&self, molecules: &[Option<String>]) -> Vec<Option<f64>> {
                vec![None; molecules.len()]
            }
        }

        let mut runner = BoRunner::new(
            test_config(tmp.path())
                .seed(9)
                .n_iterations(1)
                .invalid_score(InvalidScorePolicy::Fixed(77.5)),
            BowlModel {
                reject_negative: false,
            },
            NeverValid,
            x0,
            y0,
        )
        .unwrap();
        runner.run().unwrap();

        let appended = runner.state().train.y.slice(ndarray::s![135..]);
        assert!(appended.iter().all(|&v| v == 77.5));
    }

    #[test]
    fn test_runs_are_deterministic_given_seed() {
        let run = || {
            let tmp = tempfile::tempdir().unwrap();
            let (x0, y0) = initial_data(150, 3);
            let mut runner = BoRunner::new(
                test_config(tmp.path()).seed(3).n_iterations(2),
                BowlModel {
                    reject_negative: false,
                },
                BowlObjective,
                x0,
                y0,
            )
            .unwrap();
            runner.run().unwrap();
            (
                runner.state().train.x.clone(),
                runner.state().best_trace.clone(),
            )
        };
        let (x1, trace1) = run();
        let (x2, trace2) = run();
        assert_eq!(x1, x2);
        assert_eq!(trace1, trace2);
    }

    #[test]
    fn test_resume_continues_from_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(150, 5);

        let mut runner = BoRunner::new(
            test_config(tmp.path()).seed(5).n_iterations(2),
            BowlModel {
                reject_negative: false,
            },
            BowlObjective,
            x0,
            y0,
        )
        .unwrap();
        runner.run().unwrap();
        assert_eq!(runner.state().iteration, 2);

        let mut resumed = BoRunner::resume(
            test_config(tmp.path()).seed(5).n_iterations(3),
            BowlModel {
                reject_negative: false,
            },
            BowlObjective,
        )
        .unwrap();
        assert_eq!(resumed.state().iteration, 2);
        resumed.run().unwrap();
        assert_eq!(resumed.state().iteration, 3);
        assert_eq!(resumed.state().train.len(), 135 + 3 * 10);
        assert_eq!(resumed.state().best_trace.len(), 3);
    }

    #[test]
    fn test_grow_holdout_splits_acquired_points() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(150, 11);
        let mut runner = BoRunner::new(
            test_config(tmp.path())
                .seed(11)
                .n_iterations(2)
                .grow_holdout(true),
            BowlModel {
                reject_negative: false,
            },
            BowlObjective,
            x0,
            y0,
        )
        .unwrap();
        runner.run().unwrap();
        // each batch of 10 sheds one point to the held-out split
        assert_eq!(runner.state().holdout.len(), 15 + 2);
        assert_eq!(runner.state().train.len(), 135 + 2 * 9);
    }

    #[test]
    fn test_dimension_mismatch_is_a_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let (x0, y0) = initial_data(150, 1);

        struct ThreeDimModel;
        impl GenerativeModel for ThreeDimModel {
            type Sequence = String;
            fn latent_dim(&self) -> usize {
                3
            }
            fn decode(&self, _z: &ArrayView2<f64>) -> Result<Vec<String>> {
                Ok(vec![])
            }
            fn sequence_to_string(&self, _s: &String) -> Option<String> {
                None
            }
            fn sample_prior(&self, n: usize, _rng: &mut Xoshiro256Plus) -> Array2<f64> {
                Array2::zeros((n, 3))
            }
        }

        let res = BoRunner::new(
            test_config(tmp.path()),
            ThreeDimModel,
            BowlObjective,
            x0,
            y0,
        );
        assert!(matches!(res, Err(OptError::ConfigurationError(_))));
    }
}
