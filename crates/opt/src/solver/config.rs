use crate::errors::{OptError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which objective drives the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Property composite: penalized octanol-water partition coefficient
    Logp,
    /// Property composite: quantitative estimate of drug-likeness
    Qed,
    /// External docking simulation
    Docking,
    /// QSAR model scoring, declared but not implemented
    Qsar,
}

impl ObjectiveKind {
    /// Name used in logs and artifact paths
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectiveKind::Logp => "logp",
            ObjectiveKind::Qed => "qed",
            ObjectiveKind::Docking => "docking",
            ObjectiveKind::Qsar => "qsar",
        }
    }
}

/// Target appended for a candidate whose decode or scoring failed.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidScorePolicy {
    /// The negation of the best (minimum) observed target so far, i.e. the
    /// negative of the maximum observed score: a heavy, data-driven penalty
    NegatedBest,
    /// A fixed penalty target
    Fixed(f64),
}

/// Settings of a bayesian optimization run.
///
/// Built with builder-like methods starting from `BoConfig::default()`, then
/// validated against the data by [`check`](BoConfig::check) before any
/// surrogate work starts. The configuration is serialized to JSON in the run
/// directory so artifacts stay interpretable after the fact.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BoConfig {
    /// Run name, first component of the artifact directory
    pub(crate) name: String,
    /// Base random seed; also keys the per-simulation directory
    pub(crate) seed: u64,
    /// Number of outer iterations
    pub(crate) n_iterations: usize,
    /// Number of latent points acquired per iteration
    pub(crate) batch_size: usize,
    /// Inducing points of the surrogate refit each iteration
    pub(crate) n_inducings: usize,
    /// Training epochs per surrogate refit
    pub(crate) n_epochs: usize,
    /// Minibatch size of the stochastic trainer
    pub(crate) minibatch: usize,
    /// Adam learning rate of the stochastic trainer
    pub(crate) learning_rate: f64,
    /// Fraction of the data held out for per-iteration diagnostics
    pub(crate) holdout_fraction: f64,
    /// Whether acquired points also feed the held-out split; the source
    /// computes the split once up front, so this defaults to false
    pub(crate) grow_holdout: bool,
    /// Sentinel policy for undecodable or unscorable candidates
    pub(crate) invalid_score: InvalidScorePolicy,
    /// Root directory for run artifacts
    pub(crate) outdir: PathBuf,
}

impl Default for BoConfig {
    fn default() -> Self {
        BoConfig {
            name: "molbo".to_string(),
            seed: 1,
            n_iterations: 5,
            batch_size: 50,
            n_inducings: 500,
            n_epochs: 100,
            minibatch: 500,
            learning_rate: 5e-4,
            holdout_fraction: 0.1,
            grow_holdout: false,
            invalid_score: InvalidScorePolicy::NegatedBest,
            outdir: PathBuf::from("results"),
        }
    }
}

impl BoConfig {
    /// Set the run name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the base random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the number of outer iterations.
    pub fn n_iterations(mut self, n_iterations: usize) -> Self {
        self.n_iterations = n_iterations;
        self
    }

    /// Set the number of latent points acquired per iteration.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the number of inducing points of the surrogate.
    pub fn n_inducings(mut self, n_inducings: usize) -> Self {
        self.n_inducings = n_inducings;
        self
    }

    /// Set the number of training epochs per surrogate refit.
    pub fn n_epochs(mut self, n_epochs: usize) -> Self {
        self.n_epochs = n_epochs;
        self
    }

    /// Set the minibatch size of the stochastic trainer.
    pub fn minibatch(mut self, minibatch: usize) -> Self {
        self.minibatch = minibatch;
        self
    }

    /// Set the Adam learning rate of the stochastic trainer.
    pub fn learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Set the held-out fraction used for diagnostics.
    pub fn holdout_fraction(mut self, holdout_fraction: f64) -> Self {
        self.holdout_fraction = holdout_fraction;
        self
    }

    /// Let acquired points feed the held-out split as well.
    pub fn grow_holdout(mut self, grow_holdout: bool) -> Self {
        self.grow_holdout = grow_holdout;
        self
    }

    /// Set the sentinel policy for failed candidates.
    pub fn invalid_score(mut self, invalid_score: InvalidScorePolicy) -> Self {
        self.invalid_score = invalid_score;
        self
    }

    /// Set the root directory for run artifacts.
    pub fn outdir(mut self, outdir: impl Into<PathBuf>) -> Self {
        self.outdir = outdir.into();
        self
    }

    /// Validate against the initial data shape; all failures are
    /// [`OptError::ConfigurationError`]s raised before any surrogate work.
    pub fn check(&self, n_points: usize, dim: usize) -> Result<()> {
        if self.batch_size == 0 || self.minibatch == 0 {
            return Err(OptError::ConfigurationError(
                "Batch and minibatch sizes should be at least 1".to_string(),
            ));
        }
        if self.learning_rate <= 0. {
            return Err(OptError::ConfigurationError(format!(
                "Learning rate should be strictly positive, got {}",
                self.learning_rate
            )));
        }
        if !(0. ..1.).contains(&self.holdout_fraction) {
            return Err(OptError::ConfigurationError(format!(
                "Holdout fraction should be in [0, 1), got {}",
                self.holdout_fraction
            )));
        }
        if dim == 0 {
            return Err(OptError::ConfigurationError(
                "Latent dimension should be at least 1".to_string(),
            ));
        }
        let n_train = n_points - (n_points as f64 * self.holdout_fraction) as usize;
        if self.n_inducings == 0 || self.n_inducings > n_train {
            return Err(OptError::ConfigurationError(format!(
                "Number of inducing points should be in [1, {n_train}] (training split), got {}",
                self.n_inducings
            )));
        }
        Ok(())
    }

    /// Serialize this configuration as JSON next to the run artifacts.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_check() {
        let config = BoConfig::default().n_inducings(50);
        assert!(config.check(1000, 56).is_ok());
        // fewer training points than inducings
        assert!(config.check(40, 56).is_err());
        // degenerate dimensions
        assert!(config.check(1000, 0).is_err());
    }

    #[test]
    fn test_config_rejects_bad_fractions_and_rates() {
        assert!(BoConfig::default().holdout_fraction(1.).check(1000, 2).is_err());
        assert!(BoConfig::default().learning_rate(0.).check(1000, 2).is_err());
        assert!(BoConfig::default().batch_size(0).check(1000, 2).is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = BoConfig::default()
            .name("bowl")
            .seed(3)
            .invalid_score(InvalidScorePolicy::Fixed(12.5));
        let json = serde_json::to_string(&config).unwrap();
        let back: BoConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "bowl");
        assert_eq!(back.seed, 3);
        assert_eq!(back.invalid_score, InvalidScorePolicy::Fixed(12.5));
    }
}
