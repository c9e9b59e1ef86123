//! The `molbo` binary: latent-space bayesian optimization of molecules
//! against external decoder and oracle executables.

use anyhow::Context;
use clap::Parser;
use molbo_opt::generative::CommandDecoder;
use molbo_opt::objective::{Objective, ObjectiveSpec};
use molbo_opt::solver::{BoConfig, BoRunner, InvalidScorePolicy, ObjectiveKind};
use molbo_opt::{OptError, Result};
use ndarray::{Array1, Array2, s};
use ndarray_npy::read_npy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "molbo", version, about = "Bayesian optimization of molecules over a generative latent space")]
struct Cli {
    /// Run name, first component of the artifact directory
    #[arg(long, default_value = "molbo")]
    name: String,

    /// Base random seed; also keys the per-simulation directory
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Latent features of the initial observations (2-D f64 .npy)
    #[arg(long)]
    features: PathBuf,

    /// Raw scores of the initial observations (1-D f64 .npy, higher is
    /// better); negated into the minimized target
    #[arg(long)]
    scores: PathBuf,

    /// Number of initial samples taken from the data files (0 = all)
    #[arg(long, default_value_t = 0)]
    n_init: usize,

    /// Decoder executable: latent matrix as npy on stdin, one molecule per
    /// line on stdout, empty line for an undecodable point
    #[arg(long)]
    decoder: PathBuf,

    /// Extra argument passed to the decoder executable (repeatable)
    #[arg(long = "decoder-arg")]
    decoder_args: Vec<String>,

    /// Objective driving the run
    #[arg(long, value_enum)]
    objective: ObjectiveKind,

    /// JSON description of the oracle commands and reference stats
    #[arg(long)]
    objective_spec: PathBuf,

    /// Number of outer iterations
    #[arg(long, default_value_t = 5)]
    n_iters: usize,

    /// Training epochs per surrogate refit
    #[arg(long, default_value_t = 100)]
    epochs: usize,

    /// Latent points acquired per iteration
    #[arg(long, default_value_t = 50)]
    bo_batch_size: usize,

    /// Inducing points of the surrogate
    #[arg(long, default_value_t = 500)]
    n_inducings: usize,

    /// Minibatch size of the stochastic trainer
    #[arg(long, default_value_t = 500)]
    minibatch: usize,

    /// Adam learning rate of the stochastic trainer
    #[arg(long, default_value_t = 5e-4)]
    learning_rate: f64,

    /// Fraction of the data held out for per-iteration diagnostics
    #[arg(long, default_value_t = 0.1)]
    holdout_fraction: f64,

    /// Let acquired points feed the held-out split as well
    #[arg(long)]
    grow_holdout: bool,

    /// Fixed sentinel target for failed candidates, overriding the
    /// negated-best policy
    #[arg(long)]
    invalid_penalty: Option<f64>,

    /// Root directory for run artifacts
    #[arg(long, default_value = "results")]
    outdir: PathBuf,

    /// Resume from the latest snapshot in the run directory
    #[arg(long)]
    resume: bool,
}

impl Cli {
    fn config(&self) -> BoConfig {
        let mut config = BoConfig::default()
            .name(&self.name)
            .seed(self.seed)
            .n_iterations(self.n_iters)
            .batch_size(self.bo_batch_size)
            .n_inducings(self.n_inducings)
            .n_epochs(self.epochs)
            .minibatch(self.minibatch)
            .learning_rate(self.learning_rate)
            .holdout_fraction(self.holdout_fraction)
            .grow_holdout(self.grow_holdout)
            .outdir(&self.outdir);
        if let Some(penalty) = self.invalid_penalty {
            config = config.invalid_score(InvalidScorePolicy::Fixed(penalty));
        }
        config
    }
}

fn load_data(cli: &Cli) -> Result<(Array2<f64>, Array1<f64>)> {
    let x: Array2<f64> = read_npy(&cli.features)?;
    let scores: Array1<f64> = read_npy(&cli.scores)?;
    if x.nrows() != scores.len() {
        return Err(OptError::ConfigurationError(format!(
            "{} latent points for {} scores",
            x.nrows(),
            scores.len()
        )));
    }
    let (x, scores) = if cli.n_init > 0 {
        if cli.n_init > x.nrows() {
            return Err(OptError::ConfigurationError(format!(
                "Requested {} initial samples, data files hold {}",
                cli.n_init,
                x.nrows()
            )));
        }
        (
            x.slice(s![..cli.n_init, ..]).to_owned(),
            scores.slice(s![..cli.n_init]).to_owned(),
        )
    } else {
        (x, scores)
    };
    // scores are maximized by the domain, the optimizer minimizes
    Ok((x, scores.mapv(|v| -v)))
}

fn build_runner<O: Objective>(
    cli: &Cli,
    model: CommandDecoder,
    objective: O,
) -> Result<BoRunner<CommandDecoder, O>> {
    if cli.resume {
        BoRunner::resume(cli.config(), model, objective)
    } else {
        let (x0, y0) = load_data(cli)?;
        BoRunner::new(cli.config(), model, objective, x0, y0)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let x_dim: usize = {
        let x: Array2<f64> = read_npy(&cli.features).context("Reading latent features")?;
        x.ncols()
    };
    let model = CommandDecoder::new(&cli.decoder, &cli.decoder_args, x_dim);
    let spec = ObjectiveSpec::load(&cli.objective_spec).context("Reading objective spec")?;

    match cli.objective {
        ObjectiveKind::Logp | ObjectiveKind::Qed => {
            let objective = spec.composite()?;
            let mut runner = build_runner(&cli, model, objective)?;
            runner.run().context("Optimization run failed")?;
            report(runner.state());
        }
        ObjectiveKind::Docking => {
            let objective = spec.simulation()?;
            let mut runner = build_runner(&cli, model, objective)?;
            runner
                .objective()
                .load_cache(runner.recorder().load_cache()?);
            let outcome = runner.run();
            // the cache is worth keeping even when the run aborts
            runner
                .recorder()
                .save_cache(&runner.objective().cache_snapshot())?;
            outcome.context("Optimization run failed")?;
            report(runner.state());
        }
        ObjectiveKind::Qsar => {
            return Err(OptError::ConfigurationError(
                "QSAR objective is declared but not implemented".to_string(),
            )
            .into());
        }
    }
    Ok(())
}

fn report(state: &molbo_opt::solver::RunState) {
    if let Some(best) = state.observed_best() {
        log::info!(
            "Run complete after {} iterations: best target {best:.6} (score {:.6}), {:.1}s elapsed",
            state.iteration,
            -best,
            state.elapsed_secs
        );
    }
}
