use crate::errors::Result;
use crate::solver::config::BoConfig;
use crate::solver::state::RunState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Artifacts of one completed outer iteration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Outer iteration index, starting at 0
    pub iteration: usize,
    /// Training set size after the append
    pub n_train: usize,
    /// Decoded molecules in acquisition order, `null` for invalid decodes
    pub molecules: Vec<Option<String>>,
    /// Appended minimized targets, sentinels included, in acquisition order
    pub targets: Vec<f64>,
    /// Candidates that ended up with the sentinel target
    pub n_invalid: usize,
    /// Best observed target after this iteration
    pub best: f64,
    /// Surrogate diagnostics on the training split
    pub train_rmse: f64,
    /// Mean predictive log-density on the training split
    pub train_log_density: f64,
    /// Surrogate diagnostics on the held-out split, if one exists
    pub holdout_rmse: Option<f64>,
    /// Mean predictive log-density on the held-out split, if one exists
    pub holdout_log_density: Option<f64>,
    /// Cumulative wall-clock seconds since the run started
    pub elapsed_secs: f64,
}

/// Write-only, append-style persistence of run artifacts under
/// `<outdir>/<run name>/simulation_<seed>/`.
///
/// Each iteration gets its own JSON record, the cumulative wall-clock time is
/// appended to `time.txt`, and the latest [`RunState`] snapshot overwrites
/// `state.json` so a crash loses at most the in-flight iteration.
pub struct RunRecorder {
    dir: PathBuf,
}

impl RunRecorder {
    /// Create the per-simulation directory and persist the configuration.
    pub fn new(config: &BoConfig) -> Result<Self> {
        let dir = config
            .outdir
            .join(&config.name)
            .join(format!("simulation_{}", config.seed));
        std::fs::create_dir_all(&dir)?;
        config.save(&dir.join("config.json"))?;
        Ok(RunRecorder { dir })
    }

    /// Per-simulation artifact directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one iteration: its record, the time trace, and the state
    /// snapshot.
    pub fn record(&self, record: &IterationRecord, state: &RunState) -> Result<()> {
        let file =
            std::fs::File::create(self.dir.join(format!("iteration_{}.json", record.iteration)))?;
        serde_json::to_writer_pretty(file, record)?;

        let mut time_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("time.txt"))?;
        writeln!(time_file, "{} {}", record.iteration, record.elapsed_secs)?;

        state.save(&self.dir.join("state.json"))?;
        Ok(())
    }

    /// Load the latest state snapshot of this simulation, if any.
    pub fn load_state(&self) -> Result<Option<RunState>> {
        let path = self.dir.join("state.json");
        if path.exists() {
            Ok(Some(RunState::load(&path)?))
        } else {
            Ok(None)
        }
    }

    /// Persist the oracle raw-score cache.
    pub fn save_cache(&self, cache: &HashMap<String, f64>) -> Result<()> {
        let file = std::fs::File::create(self.dir.join("oracle_cache.json"))?;
        serde_json::to_writer(file, cache)?;
        Ok(())
    }

    /// Load the oracle raw-score cache of a previous run, if any.
    pub fn load_cache(&self) -> Result<HashMap<String, f64>> {
        let path = self.dir.join("oracle_cache.json");
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }
}
