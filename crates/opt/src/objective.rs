//! Objective abstraction over external molecule oracles.
//!
//! Oracles score molecule strings; the optimizer minimizes, so every
//! objective standardizes its raw terms against fixed reference population
//! statistics and negates the sum into the minimized target. Per-candidate
//! oracle failures surface as `None` and are turned into sentinel
//! observations by the runner, never into errors.

use crate::errors::{OptError, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// A single raw scoring term. Higher raw scores are better; normalization and
/// negation into the minimized target happen in the [`Objective`] built on top.
pub trait PropertyTerm: Sync + Send {
    /// Term name used in logs and artifacts
    fn name(&self) -> &str;

    /// Raw score of a molecule, `None` when scoring fails.
    fn score(&self, molecule: &str) -> Option<f64>;
}

/// Reference population statistics a raw term is standardized against.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TermStats {
    /// Reference population mean
    pub mean: f64,
    /// Reference population standard deviation, strictly positive
    pub std: f64,
}

impl TermStats {
    /// Z-score a raw term value.
    pub fn normalize(&self, raw: f64) -> f64 {
        (raw - self.mean) / self.std
    }

    fn check(&self, name: &str) -> Result<()> {
        if !(self.std > 0. && self.std.is_finite() && self.mean.is_finite()) {
            return Err(OptError::ConfigurationError(format!(
                "Term '{name}' needs finite stats with std > 0, got mean={}, std={}",
                self.mean, self.std
            )));
        }
        Ok(())
    }
}

/// An objective producing the minimized target for a batch of candidates.
pub trait Objective: Sync {
    /// Score candidates in order: result i corresponds to candidate i
    /// regardless of completion order, `None` for invalid candidates and
    /// per-candidate oracle failures.
    fn score_batch(&self, molecules: &[Option<String>]) -> Vec<Option<f64>>;
}

/// Weighted-by-standardization sum of property terms, negated into the
/// minimized target. All terms must score a candidate for it to count.
pub struct CompositeObjective {
    terms: Vec<(Box<dyn PropertyTerm>, TermStats)>,
}

impl CompositeObjective {
    /// Build from (term, reference stats) pairs; fails on empty term lists or
    /// degenerate statistics.
    pub fn new(terms: Vec<(Box<dyn PropertyTerm>, TermStats)>) -> Result<Self> {
        if terms.is_empty() {
            return Err(OptError::ConfigurationError(
                "Composite objective needs at least one term".to_string(),
            ));
        }
        for (term, stats) in &terms {
            stats.check(term.name())?;
        }
        Ok(CompositeObjective { terms })
    }

    fn score_one(&self, molecule: &str) -> Option<f64> {
        let mut total = 0.;
        for (term, stats) in &self.terms {
            let raw = term.score(molecule)?;
            if !raw.is_finite() {
                log::warn!("Term '{}' answered non-finite score for {molecule}", term.name());
                return None;
            }
            total += stats.normalize(raw);
        }
        Some(-total)
    }
}

impl Objective for CompositeObjective {
    fn score_batch(&self, molecules: &[Option<String>]) -> Vec<Option<f64>> {
        molecules
            .par_iter()
            .map(|m| m.as_deref().and_then(|m| self.score_one(m)))
            .collect()
    }
}

/// Single external-simulation oracle (e.g. a docking run) with a score cache
/// keyed by the molecule string, so a molecule revisited across iterations is
/// simulated once.
pub struct SimulationObjective {
    oracle: Box<dyn PropertyTerm>,
    stats: TermStats,
    cache: RwLock<HashMap<String, f64>>,
}

impl SimulationObjective {
    /// Build from a simulation oracle and its reference stats.
    pub fn new(oracle: Box<dyn PropertyTerm>, stats: TermStats) -> Result<Self> {
        stats.check(oracle.name())?;
        Ok(SimulationObjective {
            oracle,
            stats,
            cache: RwLock::new(HashMap::new()),
        })
    }

    /// Seed the raw-score cache, e.g. from a previous run's artifacts.
    pub fn load_cache(&self, scores: HashMap<String, f64>) {
        self.cache.write().unwrap().extend(scores);
    }

    /// Snapshot of the raw-score cache for persistence.
    pub fn cache_snapshot(&self) -> HashMap<String, f64> {
        self.cache.read().unwrap().clone()
    }

    fn raw_score(&self, molecule: &str) -> Option<f64> {
        if let Some(cached) = self.cache.read().unwrap().get(molecule) {
            return Some(*cached);
        }
        let raw = self.oracle.score(molecule)?;
        if !raw.is_finite() {
            log::warn!(
                "Oracle '{}' answered non-finite score for {molecule}",
                self.oracle.name()
            );
            return None;
        }
        self.cache.write().unwrap().insert(molecule.to_string(), raw);
        Some(raw)
    }
}

impl Objective for SimulationObjective {
    fn score_batch(&self, molecules: &[Option<String>]) -> Vec<Option<f64>> {
        molecules
            .par_iter()
            .map(|m| {
                m.as_deref()
                    .and_then(|m| self.raw_score(m))
                    .map(|raw| -self.stats.normalize(raw))
            })
            .collect()
    }
}

/// Oracle behind a process boundary: the command is invoked with the molecule
/// string as its last argument and must print the raw score on stdout. An
/// optional per-candidate wall-clock budget kills overrunning calls, which
/// then count as scoring failures.
pub struct CommandOracle {
    name: String,
    program: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandOracle {
    /// Wrap an external scoring executable.
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>, args: &[String]) -> Self {
        CommandOracle {
            name: name.into(),
            program: program.into(),
            args: args.to_vec(),
            timeout: None,
        }
    }

    /// Set the per-candidate wall-clock budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn run(&self, molecule: &str) -> std::io::Result<Option<String>> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(molecule)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(timeout) = self.timeout {
            let start = Instant::now();
            loop {
                if child.try_wait()?.is_some() {
                    break;
                }
                if start.elapsed() > timeout {
                    log::warn!(
                        "Oracle '{}' exceeded its {}s budget for {molecule}, killing it",
                        self.name,
                        timeout.as_secs_f64()
                    );
                    child.kill()?;
                    child.wait()?;
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }

        let mut stdout = String::new();
        if let Some(out) = child.stdout.as_mut() {
            out.read_to_string(&mut stdout)?;
        }
        let status = child.wait()?;
        if !status.success() {
            log::warn!("Oracle '{}' exited with {status} for {molecule}", self.name);
            return Ok(None);
        }
        Ok(Some(stdout))
    }
}

impl PropertyTerm for CommandOracle {
    fn name(&self) -> &str {
        &self.name
    }

    fn score(&self, molecule: &str) -> Option<f64> {
        match self.run(molecule) {
            Ok(Some(stdout)) => match stdout.trim().parse::<f64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!(
                        "Oracle '{}' answered unparseable output {:?} for {molecule}",
                        self.name,
                        stdout.trim()
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                log::warn!("Oracle '{}' failed for {molecule}: {err}", self.name);
                None
            }
        }
    }
}

/// On-disk description of an objective: one entry per term with the command
/// realizing it and the reference stats it is standardized against.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectiveSpec {
    /// Scoring terms, in evaluation order
    pub terms: Vec<TermSpec>,
    /// Per-candidate wall-clock budget in seconds, if any
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// One term of an [`ObjectiveSpec`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TermSpec {
    /// Term name used in logs and artifacts
    pub name: String,
    /// Scoring executable
    pub program: PathBuf,
    /// Arguments placed before the molecule string
    #[serde(default)]
    pub args: Vec<String>,
    /// Reference population statistics
    pub stats: TermStats,
}

impl ObjectiveSpec {
    /// Read an objective description from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Ok(serde_json::from_reader(file)?)
    }

    fn oracles(&self) -> Vec<(Box<dyn PropertyTerm>, TermStats)> {
        self.terms
            .iter()
            .map(|t| {
                let mut oracle = CommandOracle::new(&t.name, &t.program, &t.args);
                if let Some(secs) = self.timeout_secs {
                    oracle = oracle.timeout(Duration::from_secs(secs));
                }
                (Box::new(oracle) as Box<dyn PropertyTerm>, t.stats)
            })
            .collect()
    }

    /// Build a property-composite objective from this description.
    pub fn composite(&self) -> Result<CompositeObjective> {
        CompositeObjective::new(self.oracles())
    }

    /// Build a single-oracle simulation objective from this description;
    /// fails unless the description holds exactly one term.
    pub fn simulation(&self) -> Result<SimulationObjective> {
        let mut oracles = self.oracles();
        if oracles.len() != 1 {
            return Err(OptError::ConfigurationError(format!(
                "Simulation objective needs exactly one term, got {}",
                oracles.len()
            )));
        }
        let (oracle, stats) = oracles.remove(0);
        SimulationObjective::new(oracle, stats)
    }
}
