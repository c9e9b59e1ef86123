use crate::errors::{OptError, Result};
use ndarray::{Array1, Array2, Axis};
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256Plus;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Version tag of the snapshot layout, bumped on incompatible changes.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A growable set of (latent point, minimized target) observations.
///
/// Rows only ever get appended; ordering is the acquisition order and is
/// preserved through snapshots.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainingSet {
    /// Latent points as a (n, d) matrix
    pub x: Array2<f64>,
    /// Minimized targets, one per row of `x`
    pub y: Array1<f64>,
}

impl TrainingSet {
    /// Build from aligned observations.
    pub fn new(x: Array2<f64>, y: Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(OptError::InvalidValueError(format!(
                "Mismatched observations: {} latent points for {} targets",
                x.nrows(),
                y.len()
            )));
        }
        Ok(TrainingSet { x, y })
    }

    /// Number of observations
    pub fn len(&self) -> usize {
        self.y.len()
    }

    /// Whether the set holds no observation
    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Append a batch of observations, keeping their order.
    pub fn append(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() || x.ncols() != self.x.ncols() {
            return Err(OptError::InvalidValueError(format!(
                "Mismatched batch: ({}, {}) latent points for {} targets, expected dim {}",
                x.nrows(),
                x.ncols(),
                y.len(),
                self.x.ncols()
            )));
        }
        self.x.append(Axis(0), x.view()).map_err(|e| {
            OptError::InvalidValueError(format!("Cannot append latent points: {e}"))
        })?;
        self.y.append(Axis(0), y.view()).map_err(|e| {
            OptError::InvalidValueError(format!("Cannot append targets: {e}"))
        })?;
        Ok(())
    }

    /// Acquisition bounds as a (d, 2) matrix holding the componentwise
    /// min/max of the observed latent points.
    pub fn bounds(&self) -> Array2<f64> {
        let d = self.x.ncols();
        let mut xlimits = Array2::zeros((d, 2));
        for j in 0..d {
            let col = self.x.column(j);
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for &v in col {
                lo = lo.min(v);
                hi = hi.max(v);
            }
            xlimits[[j, 0]] = lo;
            xlimits[[j, 1]] = hi;
        }
        xlimits
    }

    /// Best (minimum) observed target
    pub fn best(&self) -> Option<f64> {
        self.y.iter().copied().fold(None, |acc, v| match acc {
            Some(best) if best <= v => Some(best),
            _ => Some(v),
        })
    }
}

/// Split observations into a training and a held-out part by seeded
/// permutation; `holdout_fraction` of the rows (rounded down) go to the
/// held-out part.
pub fn split_holdout(
    x: &Array2<f64>,
    y: &Array1<f64>,
    holdout_fraction: f64,
    seed: u64,
) -> Result<(TrainingSet, TrainingSet)> {
    let n = x.nrows();
    let n_holdout = (n as f64 * holdout_fraction) as usize;
    let mut indices = (0..n).collect::<Vec<_>>();
    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (holdout_idx, train_idx) = indices.split_at(n_holdout);
    let train = TrainingSet::new(
        x.select(Axis(0), train_idx),
        y.select(Axis(0), train_idx),
    )?;
    let holdout = TrainingSet::new(
        x.select(Axis(0), holdout_idx),
        y.select(Axis(0), holdout_idx),
    )?;
    Ok((train, holdout))
}

/// Snapshot of a run: everything needed to resume or audit after the process
/// ends. Persisted as JSON after every iteration, so a crash loses at most
/// the in-flight iteration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    /// Snapshot layout version
    pub version: u32,
    /// Completed outer iterations
    pub iteration: usize,
    /// Cumulative wall-clock seconds spent in completed iterations
    pub elapsed_secs: f64,
    /// Best observed target after each completed iteration
    pub best_trace: Vec<f64>,
    /// Observations the surrogate trains on
    pub train: TrainingSet,
    /// Held-out observations used for diagnostics
    pub holdout: TrainingSet,
}

impl RunState {
    /// Fresh state from initial observations.
    pub fn new(train: TrainingSet, holdout: TrainingSet) -> Self {
        RunState {
            version: SNAPSHOT_VERSION,
            iteration: 0,
            elapsed_secs: 0.,
            best_trace: Vec::new(),
            train,
            holdout,
        }
    }

    /// Best (minimum) target over training and held-out observations.
    pub fn observed_best(&self) -> Option<f64> {
        match (self.train.best(), self.holdout.best()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Write the snapshot as JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer(file, self)?;
        Ok(())
    }

    /// Read a snapshot back; fails on version mismatch.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let state: RunState = serde_json::from_reader(file)?;
        if state.version != SNAPSHOT_VERSION {
            return Err(OptError::ConfigurationError(format!(
                "Snapshot version {} not supported (expected {SNAPSHOT_VERSION})",
                state.version
            )));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn make_set() -> TrainingSet {
        TrainingSet::new(
            array![[0., 1.], [2., -1.], [-3., 4.]],
            array![0.5, -0.25, 2.],
        )
        .unwrap()
    }

    #[test]
    fn test_append_and_bounds() {
        let mut set = make_set();
        set.append(&array![[5., 5.]], &array![1.]).unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(set.bounds(), array![[-3., 5.], [-1., 5.]]);
        assert_abs_diff_eq!(set.best().unwrap(), -0.25, epsilon = 1e-12);
        // ragged batches are rejected
        assert!(set.append(&array![[1., 2.]], &array![1., 2.]).is_err());
        assert!(set.append(&array![[1., 2., 3.]], &array![1.]).is_err());
    }

    #[test]
    fn test_split_holdout_partitions() {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| (i * 2 + j) as f64);
        let y = Array1::from_shape_fn(20, |i| i as f64);
        let (train, holdout) = split_holdout(&x, &y, 0.1, 42).unwrap();
        assert_eq!(train.len(), 18);
        assert_eq!(holdout.len(), 2);
        // deterministic given the seed
        let (train2, _) = split_holdout(&x, &y, 0.1, 42).unwrap();
        assert_eq!(train.x, train2.x);
        // every target lands in exactly one split
        let mut all = train.y.to_vec();
        all.extend(holdout.y.iter());
        all.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(all, y.to_vec());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::new(make_set(), TrainingSet::new(array![[9., 9.]], array![3.]).unwrap());
        state.iteration = 4;
        state.elapsed_secs = 12.75;
        state.best_trace = vec![0.5, -0.25, -0.25];
        state.save(&path).unwrap();

        let back = RunState::load(&path).unwrap();
        assert_eq!(back, state);
        assert_abs_diff_eq!(back.observed_best().unwrap(), -0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_snapshot_version_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = RunState::new(make_set(), make_set());
        state.version = 99;
        state.save(&path).unwrap();
        assert!(RunState::load(&path).is_err());
    }
}
