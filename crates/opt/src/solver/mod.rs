//! Optimization-loop orchestration: configuration, run state, per-iteration
//! persistence, and the runner driving refit → acquire → decode → score →
//! append.

mod config;
mod recorder;
mod runner;
mod state;

pub use config::{BoConfig, InvalidScorePolicy, ObjectiveKind};
pub use recorder::{IterationRecord, RunRecorder};
pub use runner::BoRunner;
pub use state::{RunState, SNAPSHOT_VERSION, TrainingSet, split_holdout};
