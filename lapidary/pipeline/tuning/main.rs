//! Seeded random search over model hyperparameters.
//!
//! Every trial draws from its own ChaCha stream derived from the search seed,
//! so a search is reproducible trial by trial regardless of how many trials
//! ran before it.

/// Holdout objective used by the trainer.
pub mod objective;
/// Parameter sampling rules.
pub mod space;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{error::PipelineError, settings::TuningSettings, telemetry::PipelineTelemetry};
use space::SearchSpace;

/// Whether lower or higher objective values win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Lower is better (errors).
    Minimize,
    /// Higher is better (scores).
    Maximize,
}

impl Direction {
    /// Whether `candidate` strictly beats `incumbent`.
    #[must_use]
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }
}

/// Search failures.
#[derive(Debug, Error)]
pub enum TuningError {
    /// The objective failed for one trial.
    #[error("trial {index} failed: {source}")]
    Trial {
        /// Trial number.
        index: usize,
        /// Underlying failure.
        #[source]
        source: Box<PipelineError>,
    },
    /// The objective returned NaN or infinity.
    #[error("trial {index} produced a non-finite objective value {value}")]
    NonFinite {
        /// Trial number.
        index: usize,
        /// Value returned.
        value: f64,
    },
    /// The search was configured with zero trials.
    #[error("hyperparameter search needs at least one trial")]
    NoTrials,
}

/// One evaluated assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Trial number, starting at 0.
    pub index: usize,
    /// Sampled values merged with the constant parameters.
    pub params: Map<String, Value>,
    /// Objective value.
    pub value: f64,
}

/// Scores one parameter assignment.
pub trait Objective {
    /// Evaluates `params` for trial `trial_index`.
    fn evaluate(&self, trial_index: usize, params: &Map<String, Value>) -> Result<f64, PipelineError>;
}

impl<F> Objective for F
where
    F: Fn(usize, &Map<String, Value>) -> Result<f64, PipelineError>,
{
    fn evaluate(&self, trial_index: usize, params: &Map<String, Value>) -> Result<f64, PipelineError> {
        self(trial_index, params)
    }
}

/// Best trial plus the full history.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Winning trial.
    pub best: Trial,
    /// Every trial in evaluation order.
    pub trials: Vec<Trial>,
}

impl SearchOutcome {
    /// Parameters of the winning trial.
    #[must_use]
    pub const fn best_params(&self) -> &Map<String, Value> {
        &self.best.params
    }
}

/// Random search driver.
#[derive(Debug, Clone)]
pub struct HyperparameterSearch {
    space: SearchSpace,
    constants: Map<String, Value>,
    direction: Direction,
    trials: usize,
    seed: u64,
}

impl HyperparameterSearch {
    /// Creates a search.
    #[must_use]
    pub const fn new(
        space: SearchSpace,
        constants: Map<String, Value>,
        direction: Direction,
        trials: usize,
        seed: u64,
    ) -> Self {
        Self {
            space,
            constants,
            direction,
            trials,
            seed,
        }
    }

    /// Builds a search from the `model.tuning` settings.
    #[must_use]
    pub fn from_settings(settings: &TuningSettings) -> Self {
        Self::new(
            settings.space.clone(),
            settings.constants.clone(),
            settings.direction,
            settings.n_trials,
            settings.seed,
        )
    }

    /// Assignment evaluated by trial `index`.
    #[must_use]
    pub fn trial_params(&self, index: usize) -> Map<String, Value> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(index as u64);
        let mut params = self.space.sample(&mut rng);
        for (name, value) in &self.constants {
            params.insert(name.clone(), value.clone());
        }
        params
    }

    /// Evaluates every trial and keeps the best; ties keep the earliest trial.
    pub fn run(
        &self,
        objective: &impl Objective,
        telemetry: &PipelineTelemetry,
    ) -> Result<SearchOutcome, TuningError> {
        if self.trials == 0 {
            return Err(TuningError::NoTrials);
        }
        let _ = telemetry.log(
            LogLevel::Info,
            "hyperparameter search started",
            json!({
                "trials": self.trials,
                "direction": self.direction,
                "searched": self.space.len(),
                "seed": self.seed,
            }),
        );

        let mut trials: Vec<Trial> = Vec::with_capacity(self.trials);
        let mut best: Option<usize> = None;
        for index in 0..self.trials {
            let params = self.trial_params(index);
            let value = objective
                .evaluate(index, &params)
                .map_err(|source| TuningError::Trial {
                    index,
                    source: Box::new(source),
                })?;
            if !value.is_finite() {
                return Err(TuningError::NonFinite { index, value });
            }
            let _ = telemetry.log(
                LogLevel::Debug,
                "trial evaluated",
                json!({ "trial": index, "value": value, "params": params }),
            );
            let improves = match best {
                Some(incumbent) => self.direction.improves(value, trials[incumbent].value),
                None => true,
            };
            if improves {
                best = Some(index);
            }
            trials.push(Trial { index, params, value });
        }

        let best = trials[best.unwrap_or(0)].clone();
        let _ = telemetry.log(
            LogLevel::Info,
            "hyperparameter search completed",
            json!({ "bestTrial": best.index, "bestValue": best.value, "bestParams": best.params }),
        );
        Ok(SearchOutcome { best, trials })
    }
}
