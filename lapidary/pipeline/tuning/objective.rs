use ndarray::{Array1, Array2};
use serde_json::{Map, Value};

use super::Objective;
use crate::{
    error::PipelineError,
    models::{ModelKind, Regressor},
    preparation::split::FeatureSplit,
    registry::metric::MetricKind,
};

/// Scores a parameter assignment on a validation split carved out of the
/// training partition, so the held-out test rows never influence the search.
#[derive(Debug)]
pub struct HoldoutObjective {
    model: ModelKind,
    metric: MetricKind,
    validation: FeatureSplit,
}

impl HoldoutObjective {
    /// Splits the training data with the outer split's fraction and seed.
    pub fn new(
        model: ModelKind,
        metric: MetricKind,
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        test_size: f64,
        seed: u64,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            model,
            metric,
            validation: FeatureSplit::new(x_train, y_train, test_size, seed)?,
        })
    }
}

impl Objective for HoldoutObjective {
    fn evaluate(&self, _trial_index: usize, params: &Map<String, Value>) -> Result<f64, PipelineError> {
        let mut model = self.model.build(params)?;
        model.fit(self.validation.x_train.view(), self.validation.y_train.view())?;
        let predicted = model.predict(self.validation.x_test.view())?;
        Ok(self
            .metric
            .compute(&self.validation.y_test.to_vec(), &predicted.to_vec())?)
    }
}
