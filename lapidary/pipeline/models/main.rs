//! Regressors reachable through the model registry.

/// Gradient-boosted regression trees.
pub mod boosting;
/// Ordinary least squares with optional L2 penalty.
pub mod linear;

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use boosting::GradientBoosting;
use linear::LinearRegression;

/// Model construction, fitting, and prediction failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// A hyperparameter is unknown or has an invalid value.
    #[error("{model}: invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Model registry name.
        model: &'static str,
        /// Parameter name.
        name: String,
        /// What is wrong.
        reason: String,
    },
    /// Fit was called with no rows.
    #[error("cannot fit on an empty training set")]
    EmptyTrainingSet,
    /// Row counts or feature counts disagree.
    #[error("shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Expected dimension.
        expected: usize,
        /// Dimension received.
        found: usize,
    },
    /// Predict was called before fit.
    #[error("model has not been fitted")]
    NotFitted,
    /// Training produced NaN or infinite values.
    #[error("training diverged: {0}")]
    NonFinite(String),
}

/// Opaque regression capability.
pub trait Regressor {
    /// Fits on a feature matrix and aligned target vector.
    fn fit(&mut self, features: ArrayView2<'_, f64>, target: ArrayView1<'_, f64>) -> Result<(), ModelError>;

    /// Predicts one value per feature row.
    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError>;

    /// Effective hyperparameters (after defaults).
    fn params(&self) -> Map<String, Value>;
}

/// Registered regression algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelKind {
    /// Least squares.
    #[serde(rename = "linear_regression")]
    LinearRegression,
    /// Gradient-boosted trees.
    #[serde(rename = "xgb_regression")]
    GradientBoosting,
}

impl ModelKind {
    /// Every registered model.
    pub const ALL: [Self; 2] = [Self::LinearRegression, Self::GradientBoosting];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::LinearRegression => "linear_regression",
            Self::GradientBoosting => "xgb_regression",
        }
    }

    /// Constructs an unfitted model from keyword hyperparameters.
    pub fn build(self, params: &Map<String, Value>) -> Result<Model, ModelError> {
        Ok(match self {
            Self::LinearRegression => Model::LinearRegression(LinearRegression::from_params(params)?),
            Self::GradientBoosting => Model::GradientBoosting(GradientBoosting::from_params(params)?),
        })
    }
}

/// A model instance; serialised with its variant tag for the artifact bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Model {
    /// Least squares.
    #[serde(rename = "linear_regression")]
    LinearRegression(LinearRegression),
    /// Gradient-boosted trees.
    #[serde(rename = "xgb_regression")]
    GradientBoosting(GradientBoosting),
}

impl Model {
    /// Registry variant this model belongs to.
    #[must_use]
    pub const fn kind(&self) -> ModelKind {
        match self {
            Self::LinearRegression(_) => ModelKind::LinearRegression,
            Self::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    fn inner(&self) -> &dyn Regressor {
        match self {
            Self::LinearRegression(model) => model,
            Self::GradientBoosting(model) => model,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Regressor {
        match self {
            Self::LinearRegression(model) => model,
            Self::GradientBoosting(model) => model,
        }
    }
}

impl Regressor for Model {
    fn fit(&mut self, features: ArrayView2<'_, f64>, target: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        check_training_shape(features, target)?;
        self.inner_mut().fit(features, target)
    }

    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        self.inner().predict(features)
    }

    fn params(&self) -> Map<String, Value> {
        self.inner().params()
    }
}

fn check_training_shape(
    features: ArrayView2<'_, f64>,
    target: ArrayView1<'_, f64>,
) -> Result<(), ModelError> {
    if features.nrows() == 0 {
        return Err(ModelError::EmptyTrainingSet);
    }
    if features.nrows() != target.len() {
        return Err(ModelError::ShapeMismatch {
            expected: features.nrows(),
            found: target.len(),
        });
    }
    if let Some(bad) = features.iter().chain(target.iter()).find(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite(format!("training input contains {bad}")));
    }
    Ok(())
}

/// Reads keyword hyperparameters for one model, rejecting unknown names.
pub(crate) struct ParamReader<'a> {
    model: &'static str,
    params: &'a Map<String, Value>,
}

impl<'a> ParamReader<'a> {
    pub(crate) fn new(
        model: &'static str,
        params: &'a Map<String, Value>,
        accepted: &'static [&'static str],
    ) -> Result<Self, ModelError> {
        if let Some(unknown) = params.keys().find(|key| !accepted.contains(&key.as_str())) {
            return Err(ModelError::InvalidParameter {
                model,
                name: unknown.clone(),
                reason: format!("not accepted (known: {})", accepted.join(", ")),
            });
        }
        Ok(Self { model, params })
    }

    fn invalid(&self, name: &str, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidParameter {
            model: self.model,
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn f64_or(&self, name: &str, default: f64) -> Result<f64, ModelError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| self.invalid(name, format!("expected a number, got {value}"))),
        }
    }

    pub(crate) fn u64_or(&self, name: &str, default: u64) -> Result<u64, ModelError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_u64()
                .or_else(|| {
                    value
                        .as_f64()
                        .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= 2f64.powi(53))
                        .map(|v| v as u64)
                })
                .ok_or_else(|| {
                    self.invalid(name, format!("expected a non-negative integer, got {value}"))
                }),
        }
    }

    pub(crate) fn bool_or(&self, name: &str, default: bool) -> Result<bool, ModelError> {
        match self.params.get(name) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| self.invalid(name, format!("expected a boolean, got {value}"))),
        }
    }

    pub(crate) fn check(&self, name: &str, ok: bool, reason: &str) -> Result<(), ModelError> {
        if ok {
            Ok(())
        } else {
            Err(self.invalid(name, reason))
        }
    }
}
