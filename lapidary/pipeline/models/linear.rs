use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{ModelError, ParamReader, Regressor};

const NAME: &str = "linear_regression";
const ACCEPTED: &[&str] = &["fit_intercept", "alpha"];
/// Keeps the normal equations solvable when a feature is constant in the training split.
const JITTER: f64 = 1e-9;

/// Least-squares regression solved through the normal equations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegression {
    fit_intercept: bool,
    alpha: f64,
    #[serde(default)]
    fitted: Option<LinearFit>,
}

/// Learned coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    /// One weight per feature column.
    pub coefficients: Vec<f64>,
    /// Bias term.
    pub intercept: f64,
}

impl LinearRegression {
    /// Builds an unfitted model from `fit_intercept` (default true) and `alpha` (default 0).
    pub fn from_params(params: &Map<String, Value>) -> Result<Self, ModelError> {
        let reader = ParamReader::new(NAME, params, ACCEPTED)?;
        let alpha = reader.f64_or("alpha", 0.0)?;
        reader.check("alpha", alpha >= 0.0, "must be non-negative")?;
        Ok(Self {
            fit_intercept: reader.bool_or("fit_intercept", true)?,
            alpha,
            fitted: None,
        })
    }

    /// Learned coefficients, once fitted.
    #[must_use]
    pub const fn coefficients(&self) -> Option<&LinearFit> {
        self.fitted.as_ref()
    }
}

impl Regressor for LinearRegression {
    fn fit(&mut self, features: ArrayView2<'_, f64>, target: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        let n_features = features.ncols();
        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = features
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array1::zeros(n_features));
            (x_mean, target.mean().unwrap_or(0.0))
        } else {
            (Array1::zeros(n_features), 0.0)
        };
        let centred = &features - &x_mean;
        let y_centred = &target - y_mean;

        let mut gram: Array2<f64> = centred.t().dot(&centred);
        let scale = (gram.diag().sum() / n_features.max(1) as f64).max(1.0);
        for idx in 0..n_features {
            gram[[idx, idx]] += self.alpha + JITTER * scale;
        }
        let rhs = centred.t().dot(&y_centred);
        let coefficients = solve(gram, rhs)?;
        let intercept = y_mean - x_mean.dot(&coefficients);
        if !intercept.is_finite() || coefficients.iter().any(|w| !w.is_finite()) {
            return Err(ModelError::NonFinite("least squares solution".into()));
        }
        self.fitted = Some(LinearFit {
            coefficients: coefficients.to_vec(),
            intercept,
        });
        Ok(())
    }

    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let fit = self.fitted.as_ref().ok_or(ModelError::NotFitted)?;
        if features.ncols() != fit.coefficients.len() {
            return Err(ModelError::ShapeMismatch {
                expected: fit.coefficients.len(),
                found: features.ncols(),
            });
        }
        let weights = ArrayView1::from(fit.coefficients.as_slice());
        Ok(features.dot(&weights) + fit.intercept)
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("fit_intercept".into(), json!(self.fit_intercept));
        params.insert("alpha".into(), json!(self.alpha));
        params
    }
}

/// Gaussian elimination with partial pivoting on a symmetric positive definite system.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < f64::MIN_POSITIVE {
            return Err(ModelError::NonFinite(format!("singular system at column {col}")));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = Array1::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}
