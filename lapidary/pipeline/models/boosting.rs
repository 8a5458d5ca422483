use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{seq::index::sample, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{ModelError, ParamReader, Regressor};

const NAME: &str = "xgb_regression";
const ACCEPTED: &[&str] = &[
    "n_estimators",
    "learning_rate",
    "max_depth",
    "min_samples_leaf",
    "subsample",
    "reg_lambda",
    "random_state",
];

/// Gradient boosting with squared-error loss and L2-regularised leaf weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: usize,
    min_samples_leaf: usize,
    subsample: f64,
    reg_lambda: f64,
    random_state: u64,
    #[serde(default)]
    fitted: Option<Ensemble>,
}

/// Base score plus shrunken trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensemble {
    base_score: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

/// Flat regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

impl GradientBoosting {
    /// Builds an unfitted ensemble; unspecified parameters take their usual defaults.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self, ModelError> {
        let reader = ParamReader::new(NAME, params, ACCEPTED)?;
        let n_estimators = reader.u64_or("n_estimators", 100)?;
        reader.check("n_estimators", n_estimators >= 1, "must be at least 1")?;
        let learning_rate = reader.f64_or("learning_rate", 0.1)?;
        reader.check("learning_rate", learning_rate > 0.0, "must be positive")?;
        let max_depth = reader.u64_or("max_depth", 3)?;
        reader.check("max_depth", max_depth >= 1, "must be at least 1")?;
        let min_samples_leaf = reader.u64_or("min_samples_leaf", 1)?;
        reader.check("min_samples_leaf", min_samples_leaf >= 1, "must be at least 1")?;
        let subsample = reader.f64_or("subsample", 1.0)?;
        reader.check(
            "subsample",
            subsample > 0.0 && subsample <= 1.0,
            "must be in (0, 1]",
        )?;
        let reg_lambda = reader.f64_or("reg_lambda", 1.0)?;
        reader.check("reg_lambda", reg_lambda >= 0.0, "must be non-negative")?;
        Ok(Self {
            n_estimators: to_usize(n_estimators),
            learning_rate,
            max_depth: to_usize(max_depth),
            min_samples_leaf: to_usize(min_samples_leaf),
            subsample,
            reg_lambda,
            random_state: reader.u64_or("random_state", 0)?,
            fitted: None,
        })
    }

    /// Number of fitted trees (zero before fit).
    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.fitted.as_ref().map_or(0, |ensemble| ensemble.trees.len())
    }

    fn grow(&self, features: ArrayView2<'_, f64>, residuals: &[f64], rows: Vec<usize>) -> Tree {
        let mut tree = Tree { nodes: Vec::new() };
        self.grow_node(&mut tree, features, residuals, rows, 0);
        tree
    }

    fn grow_node(
        &self,
        tree: &mut Tree,
        features: ArrayView2<'_, f64>,
        residuals: &[f64],
        rows: Vec<usize>,
        depth: usize,
    ) -> usize {
        let id = tree.nodes.len();
        let total: f64 = rows.iter().map(|&row| residuals[row]).sum();
        let leaf_value = total / (rows.len() as f64 + self.reg_lambda);
        tree.nodes.push(Node::Leaf { value: leaf_value });

        if depth >= self.max_depth || rows.len() < 2 * self.min_samples_leaf {
            return id;
        }
        let Some(split) = self.best_split(features, residuals, &rows, total) else {
            return id;
        };
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&row| features[[row, split.feature]] <= split.threshold);
        let left = self.grow_node(tree, features, residuals, left_rows, depth + 1);
        let right = self.grow_node(tree, features, residuals, right_rows, depth + 1);
        tree.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(
        &self,
        features: ArrayView2<'_, f64>,
        residuals: &[f64],
        rows: &[usize],
        total: f64,
    ) -> Option<Candidate> {
        let lambda = self.reg_lambda;
        let score = |sum: f64, count: usize| sum * sum / (count as f64 + lambda);
        let parent = score(total, rows.len());
        let mut best: Option<Candidate> = None;
        let mut order = rows.to_vec();
        for feature in 0..features.ncols() {
            order.sort_by(|&a, &b| features[[a, feature]].total_cmp(&features[[b, feature]]));
            let mut left_sum = 0.0;
            for split_at in 1..order.len() {
                left_sum += residuals[order[split_at - 1]];
                let lower = features[[order[split_at - 1], feature]];
                let upper = features[[order[split_at], feature]];
                if lower == upper
                    || split_at < self.min_samples_leaf
                    || order.len() - split_at < self.min_samples_leaf
                {
                    continue;
                }
                let gain = score(left_sum, split_at)
                    + score(total - left_sum, order.len() - split_at)
                    - parent;
                if gain > 1e-12 && best.as_ref().map_or(true, |current| gain > current.gain) {
                    best = Some(Candidate {
                        feature,
                        threshold: lower + (upper - lower) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}

struct Candidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl Tree {
    fn evaluate(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }
}

impl Regressor for GradientBoosting {
    fn fit(&mut self, features: ArrayView2<'_, f64>, target: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        let n_rows = features.nrows();
        let base_score = target.mean().unwrap_or(0.0);
        let mut current = vec![base_score; n_rows];
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let sample_size = ((n_rows as f64 * self.subsample).ceil() as usize).clamp(1, n_rows);
        let mut trees = Vec::with_capacity(self.n_estimators);

        for _ in 0..self.n_estimators {
            let residuals: Vec<f64> = target
                .iter()
                .zip(&current)
                .map(|(truth, predicted)| truth - predicted)
                .collect();
            let rows = if sample_size == n_rows {
                (0..n_rows).collect()
            } else {
                let mut rows = sample(&mut rng, n_rows, sample_size).into_vec();
                rows.sort_unstable();
                rows
            };
            let mut tree = self.grow(features, &residuals, rows);
            for node in &mut tree.nodes {
                if let Node::Leaf { value } = node {
                    *value *= self.learning_rate;
                }
            }
            for (row, prediction) in features.outer_iter().zip(current.iter_mut()) {
                *prediction += tree.evaluate(row);
            }
            trees.push(tree);
        }

        if current.iter().any(|value| !value.is_finite()) {
            return Err(ModelError::NonFinite("boosting predictions".into()));
        }
        self.fitted = Some(Ensemble {
            base_score,
            n_features: features.ncols(),
            trees,
        });
        Ok(())
    }

    fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, ModelError> {
        let ensemble = self.fitted.as_ref().ok_or(ModelError::NotFitted)?;
        if features.ncols() != ensemble.n_features {
            return Err(ModelError::ShapeMismatch {
                expected: ensemble.n_features,
                found: features.ncols(),
            });
        }
        Ok(features
            .outer_iter()
            .map(|row| {
                ensemble.base_score
                    + ensemble
                        .trees
                        .iter()
                        .map(|tree| tree.evaluate(row))
                        .sum::<f64>()
            })
            .collect())
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("n_estimators".into(), json!(self.n_estimators));
        params.insert("learning_rate".into(), json!(self.learning_rate));
        params.insert("max_depth".into(), json!(self.max_depth));
        params.insert("min_samples_leaf".into(), json!(self.min_samples_leaf));
        params.insert("subsample".into(), json!(self.subsample));
        params.insert("reg_lambda".into(), json!(self.reg_lambda));
        params.insert("random_state".into(), json!(self.random_state));
        params
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn step_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((40, 2), |(row, col)| {
            if col == 0 {
                row as f64
            } else {
                (row % 3) as f64
            }
        });
        let y = x
            .outer_iter()
            .map(|row| {
                let step = if row[0] < 20.0 { 10.0 } else { 30.0 };
                step + row[1]
            })
            .collect();
        (x, y)
    }

    fn mse(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
        a.iter().zip(b).map(|(p, t)| (p - t).powi(2)).sum::<f64>() / a.len() as f64
    }

    #[test]
    fn more_rounds_reduce_training_error() {
        let (x, y) = step_data();
        let params = |rounds: u64| {
            json!({ "n_estimators": rounds, "learning_rate": 0.3 })
                .as_object()
                .cloned()
                .unwrap()
        };
        let mut short = GradientBoosting::from_params(&params(2)).unwrap();
        short.fit(x.view(), y.view()).unwrap();
        let mut long = GradientBoosting::from_params(&params(60)).unwrap();
        long.fit(x.view(), y.view()).unwrap();
        let short_err = mse(&short.predict(x.view()).unwrap(), &y);
        let long_err = mse(&long.predict(x.view()).unwrap(), &y);
        assert!(long_err < short_err);
        assert!(long_err < 1.0, "training mse {long_err}");
        assert_eq!(long.tree_count(), 60);
    }

    #[test]
    fn subsampled_fits_are_reproducible() {
        let (x, y) = step_data();
        let params = json!({ "n_estimators": 10, "subsample": 0.5, "random_state": 7 })
            .as_object()
            .cloned()
            .unwrap();
        let mut first = GradientBoosting::from_params(&params).unwrap();
        first.fit(x.view(), y.view()).unwrap();
        let mut second = GradientBoosting::from_params(&params).unwrap();
        second.fit(x.view(), y.view()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_out_of_range_parameters() {
        for bad in [
            json!({ "subsample": 0.0 }),
            json!({ "learning_rate": -0.1 }),
            json!({ "max_depth": 0 }),
        ] {
            assert!(GradientBoosting::from_params(bad.as_object().unwrap()).is_err());
        }
    }
}
