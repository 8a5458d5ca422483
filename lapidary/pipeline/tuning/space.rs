use indexmap::IndexMap;
use rand::Rng;
use serde_json::{Map, Number, Value};

use crate::config::{dotted, kind_name, ConfigError};

/// Sampling rule for one hyperparameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamSpec {
    /// Uniform choice among the listed values.
    Categorical(Vec<Value>),
    /// Uniform integer in `[low, high]`.
    IntRange {
        /// Inclusive lower bound.
        low: i64,
        /// Inclusive upper bound.
        high: i64,
    },
    /// Uniform float in `[low, high]`.
    FloatRange {
        /// Inclusive lower bound.
        low: f64,
        /// Inclusive upper bound.
        high: f64,
    },
    /// Log-uniform float in `[low, high]`, `low > 0`.
    LogFloatRange {
        /// Inclusive lower bound.
        low: f64,
        /// Inclusive upper bound.
        high: f64,
    },
}

impl ParamSpec {
    /// Parses `{"cat": [...]}` or `{"range": [lo, hi], "log": bool}`.
    fn from_value(value: &Value, path: &[&str]) -> Result<Self, ConfigError> {
        let Some(entry) = value.as_object() else {
            return Err(ConfigError::WrongType {
                path: dotted(path),
                expected: "a mapping with 'cat' or 'range'",
                found: kind_name(value),
            });
        };
        match (entry.get("cat"), entry.get("range")) {
            (Some(choices), None) => {
                let choices = choices.as_array().ok_or_else(|| ConfigError::WrongType {
                    path: format!("{}.cat", dotted(path)),
                    expected: "a list",
                    found: kind_name(choices),
                })?;
                if choices.is_empty() {
                    return Err(invalid(path, "'cat' needs at least one choice"));
                }
                Ok(Self::Categorical(choices.clone()))
            }
            (None, Some(range)) => Self::range(entry, range, path),
            (Some(_), Some(_)) => Err(invalid(path, "use either 'cat' or 'range', not both")),
            (None, None) => Err(invalid(path, "expected a 'cat' list or a 'range' pair")),
        }
    }

    fn range(entry: &Map<String, Value>, range: &Value, path: &[&str]) -> Result<Self, ConfigError> {
        let bounds = match range.as_array() {
            Some(bounds) if bounds.len() == 2 => bounds,
            _ => return Err(invalid(path, "'range' must be a [low, high] pair")),
        };
        let log = match entry.get("log") {
            None => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(ConfigError::WrongType {
                    path: format!("{}.log", dotted(path)),
                    expected: "a boolean",
                    found: kind_name(other),
                })
            }
        };

        if let (false, Some(low), Some(high)) = (log, bounds[0].as_i64(), bounds[1].as_i64()) {
            if low > high {
                return Err(invalid(path, format!("low {low} exceeds high {high}")));
            }
            return Ok(Self::IntRange { low, high });
        }

        let (Some(low), Some(high)) = (bounds[0].as_f64(), bounds[1].as_f64()) else {
            return Err(invalid(path, "'range' bounds must be numbers"));
        };
        if !(low.is_finite() && high.is_finite()) || low > high {
            return Err(invalid(path, format!("invalid bounds [{low}, {high}]")));
        }
        if log {
            if low <= 0.0 {
                return Err(invalid(path, "log ranges need a positive lower bound"));
            }
            Ok(Self::LogFloatRange { low, high })
        } else {
            Ok(Self::FloatRange { low, high })
        }
    }

    fn sample(&self, rng: &mut impl Rng) -> Value {
        match self {
            Self::Categorical(choices) => choices[rng.gen_range(0..choices.len())].clone(),
            Self::IntRange { low, high } => Value::from(rng.gen_range(*low..=*high)),
            Self::FloatRange { low, high } => float(rng.gen_range(*low..=*high)),
            Self::LogFloatRange { low, high } => {
                float(rng.gen_range(low.ln()..=high.ln()).exp().clamp(*low, *high))
            }
        }
    }
}

/// Named sampling rules, kept in configuration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSpace {
    params: IndexMap<String, ParamSpec>,
}

impl SearchSpace {
    /// Parses the `hyperparams` mapping found at `path`.
    pub fn from_config(entries: &Map<String, Value>, path: &[&str]) -> Result<Self, ConfigError> {
        let mut params = IndexMap::with_capacity(entries.len());
        for (name, value) in entries {
            let mut entry_path = path.to_vec();
            entry_path.push(name);
            params.insert(name.clone(), ParamSpec::from_value(value, &entry_path)?);
        }
        Ok(Self { params })
    }

    /// Rule for one parameter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    /// Number of searched parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether nothing is searched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Draws one assignment, visiting parameters in configuration order.
    pub fn sample(&self, rng: &mut impl Rng) -> Map<String, Value> {
        self.params
            .iter()
            .map(|(name, spec)| (name.clone(), spec.sample(rng)))
            .collect()
    }
}

fn float(value: f64) -> Value {
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

fn invalid(path: &[&str], reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        path: dotted(path),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    const PATH: [&str; 3] = ["model", "tuning", "hyperparams"];

    fn space(value: Value) -> Result<SearchSpace, ConfigError> {
        SearchSpace::from_config(value.as_object().unwrap(), &PATH)
    }

    #[test]
    fn parses_each_rule_kind() {
        let space = space(json!({
            "max_depth": { "range": [2, 6] },
            "learning_rate": { "range": [0.01, 0.3], "log": true },
            "subsample": { "range": [0.5, 1.0] },
            "fit_intercept": { "cat": [true, false] }
        }))
        .unwrap();
        assert_eq!(space.len(), 4);
        assert_eq!(space.get("max_depth"), Some(&ParamSpec::IntRange { low: 2, high: 6 }));
        assert_eq!(
            space.get("learning_rate"),
            Some(&ParamSpec::LogFloatRange { low: 0.01, high: 0.3 })
        );
        assert_eq!(
            space.get("subsample"),
            Some(&ParamSpec::FloatRange { low: 0.5, high: 1.0 })
        );
        assert!(matches!(space.get("fit_intercept"), Some(ParamSpec::Categorical(c)) if c.len() == 2));
    }

    #[test]
    fn samples_stay_in_bounds() {
        let space = space(json!({
            "max_depth": { "range": [2, 6] },
            "learning_rate": { "range": [0.01, 0.3], "log": true },
            "booster": { "cat": ["gbtree", "dart"] }
        }))
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..200 {
            let sample = space.sample(&mut rng);
            let depth = sample["max_depth"].as_i64().unwrap();
            assert!((2..=6).contains(&depth));
            let rate = sample["learning_rate"].as_f64().unwrap();
            assert!((0.01..=0.3).contains(&rate));
            assert!(["gbtree", "dart"].contains(&sample["booster"].as_str().unwrap()));
        }
    }

    #[test]
    fn rejects_malformed_rules() {
        for bad in [
            json!({ "a": 3 }),
            json!({ "a": { "range": [5, 1] } }),
            json!({ "a": { "range": [0.0, 1.0], "log": true } }),
            json!({ "a": { "range": [1.0] } }),
            json!({ "a": { "cat": [] } }),
            json!({ "a": { "cat": [1], "range": [0, 1] } }),
            json!({ "a": { "range": [0.1, 1.0], "log": "yes" } }),
        ] {
            assert!(space(bad.clone()).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn errors_name_the_offending_entry() {
        let err = space(json!({ "max_depth": { "range": [5, 1] } })).unwrap_err();
        assert!(err.to_string().contains("model.tuning.hyperparams.max_depth"));
    }
}
