//! Encoding vocabulary: the persisted description of how source columns
//! become model features.
//!
//! Training encodes the dataset one row at a time through
//! [`EncodingVocabulary::encode_observation`], and the model server calls the
//! same routine for request payloads, so both paths share one implementation.

use std::cmp::Ordering;

use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    config::kind_name,
    dataset::{format_number, Cell, ColumnKind, Dataset, RowView},
    error::SchemaError,
    settings::ProcessingSettings,
};

/// Whether the target column must be present when encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    /// Extract the target alongside the features (training).
    Required,
    /// Features only; any target value is ignored (serving).
    Absent,
}

/// Encoding applied to one source column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", rename_all = "snake_case")]
pub enum SourceEncoding {
    /// Copied as is.
    Numeric,
    /// Replaced by the index of the value in `categories`.
    Ordinal {
        /// Categories in configured order.
        categories: Vec<String>,
    },
    /// Expanded to one indicator per non-baseline level.
    OneHot {
        /// Dropped first level (all indicators zero).
        baseline: String,
        /// Levels with an indicator column, in sorted order.
        levels: Vec<String>,
    },
}

/// A source column and its encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    /// Column name in the dataset and in request payloads.
    pub name: String,
    /// How it is encoded.
    #[serde(flatten)]
    pub encoding: SourceEncoding,
}

/// Value read from an observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observed<'a> {
    /// Numeric value.
    Number(f64),
    /// Text value (trimmed).
    Text(&'a str),
    /// Null or missing value.
    Missing,
    /// A value kind the encoder cannot use.
    Other(&'static str),
}

/// Anything a feature vector can be encoded from.
pub trait Observation {
    /// Value of `column`, or `None` when the column is absent.
    fn observe(&self, column: &str) -> Option<Observed<'_>>;
}

impl Observation for RowView<'_> {
    fn observe(&self, column: &str) -> Option<Observed<'_>> {
        self.get(column).map(|cell| match cell {
            Cell::Number(value) => Observed::Number(*value),
            Cell::Text(value) => Observed::Text(value.trim()),
            Cell::Missing => Observed::Missing,
        })
    }
}

impl Observation for Map<String, Value> {
    fn observe(&self, column: &str) -> Option<Observed<'_>> {
        self.get(column).map(|value| match value {
            Value::Null => Observed::Missing,
            Value::Number(number) => number.as_f64().map_or(Observed::Other("a number"), Observed::Number),
            Value::String(text) => Observed::Text(text.trim()),
            other => Observed::Other(kind_name(other)),
        })
    }
}

/// Encoded feature matrix with an optional target vector.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedFrame {
    /// One row per dataset row, one column per feature.
    pub features: Array2<f64>,
    /// Target values when encoded in [`TargetMode::Required`].
    pub target: Option<Array1<f64>>,
}

/// Persisted record of the source-to-feature mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingVocabulary {
    target: String,
    sources: Vec<SourceColumn>,
    feature_names: Vec<String>,
}

impl EncodingVocabulary {
    /// Derives the vocabulary from a processed dataset.
    ///
    /// Numeric and ordinal columns stay inline in dataset order; one-hot
    /// indicators are appended afterwards in configured order.
    pub fn fit(dataset: &Dataset, processing: &ProcessingSettings) -> Result<Self, SchemaError> {
        let target = processing.split.target.clone();
        if !dataset.has_column(&target) {
            return Err(SchemaError::MissingTarget(target));
        }
        for column in processing.ordinal.keys().chain(&processing.one_hot) {
            if !dataset.has_column(column) {
                return Err(SchemaError::MissingColumn(column.clone()));
            }
        }

        let mut sources = Vec::with_capacity(dataset.n_columns());
        for name in dataset.column_names() {
            if name == target || processing.one_hot.iter().any(|col| col == name) {
                continue;
            }
            let encoding = if let Some(categories) = processing.ordinal.get(name) {
                SourceEncoding::Ordinal {
                    categories: categories.iter().map(|c| c.trim().to_owned()).collect(),
                }
            } else if dataset.column(name).map(|col| col.kind) == Some(ColumnKind::Numeric) {
                SourceEncoding::Numeric
            } else {
                return Err(SchemaError::UnencodedText(name.to_owned()));
            };
            sources.push(SourceColumn {
                name: name.to_owned(),
                encoding,
            });
        }
        for name in &processing.one_hot {
            sources.push(SourceColumn {
                name: name.clone(),
                encoding: one_hot_levels(dataset, name)?,
            });
        }

        let feature_names = sources
            .iter()
            .flat_map(|source| match &source.encoding {
                SourceEncoding::OneHot { levels, .. } => levels
                    .iter()
                    .map(|level| format!("{}_{level}", source.name))
                    .collect(),
                _ => vec![source.name.clone()],
            })
            .collect();

        Ok(Self {
            target,
            sources,
            feature_names,
        })
    }

    /// Target column name.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Source columns in encoding order.
    #[must_use]
    pub fn sources(&self) -> &[SourceColumn] {
        &self.sources
    }

    /// Feature column names in matrix order.
    #[must_use]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Width of the feature matrix.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Encodes one observation in no-target mode. Extra keys are ignored.
    pub fn encode_observation(&self, observation: &impl Observation) -> Result<Vec<f64>, SchemaError> {
        let mut features = Vec::with_capacity(self.n_features());
        for source in &self.sources {
            let value = observation
                .observe(&source.name)
                .ok_or_else(|| SchemaError::MissingFeature(source.name.clone()))?;
            match &source.encoding {
                SourceEncoding::Numeric => features.push(numeric(&source.name, value)?),
                SourceEncoding::Ordinal { categories } => {
                    let level = canonical_level(level(&source.name, value)?, |known| {
                        categories.iter().any(|category| category == known)
                    });
                    let code = categories
                        .iter()
                        .position(|category| *category == level)
                        .ok_or_else(|| SchemaError::UnknownLevel {
                            column: source.name.clone(),
                            level: level.clone(),
                        })?;
                    features.push(code as f64);
                }
                SourceEncoding::OneHot { baseline, levels } => {
                    let level = canonical_level(level(&source.name, value)?, |known| {
                        known == baseline || levels.iter().any(|candidate| candidate == known)
                    });
                    let hot = levels.iter().position(|known| *known == level);
                    if hot.is_none() && level != *baseline {
                        return Err(SchemaError::UnknownLevel {
                            column: source.name.clone(),
                            level,
                        });
                    }
                    features.extend((0..levels.len()).map(|idx| if Some(idx) == hot { 1.0 } else { 0.0 }));
                }
            }
        }
        Ok(features)
    }

    /// Encodes every dataset row through [`Self::encode_observation`].
    pub fn encode_frame(&self, dataset: &Dataset, mode: TargetMode) -> Result<EncodedFrame, SchemaError> {
        let mut features = Array2::zeros((dataset.n_rows(), self.n_features()));
        for (row, mut slot) in dataset.iter_rows().zip(features.rows_mut()) {
            let encoded = self.encode_observation(&row).map_err(|source| SchemaError::AtRow {
                row: row.index(),
                source: Box::new(source),
            })?;
            slot.assign(&ArrayView1::from(encoded.as_slice()));
        }

        let target = match mode {
            TargetMode::Absent => None,
            TargetMode::Required => {
                let column = dataset
                    .column(&self.target)
                    .ok_or_else(|| SchemaError::MissingTarget(self.target.clone()))?;
                let values = column
                    .cells
                    .iter()
                    .enumerate()
                    .map(|(row, cell)| {
                        cell.as_f64().ok_or_else(|| SchemaError::TargetNotNumeric {
                            column: self.target.clone(),
                            row,
                        })
                    })
                    .collect::<Result<Vec<f64>, _>>()?;
                Some(Array1::from(values))
            }
        };
        Ok(EncodedFrame { features, target })
    }
}

fn one_hot_levels(dataset: &Dataset, name: &str) -> Result<SourceEncoding, SchemaError> {
    let column = dataset
        .column(name)
        .ok_or_else(|| SchemaError::MissingColumn(name.to_owned()))?;
    let mut cells: Vec<&Cell> = column.cells.iter().filter(|cell| !cell.is_missing()).collect();
    cells.sort_by(|a, b| match (a, b) {
        (Cell::Number(x), Cell::Number(y)) => x.total_cmp(y),
        _ => a.level_key().cmp(&b.level_key()),
    });
    let mut levels: Vec<String> = Vec::new();
    for cell in cells {
        if let Some(key) = cell.level_key() {
            if !levels.contains(&key) {
                levels.push(key);
            }
        }
    }
    if levels.is_empty() {
        return Err(SchemaError::NoLevels(name.to_owned()));
    }
    let baseline = levels.remove(0);
    Ok(SourceEncoding::OneHot { baseline, levels })
}

fn numeric(column: &str, value: Observed<'_>) -> Result<f64, SchemaError> {
    match value {
        Observed::Number(number) => Ok(number),
        Observed::Text(text) => text
            .parse::<f64>()
            .ok()
            .filter(|number| number.is_finite())
            .ok_or_else(|| SchemaError::NotNumeric {
                column: column.to_owned(),
                value: text.to_owned(),
            }),
        Observed::Missing => Err(SchemaError::MissingValue(column.to_owned())),
        Observed::Other(found) => Err(SchemaError::Unsupported {
            column: column.to_owned(),
            found,
        }),
    }
}

fn level(column: &str, value: Observed<'_>) -> Result<String, SchemaError> {
    match value {
        Observed::Number(number) => Ok(format_number(number)),
        Observed::Text(text) => Ok(text.to_owned()),
        Observed::Missing => Err(SchemaError::MissingValue(column.to_owned())),
        Observed::Other(found) => Err(SchemaError::Unsupported {
            column: column.to_owned(),
            found,
        }),
    }
}

/// Number-like text (`"10.0"`) is matched in the rendering numeric cells use
/// (`"10"`) when the raw text is not itself a known level.
fn canonical_level(level: String, is_known: impl Fn(&str) -> bool) -> String {
    if is_known(&level) {
        return level;
    }
    match level.parse::<f64>() {
        Ok(number) if number.is_finite() => {
            let rendered = format_number(number);
            if is_known(&rendered) {
                rendered
            } else {
                level
            }
        }
        _ => level,
    }
}

/// Orders level strings numerically when both parse, lexically otherwise.
#[must_use]
pub fn compare_levels(a: &str, b: &str) -> Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => x.total_cmp(&y),
        _ => a.cmp(b),
    }
}
