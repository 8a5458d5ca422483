use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    dataset::{format_number, Dataset},
    error::SchemaError,
    settings::SimilaritySettings,
};

/// A retained-dataset row with its distance to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRow {
    /// `|row[numeric] - query[numeric]|`; lower is closer.
    pub similarity: f64,
    /// Row fields in dataset column order.
    #[serde(flatten)]
    pub row: Map<String, Value>,
}

/// Filters `dataset` on the categorical attributes present in `query`, then
/// returns the `n` rows closest on the numeric attribute.
///
/// Filtering compares trimmed, lowercased text. Ordering is stable, so equal
/// distances keep dataset order. No match yields an empty list.
pub fn rank(
    dataset: &Dataset,
    settings: &SimilaritySettings,
    query: &Map<String, Value>,
    n: usize,
) -> Result<Vec<RankedRow>, SchemaError> {
    let anchor = numeric_query(query, &settings.numeric)?;
    if !dataset.has_column(&settings.numeric) {
        return Err(SchemaError::MissingColumn(settings.numeric.clone()));
    }

    let mut filters = Vec::new();
    for column in &settings.categorical {
        let Some(wanted) = query.get(column) else {
            continue;
        };
        if !dataset.has_column(column) {
            return Err(SchemaError::MissingColumn(column.clone()));
        }
        let wanted = match wanted {
            Value::String(text) => normalise(text),
            Value::Number(number) => number.as_f64().map_or_else(|| number.to_string(), format_number),
            Value::Bool(flag) => flag.to_string(),
            Value::Null => {
                return Err(SchemaError::MissingValue(column.clone()));
            }
            Value::Array(_) => {
                return Err(SchemaError::Unsupported {
                    column: column.clone(),
                    found: "a list",
                })
            }
            Value::Object(_) => {
                return Err(SchemaError::Unsupported {
                    column: column.clone(),
                    found: "a mapping",
                })
            }
        };
        filters.push((column.as_str(), wanted));
    }

    let mut ranked: Vec<(usize, f64)> = dataset
        .iter_rows()
        .filter(|row| {
            filters.iter().all(|(column, wanted)| {
                row.get(column)
                    .and_then(|cell| cell.level_key())
                    .is_some_and(|level| normalise(&level) == *wanted)
            })
        })
        .filter_map(|row| {
            let value = row.get(&settings.numeric)?.as_f64()?;
            Some((row.index(), (value - anchor).abs()))
        })
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    Ok(ranked
        .into_iter()
        .take(n)
        .map(|(index, similarity)| RankedRow {
            similarity,
            row: dataset.row_json(index),
        })
        .collect())
}

fn numeric_query(query: &Map<String, Value>, column: &str) -> Result<f64, SchemaError> {
    match query.get(column) {
        None => Err(SchemaError::MissingFeature(column.to_owned())),
        Some(Value::Null) => Err(SchemaError::MissingValue(column.to_owned())),
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| not_numeric(column, &number.to_string())),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .ok_or_else(|| not_numeric(column, text)),
        Some(other) => Err(not_numeric(column, &other.to_string())),
    }
}

fn not_numeric(column: &str, value: &str) -> SchemaError {
    SchemaError::NotNumeric {
        column: column.to_owned(),
        value: value.to_owned(),
    }
}

fn normalise(text: &str) -> String {
    text.trim().to_lowercase()
}
