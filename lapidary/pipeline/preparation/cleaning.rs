use serde_json::Value;

use crate::{
    dataset::{Cell, ColumnKind, Dataset},
    error::SchemaError,
    settings::{CleaningStep, ColumnFilter, FilterRule},
};

/// Effect of one cleaning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    /// Configuration key of the step.
    pub step: &'static str,
    /// Rows removed.
    pub rows_removed: usize,
    /// Columns removed.
    pub columns_removed: Vec<String>,
}

/// Applies one step in place.
pub fn apply(dataset: &mut Dataset, step: &CleaningStep) -> Result<StepOutcome, SchemaError> {
    let mut outcome = StepOutcome {
        step: step.key(),
        rows_removed: 0,
        columns_removed: Vec::new(),
    };
    match step {
        CleaningStep::DropDuplicates => outcome.rows_removed = dataset.drop_duplicate_rows(),
        CleaningStep::DropMissing => outcome.rows_removed = dataset.drop_missing_rows(),
        CleaningStep::DropColumns(columns) => outcome.columns_removed = dataset.drop_columns(columns),
        CleaningStep::Custom(filters) => {
            for filter in filters {
                outcome.rows_removed += apply_filter(dataset, filter)?;
            }
        }
    }
    Ok(outcome)
}

fn apply_filter(dataset: &mut Dataset, filter: &ColumnFilter) -> Result<usize, SchemaError> {
    let column = dataset
        .column(&filter.column)
        .ok_or_else(|| SchemaError::MissingColumn(filter.column.clone()))?;
    let name = filter.column.as_str();
    match &filter.rule {
        FilterRule::Range { min, max } => {
            if column.kind == ColumnKind::Text {
                let sample = column
                    .cells
                    .iter()
                    .find_map(Cell::as_text)
                    .unwrap_or_default()
                    .to_owned();
                return Err(SchemaError::NotNumeric {
                    column: filter.column.clone(),
                    value: sample,
                });
            }
            Ok(dataset.retain_rows(|row| {
                row.get(name)
                    .and_then(Cell::as_f64)
                    .is_some_and(|value| *min <= value && value < *max)
            }))
        }
        FilterRule::Exclude(excluded) => Ok(dataset.retain_rows(|row| {
            row.get(name).map_or(true, |cell| !matches_value(cell, excluded))
        })),
    }
}

fn matches_value(cell: &Cell, value: &Value) -> bool {
    match (cell, value) {
        (Cell::Number(actual), Value::Number(expected)) => expected.as_f64() == Some(*actual),
        (Cell::Text(actual), Value::String(expected)) => actual == expected.trim(),
        (Cell::Number(_), Value::String(expected)) => cell.level_key().as_deref() == Some(expected.trim()),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::parse_csv;
    use serde_json::json;

    fn sample() -> Dataset {
        parse_csv(
            b"carat,cut,price\n0.2,Fair,300\n0.5,Ideal,900\n1.0,Good,\n3.0,Ideal,9000\n0.5,Ideal,900\n",
            "inline",
        )
        .unwrap()
    }

    fn custom(column: &str, rule: FilterRule) -> CleaningStep {
        CleaningStep::Custom(vec![ColumnFilter {
            column: column.into(),
            rule,
        }])
    }

    #[test]
    fn range_keeps_half_open_interval() {
        let mut dataset = sample();
        let outcome = apply(&mut dataset, &custom("carat", FilterRule::Range { min: 0.2, max: 3.0 })).unwrap();
        assert_eq!(outcome.rows_removed, 1);
        let carats: Vec<f64> = dataset
            .iter_rows()
            .filter_map(|row| row.get("carat").and_then(Cell::as_f64))
            .collect();
        assert_eq!(carats, vec![0.2, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn exclusion_drops_equal_rows_and_keeps_missing() {
        let mut dataset = sample();
        apply(&mut dataset, &custom("cut", FilterRule::Exclude(json!("Ideal")))).unwrap();
        assert_eq!(dataset.n_rows(), 2);
        let mut dataset = sample();
        apply(&mut dataset, &custom("price", FilterRule::Exclude(json!(900)))).unwrap();
        assert_eq!(dataset.n_rows(), 3);
        assert!(dataset.row(1).get("price").unwrap().is_missing());
    }

    #[test]
    fn filters_on_absent_columns_fail() {
        let mut dataset = sample();
        let err = apply(&mut dataset, &custom("depth", FilterRule::Exclude(json!(1)))).unwrap_err();
        assert!(matches!(err, SchemaError::MissingColumn(ref column) if column == "depth"));
    }

    #[test]
    fn range_on_text_column_is_rejected() {
        let mut dataset = sample();
        assert!(matches!(
            apply(&mut dataset, &custom("cut", FilterRule::Range { min: 0.0, max: 1.0 })),
            Err(SchemaError::NotNumeric { .. })
        ));
    }

    #[test]
    fn drop_steps_report_their_effect() {
        let mut dataset = sample();
        let dup = apply(&mut dataset, &CleaningStep::DropDuplicates).unwrap();
        assert_eq!(dup.rows_removed, 1);
        let na = apply(&mut dataset, &CleaningStep::DropMissing).unwrap();
        assert_eq!(na.rows_removed, 1);
        let cols = apply(
            &mut dataset,
            &CleaningStep::DropColumns(vec!["cut".into(), "table".into()]),
        )
        .unwrap();
        assert_eq!(cols.columns_removed, vec!["cut".to_string()]);
        assert_eq!(dataset.n_rows(), 3);
    }
}
