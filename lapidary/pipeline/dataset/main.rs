//! In-memory columnar dataset.

/// CSV acquisition from local files and HTTP(S).
pub mod loader;

use std::{collections::HashSet, fmt, path::Path};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use loader::DatasetError;

/// Raw tokens treated as missing values.
pub const MISSING_TOKENS: [&str; 7] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL"];

/// One dataset value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Numeric value.
    Number(f64),
    /// Text value (already trimmed).
    Text(String),
    /// Absent value.
    Missing,
}

impl Cell {
    /// Numeric value, if any.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    /// Text value, if any.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }

    /// Whether the cell is missing.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Canonical string used as a categorical level.
    #[must_use]
    pub fn level_key(&self) -> Option<String> {
        match self {
            Self::Number(value) => Some(format_number(*value)),
            Self::Text(value) => Some(value.clone()),
            Self::Missing => None,
        }
    }

    /// JSON rendering (`null` for missing or non-finite values).
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(value) => serde_json::Number::from_f64(*value).map_or(Value::Null, Value::Number),
            Self::Text(value) => Value::String(value.clone()),
            Self::Missing => Value::Null,
        }
    }

    fn identity(&self) -> CellIdentity {
        match self {
            Self::Number(value) if *value == 0.0 => CellIdentity::Number(0),
            Self::Number(value) => CellIdentity::Number(value.to_bits()),
            Self::Text(value) => CellIdentity::Text(value.clone()),
            Self::Missing => CellIdentity::Missing,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => f.write_str(&format_number(*value)),
            Self::Text(value) => f.write_str(value),
            Self::Missing => Ok(()),
        }
    }
}

#[derive(Hash, PartialEq, Eq)]
enum CellIdentity {
    Number(u64),
    Text(String),
    Missing,
}

/// Shortest round-tripping decimal rendering.
#[must_use]
pub fn format_number(value: f64) -> String {
    format!("{value}")
}

/// Inferred column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every non-missing value parsed as a number.
    Numeric,
    /// At least one value is text.
    Text,
}

/// Typed column of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Inferred type.
    pub kind: ColumnKind,
    /// Values, one per row.
    pub cells: Vec<Cell>,
}

impl Column {
    /// Builds a column from raw (trimmed) strings, inferring its type.
    #[must_use]
    pub fn from_raw(raw: Vec<String>) -> Self {
        let numeric = raw
            .iter()
            .filter(|value| !is_missing_token(value))
            .all(|value| value.parse::<f64>().is_ok());
        let cells = raw
            .into_iter()
            .map(|value| {
                if is_missing_token(&value) {
                    Cell::Missing
                } else if numeric {
                    value.parse().map_or(Cell::Missing, Cell::Number)
                } else {
                    Cell::Text(value)
                }
            })
            .collect();
        Self {
            kind: if numeric {
                ColumnKind::Numeric
            } else {
                ColumnKind::Text
            },
            cells,
        }
    }
}

/// Whether a raw token denotes a missing value.
#[must_use]
pub fn is_missing_token(raw: &str) -> bool {
    MISSING_TOKENS.contains(&raw.trim())
}

/// Ordered named columns of equal length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dataset {
    columns: IndexMap<String, Column>,
    rows: usize,
}

/// Borrowed view of one dataset row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    dataset: &'a Dataset,
    index: usize,
}

impl<'a> RowView<'a> {
    /// Cell of the named column.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&'a Cell> {
        self.dataset
            .columns
            .get(column)
            .map(|col| &col.cells[self.index])
    }

    /// Row position within the dataset.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// `(column, cell)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Cell)> + 'a {
        let index = self.index;
        self.dataset
            .columns
            .iter()
            .map(move |(name, col)| (name.as_str(), &col.cells[index]))
    }
}

impl Dataset {
    /// Builds a dataset from headers and raw string rows of matching width.
    pub fn from_raw(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DatasetError> {
        let width = headers.len();
        let mut raw_columns: Vec<Vec<String>> = vec![Vec::with_capacity(rows.len()); width];
        for (line, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(DatasetError::Format {
                    origin: "rows".into(),
                    detail: format!("row {line} has {} fields, expected {width}", row.len()),
                });
            }
        }
        let n_rows = rows.len();
        for row in rows {
            for (idx, value) in row.into_iter().enumerate() {
                raw_columns[idx].push(value);
            }
        }
        let columns = headers
            .into_iter()
            .zip(raw_columns)
            .map(|(name, raw)| (name, Column::from_raw(raw)))
            .collect();
        Ok(Self {
            columns,
            rows: n_rows,
        })
    }

    /// Number of rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    #[must_use]
    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Column names in order.
    pub fn column_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.columns.keys().map(String::as_str)
    }

    /// Named column.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Whether the named column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// View of row `index`.
    ///
    /// # Panics
    /// Cell access through the view panics when `index >= n_rows()`.
    #[must_use]
    pub const fn row(&self, index: usize) -> RowView<'_> {
        RowView {
            dataset: self,
            index,
        }
    }

    /// Iterates over every row.
    pub fn iter_rows(&self) -> impl Iterator<Item = RowView<'_>> + '_ {
        (0..self.rows).map(move |index| self.row(index))
    }

    /// Keeps only the rows for which `keep` returns true, preserving order.
    /// Returns the number of dropped rows.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(RowView<'_>) -> bool) -> usize {
        let mask: Vec<bool> = (0..self.rows).map(|index| keep(self.row(index))).collect();
        self.apply_mask(&mask)
    }

    fn apply_mask(&mut self, mask: &[bool]) -> usize {
        let before = self.rows;
        for column in self.columns.values_mut() {
            let mut flags = mask.iter();
            column.cells.retain(|_| flags.next().copied().unwrap_or(false));
        }
        self.rows = mask.iter().filter(|keep| **keep).count();
        before - self.rows
    }

    /// New dataset holding the given rows in the given order.
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| {
                (
                    name.clone(),
                    Column {
                        kind: column.kind,
                        cells: indices.iter().map(|&idx| column.cells[idx].clone()).collect(),
                    },
                )
            })
            .collect();
        Self {
            columns,
            rows: indices.len(),
        }
    }

    /// Removes exact duplicate rows, keeping the first occurrence.
    pub fn drop_duplicate_rows(&mut self) -> usize {
        let mut seen = HashSet::with_capacity(self.rows);
        let mask: Vec<bool> = (0..self.rows)
            .map(|index| {
                let key: Vec<CellIdentity> = self
                    .columns
                    .values()
                    .map(|column| column.cells[index].identity())
                    .collect();
                seen.insert(key)
            })
            .collect();
        self.apply_mask(&mask)
    }

    /// Removes rows holding any missing cell.
    pub fn drop_missing_rows(&mut self) -> usize {
        self.retain_rows(|row| row.iter().all(|(_, cell)| !cell.is_missing()))
    }

    /// Removes the named columns; absent names are ignored. Returns the names actually removed.
    pub fn drop_columns(&mut self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter(|name| self.columns.shift_remove(name.as_str()).is_some())
            .cloned()
            .collect()
    }

    /// Row as a JSON mapping in column order.
    #[must_use]
    pub fn row_json(&self, index: usize) -> Map<String, Value> {
        self.row(index)
            .iter()
            .map(|(name, cell)| (name.to_owned(), cell.to_json()))
            .collect()
    }

    /// Writes the dataset as CSV with a header row.
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), DatasetError> {
        let path = path.as_ref();
        let write_err = |detail: String| DatasetError::Write {
            path: path.to_path_buf(),
            detail,
        };
        let mut writer = csv::Writer::from_path(path).map_err(|err| write_err(err.to_string()))?;
        writer
            .write_record(self.columns.keys())
            .map_err(|err| write_err(err.to_string()))?;
        for row in self.iter_rows() {
            writer
                .write_record(row.iter().map(|(_, cell)| cell.to_string()))
                .map_err(|err| write_err(err.to_string()))?;
        }
        writer.flush().map_err(|err| write_err(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Dataset {
        loader::parse_csv(
            b"carat,cut,price\n0.3,Ideal,500\n0.3,Ideal,500\n0.4,,650\n1.1,Premium,NA\n",
            "inline",
        )
        .unwrap()
    }

    #[test]
    fn infers_column_kinds_and_missing_cells() {
        let dataset = sample();
        assert_eq!(dataset.n_rows(), 4);
        assert_eq!(dataset.column("carat").unwrap().kind, ColumnKind::Numeric);
        assert_eq!(dataset.column("cut").unwrap().kind, ColumnKind::Text);
        assert_eq!(dataset.column("price").unwrap().kind, ColumnKind::Numeric);
        assert!(dataset.row(2).get("cut").unwrap().is_missing());
        assert!(dataset.row(3).get("price").unwrap().is_missing());
    }

    #[test]
    fn duplicate_and_missing_rows_are_removed() {
        let mut dataset = sample();
        assert_eq!(dataset.drop_duplicate_rows(), 1);
        assert_eq!(dataset.drop_missing_rows(), 2);
        assert_eq!(dataset.n_rows(), 1);
        assert_eq!(dataset.row(0).get("cut"), Some(&Cell::Text("Ideal".into())));
    }

    #[test]
    fn dropping_columns_ignores_absent_names() {
        let mut dataset = sample();
        let dropped = dataset.drop_columns(&["cut".into(), "depth".into()]);
        assert_eq!(dropped, vec!["cut".to_string()]);
        assert_eq!(dataset.column_names().collect::<Vec<_>>(), vec!["carat", "price"]);
    }

    #[test]
    fn csv_round_trip_preserves_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dataset.csv");
        let dataset = sample();
        dataset.write_csv(&path).unwrap();
        let reloaded = loader::load_local(&path).unwrap();
        assert_eq!(reloaded, dataset);
        assert_eq!(
            reloaded.row_json(0).get("carat"),
            Some(&serde_json::json!(0.3))
        );
    }
}
