use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};

use super::encoding::compare_levels;
use crate::{
    dataset::{Cell, ColumnKind, Dataset},
    settings::ExplorationSettings,
};

/// Produces exploration artifacts for a run. Failures are tolerated by the caller.
pub trait Explorer: Send + Sync {
    /// Dataset-level outputs after cleaning.
    fn explore_dataset(
        &self,
        dataset: &Dataset,
        settings: &ExplorationSettings,
        target: &str,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>>;

    /// Goodness-of-fit outputs after training.
    fn explore_fit(&self, truth: &[f64], predicted: &[f64], out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// Writes JSON summaries instead of plots.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryExplorer;

#[derive(Debug, Serialize)]
struct NumericSummary {
    count: usize,
    missing: usize,
    mean: f64,
    std: f64,
    min: f64,
    q25: f64,
    median: f64,
    q75: f64,
    max: f64,
}

#[derive(Debug, Serialize)]
struct Histogram {
    edges: Vec<f64>,
    counts: Vec<usize>,
}

#[derive(Debug, Serialize)]
struct LevelStats {
    count: usize,
    mean: f64,
    min: f64,
    max: f64,
}

impl Explorer for SummaryExplorer {
    fn explore_dataset(
        &self,
        dataset: &Dataset,
        settings: &ExplorationSettings,
        target: &str,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
        let mut written = Vec::new();

        if settings.summary {
            let summary: IndexMap<&str, NumericSummary> = numeric_columns(dataset)
                .filter_map(|(name, values, missing)| summarise(&values, missing).map(|s| (name, s)))
                .collect();
            written.push(write_json(out_dir, "summary.json", &summary)?);
        }

        if let Some(bins) = settings.hist_bins {
            let hist: IndexMap<&str, Histogram> = numeric_columns(dataset)
                .filter_map(|(name, values, _)| histogram(&values, bins).map(|h| (name, h)))
                .collect();
            written.push(write_json(out_dir, "hist.json", &hist)?);
        }

        for column in &settings.categorical {
            let Some(levels) = dataset.column(column) else {
                anyhow::bail!("exploration column '{column}' not present in dataset");
            };
            let targets = dataset
                .column(target)
                .with_context(|| format!("target '{target}' not present in dataset"))?;
            let mut groups: IndexMap<String, Vec<f64>> = IndexMap::new();
            for (level, value) in levels.cells.iter().zip(&targets.cells) {
                if let (Some(level), Some(value)) = (level.level_key(), value.as_f64()) {
                    groups.entry(level).or_default().push(value);
                }
            }
            groups.sort_by(|a, _, b, _| compare_levels(a, b));
            let stats: IndexMap<String, LevelStats> = groups
                .into_iter()
                .map(|(level, values)| {
                    let count = values.len();
                    let stats = LevelStats {
                        count,
                        mean: values.iter().sum::<f64>() / count as f64,
                        min: values.iter().copied().fold(f64::INFINITY, f64::min),
                        max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                    };
                    (level, stats)
                })
                .collect();
            written.push(write_json(
                out_dir,
                &format!("categorical_{column}.json"),
                &json!({ "column": column, "target": target, "levels": stats }),
            )?);
        }
        Ok(written)
    }

    fn explore_fit(&self, truth: &[f64], predicted: &[f64], out_dir: &Path) -> Result<Vec<PathBuf>> {
        anyhow::ensure!(
            truth.len() == predicted.len(),
            "goodness of fit needs aligned vectors ({} vs {})",
            truth.len(),
            predicted.len()
        );
        fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;
        let residuals: Vec<f64> = truth.iter().zip(predicted).map(|(t, p)| t - p).collect();
        let n = residuals.len().max(1) as f64;
        let mean = residuals.iter().sum::<f64>() / n;
        let variance = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        let points: Vec<Value> = truth
            .iter()
            .zip(predicted)
            .map(|(t, p)| json!({ "actual": t, "predicted": p }))
            .collect();
        let report = json!({
            "count": residuals.len(),
            "residualMean": mean,
            "residualStd": variance.sqrt(),
            "maxAbsResidual": residuals.iter().map(|r| r.abs()).fold(0.0, f64::max),
            "points": points,
        });
        Ok(vec![write_json(out_dir, "goodness_of_fit.json", &report)?])
    }
}

fn numeric_columns(dataset: &Dataset) -> impl Iterator<Item = (&str, Vec<f64>, usize)> + '_ {
    dataset.column_names().filter_map(move |name| {
        let column = dataset.column(name)?;
        if column.kind != ColumnKind::Numeric {
            return None;
        }
        let values: Vec<f64> = column.cells.iter().filter_map(Cell::as_f64).collect();
        let missing = column.cells.len() - values.len();
        Some((name, values, missing))
    })
}

fn summarise(values: &[f64], missing: usize) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;
    let std = if count > 1 {
        (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(NumericSummary {
        count,
        missing,
        mean,
        std,
        min: sorted[0],
        q25: quantile(&sorted, 0.25),
        median: quantile(&sorted, 0.5),
        q75: quantile(&sorted, 0.75),
        max: sorted[count - 1],
    })
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (pos - lower as f64)
}

fn histogram(values: &[f64], bins: usize) -> Option<Histogram> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if values.is_empty() || bins == 0 || !min.is_finite() || !max.is_finite() {
        return None;
    }
    let width = if max > min { (max - min) / bins as f64 } else { 1.0 };
    let edges = (0..=bins).map(|idx| min + width * idx as f64).collect();
    let mut counts = vec![0; bins];
    for value in values {
        let idx = (((value - min) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }
    Some(Histogram { edges, counts })
}

fn write_json(dir: &Path, name: &str, value: &impl Serialize) -> Result<PathBuf> {
    let path = dir.join(name);
    let body = serde_json::to_vec_pretty(value)?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::parse_csv;
    use tempfile::tempdir;

    fn dataset() -> Dataset {
        parse_csv(
            b"carat,cut,price\n0.2,Ideal,400\n0.4,Good,700\n0.6,Ideal,1000\n0.8,Good,\n",
            "inline",
        )
        .unwrap()
    }

    #[test]
    fn writes_requested_summaries() {
        let dir = tempdir().unwrap();
        let settings = ExplorationSettings {
            summary: true,
            hist_bins: Some(2),
            categorical: vec!["cut".into()],
        };
        let written = SummaryExplorer
            .explore_dataset(&dataset(), &settings, "price", dir.path())
            .unwrap();
        assert_eq!(written.len(), 3);

        let summary: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("summary.json")).unwrap()).unwrap();
        assert_eq!(summary["price"]["missing"], json!(1));
        assert_eq!(summary["price"]["median"], json!(700.0));

        let hist: Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("hist.json")).unwrap()).unwrap();
        assert_eq!(hist["carat"]["counts"], json!([2, 2]));

        let cut: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("categorical_cut.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(cut["levels"]["Ideal"]["mean"], json!(700.0));
        assert_eq!(cut["levels"]["Good"]["count"], json!(1));
    }

    #[test]
    fn unknown_categorical_column_fails() {
        let dir = tempdir().unwrap();
        let settings = ExplorationSettings {
            categorical: vec!["colour".into()],
            ..ExplorationSettings::default()
        };
        assert!(SummaryExplorer
            .explore_dataset(&dataset(), &settings, "price", dir.path())
            .is_err());
    }

    #[test]
    fn goodness_of_fit_reports_residuals() {
        let dir = tempdir().unwrap();
        SummaryExplorer
            .explore_fit(&[1.0, 2.0, 3.0], &[1.5, 2.0, 2.5], dir.path())
            .unwrap();
        let report: Value = serde_json::from_str(
            &fs::read_to_string(dir.path().join("goodness_of_fit.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report["count"], json!(3));
        assert_eq!(report["maxAbsResidual"], json!(0.5));
    }
}
