//! On-disk model bundle.
//!
//! A run directory is complete once `model.json` exists. The trainer writes
//! the snapshot and dataset first and renames `model.json` into place last, so
//! a crash mid-save never leaves a directory that looks servable.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use ndarray::{Array1, ArrayView2};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    config::{ConfigError, Configuration},
    dataset::{
        loader::{self, DatasetError},
        Dataset,
    },
    error::PipelineError,
    models::{Model, Regressor},
    preparation::encoding::EncodingVocabulary,
    registry::transform::TransformChain,
};

/// Serialised model, vocabulary, and transformation chain.
pub const MODEL_FILE: &str = "model.json";
/// Configuration snapshot with the `results` section.
pub const CONFIG_FILE: &str = "config.json";
/// Cleaned dataset retained for similarity lookups.
pub const DATASET_FILE: &str = "dataset.csv";
/// Current `model.json` layout.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// Bundle persistence and discovery failures.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Filesystem failure.
    #[error("artifact io at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// `model.json` could not be encoded or decoded.
    #[error("malformed bundle {path}: {detail}")]
    Malformed {
        /// Offending file.
        path: PathBuf,
        /// Serializer message.
        detail: String,
    },
    /// The bundle was written by an incompatible layout.
    #[error("bundle format version {found} is not supported (expected {expected})")]
    UnsupportedVersion {
        /// Version read.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },
    /// The run directory has no `model.json`.
    #[error("run directory {0} has no model.json")]
    Incomplete(PathBuf),
    /// No complete run exists for the dataset.
    #[error("no complete run found under {0}")]
    NoRuns(PathBuf),
    /// The configuration snapshot could not be read.
    #[error("configuration snapshot: {0}")]
    Snapshot(#[from] ConfigError),
    /// The retained dataset could not be written or read.
    #[error("retained dataset: {0}")]
    Dataset(#[from] DatasetError),
}

/// Everything needed to reproduce preparation and prediction for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifactBundle {
    /// Layout version, see [`BUNDLE_FORMAT_VERSION`].
    pub format_version: u32,
    /// Unique identifier of this bundle.
    pub bundle_id: Uuid,
    /// `<name>_<epoch>` of the producing run.
    pub run_id: String,
    /// Write time.
    pub created_at: DateTime<Utc>,
    /// Model registry name.
    pub model_type: String,
    /// Parameters the model was built with.
    pub parameters: Map<String, Value>,
    /// Source-to-feature mapping used at training time.
    pub vocabulary: EncodingVocabulary,
    /// Resolved target transformations in forward order.
    pub transforms: TransformChain,
    /// Fitted model.
    pub model: Model,
    /// Evaluation metrics on the held-out partition.
    pub metrics: IndexMap<String, f64>,
}

impl ModelArtifactBundle {
    /// Assembles a bundle for a fitted model.
    #[must_use]
    pub fn new(
        run_id: impl Into<String>,
        model: Model,
        parameters: Map<String, Value>,
        vocabulary: EncodingVocabulary,
        transforms: TransformChain,
        metrics: IndexMap<String, f64>,
    ) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            bundle_id: Uuid::new_v4(),
            run_id: run_id.into(),
            created_at: Utc::now(),
            model_type: model.kind().name().to_owned(),
            parameters,
            vocabulary,
            transforms,
            model,
            metrics,
        }
    }

    /// Predicts in target units: model output passed through the inverse chain.
    pub fn predict(&self, features: ArrayView2<'_, f64>) -> Result<Array1<f64>, PipelineError> {
        let raw = self.model.predict(features)?;
        Ok(Array1::from(self.transforms.inverse_all(&raw.to_vec())?))
    }

    /// Writes `config.json`, `dataset.csv`, then `model.json` (atomically) into `dir`.
    pub fn persist(
        &self,
        dir: &Path,
        snapshot: &Configuration,
        dataset: &Dataset,
    ) -> Result<PathBuf, ArtifactError> {
        fs::create_dir_all(dir).map_err(|source| io_err(dir, source))?;

        let config_path = dir.join(CONFIG_FILE);
        let snapshot = snapshot.to_pretty_json().map_err(|err| ArtifactError::Malformed {
            path: config_path.clone(),
            detail: err.to_string(),
        })?;
        fs::write(&config_path, snapshot).map_err(|source| io_err(&config_path, source))?;

        dataset.write_csv(dir.join(DATASET_FILE))?;

        let model_path = dir.join(MODEL_FILE);
        let body = serde_json::to_vec_pretty(self).map_err(|err| ArtifactError::Malformed {
            path: model_path.clone(),
            detail: err.to_string(),
        })?;
        let staging = dir.join(format!("{MODEL_FILE}.tmp"));
        fs::write(&staging, body).map_err(|source| io_err(&staging, source))?;
        fs::rename(&staging, &model_path).map_err(|source| io_err(&model_path, source))?;
        Ok(model_path)
    }

    /// Reads and version-checks `model.json` from `dir`.
    pub fn read(dir: &Path) -> Result<Self, ArtifactError> {
        let path = dir.join(MODEL_FILE);
        if !path.is_file() {
            return Err(ArtifactError::Incomplete(dir.to_path_buf()));
        }
        let body = fs::read(&path).map_err(|source| io_err(&path, source))?;
        let header: Value = serde_json::from_slice(&body).map_err(|err| ArtifactError::Malformed {
            path: path.clone(),
            detail: err.to_string(),
        })?;
        let found = header
            .get("formatVersion")
            .and_then(Value::as_u64)
            .and_then(|version| u32::try_from(version).ok())
            .unwrap_or(0);
        if found != BUNDLE_FORMAT_VERSION {
            return Err(ArtifactError::UnsupportedVersion {
                found,
                expected: BUNDLE_FORMAT_VERSION,
            });
        }
        serde_json::from_value(header).map_err(|err| ArtifactError::Malformed {
            path,
            detail: err.to_string(),
        })
    }
}

/// A bundle together with its snapshot and retained dataset.
#[derive(Debug, Clone)]
pub struct LoadedArtifact {
    /// Parsed `model.json`.
    pub bundle: ModelArtifactBundle,
    /// Parsed `config.json`.
    pub config: Configuration,
    /// Parsed `dataset.csv`, when present.
    pub dataset: Option<Dataset>,
    /// Run directory.
    pub dir: PathBuf,
}

impl LoadedArtifact {
    /// Loads every part of the bundle in `dir`.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let bundle = ModelArtifactBundle::read(dir)?;
        let config = Configuration::from_file(dir.join(CONFIG_FILE))?;
        let dataset_path = dir.join(DATASET_FILE);
        let dataset = if dataset_path.is_file() {
            Some(loader::load_local(&dataset_path)?)
        } else {
            None
        };
        Ok(Self {
            bundle,
            config,
            dataset,
            dir: dir.to_path_buf(),
        })
    }
}

/// Whether `dir` holds a servable bundle.
#[must_use]
pub fn is_complete(dir: &Path) -> bool {
    dir.join(MODEL_FILE).is_file()
}

/// `<trainDir>/<name>/<epoch>`.
#[must_use]
pub fn run_dir(train_dir: &Path, name: &str, epoch: &str) -> PathBuf {
    train_dir.join(name).join(epoch)
}

/// Newest complete run for `name`, ordered by epoch then by the `_<n>` suffix
/// given to runs started within the same second.
pub fn latest_run(train_dir: &Path, name: &str) -> Result<PathBuf, ArtifactError> {
    let root = train_dir.join(name);
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(ArtifactError::NoRuns(root)),
        Err(source) => return Err(io_err(&root, source)),
    };
    let mut newest: Option<((u64, u64), PathBuf)> = None;
    for entry in entries {
        let entry = entry.map_err(|source| io_err(&root, source))?;
        let Some(epoch) = entry.file_name().to_str().and_then(run_order) else {
            continue;
        };
        let path = entry.path();
        if !is_complete(&path) {
            continue;
        }
        match &newest {
            Some((best, _)) if *best >= epoch => {}
            _ => newest = Some((epoch, path)),
        }
    }
    newest.map(|(_, path)| path).ok_or(ArtifactError::NoRuns(root))
}

/// `"<epoch>"` or `"<epoch>_<n>"` as a sortable pair.
fn run_order(label: &str) -> Option<(u64, u64)> {
    match label.split_once('_') {
        None => Some((label.parse().ok()?, 0)),
        Some((epoch, n)) => Some((epoch.parse().ok()?, n.parse().ok()?)),
    }
}

fn io_err(path: &Path, source: io::Error) -> ArtifactError {
    ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::loader::parse_csv,
        models::ModelKind,
        preparation::encoding::TargetMode,
        registry::transform::TransformKind,
        settings::{ProcessingSettings, SplitSettings},
    };
    use serde_json::json;
    use tempfile::tempdir;

    fn dataset() -> Dataset {
        parse_csv(
            b"carat,cut,price\n0.3,Ideal,500\n0.5,Good,900\n0.7,Ideal,1400\n1.0,Good,2500\n1.2,Ideal,3600\n",
            "inline",
        )
        .unwrap()
    }

    fn bundle(data: &Dataset) -> ModelArtifactBundle {
        let processing = ProcessingSettings {
            drop_columns: Vec::new(),
            one_hot: vec!["cut".into()],
            ordinal: IndexMap::new(),
            split: SplitSettings {
                target: "price".into(),
                test_size: 0.2,
                random_state: 1,
            },
        };
        let vocabulary = EncodingVocabulary::fit(data, &processing).unwrap();
        let frame = vocabulary.encode_frame(data, TargetMode::Required).unwrap();
        let transforms = TransformChain(vec![TransformKind::Log]);
        let target = Array1::from(transforms.forward_all(&frame.target.unwrap().to_vec()).unwrap());
        let mut model = ModelKind::LinearRegression.build(&Map::new()).unwrap();
        model.fit(frame.features.view(), target.view()).unwrap();
        let mut metrics = IndexMap::new();
        metrics.insert("r2_score".to_owned(), 0.97);
        ModelArtifactBundle::new(
            "diamonds_1700000000",
            model,
            Map::new(),
            vocabulary,
            transforms,
            metrics,
        )
    }

    #[test]
    fn persisted_bundle_loads_back() {
        let dir = tempdir().unwrap();
        let data = dataset();
        let bundle = bundle(&data);
        let snapshot = Configuration::from_value(json!({ "data": { "name": "diamonds" } }));
        let run = dir.path().join("diamonds").join("1700000000");
        bundle.persist(&run, &snapshot, &data).unwrap();
        assert!(is_complete(&run));
        assert!(!run.join(format!("{MODEL_FILE}.tmp")).exists());

        let loaded = LoadedArtifact::load(&run).unwrap();
        assert_eq!(loaded.bundle.run_id, bundle.run_id);
        assert_eq!(loaded.bundle.bundle_id, bundle.bundle_id);
        assert_eq!(loaded.bundle.vocabulary, bundle.vocabulary);
        assert_eq!(loaded.bundle.transforms, bundle.transforms);
        assert_eq!(loaded.bundle.model_type, "linear_regression");
        assert_eq!(loaded.config.get_str(&["data", "name"]).unwrap(), "diamonds");
        assert_eq!(loaded.dataset.unwrap().n_rows(), 5);

        let features = bundle
            .vocabulary
            .encode_frame(&data, TargetMode::Absent)
            .unwrap()
            .features;
        let before = bundle.predict(features.view()).unwrap();
        let after = loaded.bundle.predict(features.view()).unwrap();
        for (a, b) in before.iter().zip(after.iter()) {
            assert!((a - b).abs() < 1e-6 * a.abs().max(1.0));
        }
    }

    #[test]
    fn predictions_are_in_target_units() {
        let data = dataset();
        let bundle = bundle(&data);
        let features = bundle
            .vocabulary
            .encode_frame(&data, TargetMode::Absent)
            .unwrap()
            .features;
        let predicted = bundle.predict(features.view()).unwrap();
        assert!(predicted.iter().all(|price| *price > 100.0 && *price < 10_000.0));
    }

    #[test]
    fn missing_model_file_is_incomplete() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        assert!(!is_complete(dir.path()));
        assert!(matches!(
            LoadedArtifact::load(dir.path()),
            Err(ArtifactError::Incomplete(_))
        ));
    }

    #[test]
    fn other_format_versions_are_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(MODEL_FILE), r#"{ "formatVersion": 99 }"#).unwrap();
        assert!(matches!(
            ModelArtifactBundle::read(dir.path()),
            Err(ArtifactError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[test]
    fn latest_run_skips_incomplete_and_non_numeric_entries() {
        let dir = tempdir().unwrap();
        let data = dataset();
        let bundle = bundle(&data);
        let snapshot = Configuration::from_value(json!({}));
        for epoch in ["1700000000", "1700000500"] {
            bundle
                .persist(&run_dir(dir.path(), "diamonds", epoch), &snapshot, &data)
                .unwrap();
        }
        fs::create_dir_all(run_dir(dir.path(), "diamonds", "1800000000")).unwrap();
        fs::create_dir_all(run_dir(dir.path(), "diamonds", "scratch")).unwrap();
        assert_eq!(
            latest_run(dir.path(), "diamonds").unwrap(),
            run_dir(dir.path(), "diamonds", "1700000500")
        );

        for label in ["1700000500_2", "1700000500_10"] {
            bundle
                .persist(&run_dir(dir.path(), "diamonds", label), &snapshot, &data)
                .unwrap();
        }
        assert_eq!(
            latest_run(dir.path(), "diamonds").unwrap(),
            run_dir(dir.path(), "diamonds", "1700000500_10")
        );
        assert!(matches!(
            latest_run(dir.path(), "emeralds"),
            Err(ArtifactError::NoRuns(_))
        ));
    }
}
