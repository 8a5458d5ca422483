//! Serving side: a loaded bundle answering prediction and similarity requests.
//!
//! The server never re-derives preparation from configuration. Every request
//! goes through the persisted encoding vocabulary and transformation chain,
//! the same ones the trainer used.

/// Similarity ranking over the retained dataset.
pub mod similarity;

use std::path::{Path, PathBuf};

use serde_json::{json, Map, Number, Value};
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    artifact::{self, ArtifactError, LoadedArtifact, ModelArtifactBundle},
    config::Configuration,
    dataset::Dataset,
    error::{ErrorClass, PipelineError},
    models::ModelError,
    preparation::{prepare_observation, DataPreparation},
    registry::Registries,
    settings::{DeploySettings, ModelSelection, PipelineSettings, SimilaritySettings},
    telemetry::PipelineTelemetry,
    trainer::{ModelTrainer, TrainingOutcome},
};
pub use similarity::RankedRow;

/// Payload key carrying the similarity result count.
pub const COUNT_KEY: &str = "n";
/// Key added to prediction responses.
pub const PREDICTION_KEY: &str = "prediction";

/// Serving failures.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// `deploy.enabled` is false.
    #[error("deployment is disabled in this configuration")]
    Disabled,
    /// The selected run cannot be served.
    #[error("no servable model: {0}")]
    NotServable(String),
    /// Any pipeline failure while loading or answering.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl DeployError {
    /// Classification for the request-handling shell.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRequest(_) => ErrorClass::InvalidRequest,
            Self::Pipeline(err) => err.class(),
            Self::Disabled | Self::NotServable(_) => ErrorClass::Internal,
        }
    }
}

impl From<ArtifactError> for DeployError {
    fn from(err: ArtifactError) -> Self {
        Self::Pipeline(err.into())
    }
}

/// Read-only model server.
#[derive(Debug)]
pub struct ModelServer {
    bundle: ModelArtifactBundle,
    config: Configuration,
    dataset: Dataset,
    similarity: SimilaritySettings,
    dir: PathBuf,
    telemetry: PipelineTelemetry,
}

impl ModelServer {
    /// Loads the bundle in `run_dir`, re-acquiring the dataset from the
    /// snapshot's source when `dataset.csv` is absent.
    pub fn load(run_dir: &Path, telemetry: &PipelineTelemetry) -> Result<Self, DeployError> {
        let LoadedArtifact {
            bundle,
            config,
            dataset,
            dir,
        } = LoadedArtifact::load(run_dir)?;
        let telemetry = telemetry.scoped("deploy").with_run_id(&bundle.run_id);

        let dataset = if let Some(dataset) = dataset {
            dataset
        } else {
            let _ = telemetry.log(
                LogLevel::Warn,
                "retained dataset missing; re-acquiring from snapshot source",
                json!({ "dir": dir.display().to_string() }),
            );
            let settings = PipelineSettings::from_config(&config)?;
            DataPreparation::new(&settings, &telemetry).acquire_and_clean(&telemetry)?
        };
        let similarity = SimilaritySettings::from_config(&config).map_err(PipelineError::from)?;

        let _ = telemetry.log(
            LogLevel::Info,
            "model server loaded",
            json!({
                "dir": dir.display().to_string(),
                "model": bundle.model_type,
                "features": bundle.vocabulary.feature_names(),
                "retainedRows": dataset.n_rows(),
            }),
        );
        Ok(Self {
            bundle,
            config,
            dataset,
            similarity,
            dir,
            telemetry,
        })
    }

    /// Resolves the run to serve from `deploy.model_name` and loads it.
    pub fn from_config(
        config: &Configuration,
        registries: &Registries,
        telemetry: &PipelineTelemetry,
    ) -> Result<Self, DeployError> {
        let deploy = DeploySettings::from_config(config).map_err(PipelineError::from)?;
        if !deploy.enabled {
            return Err(DeployError::Disabled);
        }
        let settings = PipelineSettings::from_config(config)?;
        let name = &settings.data.name;
        let run_dir = match &deploy.selection {
            ModelSelection::TrainOnTheSpot => {
                let outcome = ModelTrainer::new(config, registries, telemetry)?.run()?;
                let TrainingOutcome::Trained(report) = outcome else {
                    return Err(DeployError::NotServable("model.enabled is false".into()));
                };
                if report.bundle_path.is_none() {
                    return Err(DeployError::NotServable(
                        "training ran with model.save.enabled = false".into(),
                    ));
                }
                report.prepared.run.output_dir
            }
            ModelSelection::Epoch(epoch) => {
                let dir = artifact::run_dir(&settings.paths.train_dir, name, epoch);
                if !artifact::is_complete(&dir) {
                    return Err(ArtifactError::Incomplete(dir).into());
                }
                dir
            }
            ModelSelection::Latest => artifact::latest_run(&settings.paths.train_dir, name)?,
        };
        Self::load(&run_dir, telemetry)
    }

    /// Prepares `payload` with the persisted vocabulary and returns it with a
    /// numeric `prediction` field added.
    pub fn predict(&self, payload: &Map<String, Value>) -> Result<Map<String, Value>, DeployError> {
        let features = prepare_observation(&self.bundle.vocabulary, payload).map_err(PipelineError::from)?;
        let predicted = self.bundle.predict(features.view())?;
        let value = predicted
            .first()
            .copied()
            .and_then(Number::from_f64)
            .ok_or_else(|| PipelineError::from(ModelError::NonFinite("prediction".into())))?;

        let mut response = payload.clone();
        response.insert(PREDICTION_KEY.to_owned(), Value::Number(value.clone()));
        let _ = self
            .telemetry
            .log(LogLevel::Debug, "prediction served", json!({ "prediction": value }));
        Ok(response)
    }

    /// Rows of the retained dataset closest to `payload`; `n` in the payload
    /// overrides the configured count.
    pub fn similar(&self, payload: &Map<String, Value>) -> Result<Vec<RankedRow>, DeployError> {
        let n = match payload.get(COUNT_KEY) {
            None => self.similarity.default_count,
            Some(value) => value
                .as_u64()
                .and_then(|count| usize::try_from(count).ok())
                .ok_or_else(|| {
                    DeployError::InvalidRequest(format!("'{COUNT_KEY}' must be a non-negative integer, got {value}"))
                })?,
        };
        let ranked =
            similarity::rank(&self.dataset, &self.similarity, payload, n).map_err(PipelineError::from)?;
        let _ = self.telemetry.log(
            LogLevel::Debug,
            "similarity served",
            json!({ "requested": n, "returned": ranked.len() }),
        );
        Ok(ranked)
    }

    /// Bundle being served.
    #[must_use]
    pub const fn bundle(&self) -> &ModelArtifactBundle {
        &self.bundle
    }

    /// Configuration snapshot of the served run.
    #[must_use]
    pub const fn config(&self) -> &Configuration {
        &self.config
    }

    /// Dataset used for similarity lookups.
    #[must_use]
    pub const fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    /// Run directory being served.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{artifact::DATASET_FILE, fixtures, trainer::TrainingReport};
    use std::fs;
    use tempfile::tempdir;

    fn trained(dir: &Path, rows: usize) -> (Configuration, TrainingReport) {
        let data_dir = dir.join("data");
        fixtures::write_dataset(&data_dir.join("diamonds.csv"), rows);
        let config = Configuration::from_value(fixtures::config_json(&data_dir, dir.join("train")));
        let outcome = ModelTrainer::new(&config, Registries::global(), &PipelineTelemetry::disabled())
            .unwrap()
            .run()
            .unwrap();
        match outcome {
            TrainingOutcome::Trained(report) => (config, *report),
            TrainingOutcome::PreparedOnly(_) => panic!("expected a trained model"),
        }
    }

    #[test]
    fn served_predictions_match_training_predictions() {
        let dir = tempdir().unwrap();
        let (_, report) = trained(dir.path(), 80);
        let server = ModelServer::load(&report.prepared.run.output_dir, &PipelineTelemetry::disabled()).unwrap();
        for (pos, row) in report.prepared.split.test_rows.iter().enumerate() {
            let mut payload = report.prepared.cleaned.row_json(*row);
            payload.remove("price");
            let response = server.predict(&payload).unwrap();
            let served = response[PREDICTION_KEY].as_f64().unwrap();
            let expected = report.predictions[pos];
            assert!((served - expected).abs() <= 1e-6 * expected.abs().max(1.0));
            assert_eq!(response["carat"], payload["carat"]);
        }
    }

    #[test]
    fn payload_errors_are_invalid_requests() {
        let dir = tempdir().unwrap();
        let (_, report) = trained(dir.path(), 40);
        let server = ModelServer::load(&report.prepared.run.output_dir, &PipelineTelemetry::disabled()).unwrap();
        let mut payload = report.prepared.cleaned.row_json(0);

        payload.insert("cut".into(), json!("Astonishing"));
        let err = server.predict(&payload).unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidRequest);

        payload = report.prepared.cleaned.row_json(0);
        payload.remove("carat");
        assert_eq!(server.predict(&payload).unwrap_err().class(), ErrorClass::InvalidRequest);

        payload = report.prepared.cleaned.row_json(0);
        payload.insert(COUNT_KEY.into(), json!("three"));
        assert_eq!(server.similar(&payload).unwrap_err().class(), ErrorClass::InvalidRequest);
    }

    #[test]
    fn similar_honours_payload_count_and_default() {
        let dir = tempdir().unwrap();
        let (_, report) = trained(dir.path(), 60);
        let server = ModelServer::load(&report.prepared.run.output_dir, &PipelineTelemetry::disabled()).unwrap();
        let defaulted = server.similar(&Map::from_iter([("carat".to_owned(), json!(1.0))])).unwrap();
        assert_eq!(defaulted.len(), 5);
        let limited = server
            .similar(&Map::from_iter([
                ("carat".to_owned(), json!(1.0)),
                (COUNT_KEY.to_owned(), json!(2)),
            ]))
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert!(limited[0].similarity <= limited[1].similarity);
    }

    #[test]
    fn missing_retained_dataset_is_reacquired() {
        let dir = tempdir().unwrap();
        let (_, report) = trained(dir.path(), 30);
        let run_dir = &report.prepared.run.output_dir;
        fs::remove_file(run_dir.join(DATASET_FILE)).unwrap();
        let server = ModelServer::load(run_dir, &PipelineTelemetry::disabled()).unwrap();
        assert_eq!(server.dataset().n_rows(), report.prepared.cleaned.n_rows());
    }

    #[test]
    fn selection_policies_resolve_runs() {
        let dir = tempdir().unwrap();
        let (config, report) = trained(dir.path(), 30);
        let latest = ModelServer::from_config(&config, Registries::global(), &PipelineTelemetry::disabled())
            .unwrap();
        assert_eq!(latest.dir(), report.prepared.run.output_dir.as_path());

        let epoch = report.prepared.run.label.clone();
        let pinned = config
            .augmented(&["deploy", "model_name", "epoch"], json!(epoch))
            .unwrap();
        let server = ModelServer::from_config(&pinned, Registries::global(), &PipelineTelemetry::disabled())
            .unwrap();
        assert_eq!(server.bundle().run_id, report.prepared.run.run_id);

        let missing = config
            .augmented(&["deploy", "model_name", "epoch"], json!("12345"))
            .unwrap();
        let err = ModelServer::from_config(&missing, Registries::global(), &PipelineTelemetry::disabled())
            .unwrap_err();
        assert!(matches!(
            err,
            DeployError::Pipeline(PipelineError::Artifact(ArtifactError::Incomplete(_)))
        ));

        let disabled = config.augmented(&["deploy", "enabled"], json!(false)).unwrap();
        assert!(matches!(
            ModelServer::from_config(&disabled, Registries::global(), &PipelineTelemetry::disabled()),
            Err(DeployError::Disabled)
        ));
    }

    #[test]
    fn train_on_the_spot_serves_the_fresh_run() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        fixtures::write_dataset(&data_dir.join("diamonds.csv"), 30);
        let mut root = fixtures::config_json(&data_dir, dir.path().join("train"));
        root["deploy"]["model_name"] = json!({ "trainOnTheSpot": true });
        let config = Configuration::from_value(root);
        let server =
            ModelServer::from_config(&config, Registries::global(), &PipelineTelemetry::disabled()).unwrap();
        assert!(artifact::is_complete(server.dir()));
        assert!(server.config().contains(&["results", "runId"]));
    }
}
