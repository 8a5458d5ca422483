use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use ndarray::Array1;
use serde_json::{json, Map, Value};
use shared_logging::LogLevel;

use crate::{
    artifact::ModelArtifactBundle,
    config::Configuration,
    error::PipelineError,
    models::Regressor,
    preparation::{
        exploration::{Explorer, SummaryExplorer},
        DataPreparation, PreparedData, RunContext,
    },
    registry::{transform::TransformChain, Registries},
    settings::{ModelSettings, PipelineSettings},
    telemetry::PipelineTelemetry,
    tuning::{objective::HoldoutObjective, HyperparameterSearch, SearchOutcome},
};

/// Result of a training invocation.
#[derive(Debug)]
pub enum TrainingOutcome {
    /// `model.enabled` is false: preparation ran, nothing was trained.
    PreparedOnly(PreparedData),
    /// A model was fitted and evaluated.
    Trained(Box<TrainingReport>),
}

impl TrainingOutcome {
    /// Run identity, whichever branch was taken.
    #[must_use]
    pub fn run(&self) -> &RunContext {
        match self {
            Self::PreparedOnly(prepared) => &prepared.run,
            Self::Trained(report) => &report.prepared.run,
        }
    }
}

/// What a completed training run produced.
#[derive(Debug)]
pub struct TrainingReport {
    /// Preparation output the model was trained on.
    pub prepared: PreparedData,
    /// Model registry name.
    pub model_type: String,
    /// Parameters the final model was built with.
    pub parameters: Map<String, Value>,
    /// Transformations applied to the target, in forward order.
    pub transforms: TransformChain,
    /// Metric name to score on the held-out partition.
    pub metrics: IndexMap<String, f64>,
    /// Test-partition predictions in target units.
    pub predictions: Array1<f64>,
    /// Wall-clock fit time.
    pub fit_seconds: f64,
    /// Search history when tuning was enabled.
    pub search: Option<SearchOutcome>,
    /// Persisted bundle, when saving is enabled.
    pub bundle: Option<ModelArtifactBundle>,
    /// `model.json` path, when saving is enabled.
    pub bundle_path: Option<PathBuf>,
}

/// Runs preparation and, when enabled, tuning, fitting, evaluation, and persistence.
pub struct ModelTrainer<'r> {
    config: &'r Configuration,
    settings: PipelineSettings,
    registries: &'r Registries,
    explorer: Arc<dyn Explorer>,
    telemetry: PipelineTelemetry,
}

impl<'r> ModelTrainer<'r> {
    /// Validates the configuration and binds the registries.
    pub fn new(
        config: &'r Configuration,
        registries: &'r Registries,
        telemetry: &PipelineTelemetry,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            config,
            settings: PipelineSettings::from_config(config)?,
            registries,
            explorer: Arc::new(SummaryExplorer),
            telemetry: telemetry.scoped("trainer"),
        })
    }

    /// Replaces the exploration collaborator for both preparation and fit reports.
    #[must_use]
    pub fn with_explorer(mut self, explorer: Arc<dyn Explorer>) -> Self {
        self.explorer = explorer;
        self
    }

    /// Validated settings.
    #[must_use]
    pub const fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Executes the run.
    pub fn run(&self) -> Result<TrainingOutcome, PipelineError> {
        let prepared = DataPreparation::new(&self.settings, &self.telemetry)
            .with_explorer(Arc::clone(&self.explorer))
            .run()?;
        let telemetry = self.telemetry.with_run_id(&prepared.run.run_id);

        let Some(model_settings) = &self.settings.model else {
            let _ = telemetry.log(
                LogLevel::Info,
                "model disabled; stopping after preparation",
                json!({}),
            );
            return Ok(TrainingOutcome::PreparedOnly(prepared));
        };

        let report = self.train(prepared, model_settings, &telemetry).map_err(|err| {
            let _ = telemetry.log(LogLevel::Error, "training failed", json!({ "error": err.to_string() }));
            let _ = telemetry.event("pipeline.train.failed", json!({ "error": err.to_string() }));
            err
        })?;
        Ok(TrainingOutcome::Trained(Box::new(report)))
    }

    fn train(
        &self,
        prepared: PreparedData,
        model_settings: &ModelSettings,
        telemetry: &PipelineTelemetry,
    ) -> Result<TrainingReport, PipelineError> {
        let split = &prepared.split;
        let transforms = self.resolve_transforms(&model_settings.transformations, telemetry);
        let y_train = Array1::from(transforms.forward_all(&split.y_train.to_vec())?);

        let kind = self.registries.models.lookup(&model_settings.kind_name)?;

        let (parameters, search) = match &model_settings.tuning {
            Some(tuning) => {
                let metric = self.registries.metrics.lookup(&tuning.metric)?;
                let processing = &self.settings.data.processing.split;
                let objective = HoldoutObjective::new(
                    kind,
                    metric,
                    &split.x_train,
                    &y_train,
                    processing.test_size,
                    processing.random_state,
                )?;
                let outcome = HyperparameterSearch::from_settings(tuning)
                    .run(&objective, &telemetry.scoped("tuning"))?;
                (outcome.best_params().clone(), Some(outcome))
            }
            None => (model_settings.params.clone(), None),
        };

        let mut model = kind.build(&parameters)?;
        let (fitted, elapsed) = telemetry.timed(|| model.fit(split.x_train.view(), y_train.view()));
        fitted?;
        let fit_seconds = elapsed.as_secs_f64();
        let _ = telemetry.log(
            LogLevel::Info,
            "model fitted",
            json!({
                "model": kind.name(),
                "parameters": parameters,
                "fitSeconds": fit_seconds,
                "trainRows": split.x_train.nrows(),
            }),
        );

        let raw = model.predict(split.x_test.view())?;
        let predictions = Array1::from(transforms.inverse_all(&raw.to_vec())?);
        let truth = split.y_test.to_vec();
        let predicted = predictions.to_vec();

        let mut metrics = IndexMap::new();
        for name in &model_settings.metrics {
            match self.registries.metrics.lookup(name) {
                Ok(metric) => {
                    metrics.insert(name.clone(), metric.compute(&truth, &predicted)?);
                }
                Err(err) => {
                    let _ = telemetry.log(
                        LogLevel::Warn,
                        "skipping unknown metric",
                        json!({ "error": err.to_string() }),
                    );
                }
            }
        }
        let _ = telemetry.log(LogLevel::Info, "model evaluated", json!({ "metrics": metrics }));

        if model_settings.explore_fit {
            if let Err(err) =
                self.explorer
                    .explore_fit(&truth, &predicted, &prepared.run.exploration_dir())
            {
                let _ = telemetry.log(
                    LogLevel::Warn,
                    "goodness-of-fit exploration failed; continuing",
                    json!({ "error": format!("{err:#}") }),
                );
            }
        }

        let (bundle, bundle_path) = if model_settings.save {
            let bundle = ModelArtifactBundle::new(
                prepared.run.run_id.clone(),
                model,
                parameters.clone(),
                prepared.vocabulary.clone(),
                transforms.clone(),
                metrics.clone(),
            );
            let paths = &self.settings.paths;
            let snapshot = self.config.augmented(
                &["paths"],
                json!({
                    "dataDir": absolute(&paths.data_dir).display().to_string(),
                    "trainDir": absolute(&paths.train_dir).display().to_string(),
                }),
            )?;
            let snapshot = snapshot.augmented(
                &["results"],
                json!({
                    "runId": prepared.run.run_id,
                    "metrics": metrics,
                    "parameters": parameters,
                    "fitSeconds": fit_seconds,
                }),
            )?;
            let path = bundle.persist(&prepared.run.output_dir, &snapshot, &prepared.cleaned)?;
            let _ = telemetry.log(
                LogLevel::Info,
                "artifact bundle persisted",
                json!({ "path": path.display().to_string() }),
            );
            (Some(bundle), Some(path))
        } else {
            (None, None)
        };

        let _ = telemetry.event(
            "pipeline.train.completed",
            json!({ "model": kind.name(), "metrics": metrics, "saved": bundle_path.is_some() }),
        );
        Ok(TrainingReport {
            prepared,
            model_type: kind.name().to_owned(),
            parameters,
            transforms,
            metrics,
            predictions,
            fit_seconds,
            search,
            bundle,
            bundle_path,
        })
    }

    fn resolve_transforms(&self, names: &[String], telemetry: &PipelineTelemetry) -> TransformChain {
        let mut chain = Vec::with_capacity(names.len());
        for name in names {
            match self.registries.transforms.lookup(name) {
                Ok(kind) => chain.push(kind),
                Err(err) => {
                    let _ = telemetry.log(
                        LogLevel::Warn,
                        "skipping unknown transformation",
                        json!({ "error": err.to_string() }),
                    );
                }
            }
        }
        TransformChain(chain)
    }
}

/// Snapshot paths are re-resolved from the run directory, so they are stored absolute.
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        artifact::{LoadedArtifact, CONFIG_FILE, DATASET_FILE, MODEL_FILE},
        fixtures,
        registry::{transform::TransformKind, CapabilityError},
    };
    use tempfile::tempdir;

    fn config(dir: &Path, rows: usize) -> Value {
        let data_dir = dir.join("data");
        fixtures::write_dataset(&data_dir.join("diamonds.csv"), rows);
        fixtures::config_json(&data_dir, dir.join("train"))
    }

    fn train(root: Value) -> Result<TrainingOutcome, PipelineError> {
        let config = Configuration::from_value(root);
        ModelTrainer::new(&config, Registries::global(), &PipelineTelemetry::disabled())?.run()
    }

    fn trained(outcome: TrainingOutcome) -> TrainingReport {
        match outcome {
            TrainingOutcome::Trained(report) => *report,
            TrainingOutcome::PreparedOnly(_) => panic!("expected a trained model"),
        }
    }

    #[test]
    fn trains_evaluates_and_persists_bundle() {
        let dir = tempdir().unwrap();
        let report = trained(train(config(dir.path(), 120)).unwrap());
        assert_eq!(report.model_type, "linear_regression");
        assert_eq!(report.transforms, TransformChain(vec![TransformKind::Log]));
        assert_eq!(
            report.metrics.keys().collect::<Vec<_>>(),
            vec!["r2_score", "mean_absolute_error"]
        );
        assert!(report.metrics["r2_score"] > 0.5, "r2 {}", report.metrics["r2_score"]);
        assert_eq!(report.predictions.len(), report.prepared.split.y_test.len());

        let run_dir = &report.prepared.run.output_dir;
        for file in [MODEL_FILE, CONFIG_FILE, DATASET_FILE] {
            assert!(run_dir.join(file).is_file(), "{file} missing");
        }
        let loaded = LoadedArtifact::load(run_dir).unwrap();
        assert_eq!(
            loaded.config.get_str(&["results", "runId"]).unwrap(),
            report.prepared.run.run_id
        );
        assert!(loaded.config.contains(&["results", "metrics", "r2_score"]));
        assert_eq!(loaded.dataset.unwrap().n_rows(), report.prepared.cleaned.n_rows());
        assert!(run_dir.join("exploration").join("goodness_of_fit.json").is_file());
    }

    #[test]
    fn unknown_metrics_and_transforms_are_skipped() {
        let dir = tempdir().unwrap();
        let mut root = config(dir.path(), 60);
        root["model"]["transformation"]["names"] = json!(["boxcox", "log"]);
        root["model"]["evaluation"]["metrics"] = json!(["accuracy", "r2_score"]);
        root["model"]["save"]["enabled"] = json!(false);
        let report = trained(train(root).unwrap());
        assert_eq!(report.transforms.names(), vec!["log"]);
        assert_eq!(report.metrics.keys().collect::<Vec<_>>(), vec!["r2_score"]);
        assert!(report.bundle_path.is_none());
        assert!(!report.prepared.run.output_dir.join(MODEL_FILE).exists());
    }

    #[test]
    fn unknown_model_type_is_fatal() {
        let dir = tempdir().unwrap();
        let mut root = config(dir.path(), 30);
        root["model"]["type"] = json!("random_forest");
        let err = train(root).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Capability(CapabilityError::Unknown { ref name, .. }) if name == "random_forest"
        ));
    }

    #[test]
    fn disabled_model_never_consults_the_model_registry() {
        let dir = tempdir().unwrap();
        let mut root = config(dir.path(), 10);
        root["model"] = json!({ "enabled": false, "type": "random_forest" });
        match train(root).unwrap() {
            TrainingOutcome::PreparedOnly(prepared) => {
                assert_eq!(prepared.split.x_train.nrows(), 8);
                assert_eq!(prepared.split.x_test.nrows(), 2);
            }
            TrainingOutcome::Trained(_) => panic!("model should be disabled"),
        }
    }

    #[test]
    fn tuning_selects_parameters_from_the_search() {
        let dir = tempdir().unwrap();
        let mut root = config(dir.path(), 80);
        root["model"]["type"] = json!("xgb_regression");
        root["model"]["tuning"] = json!({
            "enabled": true,
            "nTrials": 3,
            "direction": "minimize",
            "metric": "mean_squared_error",
            "constantParams": { "n_estimators": 15 },
            "hyperparams": {
                "max_depth": { "range": [1, 3] },
                "learning_rate": { "range": [0.05, 0.3], "log": true }
            }
        });
        let report = trained(train(root).unwrap());
        let search = report.search.as_ref().unwrap();
        assert_eq!(search.trials.len(), 3);
        assert_eq!(&report.parameters, search.best_params());
        assert_eq!(report.parameters["n_estimators"], json!(15));
        assert!(report.bundle.as_ref().unwrap().parameters.contains_key("max_depth"));
    }

    #[test]
    fn log_transform_of_non_positive_target_is_fatal() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        let zero_priced: Vec<String> = fixtures::dataset_csv(20)
            .lines()
            .enumerate()
            .map(|(line, row)| {
                let mut fields: Vec<&str> = row.split(',').collect();
                if line > 0 {
                    fields[7] = "0";
                }
                fields.join(",")
            })
            .collect();
        std::fs::write(data_dir.join("diamonds.csv"), zero_priced.join("\n")).unwrap();
        let root = fixtures::config_json(&data_dir, dir.path().join("train"));
        assert!(matches!(train(root), Err(PipelineError::Transform(_))));
    }
}
