//! Data preparation stage: setup, acquire, clean, explore, process.

/// Row and column cleaning steps.
pub mod cleaning;
/// Encoding vocabulary and the single-row preparation path.
pub mod encoding;
/// Exploration collaborators.
pub mod exploration;
/// Seeded train/test split.
pub mod split;

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use ndarray::{Array1, Array2, Axis};
use serde_json::json;
use shared_logging::LogLevel;

use crate::{
    dataset::{loader, Dataset},
    error::{PipelineError, SchemaError},
    settings::PipelineSettings,
    telemetry::PipelineTelemetry,
};
use encoding::{EncodingVocabulary, Observation, TargetMode};
use exploration::{Explorer, SummaryExplorer};
use split::FeatureSplit;

/// Subdirectory of a run holding exploration outputs.
pub const EXPLORATION_DIR: &str = "exploration";

/// Identity and output directory of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// `<name>_<label>`.
    pub run_id: String,
    /// Dataset name.
    pub name: String,
    /// Unix epoch seconds at setup.
    pub epoch: u64,
    /// Directory name under `<trainDir>/<name>`: `<epoch>`, or `<epoch>_<n>`
    /// when earlier runs already claimed that second.
    pub label: String,
    /// `<trainDir>/<name>/<label>`.
    pub output_dir: PathBuf,
}

impl RunContext {
    /// Creates the run directory for the current time.
    pub fn create(train_dir: &Path, name: &str) -> Result<Self, PipelineError> {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self::at_epoch(train_dir, name, epoch)
    }

    /// Claims a fresh run directory for `epoch`. An existing directory is never
    /// reused; the label gains a `_<n>` suffix until creation succeeds.
    pub fn at_epoch(train_dir: &Path, name: &str, epoch: u64) -> Result<Self, PipelineError> {
        let parent = train_dir.join(name);
        fs::create_dir_all(&parent)?;
        let mut attempt = 0_u32;
        loop {
            let label = if attempt == 0 {
                epoch.to_string()
            } else {
                format!("{epoch}_{attempt}")
            };
            let output_dir = parent.join(&label);
            match fs::create_dir(&output_dir) {
                Ok(()) => {
                    return Ok(Self {
                        run_id: format!("{name}_{label}"),
                        name: name.to_owned(),
                        epoch,
                        label,
                        output_dir,
                    })
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Where exploration outputs go.
    #[must_use]
    pub fn exploration_dir(&self) -> PathBuf {
        self.output_dir.join(EXPLORATION_DIR)
    }
}

/// Everything the trainer needs from preparation.
#[derive(Debug, Clone)]
pub struct PreparedData {
    /// Run identity.
    pub run: RunContext,
    /// Cleaned dataset, retained for similarity lookups.
    pub cleaned: Dataset,
    /// Fitted encoding vocabulary.
    pub vocabulary: EncodingVocabulary,
    /// Train/test partition of the encoded rows.
    pub split: FeatureSplit,
    /// Exploration files written during the run.
    pub exploration_outputs: Vec<PathBuf>,
}

/// Data preparation stage bound to validated settings.
pub struct DataPreparation<'a> {
    settings: &'a PipelineSettings,
    explorer: Arc<dyn Explorer>,
    telemetry: PipelineTelemetry,
}

impl<'a> DataPreparation<'a> {
    /// Creates the stage with the default JSON summary explorer.
    #[must_use]
    pub fn new(settings: &'a PipelineSettings, telemetry: &PipelineTelemetry) -> Self {
        Self {
            settings,
            explorer: Arc::new(SummaryExplorer),
            telemetry: telemetry.scoped("preparation"),
        }
    }

    /// Replaces the exploration collaborator.
    #[must_use]
    pub fn with_explorer(mut self, explorer: Arc<dyn Explorer>) -> Self {
        self.explorer = explorer;
        self
    }

    /// Runs setup, acquisition, cleaning, exploration, and processing in order.
    pub fn run(&self) -> Result<PreparedData, PipelineError> {
        let data = &self.settings.data;
        let run = RunContext::create(&self.settings.paths.train_dir, &data.name)?;
        let telemetry = self.telemetry.with_run_id(&run.run_id);
        let _ = telemetry.log(
            LogLevel::Info,
            "data preparation started",
            json!({ "outputDir": run.output_dir.display().to_string() }),
        );

        let cleaned = self.acquire_and_clean(&telemetry)?;
        let exploration_outputs = self.explore(&cleaned, &run, &telemetry);
        let (vocabulary, split) = self.process(&cleaned, &telemetry)?;

        let _ = telemetry.log(
            LogLevel::Info,
            "data preparation completed",
            json!({
                "trainRows": split.train_rows.len(),
                "testRows": split.test_rows.len(),
                "features": vocabulary.n_features(),
            }),
        );
        let _ = telemetry.event(
            "pipeline.preparation.completed",
            json!({ "rows": cleaned.n_rows(), "features": vocabulary.feature_names() }),
        );
        Ok(PreparedData {
            run,
            cleaned,
            vocabulary,
            split,
            exploration_outputs,
        })
    }

    /// Acquires the configured source and applies the cleaning steps.
    pub fn acquire_and_clean(&self, telemetry: &PipelineTelemetry) -> Result<Dataset, PipelineError> {
        let mut dataset = self.acquire(telemetry)?;
        self.clean(&mut dataset, telemetry)?;
        Ok(dataset)
    }

    fn acquire(&self, telemetry: &PipelineTelemetry) -> Result<Dataset, PipelineError> {
        let source = &self.settings.data.source;
        let _ = telemetry.log(
            LogLevel::Info,
            "acquiring dataset",
            json!({ "source": format!("{source:?}") }),
        );
        let dataset = loader::acquire(source).map_err(|err| {
            let _ = telemetry.log(LogLevel::Error, "dataset acquisition failed", json!({ "error": err.to_string() }));
            err
        })?;
        let _ = telemetry.log(
            LogLevel::Info,
            "dataset acquired",
            json!({ "rows": dataset.n_rows(), "columns": dataset.n_columns() }),
        );
        Ok(dataset)
    }

    fn clean(&self, dataset: &mut Dataset, telemetry: &PipelineTelemetry) -> Result<(), PipelineError> {
        for step in &self.settings.data.cleaning.steps {
            let outcome = cleaning::apply(dataset, step)?;
            let _ = telemetry.log(
                LogLevel::Debug,
                "cleaning step applied",
                json!({
                    "step": outcome.step,
                    "rowsRemoved": outcome.rows_removed,
                    "columnsRemoved": outcome.columns_removed,
                }),
            );
        }
        let _ = telemetry.log(LogLevel::Info, "dataset cleaned", json!({ "rows": dataset.n_rows() }));
        Ok(())
    }

    fn explore(&self, dataset: &Dataset, run: &RunContext, telemetry: &PipelineTelemetry) -> Vec<PathBuf> {
        let Some(settings) = &self.settings.data.exploration else {
            return Vec::new();
        };
        let target = &self.settings.data.processing.split.target;
        match self
            .explorer
            .explore_dataset(dataset, settings, target, &run.exploration_dir())
        {
            Ok(written) => written,
            Err(err) => {
                let _ = telemetry.log(
                    LogLevel::Warn,
                    "dataset exploration failed; continuing",
                    json!({ "error": format!("{err:#}") }),
                );
                Vec::new()
            }
        }
    }

    fn process(
        &self,
        cleaned: &Dataset,
        telemetry: &PipelineTelemetry,
    ) -> Result<(EncodingVocabulary, FeatureSplit), PipelineError> {
        let processing = &self.settings.data.processing;
        let mut dataset = cleaned.clone();
        let dropped = dataset.drop_columns(&processing.drop_columns);
        let vocabulary = EncodingVocabulary::fit(&dataset, processing)?;
        let frame = vocabulary.encode_frame(&dataset, TargetMode::Required)?;
        let target = frame
            .target
            .ok_or_else(|| SchemaError::MissingTarget(vocabulary.target().to_owned()))?;
        let split = FeatureSplit::new(
            &frame.features,
            &target,
            processing.split.test_size,
            processing.split.random_state,
        )?;
        let _ = telemetry.log(
            LogLevel::Info,
            "dataset processed",
            json!({
                "droppedColumns": dropped,
                "featureNames": vocabulary.feature_names(),
            }),
        );
        Ok((vocabulary, split))
    }
}

/// Single-row preparation used at inference: a `1 x n_features` matrix.
pub fn prepare_observation(
    vocabulary: &EncodingVocabulary,
    observation: &impl Observation,
) -> Result<Array2<f64>, SchemaError> {
    let encoded = vocabulary.encode_observation(observation)?;
    Ok(Array1::from(encoded).insert_axis(Axis(0)))
}
