#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Lapidary regression pipeline: configuration-driven data preparation,
//! hyperparameter search, training, artifact persistence, and a model server
//! that replays training-time preparation for every request.

/// Nested configuration store with strict key-path lookups.
#[path = "../config.rs"]
pub mod config;

/// Typed, validated view over the configuration tree.
#[path = "../settings.rs"]
pub mod settings;

/// Error taxonomy shared by every stage.
#[path = "../error.rs"]
pub mod error;

/// Name to capability tables for models, metrics, and target transformations.
#[path = "../registry/main.rs"]
pub mod registry;

/// Concrete regressors behind the model registry.
#[path = "../models/main.rs"]
pub mod models;

/// Columnar dataset and CSV loading.
#[path = "../dataset/main.rs"]
pub mod dataset;

/// Data preparation stage and the shared single-row encoding path.
#[path = "../preparation/main.rs"]
pub mod preparation;

/// Hyperparameter search over declarative sampling spaces.
#[path = "../tuning/main.rs"]
pub mod tuning;

/// Training orchestration.
#[path = "../trainer.rs"]
pub mod trainer;

/// Model artifact bundle persistence.
#[path = "../artifact.rs"]
pub mod artifact;

/// Model server replaying preparation for predictions and similarity lookups.
#[path = "../deploy/main.rs"]
pub mod deploy;

/// Telemetry helpers for logging/event emission.
#[path = "../telemetry.rs"]
pub mod telemetry;

#[cfg(test)]
#[path = "../fixtures.rs"]
pub(crate) mod fixtures;

pub use artifact::{LoadedArtifact, ModelArtifactBundle};
pub use config::{ConfigError, Configuration, DEFAULT_CONFIG_PATH};
pub use dataset::{Cell, Dataset};
pub use deploy::{DeployError, ModelServer, RankedRow};
pub use error::{ErrorClass, PipelineError};
pub use preparation::{
    encoding::{EncodingVocabulary, TargetMode},
    DataPreparation, PreparedData, RunContext,
};
pub use registry::Registries;
pub use settings::PipelineSettings;
pub use telemetry::{PipelineTelemetry, PipelineTelemetryBuilder};
pub use trainer::{ModelTrainer, TrainingOutcome, TrainingReport};
pub use tuning::{Direction, HyperparameterSearch, Objective, SearchOutcome, Trial};
