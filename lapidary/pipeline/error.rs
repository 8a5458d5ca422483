use std::io;

use serde::Serialize;
use thiserror::Error;

use crate::{
    artifact::ArtifactError,
    config::ConfigError,
    dataset::loader::DatasetError,
    models::ModelError,
    registry::{metric::MetricError, transform::TransformError, CapabilityError},
    tuning::TuningError,
};

/// How a failure should be reported to a caller of the serving path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The request payload is malformed or inconsistent with the model.
    InvalidRequest,
    /// The artifact, snapshot, or environment is broken.
    Internal,
}

impl ErrorClass {
    /// HTTP-style status recorded in the audit log.
    #[must_use]
    pub const fn status_code(self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Internal => 500,
        }
    }
}

/// Mismatches between data and the configured or persisted schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A configured column does not exist in the dataset.
    #[error("column '{0}' not present in dataset")]
    MissingColumn(String),
    /// A column is configured for both one-hot and ordinal encoding.
    #[error("column '{0}' is configured for both one-hot and ordinal encoding")]
    ConflictingEncoding(String),
    /// A text column reached processing without any encoding rule.
    #[error("text column '{0}' has no encoding rule (add it to getDummies or orderCategorical)")]
    UnencodedText(String),
    /// The target column is absent from the dataset.
    #[error("target column '{0}' not present in dataset")]
    MissingTarget(String),
    /// The target column holds non-numeric or missing values.
    #[error("target column '{column}' has a non-numeric value at row {row}")]
    TargetNotNumeric {
        /// Target column name.
        column: String,
        /// Offending row.
        row: usize,
    },
    /// A one-hot column has no observed levels.
    #[error("column '{0}' has no levels to encode")]
    NoLevels(String),
    /// The dataset is too small for the configured split.
    #[error("{rows} rows cannot be split with test size {test_size}")]
    InsufficientRows {
        /// Rows available.
        rows: usize,
        /// Configured test fraction.
        test_size: f64,
    },
    /// A feature required by the vocabulary is absent from the observation.
    #[error("missing feature '{0}'")]
    MissingFeature(String),
    /// A categorical value never seen during training.
    #[error("unknown level '{level}' for column '{column}'")]
    UnknownLevel {
        /// Column name.
        column: String,
        /// Value received.
        level: String,
    },
    /// A numeric feature received a non-numeric value.
    #[error("column '{column}' expects a number, got '{value}'")]
    NotNumeric {
        /// Column name.
        column: String,
        /// Value received.
        value: String,
    },
    /// A feature value is null/missing.
    #[error("feature '{0}' is missing a value")]
    MissingValue(String),
    /// A feature value has a shape the encoder does not accept (list, mapping).
    #[error("feature '{column}' has unsupported value kind {found}")]
    Unsupported {
        /// Column name.
        column: String,
        /// Kind received.
        found: &'static str,
    },
    /// A row-level failure during batch encoding.
    #[error("row {row}: {source}")]
    AtRow {
        /// Row index in the processed dataset.
        row: usize,
        /// Underlying failure.
        #[source]
        source: Box<SchemaError>,
    },
}

impl SchemaError {
    /// Classification for the serving path.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingFeature(_)
            | Self::UnknownLevel { .. }
            | Self::NotNumeric { .. }
            | Self::MissingValue(_)
            | Self::Unsupported { .. } => ErrorClass::InvalidRequest,
            Self::AtRow { source, .. } => source.class(),
            _ => ErrorClass::Internal,
        }
    }
}

/// Any failure raised by the pipeline library.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration load or lookup failure.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Unknown model, metric, or transformation name.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// Dataset acquisition failure.
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    /// Schema consistency failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// Target transformation failure.
    #[error(transparent)]
    Transform(#[from] TransformError),
    /// Metric evaluation failure.
    #[error(transparent)]
    Metric(#[from] MetricError),
    /// Model construction, fitting, or prediction failure.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// Hyperparameter search failure.
    #[error(transparent)]
    Tuning(#[from] TuningError),
    /// Artifact persistence or loading failure.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// Filesystem failure outside the specific components.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    /// Classification for the serving path.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Schema(err) => err.class(),
            _ => ErrorClass::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shaped_errors_are_invalid_requests() {
        let err = PipelineError::from(SchemaError::UnknownLevel {
            column: "cut".into(),
            level: "Flawless".into(),
        });
        assert_eq!(err.class(), ErrorClass::InvalidRequest);
        let nested = SchemaError::AtRow {
            row: 3,
            source: Box::new(SchemaError::MissingFeature("carat".into())),
        };
        assert_eq!(nested.class(), ErrorClass::InvalidRequest);
    }

    #[test]
    fn snapshot_inconsistencies_are_internal() {
        let err = PipelineError::from(SchemaError::MissingTarget("price".into()));
        assert_eq!(err.class(), ErrorClass::Internal);
        let err = PipelineError::from(ConfigError::KeyNotFound {
            path: "deploy.enabled".into(),
        });
        assert_eq!(err.class(), ErrorClass::Internal);
    }
}
