//! Immutable name to capability tables.
//!
//! Each registry maps a symbolic configuration name to a tagged variant. The
//! tables are built once per process and handed to the stages by reference.

/// Evaluation metrics.
pub mod metric;
/// Target transformations.
pub mod transform;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::models::ModelKind;
use metric::MetricKind;
use transform::TransformKind;

/// Raised when a configuration names a capability no registry knows.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// The name is not registered.
    #[error("unknown {registry} '{name}' (known: {known})")]
    Unknown {
        /// Registry consulted.
        registry: &'static str,
        /// Name requested.
        name: String,
        /// Comma-separated registered names.
        known: String,
    },
}

/// Closed table of named capabilities of one kind.
#[derive(Debug, Clone)]
pub struct Registry<K> {
    name: &'static str,
    entries: IndexMap<&'static str, K>,
}

impl<K: Copy> Registry<K> {
    fn new(name: &'static str, entries: impl IntoIterator<Item = (&'static str, K)>) -> Self {
        Self {
            name,
            entries: entries.into_iter().collect(),
        }
    }

    /// Resolves a configured name.
    pub fn lookup(&self, name: &str) -> Result<K, CapabilityError> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| CapabilityError::Unknown {
                registry: self.name,
                name: name.to_owned(),
                known: self.names().collect::<Vec<_>>().join(", "),
            })
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// The three registries consulted by training and serving.
#[derive(Debug, Clone)]
pub struct Registries {
    /// Regression algorithms.
    pub models: Registry<ModelKind>,
    /// Evaluation metrics.
    pub metrics: Registry<MetricKind>,
    /// Target transformations.
    pub transforms: Registry<TransformKind>,
}

static GLOBAL: Lazy<Registries> = Lazy::new(Registries::standard);

impl Registries {
    /// Builds the standard tables.
    #[must_use]
    pub fn standard() -> Self {
        Self {
            models: Registry::new("model", ModelKind::ALL.map(|kind| (kind.name(), kind))),
            metrics: Registry::new("metric", MetricKind::ALL.map(|kind| (kind.name(), kind))),
            transforms: Registry::new(
                "transformation",
                TransformKind::ALL.map(|kind| (kind.name(), kind)),
            ),
        }
    }

    /// Process-wide instance, built on first use.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }
}
