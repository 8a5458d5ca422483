//! Typed settings derived once from a [`Configuration`].
//!
//! The raw tree stays the source of truth for snapshots; everything the
//! stages read goes through these structs so every key is validated up front.
//! Sub-section details are only required when the sub-step is enabled.

use std::{path::PathBuf, time::Duration};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{
    config::{dotted, kind_name, ConfigError, Configuration},
    error::{PipelineError, SchemaError},
    tuning::{space::SearchSpace, Direction},
};

/// Default timeout applied to remote dataset fetches.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of similar rows returned when neither payload nor config says otherwise.
pub const DEFAULT_SIMILAR_COUNT: usize = 5;

/// Everything the preparation and training stages read from the configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Data and training folders.
    pub paths: PathSettings,
    /// `data` section.
    pub data: DataSettings,
    /// `model` section; `None` when `model.enabled` is false.
    pub model: Option<ModelSettings>,
}

/// Root folders, resolved against the configuration file's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSettings {
    /// Folder local dataset paths are relative to.
    pub data_dir: PathBuf,
    /// Folder run directories are created under.
    pub train_dir: PathBuf,
}

/// `data` section.
#[derive(Debug, Clone)]
pub struct DataSettings {
    /// Dataset name; prefixes run ids and names the run folder.
    pub name: String,
    /// Where rows come from.
    pub source: SourceSettings,
    /// Cleaning steps in execution order.
    pub cleaning: CleaningSettings,
    /// Exploration outputs, when the section is present.
    pub exploration: Option<ExplorationSettings>,
    /// Feature processing and split.
    pub processing: ProcessingSettings,
}

/// Dataset location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSettings {
    /// CSV file under the data folder.
    Local {
        /// Resolved file path.
        path: PathBuf,
    },
    /// CSV served over HTTP(S).
    Remote {
        /// Source URL.
        url: String,
        /// Request timeout.
        timeout: Duration,
    },
}

/// Ordered cleaning steps (only enabled steps are present).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleaningSettings {
    /// Steps in execution order.
    pub steps: Vec<CleaningStep>,
}

/// One cleaning operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CleaningStep {
    /// Remove exact duplicate rows, keeping the first occurrence.
    DropDuplicates,
    /// Remove rows with any missing cell.
    DropMissing,
    /// Remove the listed columns; absent columns are ignored.
    DropColumns(Vec<String>),
    /// Per-column row filters.
    Custom(Vec<ColumnFilter>),
}

impl CleaningStep {
    /// Configuration key naming the step.
    #[must_use]
    pub const fn key(&self) -> &'static str {
        match self {
            Self::DropDuplicates => "dropDuplicates",
            Self::DropMissing => "dropNa",
            Self::DropColumns(_) => "dropColumns",
            Self::Custom(_) => "dropCustom",
        }
    }
}

/// Row filter bound to a column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    /// Column the rule reads.
    pub column: String,
    /// Rule applied to each row.
    pub rule: FilterRule,
}

/// Keep/drop rule for [`ColumnFilter`].
#[derive(Debug, Clone, PartialEq)]
pub enum FilterRule {
    /// Keep rows with `min <= value < max`.
    Range {
        /// Inclusive lower bound.
        min: f64,
        /// Exclusive upper bound.
        max: f64,
    },
    /// Drop rows equal to the value.
    Exclude(Value),
}

/// Exploration outputs requested by the `data.exploration` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplorationSettings {
    /// Emit numeric summary statistics.
    pub summary: bool,
    /// Histogram bin count, when histograms are enabled.
    pub hist_bins: Option<usize>,
    /// Columns to break the target down by.
    pub categorical: Vec<String>,
}

/// `data.processing` section.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSettings {
    /// Columns dropped after exploration.
    pub drop_columns: Vec<String>,
    /// Columns one-hot encoded with the first level dropped.
    pub one_hot: Vec<String>,
    /// Columns ordinal encoded with an explicit category order.
    pub ordinal: IndexMap<String, Vec<String>>,
    /// Target and split parameters.
    pub split: SplitSettings,
}

/// Train/test split parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitSettings {
    /// Target column.
    pub target: String,
    /// Fraction of rows held out, in `(0, 1)`.
    pub test_size: f64,
    /// Split seed.
    pub random_state: u64,
}

/// `model` section (only parsed when the model is enabled).
#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Registry name of the regressor.
    pub kind_name: String,
    /// Static hyperparameters.
    pub params: Map<String, Value>,
    /// Search configuration, when tuning is enabled.
    pub tuning: Option<TuningSettings>,
    /// Target transformation names in forward order.
    pub transformations: Vec<String>,
    /// Evaluation metric names.
    pub metrics: Vec<String>,
    /// Emit goodness-of-fit exploration after training.
    pub explore_fit: bool,
    /// Persist the artifact bundle.
    pub save: bool,
}

/// `model.tuning` section.
#[derive(Debug, Clone)]
pub struct TuningSettings {
    /// Number of trials.
    pub n_trials: usize,
    /// Whether lower or higher objective values win.
    pub direction: Direction,
    /// Metric registry name scoring each trial.
    pub metric: String,
    /// Seed the per-trial random streams derive from.
    pub seed: u64,
    /// Parameters merged over every sampled assignment.
    pub constants: Map<String, Value>,
    /// Sampling space.
    pub space: SearchSpace,
}

impl PipelineSettings {
    /// Validates the `paths`, `data`, and `model` sections.
    pub fn from_config(config: &Configuration) -> Result<Self, PipelineError> {
        let paths = PathSettings::from_config(config)?;
        let data = DataSettings::from_config(config, &paths)?;
        let model = if config.get_bool(&["model", "enabled"])? {
            Some(ModelSettings::from_config(config, &data)?)
        } else {
            None
        };
        Ok(Self { paths, data, model })
    }
}

impl PathSettings {
    fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let folder = |key: &str, default: &str| -> Result<PathBuf, ConfigError> {
            let path = ["paths", key];
            let raw = if config.contains(&path) {
                config.get_str(&path)?
            } else {
                default
            };
            Ok(config.resolve_path(raw))
        };
        Ok(Self {
            data_dir: folder("dataDir", "data")?,
            train_dir: folder("trainDir", "train")?,
        })
    }
}

impl DataSettings {
    fn from_config(config: &Configuration, paths: &PathSettings) -> Result<Self, PipelineError> {
        let name = config.get_str(&["data", "name"])?.trim().to_owned();
        if name.is_empty() {
            return Err(invalid(&["data", "name"], "must not be empty").into());
        }
        Ok(Self {
            name,
            source: SourceSettings::from_config(config, paths)?,
            cleaning: CleaningSettings::from_config(config)?,
            exploration: ExplorationSettings::from_config(config)?,
            processing: ProcessingSettings::from_config(config)?,
        })
    }
}

impl SourceSettings {
    fn from_config(config: &Configuration, paths: &PathSettings) -> Result<Self, ConfigError> {
        if config.get_bool(&["data", "source", "getLocal"])? {
            let local = config.get_str(&["data", "source", "localPath"])?;
            return Ok(Self::Local {
                path: paths.data_dir.join(local),
            });
        }
        let url = config.get_str(&["data", "source", "url"])?;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(
                &["data", "source", "url"],
                "expected an http(s) URL",
            ));
        }
        let timeout_path = ["data", "source", "timeoutSecs"];
        let timeout = if config.contains(&timeout_path) {
            Duration::from_secs(config.get_u64(&timeout_path)?.max(1))
        } else {
            DEFAULT_FETCH_TIMEOUT
        };
        Ok(Self::Remote {
            url: url.to_owned(),
            timeout,
        })
    }
}

impl CleaningSettings {
    const DEFAULT_ORDER: [&'static str; 4] = ["dropDuplicates", "dropNa", "dropColumns", "dropCustom"];

    fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let order_path = ["data", "cleaning", "order"];
        let mut order: Vec<String> = if config.contains(&order_path) {
            config.get_str_list(&order_path)?
        } else {
            Vec::new()
        };
        for name in &order {
            if !Self::DEFAULT_ORDER.contains(&name.as_str()) {
                return Err(invalid(&order_path, format!("unknown cleaning step '{name}'")));
            }
        }
        for (idx, name) in order.iter().enumerate() {
            if order[..idx].contains(name) {
                return Err(invalid(&order_path, format!("step '{name}' listed twice")));
            }
        }
        for name in Self::DEFAULT_ORDER {
            if !order.iter().any(|listed| listed == name) {
                order.push(name.to_owned());
            }
        }

        let mut steps = Vec::new();
        for name in &order {
            let step = match name.as_str() {
                "dropDuplicates" => config
                    .get_bool(&["data", "cleaning", "dropDuplicates"])?
                    .then_some(CleaningStep::DropDuplicates),
                "dropNa" => config
                    .get_bool(&["data", "cleaning", "dropNa"])?
                    .then_some(CleaningStep::DropMissing),
                "dropColumns" => {
                    if config.get_bool(&["data", "cleaning", "dropColumns", "enabled"])? {
                        Some(CleaningStep::DropColumns(config.get_str_list(&[
                            "data",
                            "cleaning",
                            "dropColumns",
                            "columns",
                        ])?))
                    } else {
                        None
                    }
                }
                _ => {
                    if config.get_bool(&["data", "cleaning", "dropCustom", "enabled"])? {
                        Some(CleaningStep::Custom(custom_filters(config)?))
                    } else {
                        None
                    }
                }
            };
            steps.extend(step);
        }
        Ok(Self { steps })
    }
}

fn custom_filters(config: &Configuration) -> Result<Vec<ColumnFilter>, ConfigError> {
    let base = ["data", "cleaning", "dropCustom", "columns"];
    let columns = config.get_object(&base)?;
    let mut filters = Vec::with_capacity(columns.len());
    for column in columns.keys() {
        let entry = extend(&base, column);
        let rule = if config.get_bool(&extend(&entry, "rangeOrEqual"))? {
            let min = config.get_f64(&extend(&entry, "min"))?;
            let max = config.get_f64(&extend(&entry, "max"))?;
            if min > max {
                return Err(invalid(&entry, format!("min {min} exceeds max {max}")));
            }
            FilterRule::Range { min, max }
        } else {
            let value = config.get(&extend(&entry, "value"))?;
            if !(value.is_number() || value.is_string()) {
                return Err(ConfigError::WrongType {
                    path: dotted(&extend(&entry, "value")),
                    expected: "a number or string",
                    found: kind_name(value),
                });
            }
            FilterRule::Exclude(value.clone())
        };
        filters.push(ColumnFilter {
            column: column.clone(),
            rule,
        });
    }
    Ok(filters)
}

impl ExplorationSettings {
    fn from_config(config: &Configuration) -> Result<Option<Self>, ConfigError> {
        if !config.contains(&["data", "exploration"]) {
            return Ok(None);
        }
        let enabled = |section: &str| -> Result<bool, ConfigError> {
            let path = ["data", "exploration", section];
            if config.contains(&path) {
                config.get_bool(&["data", "exploration", section, "enabled"])
            } else {
                Ok(false)
            }
        };
        let summary = enabled("scatter_matrix")? || enabled("summary")?;
        let hist_bins = if enabled("hist")? {
            let bins = config.get_u64(&["data", "exploration", "hist", "bins"])?;
            if bins == 0 {
                return Err(invalid(&["data", "exploration", "hist", "bins"], "must be positive"));
            }
            Some(usize::try_from(bins).unwrap_or(usize::MAX))
        } else {
            None
        };
        let categorical = if enabled("categorical")? {
            config.get_str_list(&["data", "exploration", "categorical", "columns"])?
        } else {
            Vec::new()
        };
        Ok(Some(Self {
            summary,
            hist_bins,
            categorical,
        }))
    }
}

impl ProcessingSettings {
    fn from_config(config: &Configuration) -> Result<Self, PipelineError> {
        let drop_columns = if config.get_bool(&[
            "data",
            "processing",
            "dropColumnsPostExploration",
            "enabled",
        ])? {
            config.get_str_list(&["data", "processing", "dropColumnsPostExploration", "columns"])?
        } else {
            Vec::new()
        };

        let one_hot = if config.get_bool(&["data", "processing", "getDummies", "enabled"])? {
            config.get_str_list(&["data", "processing", "getDummies", "columns"])?
        } else {
            Vec::new()
        };

        let mut ordinal = IndexMap::new();
        if config.get_bool(&["data", "processing", "orderCategorical", "enabled"])? {
            let base = ["data", "processing", "orderCategorical", "columns"];
            for column in config.get_object(&base)?.keys() {
                let categories = config.get_str_list(&extend(&base, column))?;
                if categories.is_empty() {
                    return Err(invalid(&extend(&base, column), "needs at least one category").into());
                }
                ordinal.insert(column.clone(), categories);
            }
        }

        if let Some(column) = one_hot.iter().find(|column| ordinal.contains_key(*column)) {
            return Err(SchemaError::ConflictingEncoding(column.clone()).into());
        }

        Ok(Self {
            drop_columns,
            one_hot,
            ordinal,
            split: SplitSettings::from_config(config)?,
        })
    }
}

impl SplitSettings {
    fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let base = ["data", "processing", "trainTestSplit"];
        let test_size = config.get_f64(&extend(&base, "testSize"))?;
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(invalid(&extend(&base, "testSize"), "must be strictly between 0 and 1"));
        }
        Ok(Self {
            target: config.get_str(&extend(&base, "target"))?.to_owned(),
            test_size,
            random_state: config.get_u64(&extend(&base, "randomState"))?,
        })
    }
}

impl ModelSettings {
    fn from_config(config: &Configuration, data: &DataSettings) -> Result<Self, ConfigError> {
        let kind_name = config.get_str(&["model", "type"])?.to_owned();
        let params = if config.contains(&["model", "params"]) {
            config.get_object(&["model", "params"])?.clone()
        } else {
            Map::new()
        };

        let tuning = if config.contains(&["model", "tuning"])
            && config.get_bool(&["model", "tuning", "enabled"])?
        {
            Some(TuningSettings::from_config(
                config,
                &params,
                data.processing.split.random_state,
            )?)
        } else {
            None
        };

        let transformations = if config.contains(&["model", "transformation"])
            && config.get_bool(&["model", "transformation", "enabled"])?
        {
            config.get_str_list(&["model", "transformation", "names"])?
        } else {
            Vec::new()
        };

        let metrics = config.get_str_list(&["model", "evaluation", "metrics"])?;
        let explore_fit = config.contains(&["model", "exploration"])
            && config.get_bool(&["model", "exploration", "enabled"])?;
        let save = config.get_bool(&["model", "save", "enabled"])?;

        Ok(Self {
            kind_name,
            params,
            tuning,
            transformations,
            metrics,
            explore_fit,
            save,
        })
    }
}

impl TuningSettings {
    fn from_config(
        config: &Configuration,
        model_params: &Map<String, Value>,
        default_seed: u64,
    ) -> Result<Self, ConfigError> {
        let base = ["model", "tuning"];
        let n_trials = config.get_u64(&extend(&base, "nTrials"))?;
        if n_trials == 0 {
            return Err(invalid(&extend(&base, "nTrials"), "must be at least 1"));
        }
        let direction = match config.get_str(&extend(&base, "direction"))? {
            "minimize" => Direction::Minimize,
            "maximize" => Direction::Maximize,
            other => {
                return Err(invalid(
                    &extend(&base, "direction"),
                    format!("expected 'minimize' or 'maximize', got '{other}'"),
                ))
            }
        };
        let seed = if config.contains(&extend(&base, "seed")) {
            config.get_u64(&extend(&base, "seed"))?
        } else {
            default_seed
        };
        let constants = if config.contains(&extend(&base, "constantParams")) {
            config.get_object(&extend(&base, "constantParams"))?.clone()
        } else {
            model_params.clone()
        };
        let hyper_path = extend(&base, "hyperparams");
        let space = SearchSpace::from_config(config.get_object(&hyper_path)?, &hyper_path)?;
        Ok(Self {
            n_trials: usize::try_from(n_trials).unwrap_or(usize::MAX),
            direction,
            metric: config.get_str(&extend(&base, "metric"))?.to_owned(),
            seed,
            constants,
            space,
        })
    }
}

/// `deploy` section, validated only by the serving path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySettings {
    /// Whether serving is allowed for this configuration.
    pub enabled: bool,
    /// Which trained model to serve.
    pub selection: ModelSelection,
    /// Similarity lookup parameters.
    pub similarity: SimilaritySettings,
}

/// Model-selection policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSelection {
    /// Train a fresh model before serving.
    TrainOnTheSpot,
    /// Serve the run with this epoch.
    Epoch(String),
    /// Serve the newest complete run.
    Latest,
}

/// Similarity lookup parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilaritySettings {
    /// Attributes compared by trimmed, case-insensitive equality.
    pub categorical: Vec<String>,
    /// Attribute scored by absolute difference.
    pub numeric: String,
    /// Rows returned when the payload has no `n`.
    pub default_count: usize,
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        Self {
            categorical: vec!["cut".into(), "color".into(), "clarity".into()],
            numeric: "carat".into(),
            default_count: DEFAULT_SIMILAR_COUNT,
        }
    }
}

impl DeploySettings {
    /// Validates the `deploy` section.
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let enabled = config.get_bool(&["deploy", "enabled"])?;
        let selection = if config.get_bool(&["deploy", "model_name", "trainOnTheSpot"])? {
            ModelSelection::TrainOnTheSpot
        } else {
            let path = ["deploy", "model_name", "epoch"];
            let epoch = match config.get(&path)? {
                Value::String(raw) => raw.trim().to_owned(),
                Value::Number(num) if num.is_u64() => num.to_string(),
                other => {
                    return Err(ConfigError::WrongType {
                        path: dotted(&path),
                        expected: "an epoch string or number",
                        found: kind_name(other),
                    })
                }
            };
            if epoch.eq_ignore_ascii_case("latest") {
                ModelSelection::Latest
            } else if epoch.is_empty() {
                return Err(invalid(&path, "must not be empty"));
            } else {
                ModelSelection::Epoch(epoch)
            }
        };

        Ok(Self {
            enabled,
            selection,
            similarity: SimilaritySettings::from_config(config)?,
        })
    }
}

impl SimilaritySettings {
    /// Reads `deploy.similarity`, defaulting every absent key.
    pub fn from_config(config: &Configuration) -> Result<Self, ConfigError> {
        let mut similarity = Self::default();
        let base = ["deploy", "similarity"];
        if !config.contains(&base) {
            return Ok(similarity);
        }
        if config.contains(&extend(&base, "categorical")) {
            similarity.categorical = config.get_str_list(&extend(&base, "categorical"))?;
        }
        if config.contains(&extend(&base, "numeric")) {
            similarity.numeric = config.get_str(&extend(&base, "numeric"))?.to_owned();
        }
        if config.contains(&extend(&base, "defaultCount")) {
            let count = config.get_u64(&extend(&base, "defaultCount"))?;
            similarity.default_count = usize::try_from(count).unwrap_or(usize::MAX);
        }
        Ok(similarity)
    }
}

fn extend<'a>(base: &[&'a str], key: &'a str) -> Vec<&'a str> {
    let mut path = base.to_vec();
    path.push(key);
    path
}

fn invalid(path: &[&str], reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        path: dotted(path),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use serde_json::json;

    fn settings_for(root: Value) -> Result<PipelineSettings, PipelineError> {
        PipelineSettings::from_config(&Configuration::from_value(root))
    }

    #[test]
    fn parses_full_fixture_configuration() {
        let root = fixtures::config_json("/tmp/lapidary-data", "/tmp/lapidary-train");
        let settings = settings_for(root).unwrap();
        assert_eq!(settings.data.name, "diamonds");
        assert_eq!(
            settings.data.source,
            SourceSettings::Local {
                path: PathBuf::from("/tmp/lapidary-data/diamonds.csv")
            }
        );
        assert_eq!(settings.data.processing.one_hot, vec!["cut", "color"]);
        assert_eq!(
            settings.data.processing.ordinal.get("clarity").map(Vec::len),
            Some(8)
        );
        let model = settings.model.unwrap();
        assert_eq!(model.kind_name, "linear_regression");
        assert!(model.tuning.is_none());
    }

    #[test]
    fn disabled_model_skips_model_section() {
        let mut root = fixtures::config_json("/tmp/d", "/tmp/t");
        root["model"] = json!({ "enabled": false, "type": "definitely_not_a_model" });
        let settings = settings_for(root).unwrap();
        assert!(settings.model.is_none());
    }

    #[test]
    fn conflicting_encodings_are_rejected() {
        let mut root = fixtures::config_json("/tmp/d", "/tmp/t");
        root["data"]["processing"]["getDummies"]["columns"] = json!(["cut", "clarity"]);
        let err = settings_for(root).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::ConflictingEncoding(ref column)) if column == "clarity"
        ));
    }

    #[test]
    fn test_size_must_be_a_fraction() {
        let mut root = fixtures::config_json("/tmp/d", "/tmp/t");
        root["data"]["processing"]["trainTestSplit"]["testSize"] = json!(1.0);
        assert!(matches!(
            settings_for(root),
            Err(PipelineError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn cleaning_order_can_be_overridden() {
        let mut root = fixtures::config_json("/tmp/d", "/tmp/t");
        root["data"]["cleaning"] = json!({
            "order": ["dropCustom", "dropNa"],
            "dropDuplicates": true,
            "dropNa": true,
            "dropColumns": { "enabled": false },
            "dropCustom": {
                "enabled": true,
                "columns": {
                    "carat": { "rangeOrEqual": true, "min": 0.2, "max": 3.0 },
                    "cut": { "rangeOrEqual": false, "value": "Fair" }
                }
            }
        });
        let settings = settings_for(root).unwrap();
        let keys: Vec<&str> = settings
            .data
            .cleaning
            .steps
            .iter()
            .map(CleaningStep::key)
            .collect();
        assert_eq!(keys, vec!["dropCustom", "dropNa", "dropDuplicates"]);
        match &settings.data.cleaning.steps[0] {
            CleaningStep::Custom(filters) => {
                assert_eq!(filters[0].rule, FilterRule::Range { min: 0.2, max: 3.0 });
                assert_eq!(filters[1].rule, FilterRule::Exclude(json!("Fair")));
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn remote_source_defaults_timeout() {
        let mut root = fixtures::config_json("/tmp/d", "/tmp/t");
        root["data"]["source"] = json!({ "getLocal": false, "url": "https://example.org/d.csv" });
        let settings = settings_for(root).unwrap();
        assert_eq!(
            settings.data.source,
            SourceSettings::Remote {
                url: "https://example.org/d.csv".into(),
                timeout: DEFAULT_FETCH_TIMEOUT
            }
        );
    }

    #[test]
    fn deploy_selection_variants() {
        let base = fixtures::config_json("/tmp/d", "/tmp/t");
        let mut root = base.clone();
        root["deploy"]["model_name"] = json!({ "trainOnTheSpot": false, "epoch": 1_700_000_000 });
        let deploy = DeploySettings::from_config(&Configuration::from_value(root)).unwrap();
        assert_eq!(deploy.selection, ModelSelection::Epoch("1700000000".into()));
        assert_eq!(deploy.similarity, SimilaritySettings::default());

        let mut root = base;
        root["deploy"]["model_name"] = json!({ "trainOnTheSpot": false, "epoch": "latest" });
        let deploy = DeploySettings::from_config(&Configuration::from_value(root)).unwrap();
        assert_eq!(deploy.selection, ModelSelection::Latest);
    }
}
