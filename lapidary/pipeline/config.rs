use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known location of the fallback configuration, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.json";

/// Failures raised while loading or reading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Neither the requested source nor the default configuration exists.
    #[error("configuration {0} not found and no default configuration available")]
    NotFound(PathBuf),
    /// The source exists but cannot be read by this process.
    #[error("permission denied reading configuration {0}")]
    Permission(PathBuf),
    /// Any other filesystem failure.
    #[error("reading configuration {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Malformed JSON/TOML content.
    #[error("parsing configuration {path}: {detail}")]
    Parse {
        /// File being parsed.
        path: PathBuf,
        /// Parser message.
        detail: String,
    },
    /// A key path segment is absent.
    #[error("key {path} not found in configuration")]
    KeyNotFound {
        /// Full dotted path that was requested.
        path: String,
    },
    /// A key is present but holds an unexpected kind of value.
    #[error("key {path} should be {expected}, found {found}")]
    WrongType {
        /// Full dotted path.
        path: String,
        /// Expected value kind.
        expected: &'static str,
        /// Kind actually found.
        found: &'static str,
    },
    /// A value has the right type but is outside its valid domain.
    #[error("invalid value for {path}: {reason}")]
    Invalid {
        /// Full dotted path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Immutable nested configuration tree.
///
/// Lookups take an ordered key path; every missing segment is an error. The
/// only way to "change" a configuration is [`Configuration::augmented`], which
/// returns a fresh copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    root: Value,
    origin: Option<PathBuf>,
}

impl Configuration {
    /// Loads `source`, falling back to [`DEFAULT_CONFIG_PATH`] when it does not exist.
    pub fn load(source: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_with_default(source, DEFAULT_CONFIG_PATH)
    }

    /// Loads `source`, falling back to `default` when it does not exist.
    pub fn load_with_default(
        source: impl AsRef<Path>,
        default: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let source = source.as_ref();
        if source.exists() {
            return Self::from_file(source);
        }
        let default = default.as_ref();
        if default.exists() {
            Self::from_file(default)
        } else {
            Err(ConfigError::NotFound(source.to_path_buf()))
        }
    }

    /// Reads exactly `path` with no fallback. Files ending in `.toml` are parsed as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ConfigError::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => ConfigError::Permission(path.to_path_buf()),
            _ => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        let parse_error = |detail: String| ConfigError::Parse {
            path: path.to_path_buf(),
            detail,
        };
        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let root: Value = if is_toml {
            toml::from_str(&raw).map_err(|err| parse_error(err.to_string()))?
        } else {
            serde_json::from_str(&raw).map_err(|err| parse_error(err.to_string()))?
        };
        if !root.is_object() {
            return Err(parse_error("top-level document must be an object".into()));
        }
        Ok(Self {
            root,
            origin: Some(path.to_path_buf()),
        })
    }

    /// Wraps an in-memory document. Relative paths resolve against the working directory.
    #[must_use]
    pub const fn from_value(root: Value) -> Self {
        Self { root, origin: None }
    }

    /// File the configuration was read from, if any.
    #[must_use]
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Resolves a path relative to the configuration file's directory.
    #[must_use]
    pub fn resolve_path(&self, candidate: impl AsRef<Path>) -> PathBuf {
        let candidate = candidate.as_ref();
        if candidate.is_absolute() {
            return candidate.to_path_buf();
        }
        match self.origin.as_deref().and_then(Path::parent) {
            Some(dir) => dir.join(candidate),
            None => candidate.to_path_buf(),
        }
    }

    /// Walks nested mappings by successive keys.
    pub fn get(&self, path: &[&str]) -> Result<&Value, ConfigError> {
        let mut node = &self.root;
        for key in path {
            node = node
                .as_object()
                .and_then(|map| map.get(*key))
                .ok_or_else(|| ConfigError::KeyNotFound {
                    path: dotted(path),
                })?;
        }
        Ok(node)
    }

    /// Whether every segment of `path` exists.
    #[must_use]
    pub fn contains(&self, path: &[&str]) -> bool {
        self.get(path).is_ok()
    }

    /// Boolean at `path`.
    pub fn get_bool(&self, path: &[&str]) -> Result<bool, ConfigError> {
        let value = self.get(path)?;
        value.as_bool().ok_or_else(|| wrong_type(path, "a boolean", value))
    }

    /// Number at `path` (integers are widened).
    pub fn get_f64(&self, path: &[&str]) -> Result<f64, ConfigError> {
        let value = self.get(path)?;
        value.as_f64().ok_or_else(|| wrong_type(path, "a number", value))
    }

    /// Non-negative integer at `path`.
    pub fn get_u64(&self, path: &[&str]) -> Result<u64, ConfigError> {
        let value = self.get(path)?;
        value
            .as_u64()
            .ok_or_else(|| wrong_type(path, "a non-negative integer", value))
    }

    /// String at `path`.
    pub fn get_str(&self, path: &[&str]) -> Result<&str, ConfigError> {
        let value = self.get(path)?;
        value.as_str().ok_or_else(|| wrong_type(path, "a string", value))
    }

    /// List of strings at `path`.
    pub fn get_str_list(&self, path: &[&str]) -> Result<Vec<String>, ConfigError> {
        let value = self.get(path)?;
        let items = value
            .as_array()
            .ok_or_else(|| wrong_type(path, "a list of strings", value))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| wrong_type(path, "a list of strings", item))
            })
            .collect()
    }

    /// Mapping at `path`.
    pub fn get_object(&self, path: &[&str]) -> Result<&Map<String, Value>, ConfigError> {
        let value = self.get(path)?;
        value
            .as_object()
            .ok_or_else(|| wrong_type(path, "a mapping", value))
    }

    /// Returns a copy with `value` stored at `path`, creating intermediate mappings.
    pub fn augmented(&self, path: &[&str], value: Value) -> Result<Self, ConfigError> {
        let Some((last, parents)) = path.split_last() else {
            return Err(ConfigError::Invalid {
                path: String::new(),
                reason: "empty key path".into(),
            });
        };
        let mut copy = self.clone();
        let mut node = &mut copy.root;
        for (depth, key) in parents.iter().enumerate() {
            let map = node
                .as_object_mut()
                .ok_or_else(|| ConfigError::WrongType {
                    path: dotted(&path[..depth]),
                    expected: "a mapping",
                    found: "a scalar or list",
                })?;
            node = map
                .entry((*key).to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        let map = node.as_object_mut().ok_or_else(|| ConfigError::WrongType {
            path: dotted(parents),
            expected: "a mapping",
            found: "a scalar or list",
        })?;
        map.insert((*last).to_owned(), value);
        Ok(copy)
    }

    /// Pretty JSON rendering used for snapshots.
    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.root)
    }
}

/// Joins a key path for error messages.
pub(crate) fn dotted(path: &[&str]) -> String {
    path.join(".")
}

pub(crate) const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

fn wrong_type(path: &[&str], expected: &'static str, found: &Value) -> ConfigError {
    ConfigError::WrongType {
        path: dotted(path),
        expected,
        found: kind_name(found),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn get_walks_nested_keys_and_names_missing_path() {
        let config = Configuration::from_value(json!({
            "data": { "processing": { "trainTestSplit": { "target": "price" } } }
        }));
        assert_eq!(
            config
                .get_str(&["data", "processing", "trainTestSplit", "target"])
                .unwrap(),
            "price"
        );
        let err = config
            .get(&["data", "processing", "getDummies", "enabled"])
            .unwrap_err();
        match err {
            ConfigError::KeyNotFound { path } => {
                assert_eq!(path, "data.processing.getDummies.enabled");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn typed_getters_reject_wrong_types() {
        let config = Configuration::from_value(json!({ "model": { "enabled": "yes" } }));
        assert!(matches!(
            config.get_bool(&["model", "enabled"]),
            Err(ConfigError::WrongType { found: "a string", .. })
        ));
    }

    #[test]
    fn missing_source_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let default = dir.path().join("default.json");
        fs::write(&default, r#"{ "data": { "name": "fallback" } }"#).unwrap();
        let config =
            Configuration::load_with_default(dir.path().join("absent.json"), &default).unwrap();
        assert_eq!(config.get_str(&["data", "name"]).unwrap(), "fallback");
        assert_eq!(config.origin(), Some(default.as_path()));
    }

    #[test]
    fn missing_source_and_default_is_not_found() {
        let dir = tempdir().unwrap();
        let err = Configuration::load_with_default(
            dir.path().join("absent.json"),
            dir.path().join("also-absent.json"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ \"data\": ").unwrap();
        assert!(matches!(
            Configuration::load(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn toml_sources_are_supported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "[data]\nname = \"diamonds\"\n[model]\nenabled = false\n").unwrap();
        let config = Configuration::load(&path).unwrap();
        assert_eq!(config.get_str(&["data", "name"]).unwrap(), "diamonds");
        assert!(!config.get_bool(&["model", "enabled"]).unwrap());
    }

    #[test]
    fn augmented_returns_a_fresh_copy() {
        let config = Configuration::from_value(json!({ "model": { "type": "linear_regression" } }));
        let snapshot = config
            .augmented(&["results", "metrics"], json!({ "r2_score": 0.9 }))
            .unwrap();
        assert!(!config.contains(&["results"]));
        assert_eq!(
            snapshot.get_f64(&["results", "metrics", "r2_score"]).unwrap(),
            0.9
        );
        assert!(config
            .augmented(&["model", "type", "nested"], json!(1))
            .is_err());
    }

    #[test]
    fn relative_paths_resolve_against_config_dir() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf.json");
        fs::write(&path, "{}").unwrap();
        let config = Configuration::load(&path).unwrap();
        assert_eq!(config.resolve_path("data"), dir.path().join("data"));
        assert_eq!(
            config.resolve_path(dir.path().join("abs")),
            dir.path().join("abs")
        );
    }
}
