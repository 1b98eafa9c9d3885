//! YAML model configuration
//!
//! ```yaml
//! grid_search:
//!   module: sklearn.model_selection
//!   class: GridSearchCV
//!   params: {cv: 5, verbose: 1}
//! model_selection:
//!   module_0:
//!     module: sklearn.ensemble
//!     class: RandomForestRegressor
//!     params: {random_state: 42}
//!     search_param_grid: {n_estimators: [100, 200], max_depth: [5, 10]}
//! ```
//!
//! Candidates keep their declaration order, which is also the order in
//! which they are searched and the tie-break order for selection.

use crate::error::{Result, SelectError};
use crate::params::{ParamValue, Params};
use crate::training::registry::qualified_name;
use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// File name written by [`generate_sample_model_config`]
pub const MODEL_CONFIG_FILE_NAME: &str = "model_config.yaml";

/// Search strategy target and its fixed parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub module: String,
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub params: Params,
}

impl SearchConfig {
    pub fn target(&self) -> String {
        qualified_name(&self.module, &self.class_name)
    }
}

/// One named estimator candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub module: String,
    #[serde(rename = "class")]
    pub class_name: String,
    /// Fixed constructor parameters
    #[serde(default)]
    pub params: Params,
    /// Parameter name to the values to search, in declared order
    #[serde(default, deserialize_with = "unique_keys")]
    pub search_param_grid: IndexMap<String, Vec<ParamValue>>,
}

impl CandidateSpec {
    pub fn target(&self) -> String {
        qualified_name(&self.module, &self.class_name)
    }
}

/// The whole model config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub grid_search: SearchConfig,
    #[serde(deserialize_with = "unique_keys")]
    pub model_selection: IndexMap<String, CandidateSpec>,
}

/// Ordered mapping that fails on a repeated key instead of keeping the last one
fn unique_keys<'de, D, V>(deserializer: D) -> std::result::Result<IndexMap<String, V>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct UniqueKeys<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for UniqueKeys<V> {
        type Value = IndexMap<String, V>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping with unique keys")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
            let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, V>()? {
                if map.contains_key(&key) {
                    return Err(serde::de::Error::custom(format!("duplicate key '{}'", key)));
                }
                map.insert(key, value);
            }
            Ok(map)
        }
    }

    deserializer.deserialize_map(UniqueKeys(PhantomData))
}

impl ModelConfig {
    /// Load from a YAML file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(SelectError::ConfigNotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse and check a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| SelectError::SerializationError(e.to_string()))
    }

    /// Write as YAML, overwriting `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }

    /// Structural checks serde cannot express
    fn check(&self) -> Result<()> {
        if self.model_selection.is_empty() {
            return Err(SelectError::ConfigError(
                "model_selection must declare at least one candidate".to_string(),
            ));
        }
        for (name, spec) in &self.model_selection {
            if let Some((param, _)) = spec.search_param_grid.iter().find(|(_, values)| values.is_empty()) {
                return Err(SelectError::ConfigError(format!(
                    "candidate '{}': search_param_grid entry '{}' has no values",
                    name, param
                )));
            }
        }
        Ok(())
    }

    /// The default document written by [`generate_sample_model_config`]
    pub fn sample() -> Self {
        let params = |entries: &[(&str, ParamValue)]| -> Params {
            entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
        };
        let grid = |entries: Vec<(&str, Vec<ParamValue>)>| -> IndexMap<String, Vec<ParamValue>> {
            entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
        };

        let mut model_selection = IndexMap::new();
        model_selection.insert(
            "module_0".to_string(),
            CandidateSpec {
                module: "sklearn.ensemble".to_string(),
                class_name: "RandomForestRegressor".to_string(),
                params: params(&[("random_state", 42.into())]),
                search_param_grid: grid(vec![
                    ("n_estimators", vec![100.into(), 200.into()]),
                    ("max_depth", vec![5.into(), 10.into()]),
                ]),
            },
        );
        model_selection.insert(
            "module_1".to_string(),
            CandidateSpec {
                module: "xgboost".to_string(),
                class_name: "XGBRegressor".to_string(),
                params: params(&[("objective", "reg:squarederror".into())]),
                search_param_grid: grid(vec![
                    ("n_estimators", vec![50.into(), 100.into()]),
                    ("learning_rate", vec![0.05.into(), 0.1.into()]),
                ]),
            },
        );

        Self {
            grid_search: SearchConfig {
                module: "sklearn.model_selection".to_string(),
                class_name: "GridSearchCV".to_string(),
                params: params(&[("cv", 5.into()), ("verbose", 1.into())]),
            },
            model_selection,
        }
    }
}

/// Write the sample model config to `<export_dir>/model_config.yaml`.
///
/// Creates `export_dir` if needed and overwrites an existing file. Returns
/// the full path of the written file.
pub fn generate_sample_model_config(export_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let export_dir = export_dir.as_ref();
    let path = export_dir.join(MODEL_CONFIG_FILE_NAME);

    let written = fs::create_dir_all(export_dir)
        .map_err(SelectError::from)
        .and_then(|_| ModelConfig::sample().save(&path));

    match written {
        Ok(()) => {
            info!(path = %path.display(), "Sample model configuration file created");
            Ok(path)
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to generate sample model config");
            Err(SelectError::ConfigWrite {
                path,
                source: Box::new(e),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sample_round_trips_through_yaml() {
        let sample = ModelConfig::sample();
        let parsed = ModelConfig::from_yaml_str(&sample.to_yaml_string().unwrap()).unwrap();
        assert_eq!(parsed, sample);
        let names: Vec<&str> = parsed.model_selection.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["module_0", "module_1"]);
    }

    #[test]
    fn test_optional_sections_default_to_empty() {
        let config = ModelConfig::from_yaml_str(
            "grid_search:\n  module: sklearn.model_selection\n  class: GridSearchCV\n\
             model_selection:\n  baseline:\n    module: sklearn.dummy\n    class: DummyRegressor\n",
        )
        .unwrap();
        assert!(config.grid_search.params.is_empty());
        let baseline = &config.model_selection["baseline"];
        assert!(baseline.params.is_empty());
        assert!(baseline.search_param_grid.is_empty());
        assert_eq!(baseline.target(), "sklearn.dummy.DummyRegressor");
    }

    #[test]
    fn test_missing_keys_are_parse_errors() {
        let err = ModelConfig::from_yaml_str("grid_search:\n  module: x\n  class: y\n").unwrap_err();
        assert!(matches!(err, SelectError::ConfigParse(_)));
        let err = ModelConfig::from_yaml_str("grid_search: [1, 2]\nmodel_selection: {}\n").unwrap_err();
        assert!(matches!(err, SelectError::ConfigParse(_)));
    }

    #[test]
    fn test_empty_candidates_rejected() {
        let err = ModelConfig::from_yaml_str(
            "grid_search:\n  module: a\n  class: b\nmodel_selection: {}\n",
        )
        .unwrap_err();
        assert!(matches!(err, SelectError::ConfigError(_)));
    }

    #[test]
    fn test_empty_grid_list_rejected() {
        let err = ModelConfig::from_yaml_str(
            "grid_search:\n  module: a\n  class: b\nmodel_selection:\n  m:\n    module: c\n    class: d\n    search_param_grid:\n      alpha: []\n",
        )
        .unwrap_err();
        assert!(matches!(err, SelectError::ConfigError(_)));
    }

    #[test]
    fn test_duplicate_candidate_name_rejected() {
        let err = ModelConfig::from_yaml_str(
            "grid_search:\n  module: a\n  class: b\nmodel_selection:\n  \
             a:\n    module: sklearn.dummy\n    class: DummyRegressor\n  \
             a:\n    module: sklearn.linear_model\n    class: Ridge\n",
        )
        .unwrap_err();
        match err {
            SelectError::ConfigParse(e) => assert!(e.to_string().contains("duplicate key 'a'")),
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_grid_parameter_rejected() {
        let err = ModelConfig::from_yaml_str(
            "grid_search:\n  module: a\n  class: b\nmodel_selection:\n  m:\n    module: c\n    class: d\n    \
             search_param_grid:\n      alpha: [1.0]\n      alpha: [2.0]\n",
        )
        .unwrap_err();
        assert!(matches!(err, SelectError::ConfigParse(_)));
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ModelConfig::from_path(dir.path().join("nope.yaml")).unwrap_err();
        assert!(matches!(err, SelectError::ConfigNotFound(_)));
    }

    #[test]
    fn test_generate_into_nested_directory() {
        let dir = TempDir::new().unwrap();
        let export_dir = dir.path().join("a").join("b");
        let path = generate_sample_model_config(&export_dir).unwrap();
        assert_eq!(path, export_dir.join(MODEL_CONFIG_FILE_NAME));
        assert_eq!(ModelConfig::from_path(&path).unwrap(), ModelConfig::sample());
    }

    #[test]
    fn test_generate_wraps_write_failure() {
        let dir = TempDir::new().unwrap();
        // A regular file where the export directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();

        match generate_sample_model_config(&blocker).unwrap_err() {
            SelectError::ConfigWrite { path, source } => {
                assert_eq!(path, blocker.join(MODEL_CONFIG_FILE_NAME));
                assert!(matches!(*source, SelectError::IoError(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
