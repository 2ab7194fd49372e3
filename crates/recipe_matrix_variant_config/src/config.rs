//! Main variant configuration structure

use std::{collections::BTreeMap, path::Path};

use recipe_matrix_types::{NormalizedKey, PinExpression};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::{
    combination::{VariantExpansion, expand_variants},
    error::{VariantConfigError, VariantExpandError},
};

/// Pin applied to the run requirement of a package that was used at build
/// time (`pin_run_as_build` in the variant config).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRunAsBuild {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_pin: Option<PinExpression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pin: Option<PinExpression>,
}

/// The variant configuration structure.
///
/// This represents a build matrix configuration, typically loaded from a
/// `variants.yaml` or `conda_build_config.yaml` file.
///
/// # Example
///
/// ```yaml
/// python:
///   - "3.9"
///   - "3.10"
/// numpy:
///   - "1.20"
///   - "1.21"
/// zip_keys:
///   - [python, numpy]
/// pin_run_as_build:
///   python:
///     min_pin: x.x
///     max_pin: x.x
/// ```
///
/// Candidates are kept as strings. Unquoted numbers go through the YAML
/// number type first, so `3.10` reads as `3.1`; quote versions to keep them
/// verbatim.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariantConfig {
    /// Keys that should be "zipped" together when creating the build matrix.
    /// Each inner vector represents a group of keys that advance in lock-step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_keys: Option<Vec<Vec<NormalizedKey>>>,

    /// Run-export overrides for packages used at build time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub pin_run_as_build: BTreeMap<NormalizedKey, PinRunAsBuild>,

    /// The variant axes - a mapping of keys to ordered candidate lists.
    #[serde(flatten)]
    pub variants: BTreeMap<NormalizedKey, Vec<String>>,
}

impl VariantConfig {
    /// Create a new empty variant configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load variant configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self, VariantConfigError> {
        let content = fs_err::read_to_string(path)
            .map_err(|e| VariantConfigError::IoError(path.to_path_buf(), e))?;
        Self::parse(&content, Some(path))
    }

    /// Parse variant configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, VariantConfigError> {
        Self::parse(yaml, None)
    }

    /// Load multiple variant configuration files and merge them
    ///
    /// Files are merged in order, with later files taking precedence.
    /// The `zip_keys` from the last file that specifies them will be used.
    pub fn from_files(paths: &[impl AsRef<Path>]) -> Result<Self, VariantConfigError> {
        let mut final_config = VariantConfig::new();

        for path in paths {
            let path = path.as_ref();
            tracing::info!("Loading variant config from: {}", path.display());
            final_config.merge(Self::from_file(path)?);
        }

        Ok(final_config)
    }

    fn parse(yaml: &str, path: Option<&Path>) -> Result<Self, VariantConfigError> {
        let parse_error = |source| VariantConfigError::ParseError {
            path: path.map(Path::to_path_buf),
            source,
        };

        let value: Value = serde_yaml::from_str(yaml).map_err(parse_error)?;
        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => return Ok(Self::default()),
            _ => {
                return Err(VariantConfigError::InvalidConfig {
                    key: "<root>".to_string(),
                    reason: "expected a mapping of variant keys".to_string(),
                });
            }
        };

        let mut config = VariantConfig::new();
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                return Err(VariantConfigError::InvalidConfig {
                    key: format!("{key:?}"),
                    reason: "variant keys must be strings".to_string(),
                });
            };

            match key {
                "zip_keys" => config.zip_keys = Some(parse_zip_keys(value)?),
                "pin_run_as_build" => {
                    config.pin_run_as_build = serde_yaml::from_value(value).map_err(parse_error)?
                }
                _ => match parse_candidates(key, value)? {
                    Some(candidates) => {
                        config.variants.insert(key.into(), candidates);
                    }
                    None => tracing::debug!("ignoring structured variant config key `{key}`"),
                },
            }
        }

        Ok(config)
    }

    /// Merge another variant configuration into this one
    ///
    /// Variant values are replaced (not merged), and zip_keys from `other` take precedence.
    pub fn merge(&mut self, other: VariantConfig) {
        self.variants.extend(other.variants);
        self.pin_run_as_build.extend(other.pin_run_as_build);

        if other.zip_keys.is_some() {
            self.zip_keys = other.zip_keys;
        }
    }

    /// Insert or update a variant key
    pub fn insert(&mut self, key: impl Into<NormalizedKey>, values: Vec<String>) {
        self.variants.insert(key.into(), values);
    }

    /// Get the values for a variant key
    pub fn get(&self, key: &NormalizedKey) -> Option<&Vec<String>> {
        self.variants.get(key)
    }

    /// The values for a key, treating an empty list like a missing key.
    pub fn non_empty(&self, key: &NormalizedKey) -> Option<&Vec<String>> {
        self.variants.get(key).filter(|values| !values.is_empty())
    }

    /// The configured zip groups (empty when none are configured).
    pub fn zip_keys(&self) -> &[Vec<NormalizedKey>] {
        self.zip_keys.as_deref().unwrap_or(&[])
    }

    /// Expand the axes that apply to one output into concrete assignments.
    ///
    /// `axes` is the per-output subset (possibly filtered) of this
    /// configuration; zip groups are validated against the full configuration.
    pub fn expand(
        &self,
        axes: &BTreeMap<NormalizedKey, Vec<String>>,
    ) -> Result<VariantExpansion, VariantExpandError> {
        expand_variants(axes, self.zip_keys(), &self.variants)
    }

    /// Get all variant keys
    pub fn keys(&self) -> impl Iterator<Item = &NormalizedKey> {
        self.variants.keys()
    }

    /// Check if configuration is empty
    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Get the number of variant keys
    pub fn len(&self) -> usize {
        self.variants.len()
    }

    /// Serialize to YAML string
    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Turn one config entry into an ordered candidate list, exactly as written.
/// Zipped axes are matched by position, so repeats are kept and `null`
/// entries become `None`. Returns `None` for structured entries that are not
/// variant axes.
fn parse_candidates(key: &str, value: Value) -> Result<Option<Vec<String>>, VariantConfigError> {
    let candidates = match value {
        Value::Null => Vec::new(),
        Value::Sequence(items) => {
            let mut candidates = Vec::with_capacity(items.len());
            for item in &items {
                let candidate = match item {
                    Value::Null => "None".to_string(),
                    item => scalar_to_string(item).ok_or_else(|| {
                        VariantConfigError::InvalidConfig {
                            key: key.to_string(),
                            reason: "list entries must be strings, numbers or booleans"
                                .to_string(),
                        }
                    })?,
                };
                candidates.push(candidate);
            }
            candidates
        }
        Value::Mapping(_) | Value::Tagged(_) => return Ok(None),
        scalar => scalar_to_string(&scalar).into_iter().collect(),
    };

    Ok(Some(candidates))
}

fn parse_zip_keys(value: Value) -> Result<Vec<Vec<NormalizedKey>>, VariantConfigError> {
    let Value::Sequence(groups) = value else {
        return Err(VariantConfigError::InvalidZipKeyStructure);
    };

    groups
        .into_iter()
        .map(|group| match group {
            Value::Sequence(keys) => keys
                .iter()
                .map(|key| {
                    key.as_str()
                        .map(NormalizedKey::from)
                        .ok_or_else(|| VariantConfigError::InvalidConfig {
                            key: "zip_keys".to_string(),
                            reason: format!("zip key {key:?} is not a string"),
                        })
                })
                .collect(),
            _ => Err(VariantConfigError::InvalidZipKeyStructure),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
python:
  - "3.9"
  - "3.10"
numpy:
  - "1.20"
  - "1.21"
"#;
        let config = VariantConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.variants.len(), 2);
        assert_eq!(config.get(&"python".into()).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_with_zip_keys() {
        let yaml = r#"
python:
  - "3.9"
  - "3.10"
numpy:
  - "1.20"
  - "1.21"
zip_keys:
  - [python, numpy]
"#;
        let config = VariantConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.zip_keys(),
            &[vec![NormalizedKey::from("python"), NormalizedKey::from("numpy")]]
        );
    }

    #[test]
    fn test_flat_zip_keys_are_rejected() {
        let yaml = r#"
python: ["3.9", "3.10"]
numpy: ["1.20", "1.21"]
zip_keys: [python, numpy]
"#;
        let err = VariantConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, VariantConfigError::InvalidZipKeyStructure));
    }

    #[test]
    fn test_scalars_nulls_and_duplicates() {
        let yaml = r#"
python: 3.8
target_platform:
cuda: [11.2, "11.2", 12]
with_tests: true
pin_run_as_build:
  python:
    min_pin: x.x
    max_pin: x.x
"#;
        let config = VariantConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.get(&"python".into()).unwrap(), &vec!["3.8".to_string()]);
        assert!(config.non_empty(&"target_platform".into()).is_none());
        assert_eq!(
            config.get(&"cuda".into()).unwrap(),
            &vec!["11.2".to_string(), "11.2".to_string(), "12".to_string()]
        );
        assert_eq!(
            config.get(&"with-tests".into()).unwrap(),
            &vec!["true".to_string()]
        );

        let pin = config.pin_run_as_build.get(&"python".into()).unwrap();
        assert_eq!(pin.max_pin.as_ref().unwrap().as_str(), "x.x");
        assert!(!config.variants.contains_key(&"pin_run_as_build".into()));
    }

    #[test]
    fn test_zipped_lists_keep_repeats_and_nulls() {
        let yaml = r#"
c_compiler_version: [9, 9, 10]
cuda_compiler_version: [null, "11.0", "11.2"]
zip_keys:
  - [c_compiler_version, cuda_compiler_version]
"#;
        let config = VariantConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(
            config.get(&"c_compiler_version".into()).unwrap(),
            &vec!["9".to_string(), "9".to_string(), "10".to_string()]
        );
        assert_eq!(
            config.get(&"cuda_compiler_version".into()).unwrap(),
            &vec!["None".to_string(), "11.0".to_string(), "11.2".to_string()]
        );

        let expansion = config.expand(&config.variants).unwrap();
        let pairs = expansion
            .assignments
            .iter()
            .map(|a| {
                (
                    a[&NormalizedKey::from("c_compiler_version")].as_str(),
                    a[&NormalizedKey::from("cuda_compiler_version")].as_str(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![("9", "None"), ("9", "11.0"), ("10", "11.2")]);
    }

    #[test]
    fn test_merge_configs() {
        let mut config1 = VariantConfig::new();
        config1.insert("python", vec!["3.9".into(), "3.10".into()]);

        let mut config2 = VariantConfig::new();
        config2.insert("numpy", vec!["1.20".into(), "1.21".into()]);
        config2.insert("python", vec!["3.11".into()]);
        config2.zip_keys = Some(vec![vec!["python".into(), "numpy".into()]]);

        config1.merge(config2);

        assert_eq!(config1.variants.len(), 2);
        assert_eq!(config1.get(&"python".into()).unwrap(), &vec!["3.11".to_string()]);
        assert_eq!(config1.zip_keys().len(), 1);
    }

    #[test]
    fn test_serialization_round_trip() {
        let mut config = VariantConfig::new();
        config.insert("python", vec!["3.9".into(), "3.10".into()]);
        config.insert("numpy", vec!["1.20".into(), "1.21".into()]);
        config.zip_keys = Some(vec![vec!["python".into(), "numpy".into()]]);

        let yaml = config.to_yaml_string().unwrap();
        let parsed = VariantConfig::from_yaml_str(&yaml).unwrap();

        assert_eq!(parsed.variants, config.variants);
        assert_eq!(parsed.zip_keys, config.zip_keys);
    }
}
