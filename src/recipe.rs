//! The normalized recipe document: top-level package metadata plus a list of
//! build steps, each with raw requirement strings.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    str::FromStr,
};

use miette::Diagnostic;
use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Mapping;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RecipeError {
    #[error("Could not read recipe {0}")]
    #[diagnostic(code(recipe_matrix::recipe::io))]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Could not parse recipe: {0}")]
    #[diagnostic(code(recipe_matrix::recipe::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Could not parse recipe: {0}")]
    #[diagnostic(code(recipe_matrix::recipe::json))]
    Json(#[from] serde_json::Error),

    #[error("Step `{0}` has no version and the recipe has no top-level version")]
    #[diagnostic(code(recipe_matrix::recipe::missing_version))]
    MissingVersion(String),

    #[error("Top-level requirements need a step named `{0}`")]
    #[diagnostic(
        code(recipe_matrix::recipe::orphan_requirements),
        help("move the requirements into one of the steps")
    )]
    OrphanRequirements(String),

    #[error("Invalid feature selection `{0}`")]
    #[diagnostic(
        code(recipe_matrix::recipe::features),
        help("features are selected with `[feature,~other]`")
    )]
    InvalidFeatureSelection(String),
}

/// Accepts strings, numbers and booleans for fields like `version`
fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        String(String),
        Int(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|s| match s {
        Scalar::String(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => f.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

/// `null` behaves like an empty list
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_mapping<'de, D>(deserializer: D) -> Result<Mapping, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Mapping>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDocument {
    pub name: String,
    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_string: Option<String>,
}

/// Raw requirement strings per environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequirementsDocument {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub build: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub host: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub run: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub run_constrained: Vec<String>,
}

impl RequirementsDocument {
    pub fn is_empty(&self) -> bool {
        self.build.is_empty()
            && self.host.is_empty()
            && self.run.is_empty()
            && self.run_constrained.is_empty()
    }

    pub fn extend(&mut self, other: &RequirementsDocument) {
        self.build.extend(other.build.iter().cloned());
        self.host.extend(other.host.iter().cloned());
        self.run.extend(other.run.iter().cloned());
        self.run_constrained
            .extend(other.run_constrained.iter().cloned());
    }
}

/// An optional part of a recipe that can be switched on or off
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDocument {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub requirements: RequirementsDocument,
}

/// One build step of a recipe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepDocument {
    pub package: PackageDocument,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub build: Mapping,
    #[serde(default)]
    pub requirements: Option<RequirementsDocument>,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub test: Mapping,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub about: Mapping,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub extra: Mapping,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub app: Mapping,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub required_steps: Vec<String>,
}

/// A recipe after templating. `outputs` is accepted as an alias of `steps`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecipeDocument {
    pub package: PackageDocument,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub build: Mapping,
    #[serde(default)]
    pub requirements: Option<RequirementsDocument>,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub test: Mapping,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub about: Mapping,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub extra: Mapping,
    #[serde(default, deserialize_with = "null_as_mapping")]
    pub app: Mapping,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub features: Vec<FeatureDocument>,
    #[serde(default, alias = "outputs", deserialize_with = "null_as_empty")]
    pub steps: Vec<StepDocument>,
}

impl RecipeDocument {
    /// Load a recipe from a `.json` or YAML file
    pub fn from_path(path: &Path) -> Result<Self, RecipeError> {
        let content = fs_err::read_to_string(path)
            .map_err(|e| RecipeError::Io(path.to_path_buf(), e))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            Ok(serde_json::from_str(&content)?)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, RecipeError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Make sure there is at least one step, that every step has a version,
    /// and that top-level requirements and tests live on a step.
    pub fn normalize(mut self) -> Result<Self, RecipeError> {
        if self.steps.is_empty() {
            self.steps.push(StepDocument {
                package: self.package.clone(),
                ..Default::default()
            });
        }

        for step in &mut self.steps {
            if step.package.version.is_none() {
                step.package.version = Some(
                    self.package
                        .version
                        .clone()
                        .ok_or_else(|| RecipeError::MissingVersion(step.package.name.clone()))?,
                );
            }
        }

        let top_level = self
            .steps
            .iter()
            .position(|step| step.package.name == self.package.name)
            .or_else(|| (self.steps.len() == 1).then_some(0));

        if let Some(requirements) = self.requirements.take() {
            match top_level {
                Some(idx) if self.steps[idx].requirements.is_none() => {
                    self.steps[idx].requirements = Some(requirements);
                }
                _ => return Err(RecipeError::OrphanRequirements(self.package.name.clone())),
            }
        }

        if let Some(idx) = top_level
            && self.steps[idx].test.is_empty()
        {
            self.steps[idx].test = std::mem::take(&mut self.test);
        }

        Ok(self)
    }
}

/// Features picked on the command line, `true` for on and `false` for off
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedFeatures(BTreeMap<String, bool>);

impl FromStr for SelectedFeatures {
    type Err = RecipeError;

    /// Parses `[static,~docs]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }

        let inner = s
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| RecipeError::InvalidFeatureSelection(s.to_string()))?;

        let selection = inner
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(|f| match f.strip_prefix('~') {
                Some(name) => (name.to_string(), false),
                None => (f.to_string(), true),
            })
            .collect();

        Ok(Self(selection))
    }
}

impl SelectedFeatures {
    /// Whether `feature` is active, falling back to its default
    pub fn is_active(&self, feature: &FeatureDocument) -> bool {
        self.0.get(&feature.name).copied().unwrap_or(feature.default)
    }

    pub fn get(&self, name: &str) -> Option<bool> {
        self.0.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_package_recipe_becomes_one_step() {
        let recipe = RecipeDocument::from_yaml_str(
            r#"
package:
  name: foo
  version: 1.2
requirements:
  host:
    - python
  run:
test:
  imports: [foo]
"#,
        )
        .unwrap()
        .normalize()
        .unwrap();

        assert_eq!(recipe.steps.len(), 1);
        let step = &recipe.steps[0];
        assert_eq!(step.package.name, "foo");
        assert_eq!(step.package.version.as_deref(), Some("1.2"));
        assert_eq!(
            step.requirements.as_ref().unwrap().host,
            vec!["python".to_string()]
        );
        assert!(step.requirements.as_ref().unwrap().run.is_empty());
        assert!(!step.test.is_empty());
    }

    #[test]
    fn outputs_inherit_the_version() {
        let recipe = RecipeDocument::from_yaml_str(
            r#"
package:
  name: libfoo-split
  version: "2.0.1"
outputs:
  - package:
      name: libfoo
  - package:
      name: foo-tools
      version: "0.3"
    required_steps: [libfoo]
"#,
        )
        .unwrap()
        .normalize()
        .unwrap();

        let versions = recipe
            .steps
            .iter()
            .map(|s| s.package.version.clone().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(versions, vec!["2.0.1", "0.3"]);
        assert_eq!(recipe.steps[1].required_steps, vec!["libfoo".to_string()]);
    }

    #[test]
    fn orphan_requirements_are_rejected() {
        let err = RecipeDocument::from_yaml_str(
            r#"
package:
  name: split
  version: "1"
requirements:
  host: [zlib]
steps:
  - package: {name: a}
  - package: {name: b}
"#,
        )
        .unwrap()
        .normalize()
        .unwrap_err();
        assert!(matches!(err, RecipeError::OrphanRequirements(name) if name == "split"));
    }

    #[test]
    fn feature_selection() {
        let selected = SelectedFeatures::from_str("[static, ~docs]").unwrap();
        assert_eq!(selected.get("static"), Some(true));
        assert_eq!(selected.get("docs"), Some(false));
        assert_eq!(selected.get("other"), None);

        let feature = FeatureDocument {
            name: "other".to_string(),
            default: true,
            ..Default::default()
        };
        assert!(selected.is_active(&feature));

        assert!(SelectedFeatures::from_str("static").is_err());
        assert_eq!(SelectedFeatures::from_str("").unwrap(), SelectedFeatures::default());
    }
}
