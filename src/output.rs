//! Outputs (build steps): one immutable template per recipe step and one
//! lightweight instance per variant assignment.
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    str::FromStr,
};

use rattler_conda_types::Platform;
use recipe_matrix_types::NormalizedKey;
use recipe_matrix_variant_config::VariantAssignment;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::{
    default_variant::DefaultVariantTable,
    error::ResolveError,
    recipe::{RecipeDocument, RequirementsDocument, SelectedFeatures, StepDocument},
    render::spec::{ParseError, RequirementSpec},
};

/// The environments a step declares requirements for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Env {
    Build,
    Host,
    Run,
    RunConstrained,
}

impl Env {
    pub const ALL: [Env; 4] = [Env::Build, Env::Host, Env::Run, Env::RunConstrained];

    /// The environments that are handed to the solver, in order
    pub const SOLVED: [Env; 3] = [Env::Build, Env::Host, Env::Run];

    pub fn as_str(&self) -> &'static str {
        match self {
            Env::Build => "build",
            Env::Host => "host",
            Env::Run => "run",
            Env::RunConstrained => "run_constrained",
        }
    }
}

impl Display for Env {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requirement specs per environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Requirements {
    pub build: Vec<RequirementSpec>,
    pub host: Vec<RequirementSpec>,
    pub run: Vec<RequirementSpec>,
    pub run_constrained: Vec<RequirementSpec>,
}

impl Requirements {
    pub fn from_document(doc: &RequirementsDocument) -> Result<Self, ParseError> {
        let parse = |specs: &[String]| {
            specs
                .iter()
                .map(|s| RequirementSpec::from_str(s))
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Requirements {
            build: parse(&doc.build)?,
            host: parse(&doc.host)?,
            run: parse(&doc.run)?,
            run_constrained: parse(&doc.run_constrained)?,
        })
    }

    pub fn get(&self, env: Env) -> &[RequirementSpec] {
        match env {
            Env::Build => &self.build,
            Env::Host => &self.host,
            Env::Run => &self.run,
            Env::RunConstrained => &self.run_constrained,
        }
    }

    pub fn get_mut(&mut self, env: Env) -> &mut Vec<RequirementSpec> {
        match env {
            Env::Build => &mut self.build,
            Env::Host => &mut self.host,
            Env::Run => &mut self.run,
            Env::RunConstrained => &mut self.run_constrained,
        }
    }

    /// Build, host and run specs
    pub fn all(&self) -> impl Iterator<Item = &RequirementSpec> {
        self.build.iter().chain(&self.host).chain(&self.run)
    }

    /// Build and host specs, the ones that decide the variant axes
    pub fn build_time(&self) -> impl Iterator<Item = &RequirementSpec> {
        self.build.iter().chain(&self.host)
    }

    /// Append the specs of `other` whose names are not present yet
    pub fn inherit(&mut self, env: Env, other: &[RequirementSpec]) {
        let target = self.get_mut(env);
        for spec in other {
            if !target.iter().any(|s| s.name == spec.name) {
                target.push(spec.clone());
            }
        }
    }
}

/// The typed part of the `build` section
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSection {
    pub number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skip: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub intermediate: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_exports: Vec<RequirementSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore_run_exports: Vec<String>,
    /// Keys this crate does not interpret
    #[serde(flatten)]
    pub other: Mapping,
}

impl BuildSection {
    pub fn from_mapping(mapping: &Mapping, output: &str) -> Result<Self, ResolveError> {
        let invalid = |reason: String| ResolveError::InvalidSection {
            output: output.to_string(),
            section: "build".to_string(),
            reason,
        };

        let mut section = BuildSection::default();
        for (key, value) in mapping {
            let Some(key) = key.as_str() else {
                return Err(invalid(format!("non-string key {key:?}")));
            };

            match key {
                "number" => {
                    section.number = match value {
                        Value::Number(n) => n.as_u64(),
                        Value::String(s) => s.parse().ok(),
                        Value::Null => Some(0),
                        _ => None,
                    }
                    .ok_or_else(|| invalid(format!("build number {value:?} is not a number")))?;
                }
                "string" => {
                    section.string = match value {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => return Err(invalid("`string` must be a string".to_string())),
                    }
                }
                "skip" => {
                    section.skip = match value {
                        Value::Null => false,
                        Value::Bool(b) => *b,
                        Value::Sequence(items) => items.iter().any(|v| v.as_bool() == Some(true)),
                        _ => return Err(invalid("`skip` must be a boolean or a list".to_string())),
                    }
                }
                "intermediate" => {
                    section.intermediate = match value {
                        Value::Null => false,
                        Value::Bool(b) => *b,
                        _ => return Err(invalid("`intermediate` must be a boolean".to_string())),
                    }
                }
                "run_exports" => {
                    section.run_exports = match value {
                        Value::Null => Vec::new(),
                        Value::Sequence(items) => items
                            .iter()
                            .map(|item| match item.as_str() {
                                Some(s) => Ok(RequirementSpec::from_str(s)?),
                                None => Err(invalid(
                                    "only plain run exports (a list of specs) are supported"
                                        .to_string(),
                                )),
                            })
                            .collect::<Result<_, _>>()?,
                        _ => {
                            return Err(invalid(
                                "only plain run exports (a list of specs) are supported"
                                    .to_string(),
                            ));
                        }
                    }
                }
                "ignore_run_exports" => {
                    section.ignore_run_exports = match value {
                        Value::Null => Vec::new(),
                        Value::Sequence(items) => items
                            .iter()
                            .map(|item| {
                                item.as_str().map(str::to_string).ok_or_else(|| {
                                    invalid("`ignore_run_exports` must list names".to_string())
                                })
                            })
                            .collect::<Result<_, _>>()?,
                        _ => {
                            return Err(invalid(
                                "`ignore_run_exports` must be a list".to_string(),
                            ));
                        }
                    }
                }
                _ => {
                    section.other.insert(key.into(), value.clone());
                }
            }
        }

        Ok(section)
    }
}

/// Free-form sections, merged from the recipe and the step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sections {
    #[serde(skip_serializing_if = "Mapping::is_empty")]
    pub test: Mapping,
    #[serde(skip_serializing_if = "Mapping::is_empty")]
    pub about: Mapping,
    #[serde(skip_serializing_if = "Mapping::is_empty")]
    pub extra: Mapping,
    #[serde(skip_serializing_if = "Mapping::is_empty")]
    pub app: Mapping,
}

/// Step-local keys win over the parent's
fn merge_section(parent: &Mapping, step: &Mapping) -> Mapping {
    let mut merged = parent.clone();
    for (key, value) in step {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// One recipe step before any variant is applied
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputTemplate {
    pub name: String,
    pub version: String,
    pub build_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_string: Option<String>,
    pub build: BuildSection,
    pub sections: Sections,
    pub requirements: Requirements,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_steps: Vec<String>,
    /// Whether the `static` feature renamed this output
    #[serde(skip)]
    pub is_static: bool,
}

impl OutputTemplate {
    /// Build the template for `step`, inheriting from the recipe's top level
    /// and appending the requirements of activated features.
    pub fn from_step(
        recipe: &RecipeDocument,
        step: &StepDocument,
        features: &SelectedFeatures,
    ) -> Result<Self, ResolveError> {
        let mut name = step.package.name.clone();
        let version = step
            .package
            .version
            .clone()
            .or_else(|| recipe.package.version.clone())
            .unwrap_or_default();

        let mut requirements = step.requirements.clone().unwrap_or_default();
        let mut is_static = false;
        for feature in &recipe.features {
            if !features.is_active(feature) {
                continue;
            }
            requirements.extend(&feature.requirements);
            if feature.name == "static" {
                is_static = true;
            }
        }
        if is_static {
            name.push_str("-static");
        }

        let build = BuildSection::from_mapping(&merge_section(&recipe.build, &step.build), &name)?;

        Ok(OutputTemplate {
            version,
            build_number: build.number,
            build_string: step.package.build_string.clone().or(build.string.clone()),
            sections: Sections {
                test: merge_section(&recipe.test, &step.test),
                about: merge_section(&recipe.about, &step.about),
                extra: merge_section(&recipe.extra, &step.extra),
                app: merge_section(&recipe.app, &step.app),
            },
            requirements: Requirements::from_document(&requirements)?,
            required_steps: step.required_steps.clone(),
            build,
            is_static,
            name,
        })
    }

    pub fn is_intermediate(&self) -> bool {
        self.build.intermediate
    }

    /// Names this step refers to: every requirement name plus the required steps
    pub fn referenced_names(&self) -> BTreeSet<&str> {
        self.requirements
            .all()
            .chain(&self.requirements.run_constrained)
            .map(|spec| spec.name.as_str())
            .chain(self.required_steps.iter().map(String::as_str))
            .collect()
    }

    /// Materialize this template under one variant assignment.
    ///
    /// Specs whose name matches an assigned key become `"<name> <value>"`;
    /// compilers resolve to `<compiler>_<target_platform>`. Pins keep their
    /// placeholder until solve time.
    pub fn apply_variant(
        &self,
        template: usize,
        variant: VariantAssignment,
        differentiating_keys: &BTreeSet<NormalizedKey>,
        defaults: &dyn DefaultVariantTable,
        fallback_platform: Platform,
    ) -> Result<OutputInstance, ResolveError> {
        let platform = variant
            .get(&NormalizedKey::from("target_platform"))
            .and_then(|p| Platform::from_str(p).ok())
            .unwrap_or(fallback_platform);

        let mut requirements = self.requirements.clone();
        for env in Env::ALL {
            for spec in requirements.get_mut(env) {
                if spec.is_compiler {
                    if env != Env::Build {
                        return Err(ResolveError::CompilerNotInBuild {
                            output: self.name.clone(),
                            env,
                            spec: spec.raw.clone(),
                        });
                    }
                    let language = spec.compiler_language().unwrap_or_default();
                    let compiler = compiler_package(&language, &variant, platform, defaults)?;
                    spec.final_spec = match variant
                        .get(&NormalizedKey::from(format!("{language}_compiler_version")))
                    {
                        Some(version) => format!("{compiler} {version}*"),
                        None => compiler,
                    };
                    spec.from_pinnings = true;
                } else if spec.pin.is_none()
                    && let Some(value) = variant.get(&NormalizedKey::from(spec.name.as_str()))
                {
                    let mut pinned = RequirementSpec::from_variant(&spec.name, value)?;
                    pinned.loosen_spec();
                    *spec = pinned;
                }
            }
        }

        Ok(OutputInstance {
            template,
            differentiating_keys: differentiating_keys
                .iter()
                .filter(|key| variant.contains_key(*key))
                .cloned()
                .collect(),
            variant,
            requirements,
            run_exports: Vec::new(),
            parent_steps: Vec::new(),
            final_build_id: None,
        })
    }
}

/// `<compiler>_<target_platform>` for a language, taking the compiler name
/// from the assignment or the platform defaults.
pub fn compiler_package(
    language: &str,
    variant: &VariantAssignment,
    platform: Platform,
    defaults: &dyn DefaultVariantTable,
) -> Result<String, ResolveError> {
    let compiler = variant
        .get(&NormalizedKey::from(format!("{language}_compiler")))
        .cloned()
        .or_else(|| defaults.compiler(language, platform))
        .ok_or_else(|| ResolveError::UnknownCompiler {
            language: language.to_string(),
            platform: platform.to_string(),
        })?;

    Ok(format!("{compiler}_{platform}"))
}

/// One recipe step materialized under one variant assignment. Everything
/// that is shared between variants lives on the template.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputInstance {
    /// Index of the template in the build tree
    #[serde(skip)]
    pub template: usize,
    pub variant: VariantAssignment,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub differentiating_keys: BTreeSet<NormalizedKey>,
    pub requirements: Requirements,
    /// The step's own run exports, evaluated once its build id is known
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run_exports: Vec<RequirementSpec>,
    /// Indices of the instances this one was linked to
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parent_steps: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_build_id: Option<String>,
}

impl OutputInstance {
    /// Assigned values of the differentiating keys, for labels
    pub fn differentiating_values(&self) -> Vec<&str> {
        self.differentiating_keys
            .iter()
            .filter_map(|key| self.variant.get(key).map(String::as_str))
            .collect()
    }
}
