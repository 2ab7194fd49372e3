//! Collect the variant axes that apply to a single output.
use std::{collections::BTreeMap, str::FromStr};

use indexmap::IndexMap;
use rattler_conda_types::{MatchSpec, ParseStrictness, Platform, Version};
use recipe_matrix_types::NormalizedKey;
use recipe_matrix_variant_config::VariantConfig;

use crate::{
    default_variant::{DefaultVariantTable, sys_var_stubs},
    output::OutputTemplate,
    render::spec::RequirementSpec,
};

/// Axis name to candidate values, for one output
pub type Axes = BTreeMap<NormalizedKey, Vec<String>>;

/// The platform the variants are rendered for: the first `target_platform`
/// of the variant config, or `fallback`.
pub fn resolve_target_platform(config: &VariantConfig, fallback: Platform) -> Platform {
    let Some(values) = config.non_empty(&"target_platform".into()) else {
        return fallback;
    };

    match values.first().map(|p| Platform::from_str(p)) {
        Some(Ok(platform)) => {
            if values.len() > 1 {
                tracing::warn!(
                    "Multiple target platforms configured ({}), rendering for {platform}",
                    values.join(", ")
                );
            }
            platform
        }
        _ => {
            tracing::warn!(
                "Unknown target platform `{}` in variant config, using {fallback}",
                values.join(", ")
            );
            fallback
        }
    }
}

/// Whether a variant candidate satisfies the constraint written in the recipe.
///
/// The candidate is treated like a package record with the name of the spec,
/// the candidate's first token as version and its second token (if any) as
/// build string.
fn candidate_matches(spec: &MatchSpec, candidate: &str) -> bool {
    let mut tokens = candidate.split_whitespace();
    let Some(version) = tokens.next().and_then(|v| Version::from_str(v).ok()) else {
        return false;
    };
    let build = tokens.next().unwrap_or_default();

    spec.version.as_ref().is_none_or(|vs| vs.matches(&version))
        && spec.build.as_ref().is_none_or(|b| b.matches(build))
}

fn filter_candidates(candidates: Vec<String>, constraint: &RequirementSpec) -> Vec<String> {
    let spec = match MatchSpec::from_str(&constraint.raw, ParseStrictness::Lenient) {
        Ok(spec) => spec,
        Err(err) => {
            tracing::debug!(
                "Could not parse `{}` as match spec ({err}), keeping all variant values",
                constraint.raw
            );
            return candidates;
        }
    };

    candidates
        .into_iter()
        .filter(|candidate| {
            let keep = candidate_matches(&spec, candidate);
            if !keep {
                tracing::warn!(
                    "Variant value `{} {candidate}` does not satisfy `{}`, skipping it",
                    constraint.name,
                    constraint.raw
                );
            }
            keep
        })
        .collect()
}

/// Compute the axes for `output` on `platform`.
///
/// `target_platform` is always an axis with the single value `platform`.
/// Build and host requirements pull in their own axis (filtered by any
/// constraint the recipe writes), compilers pull in `<lang>_compiler` and
/// `<lang>_compiler_version`. Pins never contribute axes.
pub fn collect_axes(
    output: &OutputTemplate,
    config: &VariantConfig,
    defaults: &dyn DefaultVariantTable,
    platform: Platform,
) -> Axes {
    let mut axes = Axes::new();
    axes.insert("target_platform".into(), vec![platform.to_string()]);

    for stub in sys_var_stubs(platform) {
        let key = NormalizedKey::from(stub);
        if let Some(values) = config.non_empty(&key) {
            axes.insert(key, values.clone());
        }
    }

    let default_values = defaults.get_default(platform);

    // names in order of appearance, with the specs that constrain them
    let mut requested: IndexMap<NormalizedKey, Vec<&RequirementSpec>> = IndexMap::new();
    for spec in output.requirements.build_time() {
        if spec.pin.is_some() {
            continue;
        }

        if spec.is_compiler {
            let Some(language) = spec.compiler_language() else {
                continue;
            };
            for key in [
                format!("{language}_compiler"),
                format!("{language}_compiler_version"),
            ] {
                let key = NormalizedKey::from(key);
                if let Some(values) = config.non_empty(&key) {
                    axes.insert(key, values.clone());
                }
            }
            continue;
        }

        let constraints = requested.entry(spec.name.as_str().into()).or_default();
        if !spec.is_simple() {
            constraints.push(spec);
        }
    }

    for (key, constraints) in requested {
        let Some(mut candidates) = config
            .non_empty(&key)
            .cloned()
            .or_else(|| default_values.get(&key).map(|v| vec![v.clone()]))
        else {
            continue;
        };

        for constraint in &constraints {
            candidates = filter_candidates(candidates, constraint);
        }

        if candidates.is_empty() {
            tracing::warn!(
                "No value of variant `{key}` satisfies the recipe of {}, not varying it",
                output.name
            );
            continue;
        }

        axes.insert(key, candidates);
    }

    tracing::debug!(
        "Variant axes of {}: {}",
        output.name,
        axes.keys().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
    );

    axes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        default_variant::PlatformDefaults,
        recipe::{RecipeDocument, SelectedFeatures},
    };
    use pretty_assertions::assert_eq;

    fn template(yaml: &str) -> OutputTemplate {
        let recipe = RecipeDocument::from_yaml_str(yaml)
            .unwrap()
            .normalize()
            .unwrap();
        OutputTemplate::from_step(&recipe, &recipe.steps[0], &SelectedFeatures::default()).unwrap()
    }

    fn config(yaml: &str) -> VariantConfig {
        VariantConfig::from_yaml_str(yaml).unwrap()
    }

    fn axis<'a>(axes: &'a Axes, key: &str) -> Option<&'a [String]> {
        axes.get(&NormalizedKey::from(key)).map(Vec::as_slice)
    }

    #[test]
    fn simple_and_compiler_axes() {
        let output = template(
            r#"
package: {name: foo, version: "1.0"}
requirements:
  build: [COMPILER_C c, cmake]
  host: [python, r-base, "libfoo PIN_SUBPACKAGE[x.x,True]"]
  run: [numpy]
"#,
        );
        let config = config(
            r#"
python: ["3.8", "3.9"]
numpy: ["1.21"]
c_compiler: [gcc]
c_compiler_version: ["11", "12"]
libfoo: ["1"]
MACOSX_DEPLOYMENT_TARGET: ["10.9"]
CFLAGS: ["-O2"]
"#,
        );

        let axes = collect_axes(&output, &config, &PlatformDefaults, Platform::Linux64);

        assert_eq!(axis(&axes, "target_platform"), Some(&["linux-64".to_string()][..]));
        assert_eq!(axis(&axes, "python").map(<[String]>::len), Some(2));
        assert_eq!(axis(&axes, "c_compiler_version").map(<[String]>::len), Some(2));
        assert_eq!(axis(&axes, "c_compiler").map(<[String]>::len), Some(1));
        // from the platform defaults
        assert_eq!(axis(&axes, "r_base"), Some(&["4.3".to_string()][..]));
        // run requirements and pins do not vary an output
        assert_eq!(axis(&axes, "numpy"), None);
        assert_eq!(axis(&axes, "libfoo"), None);
        assert_eq!(axis(&axes, "cmake"), None);
        // stubs depend on the platform
        assert!(axis(&axes, "CFLAGS").is_some());
        assert_eq!(axis(&axes, "MACOSX_DEPLOYMENT_TARGET"), None);
    }

    #[test]
    #[tracing_test::traced_test]
    fn constrained_specs_filter_candidates() {
        let output = template(
            r#"
package: {name: foo, version: "1.0"}
requirements:
  host: [python >=3.9, numpy <1.0, openssl 3.*]
"#,
        );
        let config = config(
            r#"
python: ["3.8", "3.9", "3.10"]
numpy: ["1.21", "1.22"]
openssl: ["1.1.1", "3"]
"#,
        );

        let axes = collect_axes(&output, &config, &PlatformDefaults, Platform::Linux64);

        assert_eq!(
            axis(&axes, "python"),
            Some(&["3.9".to_string(), "3.10".to_string()][..])
        );
        assert_eq!(axis(&axes, "openssl"), Some(&["3".to_string()][..]));
        assert_eq!(axis(&axes, "numpy"), None);
        assert!(logs_contain("does not satisfy `python >=3.9`"));
        assert!(logs_contain("not varying it"));
    }

    #[test]
    fn target_platform_comes_from_config() {
        assert_eq!(
            resolve_target_platform(&config("target_platform: [osx-arm64]"), Platform::Linux64),
            Platform::OsxArm64
        );
        assert_eq!(
            resolve_target_platform(&VariantConfig::default(), Platform::Win64),
            Platform::Win64
        );
    }
}
