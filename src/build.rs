//! The solve driver: walks the build tree in order and turns every instance
//! into a fully resolved output.
use std::collections::BTreeSet;

use itertools::Itertools;
use recipe_matrix_types::NormalizedKey;
use recipe_matrix_variant_config::{VariantAssignment, VariantConfig};
use serde::Serialize;

use crate::{
    build_tree::BuildTree,
    default_variant::DefaultVariantTable,
    error::ResolveError,
    hash,
    output::{Env, Requirements},
    recipe::RecipeDocument,
    render::{
        resolved_dependencies::RenderedOutput,
        run_exports::{RunExportContext, RunExportSource, propagate_run_exports},
        solver::DependencySolver,
        spec::{RequirementSpec, SubpackageRef},
    },
    tool_configuration::{Configuration, ContinueOnFailure},
};

/// Everything a resolver run needs, passed explicitly instead of living in
/// global state
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub configuration: &'a Configuration,
    pub variant_config: &'a VariantConfig,
    pub defaults: &'a dyn DefaultVariantTable,
    pub solver: &'a dyn DependencySolver,
    pub run_exports: &'a dyn RunExportSource,
}

/// An output that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOutput {
    pub name: String,
    pub variant: VariantAssignment,
    pub reason: String,
}

/// Outcome of resolving a build tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    /// Indices of the instances that were fully resolved, in order
    pub finalized: Vec<usize>,
    /// Steps that were not considered because `build.skip` is set
    pub skipped: Vec<String>,
    pub failed: Vec<FailedOutput>,
    /// How often the recipe was resolved again on request of the executor
    pub rebuilds: usize,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Log a summary of the failed outputs
    pub fn log_failures(&self) {
        if self.failed.is_empty() {
            return;
        }

        tracing::error!("{} output(s) could not be resolved:", self.failed.len());
        for failed in &self.failed {
            let variant = failed
                .variant
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .join(", ");
            tracing::error!(" - {} ({variant}): {}", failed.name, failed.reason);
        }
    }
}

/// Resolve every instance of `tree` in order.
///
/// With [`ContinueOnFailure::Yes`] a failing instance is recorded, every
/// instance depending on it is recorded as failed too, and independent
/// instances are still resolved. Otherwise the first error is returned.
pub fn resolve_build_tree(
    tree: &mut BuildTree,
    context: ResolveContext<'_>,
) -> Result<BuildReport, ResolveError> {
    let mut report = BuildReport {
        skipped: tree.skipped.clone(),
        ..Default::default()
    };
    let mut finalized = vec![false; tree.instances.len()];
    let mut failed = BTreeSet::new();

    for idx in 0..tree.instances.len() {
        let name = tree.template_of(&tree.instances[idx]).name.clone();

        if failed.iter().any(|&other| tree.depends_on(idx, other)) {
            tracing::warn!("Skipping {name} because a dependency failed");
            report.failed.push(FailedOutput {
                name,
                variant: tree.instances[idx].variant.clone(),
                reason: "dependency failed".to_string(),
            });
            failed.insert(idx);
            continue;
        }

        match finalize_instance(tree, idx, &finalized, context) {
            Ok(()) => {
                finalized[idx] = true;
                report.finalized.push(idx);
            }
            Err(err) if context.configuration.continue_on_failure == ContinueOnFailure::Yes => {
                tracing::error!("Failed to resolve {name}: {err}");
                report.failed.push(FailedOutput {
                    name,
                    variant: tree.instances[idx].variant.clone(),
                    reason: err.to_string(),
                });
                failed.insert(idx);
            }
            Err(err) => return Err(err),
        }
    }

    Ok(report)
}

/// Siblings a `PIN_SUBPACKAGE` of instance `idx` may refer to: linked
/// parents first, then other finalized instances, then every template
/// without a build id.
fn subpackage_refs<'a>(tree: &'a BuildTree, idx: usize, finalized: &[bool]) -> Vec<SubpackageRef<'a>> {
    let instance = &tree.instances[idx];
    let finalized_ref = |i: usize| {
        let other = &tree.instances[i];
        let template = tree.template_of(other);
        SubpackageRef {
            name: &template.name,
            version: &template.version,
            build_id: other.final_build_id.as_deref(),
        }
    };

    let parents = instance
        .parent_steps
        .iter()
        .copied()
        .filter(|&i| finalized[i])
        .map(finalized_ref);
    let others = (0..tree.instances.len())
        .filter(|&i| finalized[i] && !instance.parent_steps.contains(&i))
        .map(finalized_ref);
    let templates = tree.templates.iter().map(|template| SubpackageRef {
        name: &template.name,
        version: &template.version,
        build_id: None,
    });

    parents.chain(others).chain(templates).collect()
}

fn eval_subpackage_pins(
    specs: &mut [RequirementSpec],
    refs: &[SubpackageRef<'_>],
    output: &str,
) -> Result<(), ResolveError> {
    for spec in specs {
        spec.eval_pin_subpackage(refs)
            .map_err(|err| ResolveError::from_pin(output, &spec.raw, err))?;
    }
    Ok(())
}

fn eval_compatible_pins(
    requirements: &mut Requirements,
    env: Env,
    output: &str,
) -> Result<(), ResolveError> {
    let build = requirements.build.clone();
    let host = requirements.host.clone();
    for spec in requirements.get_mut(env) {
        spec.eval_pin_compatible(&build, &host)
            .map_err(|err| ResolveError::from_pin(output, &spec.raw, err))?;
    }
    Ok(())
}

/// Solve one environment and record the result on the specs
fn solve_env(
    requirements: &mut Requirements,
    env: Env,
    output: &str,
    tree: &BuildTree,
    context: ResolveContext<'_>,
) -> Result<(), ResolveError> {
    let specs = requirements.get_mut(env);
    if specs.is_empty() {
        return Ok(());
    }

    let platform = match env {
        Env::Build => context.configuration.build_platform,
        _ => tree.target_platform,
    };
    let spec_strings = specs
        .iter()
        .map(|spec| spec.final_spec.clone())
        .collect::<Vec<_>>();

    let transaction = context
        .solver
        .solve(
            &spec_strings,
            platform,
            &context.configuration.package_cache_dirs,
        )
        .map_err(|source| ResolveError::Solve {
            output: output.to_string(),
            env,
            source,
        })?;

    for spec in specs.iter_mut() {
        if let Some(package) = transaction.find(spec.final_name()) {
            spec.set_resolved(&package.version, &package.build, &package.channel);
        }
    }

    let requested = specs
        .iter()
        .map(|spec| spec.final_name().to_string())
        .collect::<BTreeSet<_>>();
    for package in &transaction.packages {
        if !requested.contains(&package.name) {
            specs.push(RequirementSpec::transitive(
                &package.name,
                &package.version,
                &package.build,
                &package.channel,
            ));
        }
    }

    Ok(())
}

/// Resolve all environments of instance `idx` and capture its build id
fn finalize_instance(
    tree: &mut BuildTree,
    idx: usize,
    finalized: &[bool],
    context: ResolveContext<'_>,
) -> Result<(), ResolveError> {
    let mut requirements = std::mem::take(&mut tree.instances[idx].requirements);
    let result = resolve_requirements(tree, idx, finalized, &mut requirements, context);
    tree.instances[idx].requirements = requirements;
    let variant = result?;

    let template = &tree.templates[tree.instances[idx].template];
    let build_id = match &template.build_string {
        Some(build_string) => build_string.clone(),
        None => hash::build_id(&variant, template.build_number),
    };

    // the output's own run exports may pin the output itself
    let mut run_exports = template.build.run_exports.clone();
    let own = SubpackageRef {
        name: &template.name,
        version: &template.version,
        build_id: Some(&build_id),
    };
    let mut refs = vec![own];
    refs.extend(subpackage_refs(tree, idx, finalized));
    eval_subpackage_pins(&mut run_exports, &refs, &template.name)?;
    if template.is_static {
        run_exports.retain(|spec| !template.name.starts_with(spec.final_name()));
    }

    tracing::info!("Finalized {} {} {build_id}", template.name, template.version);

    let instance = &mut tree.instances[idx];
    instance.variant = variant;
    instance.run_exports = run_exports;
    instance.final_build_id = Some(build_id);
    Ok(())
}

/// Returns the variant of the instance, extended with the solved python
/// version when the variant did not set one.
fn resolve_requirements(
    tree: &BuildTree,
    idx: usize,
    finalized: &[bool],
    requirements: &mut Requirements,
    context: ResolveContext<'_>,
) -> Result<VariantAssignment, ResolveError> {
    let instance = &tree.instances[idx];
    let template = tree.template_of(instance);
    let output = template.name.as_str();
    let refs = subpackage_refs(tree, idx, finalized);
    let run_export_context = RunExportContext {
        output,
        ignore_run_exports: &template.build.ignore_run_exports,
        pin_run_as_build: &context.variant_config.pin_run_as_build,
    };

    for env in Env::SOLVED {
        tracing::info!("Finalizing {env} for {output}");

        eval_subpackage_pins(requirements.get_mut(env), &refs, output)?;
        if env == Env::Run {
            eval_compatible_pins(requirements, env, output)?;
        }
        for spec in requirements.get_mut(env) {
            spec.loosen_spec();
        }

        if context.configuration.render_only {
            continue;
        }

        solve_env(requirements, env, output, tree, context)?;
        if env != Env::Run {
            propagate_run_exports(requirements, env, run_export_context, context.run_exports)?;
        }
    }

    eval_subpackage_pins(&mut requirements.run_constrained, &refs, output)?;
    eval_compatible_pins(requirements, Env::RunConstrained, output)?;
    for spec in &mut requirements.run_constrained {
        spec.loosen_spec();
    }

    let mut variant = instance.variant.clone();
    let python = NormalizedKey::from("python");
    if !variant.contains_key(&python)
        && let Some(resolved) = requirements
            .host
            .iter()
            .chain(&requirements.build)
            .filter(|spec| spec.final_name() == "python")
            .find_map(|spec| spec.final_version.as_ref())
    {
        variant.insert(python, resolved.version.clone());
    }

    Ok(variant)
}

/// What a downstream builder reports after handling an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    /// The builder changed something (e.g. published a package the recipe
    /// depends on) and wants the recipe resolved again
    RebuildRequested,
}

/// Consumes resolved outputs in order
pub trait StepExecutor {
    fn execute(&mut self, output: &RenderedOutput<'_>) -> miette::Result<StepStatus>;
}

/// Build the tree for `recipe` and resolve it
pub fn resolve_recipe(
    recipe: &RecipeDocument,
    context: ResolveContext<'_>,
) -> Result<(BuildTree, BuildReport), ResolveError> {
    let mut tree = BuildTree::new(
        recipe,
        context.variant_config,
        context.defaults,
        context.configuration,
    )?;
    let report = resolve_build_tree(&mut tree, context)?;
    Ok((tree, report))
}

/// Resolve `recipe` and hand every finalized output to `executor`. When the
/// executor asks for a rebuild, the recipe is resolved again from scratch,
/// at most `configuration.max_rebuilds` times.
pub fn run_with_rebuild(
    recipe: &RecipeDocument,
    context: ResolveContext<'_>,
    executor: &mut dyn StepExecutor,
) -> miette::Result<(BuildTree, BuildReport)> {
    let max_rebuilds = context.configuration.max_rebuilds;
    let mut rebuilds = 0;

    'resolve: loop {
        let (tree, mut report) = resolve_recipe(recipe, context)?;
        report.rebuilds = rebuilds;

        for &idx in &report.finalized {
            let output = RenderedOutput::new(tree.template_of(&tree.instances[idx]), &tree.instances[idx]);
            if executor.execute(&output)? == StepStatus::RebuildRequested {
                if rebuilds < max_rebuilds {
                    rebuilds += 1;
                    tracing::info!(
                        "{} requested a rebuild, resolving the recipe again ({rebuilds}/{max_rebuilds})",
                        output.name
                    );
                    continue 'resolve;
                }
                tracing::warn!(
                    "{} requested another rebuild, but the limit of {max_rebuilds} is reached",
                    output.name
                );
            }
        }

        return Ok((tree, report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        default_variant::PlatformDefaults,
        render::{
            run_exports::StaticRunExports,
            solver::{PackageEntry, PackageIndex},
        },
    };
    use pretty_assertions::assert_eq;
    use rattler_conda_types::Platform;

    fn entry(name: &str, version: &str, depends: &[&str]) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            build: "h0_0".to_string(),
            build_number: 0,
            channel: "conda-forge".to_string(),
            subdir: None,
            depends: depends.iter().map(|d| d.to_string()).collect(),
            run_exports: None,
        }
    }

    #[test]
    fn python_is_added_to_the_variant() {
        let recipe = RecipeDocument::from_yaml_str(
            r#"
package: {name: foo, version: "1.0"}
requirements:
  host: [cython]
"#,
        )
        .unwrap()
        .normalize()
        .unwrap();

        let configuration = Configuration::for_platform(Platform::Linux64);
        let variant_config = VariantConfig::default();
        let index = PackageIndex::new(vec![
            entry("cython", "3.0.0", &["python >=3.8"]),
            entry("python", "3.11.4", &[]),
        ]);
        let run_exports = StaticRunExports::new();
        let context = ResolveContext {
            configuration: &configuration,
            variant_config: &variant_config,
            defaults: &PlatformDefaults,
            solver: &index,
            run_exports: &run_exports,
        };

        let (tree, report) = resolve_recipe(&recipe, context).unwrap();
        assert!(report.is_success());
        assert_eq!(report.finalized, vec![0]);

        let instance = &tree.instances[0];
        let host = &instance.requirements.host;
        assert_eq!(host.len(), 2);
        assert!(host[1].is_transitive);
        assert_eq!(
            instance.variant.get(&NormalizedKey::from("python")).map(String::as_str),
            Some("3.11.4")
        );
        assert!(instance.final_build_id.as_deref().unwrap().starts_with("py311h"));
    }
}
