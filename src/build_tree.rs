//! The build graph: one template per recipe step, sorted topologically and
//! expanded into one instance per variant.
use std::collections::{BTreeMap, HashMap};

use petgraph::graph::DiGraph;
use rattler_conda_types::Platform;
use recipe_matrix_variant_config::{VariantAssignment, VariantConfig};

use crate::{
    default_variant::DefaultVariantTable,
    error::ResolveError,
    output::{Env, OutputInstance, OutputTemplate},
    recipe::RecipeDocument,
    render::resolved_dependencies::RenderedOutput,
    tool_configuration::Configuration,
    variant_axes::{Axes, collect_axes, resolve_target_platform},
};

/// All outputs of a recipe, materialized for every applicable variant and
/// ordered so that each instance comes after the instances it depends on.
#[derive(Debug, Clone)]
pub struct BuildTree {
    pub templates: Vec<OutputTemplate>,
    pub instances: Vec<OutputInstance>,
    pub target_platform: Platform,
    /// Steps left out because `build.skip` is set
    pub skipped: Vec<String>,
}

impl BuildTree {
    /// Build the tree for a normalized recipe
    pub fn new(
        recipe: &RecipeDocument,
        config: &VariantConfig,
        defaults: &dyn DefaultVariantTable,
        configuration: &Configuration,
    ) -> Result<Self, ResolveError> {
        let target_platform = resolve_target_platform(config, configuration.target_platform);

        let mut templates = Vec::new();
        let mut skipped = Vec::new();
        for step in &recipe.steps {
            let template = OutputTemplate::from_step(recipe, step, &configuration.features)?;
            if template.build.skip {
                tracing::info!("Skipping {} (build.skip is set)", template.name);
                skipped.push(template.name);
                continue;
            }
            templates.push(template);
        }

        let intermediate = find_intermediate(&templates)?;
        let order = sort_templates(&templates, intermediate)?;

        if let Some(intermediate) = intermediate {
            let (build, host) = (
                templates[intermediate].requirements.build.clone(),
                templates[intermediate].requirements.host.clone(),
            );
            for (idx, template) in templates.iter_mut().enumerate() {
                if idx != intermediate {
                    template.requirements.inherit(Env::Build, &build);
                    template.requirements.inherit(Env::Host, &host);
                }
            }
        }

        let mut axes_per_template: HashMap<usize, Axes> = HashMap::new();
        let mut instances = Vec::new();
        for &idx in &order {
            let template = &templates[idx];
            let mut axes = collect_axes(template, config, defaults, target_platform);

            // vary along the axes of the outputs this one pins exactly, and
            // along the intermediate step's axes
            let inherited_from = template
                .requirements
                .all()
                .chain(&template.requirements.run_constrained)
                .filter(|spec| spec.is_exact_subpackage_pin())
                .filter_map(|spec| find_template(&templates, &spec.name))
                .chain(intermediate.filter(|&i| i != idx));
            for parent in inherited_from {
                if let Some(parent_axes) = axes_per_template.get(&parent) {
                    for (key, values) in parent_axes {
                        axes.entry(key.clone()).or_insert_with(|| values.clone());
                    }
                }
            }

            let expansion = config.expand(&axes)?;
            tracing::debug!(
                "{} expands to {} variant(s)",
                template.name,
                expansion.assignments.len()
            );
            for assignment in expansion.assignments {
                instances.push(template.apply_variant(
                    idx,
                    assignment,
                    &expansion.differentiating_keys,
                    defaults,
                    target_platform,
                )?);
            }
            axes_per_template.insert(idx, axes);
        }

        let mut tree = BuildTree {
            templates,
            instances,
            target_platform,
            skipped,
        };
        tree.link_parents(intermediate)?;
        Ok(tree)
    }

    pub fn template_of(&self, instance: &OutputInstance) -> &OutputTemplate {
        &self.templates[instance.template]
    }

    pub fn find_template(&self, name: &str) -> Option<usize> {
        find_template(&self.templates, name)
    }

    /// Whether `instance` needs `other` to be built first
    pub fn depends_on(&self, instance: usize, other: usize) -> bool {
        let this = &self.instances[instance];
        let other_name = self.templates[self.instances[other].template].name.as_str();
        this.parent_steps.contains(&other)
            || self.templates[this.template]
                .referenced_names()
                .contains(other_name)
    }

    pub fn rendered(&self) -> impl Iterator<Item = RenderedOutput<'_>> {
        self.instances
            .iter()
            .map(|instance| RenderedOutput::new(self.template_of(instance), instance))
    }

    /// Link every instance to the sibling variants its required steps and
    /// exact pins refer to.
    fn link_parents(&mut self, intermediate: Option<usize>) -> Result<(), ResolveError> {
        for idx in 0..self.instances.len() {
            let template = &self.templates[self.instances[idx].template];

            let mut targets = Vec::new();
            for step in &template.required_steps {
                let target = find_template(&self.templates, step).ok_or_else(|| {
                    ResolveError::UnknownRequiredStep {
                        step: step.clone(),
                        output: template.name.clone(),
                    }
                })?;
                targets.push(target);
            }
            for spec in template
                .requirements
                .all()
                .chain(&template.requirements.run_constrained)
                .filter(|spec| spec.is_exact_subpackage_pin())
            {
                let target = find_template(&self.templates, &spec.name).ok_or_else(|| {
                    ResolveError::UnresolvedSubpackage {
                        name: spec.name.clone(),
                        output: template.name.clone(),
                    }
                })?;
                targets.push(target);
            }
            if let Some(intermediate) = intermediate
                && intermediate != self.instances[idx].template
            {
                targets.push(intermediate);
            }

            let mut parents = Vec::new();
            for target in targets {
                if let Some(parent) = self.best_match(idx, target)
                    && !parents.contains(&parent)
                {
                    tracing::debug!(
                        "Linking {} ({}) to {} ({})",
                        template.name,
                        self.instances[idx].differentiating_values().join(", "),
                        self.templates[target].name,
                        self.instances[parent].differentiating_values().join(", "),
                    );
                    parents.push(parent);
                }
            }
            self.instances[idx].parent_steps = parents;
        }
        Ok(())
    }

    /// The instance of `target` sharing the most variant values with
    /// `instance`. Ties go to the lexicographically smallest assignment.
    fn best_match(&self, instance: usize, target: usize) -> Option<usize> {
        let variant = &self.instances[instance].variant;
        self.instances
            .iter()
            .enumerate()
            .filter(|(idx, candidate)| *idx != instance && candidate.template == target)
            .max_by(|(_, a), (_, b)| {
                overlap(variant, &a.variant)
                    .cmp(&overlap(variant, &b.variant))
                    .then_with(|| b.variant.cmp(&a.variant))
            })
            .map(|(idx, _)| idx)
    }
}

/// Number of keys both assignments set to the same value
pub fn overlap(a: &VariantAssignment, b: &VariantAssignment) -> usize {
    b.iter()
        .filter(|(key, value)| a.get(*key) == Some(*value))
        .count()
}

fn find_template(templates: &[OutputTemplate], name: &str) -> Option<usize> {
    templates.iter().position(|t| t.name == name)
}

fn find_intermediate(templates: &[OutputTemplate]) -> Result<Option<usize>, ResolveError> {
    let mut intermediate: Option<usize> = None;
    for (idx, template) in templates.iter().enumerate() {
        if !template.is_intermediate() {
            continue;
        }
        if let Some(first) = intermediate {
            return Err(ResolveError::MultipleIntermediateSteps {
                first: templates[first].name.clone(),
                second: template.name.clone(),
            });
        }
        intermediate = Some(idx);
    }
    Ok(intermediate)
}

/// Sort the templates topologically. Edges go from a step to every step
/// naming it in a requirement or in `required_steps`; the intermediate step
/// comes before all others.
fn sort_templates(
    templates: &[OutputTemplate],
    intermediate: Option<usize>,
) -> Result<Vec<usize>, ResolveError> {
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes = (0..templates.len())
        .map(|idx| graph.add_node(idx))
        .collect::<Vec<_>>();
    let name_to_idx = templates
        .iter()
        .enumerate()
        .map(|(idx, t)| (t.name.as_str(), idx))
        .collect::<BTreeMap<_, _>>();

    for (idx, template) in templates.iter().enumerate() {
        for step in &template.required_steps {
            if !name_to_idx.contains_key(step.as_str()) {
                return Err(ResolveError::UnknownRequiredStep {
                    step: step.clone(),
                    output: template.name.clone(),
                });
            }
        }

        for name in template.referenced_names() {
            if name == template.name {
                continue;
            }
            if let Some(&dependency) = name_to_idx.get(name) {
                tracing::debug!("{} depends on {}", template.name, name);
                graph.add_edge(nodes[dependency], nodes[idx], ());
            }
        }

        if let Some(intermediate) = intermediate
            && intermediate != idx
        {
            graph.add_edge(nodes[intermediate], nodes[idx], ());
        }
    }

    let sorted = petgraph::algo::toposort(&graph, None).map_err(|cycle| {
        ResolveError::Cycle(templates[graph[cycle.node_id()]].name.clone())
    })?;

    Ok(sorted.into_iter().map(|node| graph[node]).collect())
}
