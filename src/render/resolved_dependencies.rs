//! Human readable and JSON views of materialized outputs
use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::output::{Env, OutputInstance, OutputTemplate};
use crate::render::spec::RequirementSpec;

/// A materialized output together with the template it was made from
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RenderedOutput<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub build_number: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_string: Option<&'a str>,
    #[serde(flatten)]
    pub instance: &'a OutputInstance,
}

impl<'a> RenderedOutput<'a> {
    pub fn new(template: &'a OutputTemplate, instance: &'a OutputInstance) -> Self {
        Self {
            name: &template.name,
            version: &template.version,
            build_number: template.build_number,
            build_string: instance
                .final_build_id
                .as_deref()
                .or(template.build_string.as_deref()),
            instance,
        }
    }
}

fn short_channel(channel: &str) -> String {
    channel
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(channel)
        .to_string()
}

/// What goes into the "Version requirement" column
fn render_requirement(spec: &RequirementSpec) -> String {
    if spec.is_transitive {
        return String::new();
    }

    let requirement = spec.version_requirement();
    match &spec.pin {
        Some(pin) if requirement.is_empty() => format!("({})", pin.label()),
        Some(pin) => format!("{requirement} ({})", pin.label()),
        None => requirement,
    }
}

pub(crate) fn requirements_table(specs: &[RequirementSpec]) -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Dependency",
            "Version requirement",
            "Selected",
            "Build",
            "Channel",
        ]);

    let (explicit, transitive): (Vec<_>, Vec<_>) =
        specs.iter().partition(|spec| !spec.is_transitive);

    for spec in explicit.into_iter().chain(transitive) {
        let (version, build) = spec
            .final_version
            .as_ref()
            .map(|v| (v.version.clone(), v.build.clone()))
            .unwrap_or_default();

        table.add_row(vec![
            spec.final_name().to_string(),
            render_requirement(spec),
            version,
            build,
            spec.channel.as_deref().map(short_channel).unwrap_or_default(),
        ]);
    }

    table
}

impl Display for RenderedOutput<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Output: {} {} BN: {}",
            self.name, self.version, self.build_number
        )?;

        let variant = self
            .instance
            .differentiating_keys
            .iter()
            .filter_map(|key| {
                self.instance
                    .variant
                    .get(key)
                    .map(|value| format!("{key}: {value}"))
            })
            .collect::<Vec<_>>();
        if !variant.is_empty() {
            writeln!(f, "Variant: {}", variant.join(", "))?;
        }

        if let Some(build_string) = self.build_string {
            writeln!(f, "Build string: {build_string}")?;
        }

        for env in [Env::Build, Env::Host, Env::Run] {
            let specs = self.instance.requirements.get(env);
            if specs.is_empty() {
                continue;
            }
            let title = match env {
                Env::Build => "Build",
                Env::Host => "Host",
                _ => "Run",
            };
            writeln!(f, "{title}:")?;
            writeln!(f, "{}", requirements_table(specs))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn resolved(raw: &str, version: &str, build: &str) -> RequirementSpec {
        let mut spec = RequirementSpec::from_str(raw).unwrap();
        spec.set_resolved(version, build, "https://conda.anaconda.org/conda-forge/");
        spec
    }

    #[test]
    fn channels_are_shortened() {
        assert_eq!(
            short_channel("https://conda.anaconda.org/conda-forge/"),
            "conda-forge"
        );
        assert_eq!(short_channel("local"), "local");
    }

    #[test]
    fn requirement_column() {
        let mut pinned = RequirementSpec::from_str("libfoo PIN_SUBPACKAGE[x.x,False]").unwrap();
        assert_eq!(render_requirement(&pinned), "PIN_SUBPACKAGE[x.x,False] (PS)");
        pinned.final_spec = "libfoo 1.2.*".to_string();
        assert_eq!(render_requirement(&pinned), "1.2.* (PS)");

        let transitive = RequirementSpec::transitive("libzlib", "1.2.13", "h0_0", "conda-forge");
        assert_eq!(render_requirement(&transitive), "");
    }

    #[test]
    fn table_lists_transitive_packages_last() {
        let specs = vec![
            RequirementSpec::transitive("libzlib", "1.2.13", "hd590300_5", "conda-forge"),
            resolved("python 3.8.*", "3.8.18", "h0_0"),
        ];

        insta::assert_snapshot!(requirements_table(&specs).to_string(), @r"
        ╭────────────┬─────────────────────┬──────────┬────────────┬─────────────╮
        │ Dependency ┆ Version requirement ┆ Selected ┆ Build      ┆ Channel     │
        ╞════════════╪═════════════════════╪══════════╪════════════╪═════════════╡
        │ python     ┆ 3.8.*               ┆ 3.8.18   ┆ h0_0       ┆ conda-forge │
        │ libzlib    ┆                     ┆ 1.2.13   ┆ hd590300_5 ┆ conda-forge │
        ╰────────────┴─────────────────────┴──────────┴────────────┴─────────────╯
        ");
    }
}
