//! Run exports: constraints a dependency pushes onto the packages built
//! against it.
use std::{
    collections::{BTreeMap, HashMap},
    path::PathBuf,
    str::FromStr,
};

use rattler_conda_types::package::{PackageFile, RunExportsJson};
use recipe_matrix_types::{NormalizedKey, apply_pin_expressions};
use recipe_matrix_variant_config::PinRunAsBuild;

use crate::{
    error::ResolveError,
    output::{Env, Requirements},
    render::{solver::PackageIndex, spec::RequirementSpec},
};

/// Where the run exports of a resolved package come from
pub trait RunExportSource {
    fn lookup(&self, name: &str, version: &str, build: &str) -> Option<RunExportsJson>;
}

/// Reads `info/run_exports.json` of packages extracted in package cache
/// directories (`<cache>/<name>-<version>-<build>`).
#[derive(Debug, Clone, Default)]
pub struct PackageCacheRunExports {
    cache_dirs: Vec<PathBuf>,
}

impl PackageCacheRunExports {
    pub fn new(cache_dirs: Vec<PathBuf>) -> Self {
        Self { cache_dirs }
    }
}

impl RunExportSource for PackageCacheRunExports {
    fn lookup(&self, name: &str, version: &str, build: &str) -> Option<RunExportsJson> {
        self.cache_dirs.iter().find_map(|dir| {
            let package_dir = dir.join(format!("{name}-{version}-{build}"));
            if !package_dir.join(RunExportsJson::package_path()).is_file() {
                return None;
            }

            match RunExportsJson::from_package_directory(&package_dir) {
                Ok(run_exports) => Some(run_exports),
                Err(err) => {
                    tracing::warn!(
                        "Could not read run exports of {}: {err}",
                        package_dir.display()
                    );
                    None
                }
            }
        })
    }
}

/// Run exports keyed by package name, independent of version and build
#[derive(Debug, Clone, Default)]
pub struct StaticRunExports(HashMap<String, RunExportsJson>);

impl StaticRunExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, run_exports: RunExportsJson) {
        self.0.insert(name.into(), run_exports);
    }
}

impl RunExportSource for StaticRunExports {
    fn lookup(&self, name: &str, _version: &str, _build: &str) -> Option<RunExportsJson> {
        self.0.get(name).cloned()
    }
}

impl RunExportSource for PackageIndex {
    fn lookup(&self, name: &str, version: &str, build: &str) -> Option<RunExportsJson> {
        self.find(name, version, build)
            .and_then(|package| package.run_exports.clone())
    }
}

/// The first source that knows the package wins
impl RunExportSource for Vec<Box<dyn RunExportSource>> {
    fn lookup(&self, name: &str, version: &str, build: &str) -> Option<RunExportsJson> {
        self.iter()
            .find_map(|source| source.lookup(name, version, build))
    }
}

/// Insert `spec` into `target`, replacing an entry with the same name in place
pub fn append_or_replace(target: &mut Vec<RequirementSpec>, mut spec: RequirementSpec) {
    spec.from_run_export = true;
    match target
        .iter()
        .position(|existing| existing.final_name() == spec.final_name())
    {
        Some(idx) => target[idx] = spec,
        None => target.push(spec),
    }
}

/// Settings that shape run-export propagation for one output
#[derive(Debug, Clone, Copy)]
pub struct RunExportContext<'a> {
    pub output: &'a str,
    pub ignore_run_exports: &'a [String],
    pub pin_run_as_build: &'a BTreeMap<NormalizedKey, PinRunAsBuild>,
}

/// Propagate the run exports of the solved `env` (build or host) into the
/// later environments.
///
/// Strong exports of build go to host and run, weak ones only to host.
/// Both kinds of host exports go to run.
pub fn propagate_run_exports(
    requirements: &mut Requirements,
    env: Env,
    context: RunExportContext<'_>,
    source: &dyn RunExportSource,
) -> Result<(), ResolveError> {
    let mut strong = Vec::new();
    let mut weak = Vec::new();

    for spec in requirements.get(env) {
        if spec.is_transitive {
            continue;
        }
        let name = spec.final_name();
        if context.ignore_run_exports.iter().any(|i| i == name) {
            tracing::debug!("Ignoring run exports of {name}");
            continue;
        }
        let Some(resolved) = &spec.final_version else {
            continue;
        };

        if let Some(pin) = context.pin_run_as_build.get(&NormalizedKey::from(name)) {
            let range = apply_pin_expressions(
                &resolved.version,
                pin.min_pin.as_ref(),
                pin.max_pin.as_ref(),
            )
            .map_err(|source| ResolveError::PinExpression {
                output: context.output.to_string(),
                spec: spec.raw.clone(),
                source,
            })?;
            weak.push(format!("{name} {range}").trim_end().to_string());
            continue;
        }

        if let Some(run_exports) = source.lookup(name, &resolved.version, &resolved.build) {
            tracing::debug!("Run exports of {name}: {run_exports:?}");
            strong.extend(run_exports.strong);
            weak.extend(run_exports.weak);
        }
    }

    let parse = |specs: Vec<String>| {
        specs
            .iter()
            .map(|s| RequirementSpec::from_str(s))
            .collect::<Result<Vec<_>, _>>()
    };
    let strong = parse(strong)?;
    let weak = parse(weak)?;

    let targets: (&[Env], &[Env]) = match env {
        Env::Build => (&[Env::Host, Env::Run], &[Env::Host]),
        Env::Host => (&[Env::Run], &[Env::Run]),
        _ => (&[], &[]),
    };

    for target in targets.0 {
        for spec in &strong {
            append_or_replace(requirements.get_mut(*target), spec.clone());
        }
    }
    for target in targets.1 {
        for spec in &weak {
            append_or_replace(requirements.get_mut(*target), spec.clone());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(s: &str) -> RequirementSpec {
        RequirementSpec::from_str(s).unwrap()
    }

    fn resolved(s: &str, version: &str) -> RequirementSpec {
        let mut spec = spec(s);
        spec.set_resolved(version, "h0_0", "conda-forge");
        spec
    }

    fn finals(specs: &[RequirementSpec]) -> Vec<&str> {
        specs.iter().map(|s| s.final_spec.as_str()).collect()
    }

    fn exports(weak: &[&str], strong: &[&str]) -> RunExportsJson {
        RunExportsJson {
            weak: weak.iter().map(|s| s.to_string()).collect(),
            strong: strong.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn context<'a>(
        ignore: &'a [String],
        pin_run_as_build: &'a BTreeMap<NormalizedKey, PinRunAsBuild>,
    ) -> RunExportContext<'a> {
        RunExportContext {
            output: "foo",
            ignore_run_exports: ignore,
            pin_run_as_build,
        }
    }

    #[test]
    fn strong_host_export_replaces_in_place() {
        let mut source = StaticRunExports::new();
        source.insert("zlib", exports(&[], &["libzlib 1.*"]));

        let mut requirements = Requirements {
            host: vec![resolved("zlib", "1.2.13")],
            run: vec![spec("python"), spec("libzlib"), spec("six")],
            ..Default::default()
        };

        propagate_run_exports(
            &mut requirements,
            Env::Host,
            context(&[], &BTreeMap::new()),
            &source,
        )
        .unwrap();

        assert_eq!(finals(&requirements.run), vec!["python", "libzlib 1.*", "six"]);
        assert!(requirements.run[1].from_run_export);
        assert!(!requirements.run[0].from_run_export);
    }

    #[test]
    fn build_exports_follow_strength() {
        let mut source = StaticRunExports::new();
        source.insert("gcc_linux-64", exports(&["libgcc-ng >=12"], &["libstdcxx-ng >=12"]));

        let mut requirements = Requirements {
            build: vec![resolved("gcc_linux-64", "12.3.0")],
            host: vec![spec("python")],
            ..Default::default()
        };

        propagate_run_exports(
            &mut requirements,
            Env::Build,
            context(&[], &BTreeMap::new()),
            &source,
        )
        .unwrap();

        assert_eq!(
            finals(&requirements.host),
            vec!["python", "libstdcxx-ng >=12", "libgcc-ng >=12"]
        );
        assert_eq!(finals(&requirements.run), vec!["libstdcxx-ng >=12"]);
    }

    #[test]
    fn ignored_and_transitive_packages_export_nothing() {
        let mut source = StaticRunExports::new();
        source.insert("zlib", exports(&["libzlib"], &[]));
        source.insert("openssl", exports(&["openssl >=3"], &[]));

        let mut requirements = Requirements {
            host: vec![
                resolved("zlib", "1.2.13"),
                RequirementSpec::transitive("openssl", "3.1.0", "h0_0", "conda-forge"),
            ],
            ..Default::default()
        };

        propagate_run_exports(
            &mut requirements,
            Env::Host,
            context(&["zlib".to_string()], &BTreeMap::new()),
            &source,
        )
        .unwrap();

        assert!(requirements.run.is_empty());
    }

    #[test]
    fn pin_run_as_build_overrides_the_source() {
        let mut source = StaticRunExports::new();
        source.insert("python", exports(&[], &["python_abi 3.9.* *_cp39"]));

        let mut pins = BTreeMap::new();
        pins.insert(
            NormalizedKey::from("python"),
            PinRunAsBuild {
                min_pin: Some("x.x".parse().unwrap()),
                max_pin: Some("x.x".parse().unwrap()),
            },
        );

        let mut requirements = Requirements {
            host: vec![resolved("python 3.9.*", "3.9.7")],
            ..Default::default()
        };

        propagate_run_exports(&mut requirements, Env::Host, context(&[], &pins), &source)
            .unwrap();

        assert_eq!(finals(&requirements.run), vec!["python >=3.9,<3.10.0a0"]);
    }

    #[test]
    fn package_cache_lookup() {
        let cache = tempfile::tempdir().unwrap();
        let info = cache.path().join("zlib-1.2.13-hd590300_5").join("info");
        fs_err::create_dir_all(&info).unwrap();
        fs_err::write(
            info.join("run_exports.json"),
            r#"{"weak": ["libzlib >=1.2.13,<2.0.0a0"]}"#,
        )
        .unwrap();

        let source = PackageCacheRunExports::new(vec![cache.path().to_path_buf()]);
        let found = source.lookup("zlib", "1.2.13", "hd590300_5").unwrap();
        assert_eq!(found.weak, vec!["libzlib >=1.2.13,<2.0.0a0".to_string()]);
        assert!(found.strong.is_empty());

        assert!(source.lookup("zlib", "1.2.12", "hd590300_5").is_none());
    }
}
