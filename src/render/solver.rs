//! The dependency solver seam and a small index-backed solver.
use std::{
    collections::VecDeque,
    path::{Path, PathBuf},
    str::FromStr,
};

use comfy_table::Table;
use indexmap::IndexMap;
use miette::Diagnostic;
use rattler_conda_types::{
    MatchSpec, ParseStrictness, Platform, Version, package::RunExportsJson,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The solver could not produce an environment for a set of specs
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
#[error("{message}")]
#[diagnostic(code(recipe_matrix::solver))]
pub struct SolveFailure {
    pub message: String,
}

impl SolveFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A package as it is known to the solver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
    #[serde(alias = "build_string")]
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    pub channel: String,
    /// `None` or `noarch` means the package installs on every platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_exports: Option<RunExportsJson>,
}

impl PackageEntry {
    fn installable_on(&self, platform: Platform) -> bool {
        match self.subdir.as_deref() {
            None | Some("noarch") => true,
            Some(subdir) => subdir == platform.as_str(),
        }
    }

    /// Whether the version and build of this package satisfy `spec`
    pub fn matches(&self, spec: &MatchSpec) -> bool {
        let version_ok = match &spec.version {
            None => true,
            Some(vs) => Version::from_str(&self.version).is_ok_and(|v| vs.matches(&v)),
        };
        version_ok && spec.build.as_ref().is_none_or(|b| b.matches(&self.build))
    }
}

/// Packages picked by the solver, in the order they were selected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub packages: Vec<PackageEntry>,
}

impl Transaction {
    pub fn find(&self, name: &str) -> Option<&PackageEntry> {
        self.packages.iter().find(|p| p.name == name)
    }
}

/// Turns a list of match specs into a concrete set of packages
pub trait DependencySolver {
    fn solve(
        &self,
        specs: &[String],
        platform: Platform,
        package_caches: &[PathBuf],
    ) -> Result<Transaction, SolveFailure>;
}

/// The name a spec string asks for
pub(crate) fn spec_name(spec: &str) -> &str {
    let spec = spec.trim();
    let end = spec
        .find(|c: char| c.is_whitespace() || "<>=!~[".contains(c))
        .unwrap_or(spec.len());
    &spec[..end]
}

/// A fixed set of packages, read from a JSON or YAML file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndex {
    pub packages: Vec<PackageEntry>,
}

impl PackageIndex {
    pub fn new(packages: Vec<PackageEntry>) -> Self {
        Self { packages }
    }

    pub fn from_path(path: &Path) -> miette::Result<Self> {
        use miette::IntoDiagnostic;

        let content = fs_err::read_to_string(path).into_diagnostic()?;
        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).into_diagnostic()
        } else {
            serde_yaml::from_str(&content).into_diagnostic()
        }
    }

    pub fn find(&self, name: &str, version: &str, build: &str) -> Option<&PackageEntry> {
        self.packages
            .iter()
            .find(|p| p.name == name && p.version == version && p.build == build)
    }

    /// Highest version (then highest build number) matching `spec`
    fn best_candidate(
        &self,
        name: &str,
        spec: &MatchSpec,
        platform: Platform,
    ) -> Option<&PackageEntry> {
        self.packages
            .iter()
            .filter(|p| p.name == name && p.installable_on(platform) && p.matches(spec))
            .filter_map(|p| Version::from_str(&p.version).ok().map(|v| (v, p)))
            .max_by(|(va, a), (vb, b)| va.cmp(vb).then(a.build_number.cmp(&b.build_number)))
            .map(|(_, p)| p)
    }
}

impl DependencySolver for PackageIndex {
    /// Greedy resolution: every requested name gets the best matching
    /// package, dependencies are added breadth first. A later spec that
    /// disagrees with an earlier pick is a conflict.
    fn solve(
        &self,
        specs: &[String],
        platform: Platform,
        _package_caches: &[PathBuf],
    ) -> Result<Transaction, SolveFailure> {
        let mut selected: IndexMap<String, PackageEntry> = IndexMap::new();
        let mut queue = specs.iter().cloned().collect::<VecDeque<_>>();

        while let Some(raw) = queue.pop_front() {
            let spec = MatchSpec::from_str(&raw, ParseStrictness::Lenient)
                .map_err(|e| SolveFailure::new(format!("invalid spec `{raw}`: {e}")))?;
            let name = spec_name(&raw).to_string();

            if let Some(existing) = selected.get(&name) {
                if !existing.matches(&spec) {
                    return Err(SolveFailure::new(format!(
                        "`{raw}` conflicts with {}-{}-{}",
                        existing.name, existing.version, existing.build
                    )));
                }
                continue;
            }

            let package = self.best_candidate(&name, &spec, platform).ok_or_else(|| {
                SolveFailure::new(format!("nothing provides `{raw}` for {platform}"))
            })?;

            queue.extend(package.depends.iter().cloned());
            selected.insert(name, package.clone());
        }

        let transaction = Transaction {
            packages: selected.into_values().collect(),
        };
        print_as_table(&transaction.packages);
        Ok(transaction)
    }
}

fn print_as_table(packages: &[PackageEntry]) {
    if packages.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL_CONDENSED)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS);
    table.set_header(vec!["Package", "Version", "Build", "Channel"]);

    for package in packages {
        table.add_row(vec![
            package.name.clone(),
            package.version.clone(),
            package.build.clone(),
            package.channel.clone(),
        ]);
    }

    tracing::debug!("\n{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn entry(name: &str, version: &str, build_number: u64, depends: &[&str]) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            build: format!("h0_{build_number}"),
            build_number,
            channel: "conda-forge".to_string(),
            subdir: None,
            depends: depends.iter().map(|d| d.to_string()).collect(),
            run_exports: None,
        }
    }

    fn index() -> PackageIndex {
        PackageIndex::new(vec![
            entry("python", "3.8.18", 0, &["libzlib >=1.2"]),
            entry("python", "3.9.7", 0, &["libzlib >=1.2"]),
            entry("python", "3.9.7", 2, &["libzlib >=1.2"]),
            entry("libzlib", "1.2.13", 5, &[]),
            entry("numpy", "1.21.6", 0, &["python >=3.8"]),
            PackageEntry {
                subdir: Some("osx-64".to_string()),
                ..entry("clang_osx-64", "15.0.7", 0, &[])
            },
        ])
    }

    fn solve(specs: &[&str]) -> Result<Transaction, SolveFailure> {
        let specs = specs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        index().solve(&specs, Platform::Linux64, &[])
    }

    #[rstest]
    #[case("python", "python")]
    #[case("python >=3.8", "python")]
    #[case("python>=3.8", "python")]
    #[case("libfoo 1.2.3 h1234567_0", "libfoo")]
    #[case("numpy[version='>=1.20']", "numpy")]
    fn names_of_specs(#[case] spec: &str, #[case] name: &str) {
        assert_eq!(spec_name(spec), name);
    }

    #[test]
    fn picks_highest_version_and_build_number() {
        let transaction = solve(&["python"]).unwrap();
        let python = transaction.find("python").unwrap();
        assert_eq!((python.version.as_str(), python.build_number), ("3.9.7", 2));
        assert!(transaction.find("libzlib").is_some());
    }

    #[test]
    fn respects_version_constraints() {
        let transaction = solve(&["python 3.8.*", "numpy"]).unwrap();
        assert_eq!(transaction.find("python").unwrap().version, "3.8.18");
        let names = transaction
            .packages
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["python", "numpy", "libzlib"]);
    }

    #[test]
    fn unsatisfiable_specs_fail() {
        let err = solve(&["python 4.*"]).unwrap_err();
        assert_eq!(err.message, "nothing provides `python 4.*` for linux-64");

        let err = solve(&["clang_osx-64"]).unwrap_err();
        assert!(err.message.starts_with("nothing provides"));

        let err = solve(&["python 3.8.*", "python 3.9.*"]).unwrap_err();
        assert!(err.message.contains("conflicts with python-3.8.18-h0_0"));
    }

    #[test]
    fn loads_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.yaml");
        fs_err::write(
            &path,
            r#"
packages:
  - name: zlib
    version: "1.3"
    build_string: h0_0
    channel: conda-forge
    run_exports:
      weak:
        - "libzlib >=1.3,<2.0a0"
"#,
        )
        .unwrap();

        let index = PackageIndex::from_path(&path).unwrap();
        let zlib = index.find("zlib", "1.3", "h0_0").unwrap();
        assert_eq!(
            zlib.run_exports.as_ref().unwrap().weak,
            vec!["libzlib >=1.3,<2.0a0".to_string()]
        );
    }
}
