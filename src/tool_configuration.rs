//! Configuration for a resolver run
//! This is useful when using recipe-matrix as a library

use std::path::PathBuf;

use clap::ValueEnum;
use rattler_conda_types::Platform;

use crate::recipe::SelectedFeatures;

/// What to do when an output fails to resolve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ContinueOnFailure {
    /// Stop at the first failing output
    #[default]
    No,
    /// Skip the failing output and everything that depends on it
    Yes,
}

impl From<bool> for ContinueOnFailure {
    fn from(value: bool) -> Self {
        if value {
            ContinueOnFailure::Yes
        } else {
            ContinueOnFailure::No
        }
    }
}

/// Settings for one run of the resolver. Constructed once and passed by
/// reference to everything that needs it.
#[derive(Clone, Debug)]
pub struct Configuration {
    /// The platform the packages are built for, unless the variant config
    /// sets `target_platform`
    pub target_platform: Platform,

    /// The platform the build tools run on
    pub build_platform: Platform,

    /// Whether to continue with independent outputs after a failure
    pub continue_on_failure: ContinueOnFailure,

    /// The recipe features selected by the user
    pub features: SelectedFeatures,

    /// Directories with extracted packages, used to find run exports
    pub package_cache_dirs: Vec<PathBuf>,

    /// Whether to only render the build tree without solving
    pub render_only: bool,

    /// How often a downstream builder may ask for the recipe to be resolved again
    pub max_rebuilds: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            target_platform: Platform::current(),
            build_platform: Platform::current(),
            continue_on_failure: ContinueOnFailure::No,
            features: SelectedFeatures::default(),
            package_cache_dirs: Vec::new(),
            render_only: false,
            max_rebuilds: 3,
        }
    }
}

impl Configuration {
    /// A configuration that builds for (and on) `platform`
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            target_platform: platform,
            build_platform: platform,
            ..Self::default()
        }
    }
}
