//! This is the main entry point for the `recipe-matrix` binary.

use std::path::PathBuf;

use clap::{Parser, crate_version};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use miette::IntoDiagnostic;
use rattler_conda_types::Platform;
use recipe_matrix::{
    build::{BuildReport, ResolveContext, resolve_recipe},
    default_variant::PlatformDefaults,
    recipe::{RecipeDocument, SelectedFeatures},
    render::{
        resolved_dependencies::RenderedOutput,
        run_exports::{PackageCacheRunExports, RunExportSource},
        solver::PackageIndex,
    },
    tool_configuration::{Configuration, ContinueOnFailure},
};
use recipe_matrix_variant_config::VariantConfig;
use serde::Serialize;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod console_utils;

use crate::console_utils::TracingFormatter;

#[derive(Parser)]
enum SubCommands {
    /// Resolve a recipe into its ordered build matrix
    Render(RenderOpts),
}

#[derive(Parser)]
#[clap(version = crate_version!())]
struct App {
    #[clap(subcommand)]
    subcommand: SubCommands,

    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Parser)]
struct RenderOpts {
    /// The recipe file (YAML or JSON), or a directory containing `recipe.yaml`.
    #[arg(short, long, default_value = ".")]
    recipe: PathBuf,

    /// Variant configuration files. Later files override earlier ones.
    #[arg(short = 'm', long)]
    variant_config: Vec<PathBuf>,

    /// The platform to render the recipe for. Defaults to the current platform.
    #[arg(long)]
    target_platform: Option<Platform>,

    /// The platform the build tools run on. Defaults to the current platform.
    #[arg(long)]
    build_platform: Option<Platform>,

    /// Recipe features to switch on or off, e.g. `[static,~docs]`.
    #[arg(long, default_value = "")]
    features: String,

    /// A package index (JSON or YAML) to solve the environments against.
    /// Without an index the recipe is only rendered.
    #[arg(long)]
    index: Option<PathBuf>,

    /// Package cache directories to read run exports from.
    #[arg(long = "package-cache")]
    package_cache_dirs: Vec<PathBuf>,

    /// Only render the build matrix, do not solve.
    #[arg(long)]
    render_only: bool,

    /// Keep going with independent outputs when an output fails to resolve.
    #[arg(long, value_enum, default_value = "no")]
    continue_on_failure: ContinueOnFailure,

    /// Print the resolved outputs as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> miette::Result<()> {
    let args = App::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => get_default_env_filter(args.verbose.tracing_level_filter())?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(TracingFormatter),
        )
        .init();

    match args.subcommand {
        SubCommands::Render(args) => render_from_args(args),
    }
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    outputs: Vec<RenderedOutput<'a>>,
    report: &'a BuildReport,
}

fn render_from_args(args: RenderOpts) -> miette::Result<()> {
    let mut recipe_path = args.recipe.clone();
    if recipe_path.is_dir() {
        recipe_path = recipe_path.join("recipe.yaml");
    }
    if !recipe_path.is_file() {
        return Err(miette::miette!(
            "The recipe {} could not be found.",
            recipe_path.display()
        ));
    }

    let recipe = RecipeDocument::from_path(&recipe_path)?.normalize()?;
    let variant_config = VariantConfig::from_files(&args.variant_config)?;

    let target_platform = args.target_platform.unwrap_or_else(|| {
        tracing::info!("No target platform specified, using current platform");
        Platform::current()
    });

    let index = match &args.index {
        Some(path) => PackageIndex::from_path(path)?,
        None => PackageIndex::default(),
    };

    let configuration = Configuration {
        target_platform,
        build_platform: args.build_platform.unwrap_or_else(Platform::current),
        continue_on_failure: args.continue_on_failure,
        features: args.features.parse::<SelectedFeatures>()?,
        package_cache_dirs: args.package_cache_dirs.clone(),
        render_only: args.render_only || args.index.is_none(),
        ..Configuration::default()
    };
    if args.index.is_none() && !args.render_only {
        tracing::info!("No package index given, only rendering the build matrix");
    }

    let run_exports: Vec<Box<dyn RunExportSource>> = vec![
        Box::new(index.clone()),
        Box::new(PackageCacheRunExports::new(args.package_cache_dirs)),
    ];

    let context = ResolveContext {
        configuration: &configuration,
        variant_config: &variant_config,
        defaults: &PlatformDefaults,
        solver: &index,
        run_exports: &run_exports,
    };

    let (tree, report) = resolve_recipe(&recipe, context)?;

    if args.json {
        let json = JsonOutput {
            outputs: report
                .finalized
                .iter()
                .map(|&idx| {
                    RenderedOutput::new(
                        tree.template_of(&tree.instances[idx]),
                        &tree.instances[idx],
                    )
                })
                .collect(),
            report: &report,
        };
        println!("{}", serde_json::to_string_pretty(&json).into_diagnostic()?);
    } else {
        for &idx in &report.finalized {
            let output = RenderedOutput::new(
                tree.template_of(&tree.instances[idx]),
                &tree.instances[idx],
            );
            tracing::info!("{output}");
        }
    }

    if !report.finalized.is_empty() {
        tracing::info!(
            "{} Resolved {} output(s)",
            console::style(console::Emoji("✔", "")).green(),
            report.finalized.len()
        );
    }

    if !report.is_success() {
        report.log_failures();
        return Err(miette::miette!(
            "{} output(s) could not be resolved",
            report.failed.len()
        ));
    }

    Ok(())
}

/// Constructs a default [`EnvFilter`] that is used when the user did not specify a custom RUST_LOG.
pub fn get_default_env_filter(
    verbose: tracing_core::LevelFilter,
) -> miette::Result<EnvFilter> {
    EnvFilter::try_new(format!(
        "recipe_matrix={verbose},recipe_matrix_variant_config={verbose}"
    ))
    .into_diagnostic()
}
