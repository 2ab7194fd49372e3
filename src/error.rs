//! Error types for resolving a recipe into its build matrix
use miette::Diagnostic;
use recipe_matrix_types::PinExpressionError;
use recipe_matrix_variant_config::{VariantConfigError, VariantExpandError};
use thiserror::Error;

use crate::{
    output::Env,
    recipe::RecipeError,
    render::{
        solver::SolveFailure,
        spec::{ParseError, PinEvalError},
    },
};

#[derive(Debug, Error, Diagnostic)]
pub enum ResolveError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Expand(#[from] VariantExpandError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    VariantConfig(#[from] VariantConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Recipe(#[from] RecipeError),

    #[error("Found a dependency cycle between steps, involving `{0}`")]
    #[diagnostic(code(recipe_matrix::cycle))]
    Cycle(String),

    #[error("Could not find output with name `{name}` (pinned by `{output}`)")]
    #[diagnostic(code(recipe_matrix::unresolved_subpackage))]
    UnresolvedSubpackage { name: String, output: String },

    #[error("`{output}` pins `{name}` exactly, but `{name}` has not been finalized")]
    #[diagnostic(
        code(recipe_matrix::unfinalized_subpackage),
        help("exact pins can only point to outputs that are resolved earlier")
    )]
    UnfinalizedSubpackage { name: String, output: String },

    #[error("`{output}` requires step `{step}`, which does not exist")]
    #[diagnostic(code(recipe_matrix::unknown_required_step))]
    UnknownRequiredStep { step: String, output: String },

    #[error("Compiler `{spec}` of `{output}` must be a build-time dependency (found in {env})")]
    #[diagnostic(code(recipe_matrix::compiler_not_in_build))]
    CompilerNotInBuild {
        output: String,
        env: Env,
        spec: String,
    },

    #[error("No compiler known for language `{language}` on {platform}")]
    #[diagnostic(
        code(recipe_matrix::unknown_compiler),
        help("set `{language}_compiler` in the variant config")
    )]
    UnknownCompiler { language: String, platform: String },

    #[error("Already found an intermediate step (`{first}`), `{second}` cannot be one too")]
    #[diagnostic(code(recipe_matrix::multiple_intermediate_steps))]
    MultipleIntermediateSteps { first: String, second: String },

    #[error("Invalid `{section}` section of `{output}`: {reason}")]
    #[diagnostic(code(recipe_matrix::invalid_section))]
    InvalidSection {
        output: String,
        section: String,
        reason: String,
    },

    #[error("Failed to solve the {env} environment of `{output}`")]
    #[diagnostic(code(recipe_matrix::solve))]
    Solve {
        output: String,
        env: Env,
        #[source]
        source: SolveFailure,
    },

    #[error("Could not apply pin `{spec}` of `{output}`")]
    #[diagnostic(code(recipe_matrix::pin_expression))]
    PinExpression {
        output: String,
        spec: String,
        #[source]
        source: PinExpressionError,
    },
}

impl ResolveError {
    /// Attach the output and offending spec to a pin evaluation failure
    pub(crate) fn from_pin(output: &str, spec: &str, err: PinEvalError) -> Self {
        match err {
            PinEvalError::UnresolvedSubpackage(name) => ResolveError::UnresolvedSubpackage {
                name,
                output: output.to_string(),
            },
            PinEvalError::UnfinalizedSubpackage(name) => ResolveError::UnfinalizedSubpackage {
                name,
                output: output.to_string(),
            },
            PinEvalError::PinExpression(source) => ResolveError::PinExpression {
                output: output.to_string(),
                spec: spec.to_string(),
                source,
            },
        }
    }
}
