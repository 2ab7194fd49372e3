//! Error types for variant configuration

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors that can occur while loading variant configuration files
#[derive(Debug, Error, Diagnostic)]
pub enum VariantConfigError {
    /// Failed to parse the YAML document
    #[error("Could not parse variant config {}: {source}", display_path(.path))]
    #[diagnostic(code(variant_config::parse))]
    ParseError {
        path: Option<PathBuf>,
        #[source]
        source: serde_yaml::Error,
    },

    /// Failed to read file from disk
    #[error("Could not open file ({0}): {1}")]
    #[diagnostic(code(variant_config::io))]
    IoError(PathBuf, #[source] std::io::Error),

    /// zip_keys must be a list of lists, not a flat list
    #[error("zip_keys must be a list of lists, not a flat list")]
    #[diagnostic(
        code(variant_config::zip_key_structure),
        help("write `zip_keys: [[python, numpy]]` instead of `zip_keys: [python, numpy]`")
    )]
    InvalidZipKeyStructure,

    /// Invalid variant configuration structure
    #[error("Invalid variant configuration for `{key}`: {reason}")]
    #[diagnostic(code(variant_config::invalid))]
    InvalidConfig { key: String, reason: String },
}

/// Errors that can occur while expanding variants
#[derive(Debug, Error, Diagnostic)]
pub enum VariantExpandError {
    /// Zip key elements have mismatched lengths
    #[error("Trying to zip keys, but not all zip keys have the same length: {}", describe_lengths(.lengths))]
    #[diagnostic(
        code(variant_config::zip_length_mismatch),
        help("every key of a zip group needs the same number of entries in the variant config")
    )]
    ZipLengthMismatch { lengths: Vec<(String, usize)> },

    /// A zipped key is used by an output but missing from the configuration
    #[error("Trying to zip keys, but `{key}` of zip group [{group}] is not in the variant config")]
    #[diagnostic(code(variant_config::missing_zip_axis))]
    MissingZipAxis { key: String, group: String },

    /// A zip group needs at least two keys
    #[error("Zip group [{0}] needs at least two keys")]
    #[diagnostic(code(variant_config::zip_group_too_small))]
    ZipGroupTooSmall(String),
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<string>".to_string())
}

fn describe_lengths(lengths: &[(String, usize)]) -> String {
    lengths
        .iter()
        .map(|(key, len)| format!("{key} ({len})"))
        .collect::<Vec<_>>()
        .join(", ")
}
