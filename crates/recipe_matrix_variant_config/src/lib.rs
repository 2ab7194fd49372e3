//! # recipe_matrix_variant_config
//!
//! Variant axis configuration for multi-output recipes.
//!
//! This crate provides functionality for:
//! - Loading variant configurations from YAML files (`conda_build_config.yaml` style)
//! - Merging several configuration files, later files winning
//! - Expanding the axes of one output into concrete assignments
//! - Handling "zip keys" to keep related axes in lock-step
//!
//! ## Example
//!
//! ```rust
//! use recipe_matrix_variant_config::VariantConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let yaml = r#"
//! python:
//!   - "3.9"
//!   - "3.10"
//! numpy:
//!   - "1.20"
//!   - "1.21"
//! zip_keys:
//!   - [python, numpy]
//! "#;
//!
//! let config = VariantConfig::from_yaml_str(yaml)?;
//!
//! // With zip_keys, we get 2 assignments (not 2x2)
//! let expansion = config.expand(&config.variants)?;
//! assert_eq!(expansion.assignments.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! ## Zip Keys
//!
//! ```yaml
//! python:
//!   - "3.9"
//!   - "3.10"
//! numpy:
//!   - "1.20"
//!   - "1.21"
//! zip_keys:
//!   - [python, numpy]
//!
//! # This creates only 2 assignments:
//! # [python=3.9, numpy=1.20]
//! # [python=3.10, numpy=1.21]
//! ```

pub mod combination;
pub mod config;
pub mod error;

// Re-export main types
pub use combination::{VariantAssignment, VariantExpansion, differentiating_keys, expand_variants};
pub use config::{PinRunAsBuild, VariantConfig};
pub use error::{VariantConfigError, VariantExpandError};
