//! Resolve multi-output conda recipes into an ordered build matrix.
//!
//! A recipe and a variant configuration go in; out comes a [`BuildTree`]
//! with one instance per output and applicable variant, in an order that
//! respects the dependencies between outputs. The [`build`] module then
//! solves every instance against a [`render::solver::DependencySolver`].

pub mod build;
pub mod build_tree;
pub mod default_variant;
pub mod error;
pub mod hash;
pub mod output;
pub mod recipe;
pub mod render;
pub mod tool_configuration;
pub mod variant_axes;

pub use build_tree::BuildTree;
pub use error::ResolveError;
