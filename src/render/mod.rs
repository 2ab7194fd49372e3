#![allow(missing_docs)]
//! Requirement specs and everything that turns them into final specs

pub mod resolved_dependencies;
pub mod run_exports;
pub mod solver;
pub mod spec;
