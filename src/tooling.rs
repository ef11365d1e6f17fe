//! Tooling & Integration Layer
//!
//! Command-line entry points over [`crate::api::ReplayContext`].

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
