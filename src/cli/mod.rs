//! CLI module - re-export the top-level command structure.

#[allow(clippy::module_inception)]
pub mod cli;

pub use cli::Cli;
