//! Command-line surface.

pub mod args;
pub mod providers;
pub mod usage;

pub use args::{Cli, Commands, UsageArgs};
