//! Configuration and filesystem locations.

pub mod config;
pub mod paths;

pub use config::{
    CliOverrides, Config, ConfigSource, ConfigSources, ENV_CONFIG, ENV_PROVIDERS, ENV_TIMEOUT,
    ResolvedConfig,
};
pub use paths::AppPaths;
