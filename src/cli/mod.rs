//! Command-line interface

pub mod args;
pub mod commands;

pub use args::{Cli, Commands};

use crate::cache::{CacheKey, CacheSettings};
use crate::config::Config;
use crate::error::StashResult;

/// Cache settings from the config with the global CLI overrides applied
pub fn cache_settings(cli: &Cli, config: &Config) -> CacheSettings {
    let mut settings = CacheSettings::from(&config.cache);
    if let Some(dir) = &cli.cache_dir {
        settings.dir = Some(dir.clone());
    }
    if let Some(engine) = cli.engine {
        settings.engine = engine.into();
    }
    settings
}

/// Parse a key given on the command line
pub fn parse_key(raw: &str) -> StashResult<CacheKey> {
    CacheKey::new(raw.trim())
}
