//! Configuration schema for buildstash
//!
//! Configuration is stored at `~/.config/buildstash/config.toml`

use crate::engine::EngineKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Build cache settings
    pub cache: CacheConfig,
}

/// How log lines are written to stderr
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// General application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: LogFormat,
}

/// Build cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root (default: `<cache_dir>/buildstash/build-cache-1`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Storage engine backing the cache root
    pub engine: EngineKind,

    /// Delete directory entries not used for this many days
    pub remove_unused_entries_after_days: u32,

    /// Connection pool bound for the relational engine (default: CPU count)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_pool_size: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            engine: EngineKind::Directory,
            remove_unused_entries_after_days: 7,
            max_pool_size: None,
        }
    }
}
