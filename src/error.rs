//! Error types for buildstash
//!
//! All modules use `StashResult<T>` as their return type.

use crate::cache::CacheKey;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for buildstash operations
pub type StashResult<T> = Result<T, StashError>;

/// Which entry operation an I/O failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    Contains,
    Load,
    Store,
}

impl fmt::Display for EntryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Contains => "check",
            Self::Load => "load",
            Self::Store => "store",
        };
        write!(f, "{}", name)
    }
}

/// All errors that can occur in buildstash
#[derive(Error, Debug)]
pub enum StashError {
    // Key errors
    #[error("Invalid cache key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    // Entry errors
    #[error("Could not {action} cache entry {key}: {source}")]
    Entry {
        key: CacheKey,
        action: EntryAction,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache entry {key} declared {expected} bytes but the source produced {actual}")]
    SizeMismatch {
        key: CacheKey,
        expected: u64,
        actual: u64,
    },

    // Cache directory errors
    #[error("Cannot use local build cache because {0} is not a directory")]
    TargetNotDirectory(PathBuf),

    #[error("Cannot use local build cache because {path} is not writable: {source}")]
    TargetNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Locking errors
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    IllegalState(String),

    #[error("{0} has been closed")]
    CacheClosed(String),

    // Engine errors
    #[error("SQLite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Log store error: {0}")]
    LogStore(#[from] sled::Error),

    #[error("Log store entry for {key} is corrupt: {reason}")]
    LogStoreCorrupt { key: CacheKey, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    User(String),
}

impl StashError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an entry error for a failed load/store/contains
    pub fn entry(key: &CacheKey, action: EntryAction, source: std::io::Error) -> Self {
        Self::Entry {
            key: key.clone(),
            action,
            source,
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Check if error is retryable
    ///
    /// Entry I/O and lock failures may succeed on a later attempt; ownership
    /// misuse and configuration problems will not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Entry { .. } | Self::Lock { .. } | Self::Pool(_)
        )
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::TargetNotWritable { .. } => {
                Some("Check permissions of the cache directory or set cache.dir")
            }
            Self::TargetNotDirectory(_) => Some("Point cache.dir at a directory"),
            Self::ConfigInvalid { .. } => Some("Run: buildstash config init --force"),
            Self::IllegalState(_) => {
                Some("Serialize cache access between threads or use use_cache()")
            }
            _ => None,
        }
    }
}
