//! Storage engines behind the build cache
//!
//! Three backends implement the same contract:
//!
//! | Engine | Medium | Store semantics |
//! |--------|--------|-----------------|
//! | Directory | one file per entry | rename into place if absent |
//! | Relational | SQLite file | insert-if-absent |
//! | Log-structured | sled tree | compute-if-absent |
//!
//! Engines are never used directly by callers. The locking coordinator opens
//! one when it acquires the cross-process lock and closes it on release.

pub mod directory;
pub mod log_structured;
pub mod relational;

pub use directory::DirectoryEngine;
pub use log_structured::LogStructuredEngine;
pub use relational::RelationalEngine;

use crate::cache::{CacheKey, EntrySource};
use crate::error::StashResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

/// Callback receiving the bytes of a found entry
pub type EntryReader<'a> = dyn FnMut(&mut dyn Read) -> io::Result<()> + 'a;

/// The operations every storage engine supports
pub trait StorageEngine {
    /// Whether an entry exists for `key`
    fn contains(&self, key: &CacheKey) -> StashResult<bool>;

    /// Stream the entry for `key` to `reader`; `false` when there is none
    fn load(&self, key: &CacheKey, reader: &mut EntryReader<'_>) -> StashResult<bool>;

    /// Store `source` under `key` unless an entry already exists
    fn store(&self, key: &CacheKey, source: &mut EntrySource<'_>) -> StashResult<()>;

    /// Entry count and payload size
    fn stats(&self) -> StashResult<EngineStats>;

    /// Release the underlying files or connections
    fn close(self) -> StashResult<()>
    where
        Self: Sized;
}

/// Summary of what an engine currently holds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub entries: u64,
    pub total_bytes: u64,
}

/// Which backend to use for a cache root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    #[default]
    Directory,
    Relational,
    LogStructured,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Directory => "directory",
            Self::Relational => "relational",
            Self::LogStructured => "log-structured",
        };
        write!(f, "{}", name)
    }
}

/// Everything needed to open an engine for a cache root, once per lock cycle
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub kind: EngineKind,
    pub root: PathBuf,
    pub max_pool_size: NonZeroU32,
}

impl EngineSpec {
    /// Open the configured engine
    pub fn open(&self) -> StashResult<Engine> {
        Ok(match self.kind {
            EngineKind::Directory => Engine::Directory(DirectoryEngine::open(&self.root)?),
            EngineKind::Relational => Engine::Relational(RelationalEngine::open(
                &self.root.join(relational::DATABASE_FILE),
                self.max_pool_size,
            )?),
            EngineKind::LogStructured => Engine::LogStructured(LogStructuredEngine::open(
                &self.root.join(log_structured::STORE_DIR),
            )?),
        })
    }

    /// Cache root the engine lives in
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// An open storage engine
#[derive(Debug)]
pub enum Engine {
    Directory(DirectoryEngine),
    Relational(RelationalEngine),
    LogStructured(LogStructuredEngine),
}

impl Engine {
    pub fn kind(&self) -> EngineKind {
        match self {
            Self::Directory(_) => EngineKind::Directory,
            Self::Relational(_) => EngineKind::Relational,
            Self::LogStructured(_) => EngineKind::LogStructured,
        }
    }
}

impl StorageEngine for Engine {
    fn contains(&self, key: &CacheKey) -> StashResult<bool> {
        match self {
            Self::Directory(e) => e.contains(key),
            Self::Relational(e) => e.contains(key),
            Self::LogStructured(e) => e.contains(key),
        }
    }

    fn load(&self, key: &CacheKey, reader: &mut EntryReader<'_>) -> StashResult<bool> {
        match self {
            Self::Directory(e) => e.load(key, reader),
            Self::Relational(e) => e.load(key, reader),
            Self::LogStructured(e) => e.load(key, reader),
        }
    }

    fn store(&self, key: &CacheKey, source: &mut EntrySource<'_>) -> StashResult<()> {
        match self {
            Self::Directory(e) => e.store(key, source),
            Self::Relational(e) => e.store(key, source),
            Self::LogStructured(e) => e.store(key, source),
        }
    }

    fn stats(&self) -> StashResult<EngineStats> {
        match self {
            Self::Directory(e) => e.stats(),
            Self::Relational(e) => e.stats(),
            Self::LogStructured(e) => e.stats(),
        }
    }

    fn close(self) -> StashResult<()> {
        match self {
            Self::Directory(e) => e.close(),
            Self::Relational(e) => e.close(),
            Self::LogStructured(e) => e.close(),
        }
    }
}
