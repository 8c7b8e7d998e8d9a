//! Staging files inside the cache root
//!
//! Writes land in a uniquely named `.part` file next to their final
//! location and are renamed into place, so a reader never observes a
//! half-written entry and a crash leaves only a stale staging file behind.

use crate::cache::CacheKey;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Suffix marking a partially written staging file
pub const PARTIAL_SUFFIX: &str = ".part";

/// Allocates staging files in one directory
#[derive(Debug, Clone)]
pub struct TempFileStore {
    dir: PathBuf,
}

impl TempFileStore {
    /// Staging store for write-staging files (`.part`)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Reserve a unique path for `key`; the file is removed when the guard drops
    pub fn create(&self, key: &CacheKey) -> StagingFile {
        let name = format!("{}-{}{}", key, Uuid::new_v4().simple(), PARTIAL_SUFFIX);
        StagingFile {
            path: self.dir.join(name),
        }
    }

    /// Run `action` with a fresh staging path and delete the file afterwards,
    /// whether the action succeeded or not
    ///
    /// An action that renames the file into place leaves nothing to delete.
    pub fn with_temp_file<T, E>(
        &self,
        key: &CacheKey,
        action: impl FnOnce(&Path) -> Result<T, E>,
    ) -> Result<T, E> {
        let staging = self.create(key);
        action(staging.path())
    }
}

/// A staging path owned by the current scope
#[derive(Debug)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    /// Path of the staging file (it may not exist yet)
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staging file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove staging file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}
