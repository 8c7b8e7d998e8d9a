//! Directory engine: one file per entry, named by its key
//!
//! Layout under the cache root:
//!
//! | Path | Meaning |
//! |------|---------|
//! | `<key>` | stored entry |
//! | `<key>-<uuid>.part` | staging file of an in-flight store |
//! | `<key>.failed` | quarantined entry whose read failed |

use crate::cache::temp::TempFileStore;
use crate::cache::{AccessTimeJournal, CacheKey, EntrySource};
use crate::engine::{EngineStats, EntryReader, StorageEngine};
use crate::error::{EntryAction, StashError, StashResult};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix of quarantined entries
pub const FAILED_SUFFIX: &str = ".failed";

/// File-per-entry store rooted at the cache directory
#[derive(Debug)]
pub struct DirectoryEngine {
    root: PathBuf,
    temp: TempFileStore,
    journal: AccessTimeJournal,
}

impl DirectoryEngine {
    /// Open the store; the root must already exist
    pub fn open(root: &Path) -> StashResult<Self> {
        if !root.is_dir() {
            return Err(StashError::TargetNotDirectory(root.to_path_buf()));
        }
        Ok(Self {
            root: root.to_path_buf(),
            temp: TempFileStore::new(root),
            journal: AccessTimeJournal,
        })
    }

    /// Final location of the entry for `key`
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.as_str())
    }

    /// Where a failed entry for `key` is moved
    pub fn quarantine_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}{}", key, FAILED_SUFFIX))
    }

    /// Move a corrupt entry aside so the next lookup misses
    fn quarantine(&self, key: &CacheKey, path: &Path) {
        let failed = self.quarantine_path(key);
        if let Err(e) = fs::remove_file(&failed) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Could not remove old quarantine file {}: {}", failed.display(), e);
            }
        }
        match fs::rename(path, &failed) {
            Ok(()) => warn!("Quarantined cache entry {} to {}", key, failed.display()),
            Err(e) => warn!("Could not quarantine cache entry {}: {}", key, e),
        }
    }

    fn write_staged(source: &mut EntrySource<'_>, staging: &Path) -> io::Result<u64> {
        let file = File::create(staging)?;
        let mut writer = BufWriter::new(file);
        let written = io::copy(source, &mut writer)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(written)
    }
}

impl StorageEngine for DirectoryEngine {
    fn contains(&self, key: &CacheKey) -> StashResult<bool> {
        match fs::metadata(self.entry_path(key)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StashError::entry(key, EntryAction::Contains, e)),
        }
    }

    fn load(&self, key: &CacheKey, reader: &mut EntryReader<'_>) -> StashResult<bool> {
        let path = self.entry_path(key);
        if !path.is_file() {
            debug!("Cache miss for {}", key);
            return Ok(false);
        }

        self.journal
            .touch(&path)
            .map_err(|e| StashError::entry(key, EntryAction::Load, e))?;
        let file = File::open(&path).map_err(|e| StashError::entry(key, EntryAction::Load, e))?;

        let outcome = {
            let mut buffered = BufReader::new(file);
            let input: &mut dyn Read = &mut buffered;
            reader(input)
        };
        if let Err(e) = outcome {
            self.quarantine(key, &path);
            return Err(StashError::entry(key, EntryAction::Load, e));
        }

        debug!("Cache hit for {}", key);
        Ok(true)
    }

    fn store(&self, key: &CacheKey, source: &mut EntrySource<'_>) -> StashResult<()> {
        let target = self.entry_path(key);
        if target.is_file() {
            debug!("Entry {} already stored", key);
            return Ok(());
        }
        let expected = source.size();

        self.temp.with_temp_file(key, |staging| {
            let written = Self::write_staged(source, staging)
                .map_err(|e| StashError::entry(key, EntryAction::Store, e))?;
            if written != expected {
                return Err(StashError::SizeMismatch {
                    key: key.clone(),
                    expected,
                    actual: written,
                });
            }

            if target.exists() {
                debug!("Entry {} appeared while staging, discarding staged copy", key);
                return Ok(());
            }

            fs::rename(staging, &target)
                .map_err(|e| StashError::entry(key, EntryAction::Store, e))?;
            self.journal
                .touch(&target)
                .map_err(|e| StashError::entry(key, EntryAction::Store, e))?;
            debug!("Stored {} ({} bytes)", key, written);
            Ok(())
        })
    }

    fn stats(&self) -> StashResult<EngineStats> {
        let mut stats = EngineStats::default();
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StashError::io(format!("reading {}", self.root.display()), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| StashError::io("reading cache directory entry", e))?;
            let name = entry.file_name();
            let is_key = name
                .to_str()
                .is_some_and(|n| CacheKey::new(n).is_ok());
            if !is_key {
                continue;
            }
            let meta = entry
                .metadata()
                .map_err(|e| StashError::io("reading cache entry metadata", e))?;
            if meta.is_file() {
                stats.entries += 1;
                stats.total_bytes += meta.len();
            }
        }

        Ok(stats)
    }

    fn close(self) -> StashResult<()> {
        Ok(())
    }
}
