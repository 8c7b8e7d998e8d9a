//! Log-structured engine: key → blob id → bytes in a sled database
//!
//! Two trees: `keys` maps a cache key to a blob id (u64, big endian) and
//! `blobs` holds the payloads. Binding a key is a compare-and-swap, so of
//! two racing stores exactly one blob stays reachable and the loser's copy is
//! removed again.

use crate::cache::{CacheKey, EntrySource};
use crate::engine::{EngineStats, EntryReader, StorageEngine};
use crate::error::{EntryAction, StashError, StashResult};
use sled::{Db, Tree};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// Directory (under the cache root) holding the sled files
pub const STORE_DIR: &str = "filestore-log";

const KEYS_TREE: &str = "keys";
const BLOBS_TREE: &str = "blobs";

const OPEN_ATTEMPTS: u32 = 50;
const OPEN_RETRY_DELAY: Duration = Duration::from_millis(20);
const LOCK_CONTENTION_PREFIX: &str = "could not acquire lock";

/// Entries stored as blobs in an embedded log-structured database
pub struct LogStructuredEngine {
    path: PathBuf,
    db: Db,
    keys: Tree,
    blobs: Tree,
}

impl LogStructuredEngine {
    /// Open (creating if needed) the store at `path`
    ///
    /// Background flushing is off; `close` flushes before the handle is
    /// dropped and the next process may open the store.
    pub fn open(path: &Path) -> StashResult<Self> {
        let db = Self::open_db(path)?;
        let keys = db.open_tree(KEYS_TREE)?;
        let blobs = db.open_tree(BLOBS_TREE)?;
        debug!("Opened log-structured store {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            db,
            keys,
            blobs,
        })
    }

    /// sled drops its own file lock from background threads, so a store
    /// closed a moment ago may still be locked
    fn open_db(path: &Path) -> StashResult<Db> {
        let mut attempt = 1;
        loop {
            let opened = sled::Config::new()
                .path(path)
                .flush_every_ms(None)
                .open();
            match opened {
                Err(sled::Error::Io(e)) if attempt < OPEN_ATTEMPTS && is_lock_contention(&e) => {
                    debug!(
                        "Log-structured store {} busy (attempt {}): {}",
                        path.display(),
                        attempt,
                        e
                    );
                    thread::sleep(OPEN_RETRY_DELAY);
                    attempt += 1;
                }
                other => return Ok(other?),
            }
        }
    }

    fn blob_id(&self, key: &CacheKey) -> StashResult<Option<[u8; 8]>> {
        let Some(raw) = self.keys.get(key.as_str())? else {
            return Ok(None);
        };
        let id: [u8; 8] = raw[..]
            .try_into()
            .map_err(|_| StashError::LogStoreCorrupt {
                key: key.clone(),
                reason: format!("blob id has {} bytes", raw.len()),
            })?;
        Ok(Some(id))
    }
}

/// sled reports a held store lock as a plain `io::Error` with this message
fn is_lock_contention(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock || e.to_string().starts_with(LOCK_CONTENTION_PREFIX)
}

impl StorageEngine for LogStructuredEngine {
    fn contains(&self, key: &CacheKey) -> StashResult<bool> {
        Ok(self.keys.contains_key(key.as_str())?)
    }

    fn load(&self, key: &CacheKey, reader: &mut EntryReader<'_>) -> StashResult<bool> {
        let Some(id) = self.blob_id(key)? else {
            return Ok(false);
        };
        let blob = self
            .blobs
            .get(id)?
            .ok_or_else(|| StashError::LogStoreCorrupt {
                key: key.clone(),
                reason: format!("blob {} is missing", u64::from_be_bytes(id)),
            })?;

        let mut bytes: &[u8] = &blob;
        let input: &mut dyn Read = &mut bytes;
        reader(input).map_err(|e| StashError::entry(key, EntryAction::Load, e))?;
        Ok(true)
    }

    fn store(&self, key: &CacheKey, source: &mut EntrySource<'_>) -> StashResult<()> {
        if self.keys.contains_key(key.as_str())? {
            debug!("Entry {} already stored", key);
            return Ok(());
        }

        // Reads at most one byte past the declared size
        let expected = source.size();
        let mut payload = Vec::new();
        (&mut *source)
            .take(expected.saturating_add(1))
            .read_to_end(&mut payload)
            .map_err(|e| StashError::entry(key, EntryAction::Store, e))?;
        if payload.len() as u64 != expected {
            return Err(StashError::SizeMismatch {
                key: key.clone(),
                expected,
                actual: payload.len() as u64,
            });
        }

        let id = self.db.generate_id()?.to_be_bytes();
        self.blobs.insert(id, payload)?;

        let bound = self
            .keys
            .compare_and_swap(key.as_str(), None as Option<&[u8]>, Some(&id[..]))?;
        if bound.is_err() {
            debug!("Entry {} stored concurrently, dropping blob", key);
            self.blobs.remove(id)?;
            return Ok(());
        }

        debug!("Stored {} as blob {}", key, u64::from_be_bytes(id));
        Ok(())
    }

    fn stats(&self) -> StashResult<EngineStats> {
        let mut stats = EngineStats::default();
        for item in self.keys.iter() {
            let (_, id) = item?;
            stats.entries += 1;
            if let Some(blob) = self.blobs.get(id)? {
                stats.total_bytes += blob.len() as u64;
            }
        }
        Ok(stats)
    }

    fn close(self) -> StashResult<()> {
        self.db.flush()?;
        debug!("Closed log-structured store {}", self.path.display());
        Ok(())
    }
}

impl fmt::Debug for LogStructuredEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStructuredEngine")
            .field("path", &self.path)
            .field("keys", &self.keys.len())
            .finish()
    }
}
