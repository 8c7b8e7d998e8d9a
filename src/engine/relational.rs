//! Relational engine: every entry is a row in one SQLite file

use crate::cache::{CacheKey, EntrySource};
use crate::engine::{EngineStats, EntryReader, StorageEngine};
use crate::error::{EntryAction, StashError, StashResult};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, DatabaseName, OptionalExtension, TransactionBehavior};
use std::fmt;
use std::io::{self, Read};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Database file name under the cache root
pub const DATABASE_FILE: &str = "filestore.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS filestore (
    entry_key     TEXT    NOT NULL PRIMARY KEY,
    entry_size    INTEGER NOT NULL,
    entry_content BLOB    NOT NULL
);
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Entries stored as blobs in a pooled SQLite database
pub struct RelationalEngine {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
}

impl RelationalEngine {
    /// Open (creating if needed) the database and apply the schema
    pub fn open(path: &Path, max_pool_size: NonZeroU32) -> StashResult<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.busy_timeout(BUSY_TIMEOUT));
        let pool = Pool::builder()
            .max_size(max_pool_size.get())
            .min_idle(Some(1))
            .build(manager)?;

        pool.get()?.execute_batch(SCHEMA)?;
        debug!(
            "Opened relational store {} (pool size {})",
            path.display(),
            max_pool_size
        );

        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    /// Row id and size of the entry for `key`
    fn locate(&self, key: &CacheKey) -> StashResult<Option<(i64, i64)>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT rowid, entry_size FROM filestore WHERE entry_key = ?1",
                [key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row)
    }
}

impl StorageEngine for RelationalEngine {
    fn contains(&self, key: &CacheKey) -> StashResult<bool> {
        Ok(self.locate(key)?.is_some())
    }

    fn load(&self, key: &CacheKey, reader: &mut EntryReader<'_>) -> StashResult<bool> {
        let Some((rowid, size)) = self.locate(key)? else {
            return Ok(false);
        };

        let outcome = if size == 0 {
            let mut empty = io::empty();
            let input: &mut dyn Read = &mut empty;
            reader(input)
        } else {
            let conn = self.pool.get()?;
            let mut blob =
                conn.blob_open(DatabaseName::Main, "filestore", "entry_content", rowid, true)?;
            let input: &mut dyn Read = &mut blob;
            reader(input)
        };

        outcome.map_err(|e| StashError::entry(key, EntryAction::Load, e))?;
        Ok(true)
    }

    fn store(&self, key: &CacheKey, source: &mut EntrySource<'_>) -> StashResult<()> {
        let size = source.size();
        let declared = i64::try_from(size).map_err(|_| StashError::SizeMismatch {
            key: key.clone(),
            expected: size,
            actual: 0,
        })?;

        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO filestore (entry_key, entry_size, entry_content)
             VALUES (?1, ?2, zeroblob(?2))",
            params![key.as_str(), declared],
        )?;
        if inserted == 0 {
            debug!("Entry {} already stored", key);
            return Ok(());
        }

        if size > 0 {
            let rowid = tx.last_insert_rowid();
            let mut blob =
                tx.blob_open(DatabaseName::Main, "filestore", "entry_content", rowid, false)?;
            let mut limited = (&mut *source).take(size);
            let written = io::copy(&mut limited, &mut blob)
                .map_err(|e| StashError::entry(key, EntryAction::Store, e))?;
            let mut probe = [0u8; 1];
            let trailing = source
                .read(&mut probe)
                .map_err(|e| StashError::entry(key, EntryAction::Store, e))?;
            if written != size || trailing != 0 {
                return Err(StashError::SizeMismatch {
                    key: key.clone(),
                    expected: size,
                    actual: written + trailing as u64,
                });
            }
        }

        tx.commit()?;
        debug!("Stored {} ({} bytes)", key, size);
        Ok(())
    }

    fn stats(&self) -> StashResult<EngineStats> {
        let conn = self.pool.get()?;
        let (entries, total): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(entry_size), 0) FROM filestore",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(EngineStats {
            entries: entries.max(0) as u64,
            total_bytes: total.max(0) as u64,
        })
    }

    fn close(self) -> StashResult<()> {
        debug!("Closing relational store {}", self.path.display());
        drop(self.pool);
        Ok(())
    }
}

impl fmt::Debug for RelationalEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalEngine")
            .field("path", &self.path)
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::contract;
    use tempfile::TempDir;

    fn engine() -> (TempDir, RelationalEngine) {
        let dir = TempDir::new().unwrap();
        let engine =
            RelationalEngine::open(&dir.path().join(DATABASE_FILE), NonZeroU32::new(2).unwrap())
                .unwrap();
        (dir, engine)
    }

    fn row_count(engine: &RelationalEngine, key: &CacheKey) -> i64 {
        engine
            .pool
            .get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM filestore WHERE entry_key = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn contract_round_trip() {
        let (_dir, engine) = engine();
        contract::round_trip(&engine);
        contract::empty_entry(&engine);
    }

    #[test]
    fn contract_first_writer_wins() {
        let (_dir, engine) = engine();
        contract::first_writer_wins(&engine);
    }

    #[test]
    fn contract_miss() {
        let (_dir, engine) = engine();
        contract::miss_is_not_an_error(&engine);
    }

    #[test]
    fn contract_stats() {
        let (_dir, engine) = engine();
        contract::stats_count_entries(&engine);
    }

    #[test]
    fn repeated_store_keeps_single_row() {
        let (_dir, engine) = engine();
        let key = CacheKey::digest(b"dup");
        for payload in [b"one".as_slice(), b"two".as_slice(), b"three".as_slice()] {
            engine
                .store(&key, &mut EntrySource::from_bytes(payload))
                .unwrap();
        }
        assert_eq!(row_count(&engine, &key), 1);
    }

    #[test]
    fn existing_key_does_not_consume_source() {
        let (_dir, engine) = engine();
        let key = CacheKey::digest(b"lazy");
        engine.store(&key, &mut EntrySource::from_bytes(b"v1")).unwrap();

        let mut cursor = io::Cursor::new(b"v2".to_vec());
        engine
            .store(&key, &mut EntrySource::new(&mut cursor, 2))
            .unwrap();
        assert_eq!(cursor.position(), 0);
    }

    #[test]
    fn size_mismatch_rolls_back() {
        let (_dir, engine) = engine();
        let key = CacheKey::digest(b"short");

        let err = engine
            .store(&key, &mut EntrySource::new(&b"abc"[..], 5))
            .unwrap_err();
        assert!(matches!(err, StashError::SizeMismatch { .. }));
        assert!(!engine.contains(&key).unwrap());

        let err = engine
            .store(&key, &mut EntrySource::new(&b"abcdef"[..], 2))
            .unwrap_err();
        assert!(matches!(err, StashError::SizeMismatch { .. }));
        assert_eq!(row_count(&engine, &key), 0);
    }

    #[test]
    fn reopen_sees_previous_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE);
        let key = CacheKey::digest(b"persist");
        let size = NonZeroU32::new(1).unwrap();

        let engine = RelationalEngine::open(&path, size).unwrap();
        engine.store(&key, &mut EntrySource::from_bytes(b"kept")).unwrap();
        engine.close().unwrap();

        let engine = RelationalEngine::open(&path, size).unwrap();
        assert_eq!(contract::load_bytes(&engine, &key).unwrap(), b"kept");
    }

    #[test]
    fn open_fails_on_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(DATABASE_FILE);
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        assert!(RelationalEngine::open(&path, NonZeroU32::new(1).unwrap()).is_err());
    }
}
