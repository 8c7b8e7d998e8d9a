//! Cross-process locking around a storage engine
//!
//! All processes sharing a cache root serialize on an advisory lock on
//! `build-cache.lock`. Inside one process, a thread takes *ownership* of the
//! cache before touching the engine; ownership is reentrant, so nested calls
//! from the owning thread only bump a depth counter.
//!
//! The first ownership acquired while unlocked takes the file lock and opens
//! the engine. The release that brings the depth back to zero closes the
//! engine and drops the file lock, letting other processes in.
//!
//! ```text
//!             acquire (depth 0 -> 1)
//!   Unlocked ------------------------> Locked(owner, depth)
//!      ^                                  |  ^
//!      |       release (depth 1 -> 0)     |  | nested acquire / release
//!      +----------------------------------+--+
//! ```

use crate::cache::cleanup::{CleanupReport, LruCleanup};
use crate::cache::{CacheKey, EntrySource};
use crate::engine::{Engine, EngineKind, EngineSpec, EngineStats, StorageEngine};
use crate::error::{StashError, StashResult};
use fs4::FileExt;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Advisory lock file shared by every process using a cache root
pub const LOCK_FILE_NAME: &str = "build-cache.lock";

/// How often the engine has been opened and closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub engine_opens: u64,
    pub engine_closes: u64,
}

/// File lock plus the engine opened under it
struct HeldLock {
    file: File,
    engine: Arc<Engine>,
}

#[derive(Default)]
struct OwnershipState {
    owner: Option<ThreadId>,
    depth: usize,
    held: Option<HeldLock>,
    closed: bool,
    close_calls: u32,
    stats: LockStats,
}

/// Build cache whose every operation runs under the cross-process lock
pub struct LockingBuildCache {
    display_name: String,
    lock_path: PathBuf,
    spec: EngineSpec,
    cleanup: Option<LruCleanup>,
    state: Mutex<OwnershipState>,
    released: Condvar,
}

impl LockingBuildCache {
    /// Wrap the engine described by `spec`; nothing is locked or opened yet
    pub fn new(spec: EngineSpec, cleanup: Option<LruCleanup>) -> Self {
        Self {
            display_name: format!("build cache ({})", spec.root().display()),
            lock_path: spec.root().join(LOCK_FILE_NAME),
            spec,
            cleanup,
            state: Mutex::new(OwnershipState::default()),
            released: Condvar::new(),
        }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        self.spec.root()
    }

    /// Configured engine
    pub fn engine_kind(&self) -> EngineKind {
        self.spec.kind
    }

    /// Engine open/close counters
    pub fn lock_stats(&self) -> LockStats {
        self.state.lock().stats
    }

    /// Whether an entry exists for `key`
    pub fn contains(&self, key: &CacheKey) -> StashResult<bool> {
        self.with_engine(|engine| engine.contains(key))
    }

    /// Stream the entry for `key` into `reader`
    ///
    /// Returns `false` on a miss without calling `reader`. An error returned
    /// by `reader` is reported as a failed load.
    pub fn load<F>(&self, key: &CacheKey, mut reader: F) -> StashResult<bool>
    where
        F: FnMut(&mut dyn Read) -> io::Result<()>,
    {
        self.with_engine(|engine| engine.load(key, &mut reader))
    }

    /// Store `source` under `key` unless an entry already exists
    pub fn store(&self, key: &CacheKey, mut source: EntrySource<'_>) -> StashResult<()> {
        self.with_engine(|engine| engine.store(key, &mut source))
    }

    /// Entry count and payload size of the engine
    pub fn stats(&self) -> StashResult<EngineStats> {
        self.with_engine(|engine| engine.stats())
    }

    /// Run the LRU cleanup now
    ///
    /// Engines without a cleanup policy report an empty result.
    pub fn cleanup(&self) -> StashResult<CleanupReport> {
        let Some(policy) = &self.cleanup else {
            debug!("No cleanup policy for {}", self.display_name);
            return Ok(CleanupReport::default());
        };
        self.with_engine(|_| {
            let now = SystemTime::now();
            let report = policy.clean(self.root(), now)?;
            policy.mark_cleaned(self.root(), now)?;
            Ok(report)
        })
    }

    /// Run the LRU cleanup if the last run is older than the cleanup interval
    pub fn cleanup_if_due(&self) -> StashResult<Option<CleanupReport>> {
        let Some(policy) = &self.cleanup else {
            return Ok(None);
        };
        self.with_engine(|_| {
            let now = SystemTime::now();
            if !policy.is_due(self.root(), now) {
                debug!("Cleanup of {} is not due yet", self.display_name);
                return Ok(None);
            }
            let report = policy.clean(self.root(), now)?;
            policy.mark_cleaned(self.root(), now)?;
            Ok(Some(report))
        })
    }

    /// Hold ownership for the whole of `action`, so every operation it makes
    /// shares one lock cycle
    ///
    /// Unlike single operations, this waits for another thread of this
    /// process to finish with the cache instead of failing.
    pub fn use_cache<T>(&self, action: impl FnOnce(&Self) -> StashResult<T>) -> StashResult<T> {
        let (ownership, engine) = self.take_ownership(true)?;
        drop(engine);
        let result = action(self);
        self.finish(ownership, result)
    }

    /// Release the file lock and engine and refuse further operations
    ///
    /// Closing twice is harmless.
    pub fn close(&self) -> StashResult<()> {
        let mut state = self.state.lock();
        self.check_owner(&state)?;

        state.close_calls += 1;
        if state.closed {
            debug!(
                "{} was closed {} times",
                self.display_name, state.close_calls
            );
            return Ok(());
        }
        state.closed = true;

        let result = match state.held.take() {
            Some(held) => {
                state.stats.engine_closes += 1;
                self.unlock_and_close(held)
            }
            None => Ok(()),
        };
        self.released.notify_all();
        debug!("Closed {}", self.display_name);
        result
    }

    fn with_engine<T>(&self, op: impl FnOnce(&Engine) -> StashResult<T>) -> StashResult<T> {
        let (ownership, engine) = self.take_ownership(false)?;
        let result = op(&engine);
        drop(engine);
        self.finish(ownership, result)
    }

    /// Release ownership, preferring the operation's own error over a
    /// failure to close
    fn finish<T>(&self, ownership: Ownership<'_>, result: StashResult<T>) -> StashResult<T> {
        let released = ownership.release();
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!("Failed to release {}: {}", self.display_name, close_err);
                Err(e)
            }
        }
    }

    fn check_owner(&self, state: &OwnershipState) -> StashResult<()> {
        match state.owner {
            Some(owner) if owner != thread::current().id() => Err(StashError::illegal_state(
                format!(
                    "Cannot take ownership of {} as it is currently being used by another thread",
                    self.display_name
                ),
            )),
            _ => Ok(()),
        }
    }

    /// Take one level of ownership for the current thread
    ///
    /// The returned engine handle must be dropped before the ownership is
    /// released, so the last release can close the engine.
    fn take_ownership(&self, wait: bool) -> StashResult<(Ownership<'_>, Arc<Engine>)> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if wait {
            while !state.closed && state.owner.is_some_and(|owner| owner != me) {
                self.released.wait(&mut state);
            }
        }
        if state.closed {
            return Err(StashError::CacheClosed(self.display_name.clone()));
        }
        self.check_owner(&state)?;

        state.owner = Some(me);
        state.depth += 1;

        // Other threads see `owner` while this one waits on the file lock
        let current = state.held.as_ref().map(|held| Arc::clone(&held.engine));
        let engine = match current {
            Some(engine) => engine,
            None => match MutexGuard::unlocked(&mut state, || self.lock_and_open()) {
                Ok(held) => {
                    let engine = Arc::clone(&held.engine);
                    state.held = Some(held);
                    state.stats.engine_opens += 1;
                    engine
                }
                Err(e) => {
                    state.depth -= 1;
                    if state.depth == 0 {
                        state.owner = None;
                        self.released.notify_all();
                    }
                    return Err(e);
                }
            },
        };

        let ownership = Ownership {
            cache: self,
            released: false,
        };
        Ok((ownership, engine))
    }

    fn release_ownership(&self) -> StashResult<()> {
        let mut state = self.state.lock();
        state.depth = state.depth.saturating_sub(1);
        if state.depth > 0 {
            return Ok(());
        }

        state.owner = None;
        let result = match state.held.take() {
            Some(held) => {
                state.stats.engine_closes += 1;
                self.unlock_and_close(held)
            }
            None => Ok(()),
        };
        self.released.notify_all();
        result
    }

    fn lock_and_open(&self) -> StashResult<HeldLock> {
        let lock_error = |source| StashError::Lock {
            path: self.lock_path.clone(),
            source,
        };

        let file = open_lock_file(&self.lock_path).map_err(lock_error)?;
        if file.try_lock_exclusive().is_err() {
            info!(
                "Waiting for {} to be released by another process",
                self.display_name
            );
            file.lock_exclusive().map_err(lock_error)?;
        }
        debug!("Acquired lock on {}", self.display_name);

        match self.spec.open() {
            Ok(engine) => Ok(HeldLock {
                file,
                engine: Arc::new(engine),
            }),
            Err(e) => {
                if let Err(unlock_err) = FileExt::unlock(&file) {
                    warn!("Failed to unlock {}: {}", self.lock_path.display(), unlock_err);
                }
                Err(e)
            }
        }
    }

    fn unlock_and_close(&self, held: HeldLock) -> StashResult<()> {
        let HeldLock { file, engine } = held;

        let closed = match Arc::try_unwrap(engine) {
            Ok(engine) => engine.close(),
            Err(_) => {
                debug!(
                    "{} engine still referenced, it closes when the last operation ends",
                    self.display_name
                );
                Ok(())
            }
        };
        let unlocked = FileExt::unlock(&file).map_err(|source| StashError::Lock {
            path: self.lock_path.clone(),
            source,
        });
        debug!("Released lock on {}", self.display_name);

        closed.and(unlocked)
    }
}

/// Open (creating if needed) the lock file without touching its contents
pub(crate) fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
}

impl Drop for LockingBuildCache {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close {}: {}", self.display_name, e);
        }
    }
}

impl fmt::Debug for LockingBuildCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockingBuildCache")
            .field("root", &self.root())
            .field("engine", &self.spec.kind)
            .finish()
    }
}

/// One level of ownership held by the current thread
struct Ownership<'a> {
    cache: &'a LockingBuildCache,
    released: bool,
}

impl Ownership<'_> {
    fn release(mut self) -> StashResult<()> {
        self.released = true;
        self.cache.release_ownership()
    }
}

impl Drop for Ownership<'_> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.cache.release_ownership() {
                warn!("Failed to release {}: {}", self.cache.display_name, e);
            }
        }
    }
}
