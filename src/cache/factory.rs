//! Opening a build cache from settings
//!
//! Resolves the cache root, makes sure it is a writable directory and wires
//! the chosen engine, cleanup policy and lock coordinator together.

use crate::cache::cleanup::LruCleanup;
use crate::cache::coordinator::{open_lock_file, LockingBuildCache, LOCK_FILE_NAME};
use crate::config::CacheConfig;
use crate::engine::{EngineKind, EngineSpec};
use crate::error::{StashError, StashResult};
use fs4::FileExt;
use std::env;
use std::fs::{self, File};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info};
use uuid::Uuid;

/// Environment variable naming the cache root when none is configured
pub const CACHE_DIR_ENV: &str = "BUILDSTASH_CACHE_DIR";

/// Name of the cache root under the user cache directory
pub const DEFAULT_CACHE_DIR_NAME: &str = "build-cache-1";

/// What the factory needs to open a cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Cache root; falls back to `BUILDSTASH_CACHE_DIR`, then the default
    pub dir: Option<PathBuf>,
    pub engine: EngineKind,
    pub remove_unused_entries_after_days: u32,
    /// Pool bound for the relational engine; host parallelism when unset
    pub max_pool_size: Option<NonZeroU32>,
}

impl CacheSettings {
    /// Settings for a cache rooted at `dir`
    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
            ..Self::default()
        }
    }

    pub fn with_engine(mut self, engine: EngineKind) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.remove_unused_entries_after_days = days;
        self
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            engine: config.engine,
            remove_unused_entries_after_days: config.remove_unused_entries_after_days,
            max_pool_size: config.max_pool_size.and_then(NonZeroU32::new),
        }
    }
}

/// Creates [`LockingBuildCache`] instances
pub struct BuildCacheFactory;

impl BuildCacheFactory {
    /// Validate the cache root and build a coordinator for it
    ///
    /// Nothing is locked yet; the engine opens on the first operation.
    pub fn open(settings: &CacheSettings) -> StashResult<LockingBuildCache> {
        let root = Self::resolve_dir(settings);
        Self::prepare_dir(&root)?;

        let spec = EngineSpec {
            kind: settings.engine,
            root,
            max_pool_size: settings.max_pool_size.unwrap_or_else(default_pool_size),
        };
        let cleanup = match settings.engine {
            EngineKind::Directory => Some(LruCleanup::new(
                settings.remove_unused_entries_after_days,
            )),
            EngineKind::Relational | EngineKind::LogStructured => None,
        };

        info!(
            "Using {} build cache at {}",
            spec.kind,
            spec.root().display()
        );
        Ok(LockingBuildCache::new(spec, cleanup))
    }

    /// Cache root for `settings`: configured dir, then env var, then default
    pub fn resolve_dir(settings: &CacheSettings) -> PathBuf {
        settings
            .dir
            .clone()
            .or_else(|| {
                env::var_os(CACHE_DIR_ENV)
                    .filter(|value| !value.is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(Self::default_dir)
    }

    /// Default cache root under the user cache directory
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("buildstash")
            .join(DEFAULT_CACHE_DIR_NAME)
    }

    /// Create the root if needed and check, under the cache lock, that it
    /// accepts new files
    fn prepare_dir(root: &Path) -> StashResult<()> {
        if root.exists() && !root.is_dir() {
            return Err(StashError::TargetNotDirectory(root.to_path_buf()));
        }
        fs::create_dir_all(root).map_err(|source| StashError::TargetNotWritable {
            path: root.to_path_buf(),
            source,
        })?;

        let not_writable = |source| StashError::TargetNotWritable {
            path: root.to_path_buf(),
            source,
        };
        let lock_path = root.join(LOCK_FILE_NAME);
        let lock = open_lock_file(&lock_path).map_err(not_writable)?;
        lock.lock_exclusive().map_err(|source| StashError::Lock {
            path: lock_path.clone(),
            source,
        })?;

        let probe = root.join(format!(".write-probe-{}", Uuid::new_v4().simple()));
        let probed = File::create(&probe).and_then(|_| fs::remove_file(&probe));
        if let Err(e) = FileExt::unlock(&lock) {
            debug!("Failed to unlock {}: {}", lock_path.display(), e);
        }
        probed.map_err(not_writable)?;

        debug!("Cache root {} is writable", root.display());
        Ok(())
    }
}

fn default_pool_size() -> NonZeroU32 {
    thread::available_parallelism()
        .ok()
        .and_then(|n| u32::try_from(n.get()).ok())
        .and_then(NonZeroU32::new)
        .unwrap_or(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheKey, EntrySource};
    use serial_test::serial;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("a").join("b");

        let cache = BuildCacheFactory::open(&CacheSettings::at(&root)).unwrap();
        assert!(root.is_dir());
        assert_eq!(cache.root(), root);

        let names: Vec<_> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![LOCK_FILE_NAME]);
    }

    #[test]
    fn write_check_waits_for_cache_lock() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().to_path_buf();
        let holder = open_lock_file(&root.join(LOCK_FILE_NAME)).unwrap();
        holder.lock_exclusive().unwrap();
        let opened = AtomicBool::new(false);

        thread::scope(|s| {
            let opener = s.spawn(|| {
                let result = BuildCacheFactory::open(&CacheSettings::at(&root));
                opened.store(true, Ordering::SeqCst);
                result
            });

            thread::sleep(Duration::from_millis(100));
            let finished_early = opened.load(Ordering::SeqCst);
            FileExt::unlock(&holder).unwrap();

            assert!(opener.join().unwrap().is_ok());
            assert!(!finished_early);
        });
    }

    #[test]
    fn rejects_file_as_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();

        let err = BuildCacheFactory::open(&CacheSettings::at(&file)).unwrap_err();
        assert!(matches!(err, StashError::TargetNotDirectory(_)));
    }

    #[test]
    fn opened_cache_is_usable() {
        let temp = TempDir::new().unwrap();
        for engine in [
            EngineKind::Directory,
            EngineKind::Relational,
            EngineKind::LogStructured,
        ] {
            let settings = CacheSettings::at(temp.path().join(engine.to_string()))
                .with_engine(engine);
            let cache = BuildCacheFactory::open(&settings).unwrap();
            let key = CacheKey::digest(b"factory");

            cache.store(&key, EntrySource::from_bytes(b"out")).unwrap();
            assert!(cache.contains(&key).unwrap());
            assert_eq!(cache.engine_kind(), engine);
        }
    }

    #[test]
    fn settings_from_config() {
        let config = CacheConfig {
            max_pool_size: Some(0),
            remove_unused_entries_after_days: 3,
            ..CacheConfig::default()
        };
        let settings = CacheSettings::from(&config);
        assert_eq!(settings.max_pool_size, None);
        assert_eq!(settings.remove_unused_entries_after_days, 3);
        assert_eq!(settings.engine, EngineKind::Directory);
    }

    #[test]
    fn default_pool_size_is_positive() {
        assert!(default_pool_size().get() >= 1);
    }

    #[test]
    #[serial]
    fn env_var_used_when_dir_unset() {
        let temp = TempDir::new().unwrap();
        env::set_var(CACHE_DIR_ENV, temp.path());

        let resolved = BuildCacheFactory::resolve_dir(&CacheSettings::default());
        env::remove_var(CACHE_DIR_ENV);

        assert_eq!(resolved, temp.path());
    }

    #[test]
    #[serial]
    fn configured_dir_beats_env_var() {
        let temp = TempDir::new().unwrap();
        env::set_var(CACHE_DIR_ENV, temp.path().join("from-env"));

        let settings = CacheSettings::at(temp.path().join("configured"));
        let resolved = BuildCacheFactory::resolve_dir(&settings);
        env::remove_var(CACHE_DIR_ENV);

        assert_eq!(resolved, temp.path().join("configured"));
    }

    #[test]
    #[serial]
    fn default_dir_when_nothing_set() {
        env::remove_var(CACHE_DIR_ENV);
        let resolved = BuildCacheFactory::resolve_dir(&CacheSettings::default());
        assert!(resolved.ends_with(Path::new("buildstash").join(DEFAULT_CACHE_DIR_NAME)));
    }
}
