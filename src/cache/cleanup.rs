//! Least-recently-used cleanup of the directory engine
//!
//! Entries live one level below the cache root. Each one's last access is
//! read from the [`AccessTimeJournal`]; anything not accessed within the
//! retention window is deleted. Cleanup only reads timestamps, it never
//! refreshes them.

use crate::cache::coordinator::LOCK_FILE_NAME;
use crate::cache::AccessTimeJournal;
use crate::engine::directory::FAILED_SUFFIX;
use crate::error::{StashError, StashResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Marker whose mtime records the last cleanup run
pub const CLEANUP_MARKER: &str = "gc.properties";

/// Minimum time between two throttled cleanup runs
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Files inspected
    pub scanned: u64,
    /// Files deleted
    pub deleted: u64,
    /// Bytes freed by the deleted files
    pub freed_bytes: u64,
}

/// Deletes entries not accessed for `max_age_days`
#[derive(Debug, Clone)]
pub struct LruCleanup {
    max_age_days: u32,
    journal: AccessTimeJournal,
}

impl LruCleanup {
    pub fn new(max_age_days: u32) -> Self {
        Self {
            max_age_days,
            journal: AccessTimeJournal,
        }
    }

    pub fn max_age_days(&self) -> u32 {
        self.max_age_days
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(u64::from(self.max_age_days) * SECONDS_PER_DAY)
    }

    /// Delete every entry below `root` whose age is at least the retention
    /// window, measured against `now`
    pub fn clean(&self, root: &Path, now: SystemTime) -> StashResult<CleanupReport> {
        let max_age = self.max_age();
        let mut report = CleanupReport::default();

        let entries = fs::read_dir(root)
            .map_err(|e| StashError::io(format!("reading {}", root.display()), e))?;

        for entry in entries {
            let entry = entry.map_err(|e| StashError::io("reading cache directory entry", e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_reserved(name) {
                continue;
            }

            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StashError::io(format!("inspecting {}", path.display()), e))
                }
            };
            report.scanned += 1;

            let accessed = self.journal.last_access_time(&path).map_err(|e| {
                StashError::io(format!("reading access time of {}", path.display()), e)
            })?;
            let age = now.duration_since(accessed).unwrap_or_default();
            if age < max_age {
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed {} (unused for {}s)", name, age.as_secs());
                    report.deleted += 1;
                    report.freed_bytes += meta.len();
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }

        info!(
            "Cache cleanup removed {} of {} file(s), freed {} bytes",
            report.deleted, report.scanned, report.freed_bytes
        );
        Ok(report)
    }

    /// Whether enough time has passed since the last recorded cleanup
    pub fn is_due(&self, root: &Path, now: SystemTime) -> bool {
        match self.journal.last_access_time(&root.join(CLEANUP_MARKER)) {
            Ok(last) => now.duration_since(last).unwrap_or_default() >= CLEANUP_INTERVAL,
            Err(_) => true,
        }
    }

    /// Record that a cleanup ran at `now`
    pub fn mark_cleaned(&self, root: &Path, now: SystemTime) -> StashResult<()> {
        let marker = root.join(CLEANUP_MARKER);
        let stamp: DateTime<Utc> = now.into();
        fs::write(&marker, format!("#{}\n", stamp.to_rfc3339()))
            .map_err(|e| StashError::io(format!("writing {}", marker.display()), e))?;
        self.journal
            .set_last_access_time(&marker, now)
            .map_err(|e| StashError::io(format!("stamping {}", marker.display()), e))
    }
}

/// Files that are never considered for eviction
fn is_reserved(name: &str) -> bool {
    name == LOCK_FILE_NAME || name == CLEANUP_MARKER || name.ends_with(FAILED_SUFFIX)
}
