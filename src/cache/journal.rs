//! Access-time journal for cache entries
//!
//! The last access of an entry is recorded as the file's modification time.
//! Entries are never modified after they are renamed into place, so the
//! mtime is free to carry this information and needs no side database.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Reads and writes last-access timestamps of files in the cache root
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessTimeJournal;

impl AccessTimeJournal {
    /// Record `time` as the last access of `path`
    pub fn set_last_access_time(&self, path: &Path, time: SystemTime) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_modified(time)
    }

    /// Record an access happening now
    pub fn touch(&self, path: &Path) -> io::Result<()> {
        self.set_last_access_time(path, SystemTime::now())
    }

    /// Last recorded access of `path`
    pub fn last_access_time(&self, path: &Path) -> io::Result<SystemTime> {
        fs::metadata(path)?.modified()
    }
}
