//! Get command - write a cached entry to stdout or a file

use crate::cache::{BuildCacheFactory, CacheKey, CacheSettings, LockingBuildCache};
use crate::cli::args::GetArgs;
use crate::cli::parse_key;
use crate::error::{StashError, StashResult};
use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Execute the get command
///
/// A miss is reported as an error so scripts can branch on the exit code.
/// The entry is copied into a staging file first; only the engine's own
/// read can mark the entry as corrupt, never a failing stdout or output
/// file.
pub fn execute(args: GetArgs, settings: &CacheSettings) -> StashResult<()> {
    let key = parse_key(&args.key)?;
    let cache = BuildCacheFactory::open(settings)?;

    let found = match &args.output {
        Some(path) => {
            let dir = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let staged = NamedTempFile::new_in(dir)
                .map_err(|e| StashError::io(format!("creating a file in {}", dir.display()), e))?;
            let found = stage_entry(&cache, &key, staged.as_file())?;
            if found {
                staged
                    .persist(path)
                    .map_err(|e| StashError::io(format!("writing {}", path.display()), e.error))?;
            }
            found
        }
        None => {
            let mut staged = tempfile::tempfile()
                .map_err(|e| StashError::io("creating a staging file", e))?;
            let found = stage_entry(&cache, &key, &staged)?;
            if found {
                staged
                    .rewind()
                    .and_then(|()| {
                        let stdout = io::stdout();
                        let mut out = stdout.lock();
                        io::copy(&mut staged, &mut out)?;
                        out.flush()
                    })
                    .map_err(|e| StashError::io("writing entry to stdout", e))?;
            }
            found
        }
    };
    cache.close()?;

    if !found {
        return Err(StashError::User(format!("No cache entry for {}", key)));
    }
    debug!("Wrote entry {}", key);
    Ok(())
}

/// Copy the entry for `key` into `file`, returning whether it was found
fn stage_entry(cache: &LockingBuildCache, key: &CacheKey, file: &File) -> StashResult<bool> {
    let mut out = BufWriter::new(file);
    cache.load(key, |entry: &mut dyn Read| {
        io::copy(entry, &mut out)?;
        out.flush()
    })
}
