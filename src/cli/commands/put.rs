//! Put command - store a file in the cache

use crate::cache::{BuildCacheFactory, CacheKey, CacheSettings, EntrySource};
use crate::cli::args::PutArgs;
use crate::cli::parse_key;
use crate::error::{StashError, StashResult};
use console::style;
use std::fs::File;

/// Execute the put command
pub fn execute(args: PutArgs, settings: &CacheSettings) -> StashResult<()> {
    let key = match args.key.as_deref() {
        Some(raw) => parse_key(raw)?,
        None => {
            let file = File::open(&args.file).map_err(|e| {
                StashError::io(format!("opening {}", args.file.display()), e)
            })?;
            CacheKey::digest_reader(file).map_err(|e| {
                StashError::io(format!("hashing {}", args.file.display()), e)
            })?
        }
    };

    let source = EntrySource::from_file(&args.file)
        .map_err(|e| StashError::io(format!("opening {}", args.file.display()), e))?;
    let size = source.size();

    let cache = BuildCacheFactory::open(settings)?;
    let existed = cache.use_cache(|c| {
        let existed = c.contains(&key)?;
        c.store(&key, source)?;
        Ok(existed)
    })?;
    cache.close()?;

    if existed {
        println!("{} {} (already cached)", style("=").dim(), key);
    } else {
        println!("{} {} ({} bytes)", style("✓").green(), key, size);
    }
    Ok(())
}
