//! Contains command - check whether an entry is cached

use crate::cache::{BuildCacheFactory, CacheSettings};
use crate::cli::args::ContainsArgs;
use crate::cli::parse_key;
use crate::error::StashResult;

/// Execute the contains command; prints `true` or `false`
pub fn execute(args: ContainsArgs, settings: &CacheSettings) -> StashResult<()> {
    let key = parse_key(&args.key)?;
    let cache = BuildCacheFactory::open(settings)?;
    let found = cache.contains(&key)?;
    cache.close()?;

    println!("{}", found);
    Ok(())
}
