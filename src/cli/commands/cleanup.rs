//! Cleanup command - remove entries that have not been used recently

use crate::cache::{BuildCacheFactory, CacheSettings};
use crate::cli::args::CleanupArgs;
use crate::engine::EngineKind;
use crate::error::StashResult;
use console::style;

/// Execute the cleanup command
pub fn execute(args: CleanupArgs, settings: &CacheSettings) -> StashResult<()> {
    if settings.engine != EngineKind::Directory {
        println!(
            "Cleanup only applies to the directory engine ({} in use).",
            settings.engine
        );
        return Ok(());
    }

    let mut settings = settings.clone();
    if let Some(days) = args.days {
        settings.remove_unused_entries_after_days = days;
    }

    let cache = BuildCacheFactory::open(&settings)?;
    let report = if args.if_due {
        cache.cleanup_if_due()?
    } else {
        Some(cache.cleanup()?)
    };
    cache.close()?;

    match report {
        None => println!("Cleanup not due yet."),
        Some(report) if report.deleted == 0 => println!(
            "No entries unused for {} days.",
            settings.remove_unused_entries_after_days
        ),
        Some(report) => println!(
            "{} removed {} of {} file(s), freed {} bytes",
            style("✓").green(),
            report.deleted,
            report.scanned,
            report.freed_bytes
        ),
    }
    Ok(())
}
