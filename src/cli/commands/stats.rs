//! Stats command - show what the cache holds

use crate::cache::{BuildCacheFactory, CacheSettings};
use crate::cli::args::{OutputFormat, StatsArgs};
use crate::engine::{EngineKind, EngineStats};
use crate::error::StashResult;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct StatsReport<'a> {
    root: &'a Path,
    engine: EngineKind,
    #[serde(flatten)]
    stats: EngineStats,
}

/// Execute the stats command
pub fn execute(args: StatsArgs, settings: &CacheSettings) -> StashResult<()> {
    let cache = BuildCacheFactory::open(settings)?;
    let stats = cache.stats()?;
    cache.close()?;

    let report = StatsReport {
        root: cache.root(),
        engine: cache.engine_kind(),
        stats,
    };

    match args.format {
        OutputFormat::Text => print_text(&report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn print_text(report: &StatsReport<'_>) {
    println!("{:<10} {}", "Cache:", report.root.display());
    println!("{:<10} {}", "Engine:", report.engine);
    println!("{:<10} {}", "Entries:", report.stats.entries);
    println!(
        "{:<10} {}",
        "Size:",
        format_bytes(report.stats.total_bytes)
    );
}

/// Human readable byte count
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.1} {}", value, unit)
}
