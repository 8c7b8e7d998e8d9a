//! buildstash - Local build cache
//!
//! CLI entry point that dispatches to subcommands.

use buildstash::cli::{self, Cli, Commands};
use buildstash::config::{ConfigManager, LogFormat};
use buildstash::error::StashResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

fn run() -> StashResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load()?;

    init_logging(cli.verbose, config.general.log_format);

    let settings = cli::cache_settings(&cli, &config);

    // Dispatch to command
    match cli.command {
        Commands::Put(args) => cli::commands::put(args, &settings),
        Commands::Get(args) => cli::commands::get(args, &settings),
        Commands::Contains(args) => cli::commands::contains(args, &settings),
        Commands::Stats(args) => cli::commands::stats(args, &settings),
        Commands::Cleanup(args) => cli::commands::cleanup(args, &settings),
        Commands::Config(args) => cli::commands::config(args, &config_manager, &config),
    }
}

/// Install the stderr subscriber: 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, format: LogFormat) {
    let filter = match verbose {
        0 => EnvFilter::new("buildstash=warn"),
        1 => EnvFilter::new("buildstash=info"),
        _ => EnvFilter::new("buildstash=debug"),
    };

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
