//! CLI argument definitions using clap derive

use crate::engine::EngineKind;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// buildstash - Local build cache
///
/// Stores build outputs under content fingerprints in a cache directory
/// that concurrent build processes can share.
#[derive(Parser, Debug)]
#[command(name = "buildstash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "BUILDSTASH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Cache directory (overrides cache.dir)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Storage engine (overrides cache.engine)
    #[arg(long, global = true, value_enum)]
    pub engine: Option<EngineArg>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a file in the cache
    Put(PutArgs),

    /// Write a cached entry to stdout or a file
    Get(GetArgs),

    /// Check whether an entry is cached
    Contains(ContainsArgs),

    /// Show entry count and size of the cache
    Stats(StatsArgs),

    /// Remove entries that have not been used recently
    Cleanup(CleanupArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the put command
#[derive(Parser, Debug)]
pub struct PutArgs {
    /// File whose content becomes the entry
    pub file: PathBuf,

    /// Cache key (defaults to the SHA-256 of the file)
    #[arg(short, long)]
    pub key: Option<String>,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Cache key to look up
    pub key: String,

    /// Write the entry to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the contains command
#[derive(Parser, Debug)]
pub struct ContainsArgs {
    /// Cache key to look up
    pub key: String,
}

/// Arguments for the stats command
#[derive(Parser, Debug)]
pub struct StatsArgs {
    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the cleanup command
#[derive(Parser, Debug)]
pub struct CleanupArgs {
    /// Only run if the last cleanup is more than a day old
    #[arg(long)]
    pub if_due: bool,

    /// Remove entries unused for N days (default: from config)
    #[arg(long)]
    pub days: Option<u32>,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for reports
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Storage engine choice on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EngineArg {
    Directory,
    Relational,
    LogStructured,
}

impl From<EngineArg> for EngineKind {
    fn from(arg: EngineArg) -> Self {
        match arg {
            EngineArg::Directory => EngineKind::Directory,
            EngineArg::Relational => EngineKind::Relational,
            EngineArg::LogStructured => EngineKind::LogStructured,
        }
    }
}
