//! Command-line argument parsing for the media gateway
//!
//! Defines the CLI structure with clap derive macros: running the HTTP
//! gateway, writing a starter config file, and offline inspection of task
//! records and the cache directory.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Media Gateway - caching range-streaming front for a chunked remote provider
#[derive(Parser, Debug)]
#[command(
    name = "media_gateway",
    version,
    about = "Caching range-streaming gateway for a chunked remote file provider",
    long_about = "Serves byte ranges of remote media from a local partial cache, filling gaps with \
aligned provider reads. Background downloads and uploads are queued, rate tracked, and resumed \
after a restart."
)]
pub struct Cli {
    /// Global options
    #[command(flatten)]
    pub global: GlobalArgs,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Global arguments available to all subcommands
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Very verbose logging (debug level)
    #[arg(long, global = true)]
    pub very_verbose: bool,

    /// Quiet mode - errors only
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Cache directory path
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the HTTP gateway until interrupted
    Serve(ServeArgs),

    /// Write a default configuration file
    Init(InitArgs),

    /// Inspect persisted transfer records
    Tasks(TasksArgs),

    /// Cache directory information
    Cache(CacheArgs),
}

/// Arguments for the serve command
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Listen address, overrides `server.bind`
    #[arg(short, long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Do not resume unfinished transfers at startup
    #[arg(long)]
    pub no_resume: bool,
}

/// Arguments for the init command
#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    /// Overwrite an existing file
    #[arg(short, long)]
    pub force: bool,
}

/// Arguments for task record inspection
#[derive(Args, Debug)]
pub struct TasksArgs {
    #[command(subcommand)]
    pub action: TasksAction,
}

/// Task record actions
#[derive(Subcommand, Debug)]
pub enum TasksAction {
    /// List persisted transfers
    List,

    /// Delete records not updated within `persistence.stale_after`
    PurgeStale,
}

/// Arguments for cache management
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache management actions
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache location, file count and size
    Info,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the logging level based on global arguments
    ///
    /// `configured` is the level from the config file, used when no flag is
    /// given.
    pub fn log_level(&self, configured: &str) -> String {
        if self.global.quiet {
            "error".to_string()
        } else if self.global.very_verbose {
            "debug".to_string()
        } else if self.global.verbose {
            "info".to_string()
        } else {
            configured.to_string()
        }
    }
}
