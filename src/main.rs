//! Media Gateway CLI application
//!
//! Runs the HTTP gateway and a few offline maintenance commands.

use std::process;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use media_gateway::cli::{handle_cache, handle_init, handle_serve, handle_tasks, Cli, Commands};
use media_gateway::config::AppConfig;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Main application logic
async fn run() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenv::dotenv().ok();

    let cli = Cli::parse_args();

    // `init` must work before any config file exists
    let config = if matches!(cli.command, Commands::Init(_)) {
        AppConfig::default()
    } else {
        AppConfig::load(cli.global.config.clone())
            .await
            .context("could not load configuration")?
    };
    init_logging(&cli.log_level(&config.logging.level), cli.global.very_verbose);

    info!("Media Gateway v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve(args) => handle_serve(&config, &cli.global, args)
            .await
            .context("gateway failed"),
        Commands::Tasks(args) => handle_tasks(&config, &cli.global, args)
            .await
            .context("task command failed"),
        Commands::Cache(args) => handle_cache(&config, &cli.global, args)
            .await
            .context("cache command failed"),
        Commands::Init(args) => handle_init(&cli.global, args)
            .await
            .context("could not write configuration"),
    }
}

/// Initialize logging; RUST_LOG directives still apply on top
fn init_logging(level: &str, show_levels: bool) {
    let mut filter = EnvFilter::from_default_env();
    match format!("media_gateway={}", level).parse() {
        Ok(directive) => filter = filter.add_directive(directive),
        Err(e) => eprintln!("Ignoring log level {:?}: {}", level, e),
    }

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(show_levels)
        .init();
}
