//! Command handlers for the media gateway CLI
//!
//! Each handler takes the already loaded [`AppConfig`] plus its own
//! arguments, builds what it needs from the runtime configuration and
//! reports to stdout.

use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::app::api;
use crate::app::coordinator::{wait_for_shutdown, Gateway, GatewayConfig, ShutdownSignal};
use crate::app::persistence::{JsonTaskStore, TaskPersistence, TaskStore};
use crate::app::progress::format_size;
use crate::app::{CacheStore, HttpProvider};
use crate::cli::{CacheAction, CacheArgs, GlobalArgs, InitArgs, ServeArgs, TasksAction, TasksArgs};
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Runtime configuration with command-line overrides applied
pub fn runtime_config(
    config: &AppConfig,
    global: &GlobalArgs,
    serve: Option<&ServeArgs>,
) -> Result<GatewayConfig> {
    let mut config = config.clone();
    if let Some(cache_dir) = &global.cache_dir {
        config.cache.cache_root = Some(cache_dir.clone());
    }
    if let Some(args) = serve {
        if let Some(bind) = &args.bind {
            config.server.bind = bind.clone();
        }
        if args.no_resume {
            config.resume.enabled = false;
        }
    }
    config.to_runtime_config()
}

/// Handle the serve command
///
/// Runs until SIGINT/SIGTERM, then drains HTTP connections for at most
/// `server.shutdown_timeout` and stops the transfer queue. Task records are
/// kept so the next start resumes them.
pub async fn handle_serve(config: &AppConfig, global: &GlobalArgs, args: ServeArgs) -> Result<()> {
    let start_time = Instant::now();
    let runtime = runtime_config(config, global, Some(&args))?;
    let bind = runtime.server.bind.clone();
    let drain_timeout = runtime.server.shutdown_timeout;

    let provider = Arc::new(HttpProvider::new(runtime.provider.clone())?);
    info!("Using provider at {}", runtime.provider.base_url);
    let gateway = Gateway::open(runtime, provider).await?;

    let shutdown = ShutdownSignal::new();
    let _signals = shutdown.listen_for_os_signals();
    let background = gateway.start_background(&shutdown);

    let listener = TcpListener::bind(&bind)
        .await
        .map_err(|e| AppError::generic(format!("Failed to bind {}: {}", bind, e)))?;
    println!("Media gateway listening on http://{}", bind);
    debug!("Startup took {:?}", start_time.elapsed());

    let mut server = tokio::spawn(api::serve(gateway.clone(), listener, shutdown.subscribe()));
    let stopped = wait_for_shutdown(shutdown.subscribe());

    let outcome = tokio::select! {
        result = &mut server => {
            // Server ended on its own; stop everything else too
            shutdown.trigger();
            flatten_server_result(result)
        }
        _ = stopped => {
            info!("Draining HTTP connections");
            match tokio::time::timeout(drain_timeout, &mut server).await {
                Ok(result) => flatten_server_result(result),
                Err(_) => {
                    warn!("HTTP server did not drain within {:?}", drain_timeout);
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    gateway.shutdown(background).await;
    info!("Gateway stopped after {:?}", start_time.elapsed());
    outcome
}

fn flatten_server_result(
    result: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("HTTP server failed: {}", e);
            Err(e.into())
        }
        Err(e) => Err(AppError::generic(format!("HTTP server task failed: {}", e))),
    }
}

/// Handle the init command
pub async fn handle_init(global: &GlobalArgs, args: InitArgs) -> Result<()> {
    let path = AppConfig::initialize(global.config.clone(), args.force).await?;
    println!("📁 Created configuration file:");
    println!("   {}", path.display());
    println!("   Edit it to point the gateway at your provider.");
    Ok(())
}

/// Handle the tasks command
pub async fn handle_tasks(config: &AppConfig, global: &GlobalArgs, args: TasksArgs) -> Result<()> {
    let runtime = runtime_config(config, global, None)?;
    let state_dir = runtime.persistence.resolve_state_dir();
    let store = Arc::new(JsonTaskStore::open(&state_dir).await?);

    match args.action {
        TasksAction::List => {
            let records = store.list_all().await?;
            if records.is_empty() {
                println!("No persisted transfers in {}", state_dir.display());
                return Ok(());
            }

            println!(
                "{:<36}  {:<14}  {:<8}  {:>10}  {:>6}  NAME",
                "ID", "KIND", "STATE", "SIZE", "DONE"
            );
            for record in &records {
                println!(
                    "{:<36}  {:<14}  {:<8}  {:>10}  {:>5.1}%  {}",
                    record.internal_id,
                    record.kind.to_string(),
                    record.state.to_string(),
                    format_size(record.total_size),
                    record.progress,
                    record.name
                );
                if let Some(message) = &record.last_error {
                    println!("{:>38}error: {}", "", message);
                }
            }
            println!();
            println!("{} transfers in {}", records.len(), state_dir.display());
        }
        TasksAction::PurgeStale => {
            let persistence = TaskPersistence::new(store, runtime.persistence.clone());
            let removed = persistence.sweep_stale().await;
            println!(
                "Removed {} records idle for more than {}",
                removed,
                humantime_span(runtime.persistence.stale_after)
            );
        }
    }
    Ok(())
}

/// Handle the cache command
pub async fn handle_cache(config: &AppConfig, global: &GlobalArgs, args: CacheArgs) -> Result<()> {
    let runtime = runtime_config(config, global, None)?;
    match args.action {
        CacheAction::Info => {
            let cache = CacheStore::new(runtime.cache).await?;
            let files = cache.list().await?;
            let total: u64 = files.iter().map(|file| file.length).sum();

            for file in &files {
                println!("{:>10}  {}", format_size(file.length), file.cache_key);
            }
            if !files.is_empty() {
                println!();
            }
            println!("Cache directory: {}", cache.root().display());
            println!("Files:           {}", files.len());
            println!("Size on disk:    {}", format_size(total));
        }
    }
    Ok(())
}

fn humantime_span(duration: std::time::Duration) -> String {
    let hours = duration.as_secs() / 3600;
    if hours >= 48 && hours % 24 == 0 {
        format!("{} days", hours / 24)
    } else if hours > 0 {
        format!("{} hours", hours)
    } else {
        format!("{} seconds", duration.as_secs())
    }
}
