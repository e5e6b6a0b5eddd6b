//! Shutdown signalling
//!
//! One broadcast channel carries the shutdown request to every long-running
//! part of the gateway: the HTTP server, background tasks, and whoever else
//! subscribes. It fires on Ctrl+C, on SIGTERM, or when triggered by hand.

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Fan-out shutdown notification
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// A receiver that resolves once shutdown is requested
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Request shutdown
    pub fn trigger(&self) {
        // Nobody listening is fine
        let _ = self.tx.send(());
    }

    /// Trigger shutdown on Ctrl+C or SIGTERM
    pub fn listen_for_os_signals(&self) -> JoinHandle<()> {
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                match signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl+C received, shutting down"),
                    Err(e) => {
                        warn!("Cannot listen for Ctrl+C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("SIGTERM received, shutting down");
                    }
                    Err(e) => {
                        warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {}
                _ = terminate => {}
            }
            let _ = tx.send(());
        })
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve when `rx` sees a shutdown request or its sender is gone
pub async fn wait_for_shutdown(mut rx: broadcast::Receiver<()>) {
    let _ = rx.recv().await;
}
