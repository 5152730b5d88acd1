//! Foreground hosting of a [`RunnableService`].

use std::future::Future;

use tokio::signal;

use crate::error::AppResult;
use crate::services::RunnableService;

pub struct ServiceHost<S> {
    service: S,
}

impl<S: RunnableService> ServiceHost<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// Start the service, wait for Ctrl+C or SIGTERM, then stop it
    pub async fn run_until_shutdown(self) -> AppResult<S> {
        self.run_until(shutdown_signal()).await
    }

    /// Start the service, wait for `signal`, then stop it
    pub async fn run_until<F>(mut self, signal: F) -> AppResult<S>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(service = %self.service.name(), "Starting service");
        self.service.start().await?;
        tracing::info!(service = %self.service.name(), "Service started");

        signal.await;

        tracing::info!(service = %self.service.name(), "Stopping service");
        self.service.stop().await?;
        tracing::info!(service = %self.service.name(), "Service stopped");

        Ok(self.service)
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
