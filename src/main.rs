use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pooled_http_server::config::Config;
use pooled_http_server::server::{Server, ShutdownHandle};

// written once before serving starts, only read from the signal task
static SHUTDOWN: OnceLock<ShutdownHandle> = OnceLock::new();

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level)?;

    let server = match Server::start(config.server_config()) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            return Err(e.into());
        }
    };
    SHUTDOWN
        .set(server.shutdown_handle())
        .map_err(|_| anyhow!("shutdown handle already installed"))?;
    info!("Server started on {}...", server.local_addr());

    let signals = tokio::spawn(async {
        let result = wait_for_signal().await;
        if let Err(e) = &result {
            error!(error = %e, "signal handling failed; shutting down");
        }
        if let Some(handle) = SHUTDOWN.get() {
            handle.request();
        }
        result
    });

    let report = server.run().await;
    info!(dropped = report.dropped_connections, "Server shut down gracefully");

    signals.await??;
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?,
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    info!("termination signal received");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("termination signal received");
    Ok(())
}
