use std::path::Path;

use rockferry::ControllerConfig;
use rockferry::Error;
use rockferry::NetworkError;
use rockferry::NodeBuilder;
use rockferry::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

const LOG_FILE_NAME: &str = "rockferry.log";

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let config = ControllerConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.server.log_dir);
    info!(
        git_sha = env!("VERGEN_GIT_SHA"),
        git_branch = env!("VERGEN_GIT_BRANCH"),
        "starting rockferry controller"
    );

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    let node = NodeBuilder::init(config, graceful_rx.clone())
        .build()?
        .start_metrics_server(graceful_rx.clone())
        .start_rpc_server()?
        .start_http_server()?
        .ready()?;

    info!("Application started. Waiting for SIGINT/SIGTERM...");
    tokio::spawn(async {
        if let Err(e) = graceful_shutdown(graceful_tx).await {
            error!("Failed to shutdown: {:?}", e);
        }
    });

    if let Err(e) = node.run().await {
        error!("node stops: {:?}", e);
        return Err(e);
    }

    info!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(format!("SIGTERM handler: {e}")))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        NetworkError::SignalSendFailed(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown signal sent");
    Ok(())
}

/// Logs go to `log_dir` through a non-blocking writer; `RUST_LOG` filters.
/// The guard must live as long as the process to flush buffered lines.
fn init_observability(log_dir: &Path) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(file_layer).init();

    guard
}
