use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::cloudbuild::CloudBuildClient;
use crate::config::Config;
use crate::credentials;
use crate::error::{CdbuildError, EXIT_FATAL};
use crate::http;
use crate::pipeline::{BuildReport, Pipeline};
use crate::storage::GcsStorage;

/// Wire the real Google clients into a [`Pipeline`] and run it until the
/// build finishes or a shutdown signal arrives.
pub async fn run(config: Config) -> Result<BuildReport, CdbuildError> {
    let storage_endpoint = http::parse_endpoint(&config.storage_endpoint)?;
    let build_endpoint = http::parse_endpoint(&config.build_endpoint)?;

    let token = credentials::ambient_token().await?;
    let client = http::client_with_authentication(&token)?;

    let storage = GcsStorage::new(client.clone(), storage_endpoint);
    let builds = CloudBuildClient::new(client, build_endpoint);
    let pipeline = Pipeline::new(config, Arc::new(storage), Arc::new(builds));

    if pipeline.config().sweep_orphans {
        let cleared = pipeline.sweep_orphans().await?;
        tracing::info!("Cleared {cleared} orphaned source archive(s)");
    }

    let signals = Box::pin(futures::stream::unfold((), |()| async {
        shutdown_signal().await;
        Some(((), ()))
    }));
    let (shutdown, relay) = relay_shutdown(signals);
    let report = pipeline.run(shutdown).await;
    relay.abort();
    report
}

/// Forward the first signal to the returned future.
///
/// A signal that arrives once the future is gone (say during the final
/// cleanup) is logged, and the one after it ends the process.
pub fn relay_shutdown<S>(mut signals: S) -> (impl Future<Output = ()>, JoinHandle<()>)
where
    S: Stream<Item = ()> + Send + Unpin + 'static,
{
    let (tx, rx) = oneshot::channel::<()>();
    let relay = tokio::spawn(async move {
        if signals.next().await.is_none() {
            return;
        }
        if tx.send(()).is_err() {
            tracing::warn!("Shutdown signal received while finishing up, send it again to exit now");
        }
        if signals.next().await.is_some() {
            tracing::error!("Second shutdown signal received, exiting");
            std::process::exit(EXIT_FATAL);
        }
    });

    let shutdown = async move {
        if rx.await.is_err() {
            // relay ended without a signal
            std::future::pending::<()>().await;
        }
    };
    (shutdown, relay)
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::warn!("Shutdown signal received");
}
