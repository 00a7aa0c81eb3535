//! C7 — Process Supervisor: wires the other components together and owns
//! the process lifecycle, mirroring the shape of the teacher's `main.rs`
//! startup sequence (construct state, leak it `'static`, spawn the server
//! task, wait on a cancellation signal) scaled down to this peer's surfaces.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::app_state::AppState;
use crate::client::NeighbourClient;
use crate::config::PeerConfig;
use crate::health;
use crate::metrics::MetricsSink;
use crate::peer_state::PeerState;
use crate::server;

/// Grace period for in-flight streams at shutdown, per spec §4.7.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runs one peer process to completion. Returns once both surfaces have
/// stopped accepting connections and the grace period has elapsed.
pub async fn run(config: PeerConfig, client: &'static dyn NeighbourClient) -> anyhow::Result<()> {
    let storage_dir = config.resolved_storage_dir();
    let config: &'static PeerConfig = Box::leak(Box::new(config));

    let peer_state = PeerState::new(config.self_url.clone(), &storage_dir);
    let peer_state: &'static PeerState = Box::leak(Box::new(peer_state));

    let metrics = MetricsSink::new(config.name.clone());
    let metrics: &'static MetricsSink = Box::leak(Box::new(metrics));

    let cancellation_token = CancellationToken::new();

    let app_state = AppState {
        config,
        peer_state,
        metrics,
        client,
        cancellation_token: cancellation_token.clone(),
    };

    {
        let peer_state = app_state.peer_state;
        let stats = peer_state.stats();
        metrics.update_peer_counts(stats.total_peers as i64, stats.healthy_peers as i64);
    }

    tokio::spawn(health::run(
        app_state.peer_state,
        app_state.client,
        app_state.metrics,
        Duration::from_secs(app_state.config.health_check_interval),
        cancellation_token.clone(),
    ));

    let control = server::control_router(app_state.clone());
    let transfer = server::transfer_router(app_state.clone());

    let control_addr = SocketAddr::new(config.ip.parse()?, config.rest_port);
    let transfer_addr = SocketAddr::new(config.ip.parse()?, config.stream_port);

    let control_listener = tokio::net::TcpListener::bind(control_addr).await?;
    let transfer_listener = tokio::net::TcpListener::bind(transfer_addr).await?;
    tracing::info!(%control_addr, %transfer_addr, peer = %config.name, "peer listening");

    let control_cancel = cancellation_token.clone();
    let control_task = tokio::spawn(async move {
        axum::serve(
            control_listener,
            control.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(control_cancel.cancelled_owned())
        .await
    });

    let transfer_cancel = cancellation_token.clone();
    let transfer_task = tokio::spawn(async move {
        axum::serve(transfer_listener, transfer)
            .with_graceful_shutdown(transfer_cancel.cancelled_owned())
            .await
    });

    // Both surfaces are already accepting connections before we bootstrap:
    // friends probe us back synchronously during `/register`, so our own
    // listener has to be up first or that probe-back sees connection-refused.
    let bootstrap_response =
        server::control_api::bootstrap(axum::extract::State(app_state.clone())).await;
    tracing::info!(result = ?bootstrap_response.0, "startup bootstrap complete");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
            cancellation_token.cancel();
        }
        _ = cancellation_token.cancelled() => {}
    }

    tokio::time::sleep(SHUTDOWN_GRACE).await;

    match control_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(?err, "control surface server error"),
        Err(err) => tracing::warn!(?err, "control surface task join error"),
    }
    match transfer_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(?err, "transfer surface server error"),
        Err(err) => tracing::warn!(?err, "transfer surface task join error"),
    }

    tracing::info!("peer shut down");
    Ok(())
}
