//! C3 — Health Reconciler: periodic liveness probing against known
//! neighbours, plus the synchronous `probe_now` used by registration paths.

use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::client::{NeighbourClient, PROBE_TIMEOUT_IMMEDIATE, PROBE_TIMEOUT_PERIODIC};
use crate::metrics::MetricsSink;
use crate::peer_state::PeerState;

/// Neighbours are pruned after this many seconds unseen, per spec §4.2.
const PRUNE_TTL_SECS: i64 = 300;

/// Synchronous probe used by registration paths to decide the initial
/// health flag; 5 s timeout per spec §4.3/§5.
pub async fn probe_now(client: &dyn NeighbourClient, url: &str) -> bool {
    client.probe_health(url, PROBE_TIMEOUT_IMMEDIATE).await
}

/// Runs the periodic reconciler loop until `cancel` fires. A tick whose
/// work exceeds the period does not stack: the next tick starts only after
/// the previous one finishes, plus the configured interval.
pub async fn run(
    peer_state: &'static PeerState,
    client: &'static dyn NeighbourClient,
    metrics: &'static MetricsSink,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("health reconciler shutting down");
                return;
            }
            _ = ticker.tick() => {
                if let Err(err) = tick(peer_state, client).await {
                    tracing::warn!(?err, "health reconciler tick failed");
                }
                let stats = peer_state.stats();
                metrics.update_peer_counts(stats.total_peers as i64, stats.healthy_peers as i64);
            }
        }
    }
}

async fn tick(peer_state: &'static PeerState, client: &'static dyn NeighbourClient) -> anyhow::Result<()> {
    let neighbours = peer_state.neighbours_snapshot();

    let mut probes = JoinSet::new();
    for url in neighbours {
        probes.spawn(async move {
            let healthy = client.probe_health(&url, PROBE_TIMEOUT_PERIODIC).await;
            (url, healthy)
        });
    }

    while let Some(result) = probes.join_next().await {
        match result {
            Ok((url, true)) => peer_state.mark_healthy(&url),
            Ok((url, false)) => peer_state.mark_failed(&url),
            Err(err) => tracing::warn!(?err, "probe task panicked"),
        }
    }

    peer_state.prune(PRUNE_TTL_SECS);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeClient {
        healthy: Mutex<Vec<String>>,
        probe_calls: AtomicUsize,
    }

    #[async_trait]
    impl NeighbourClient for FakeClient {
        async fn probe_health(&self, url: &str, _timeout: Duration) -> bool {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            self.healthy.lock().unwrap().contains(&url.to_string())
        }
        async fn register(&self, _neighbour_url: &str, _self_url: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn fetch_files(
            &self,
            _neighbour_url: &str,
            _ttl: u32,
        ) -> anyhow::Result<crate::client::FilesResponse> {
            anyhow::bail!("unused in this test")
        }
    }

    fn state() -> &'static PeerState {
        let dir = std::env::temp_dir().join(format!(
            "p2p-peer-health-test-{:?}",
            std::thread::current().id()
        ));
        Box::leak(Box::new(PeerState::new("http://self:8000".to_string(), &dir)))
    }

    #[tokio::test]
    async fn tick_promotes_reachable_and_demotes_unreachable() {
        let peer_state = state();
        peer_state.register_peer("http://up:8000");
        peer_state.register_peer("http://down:8000");

        let client: &'static FakeClient = Box::leak(Box::new(FakeClient::default()));
        client.healthy.lock().unwrap().push("http://up:8000".to_string());

        tick(peer_state, client).await.unwrap();

        assert!(peer_state
            .list_healthy_peers()
            .contains(&"http://up:8000".to_string()));
        assert!(!peer_state
            .list_healthy_peers()
            .contains(&"http://down:8000".to_string()));
    }

    #[tokio::test]
    async fn probe_now_reflects_client_result() {
        let client: &'static FakeClient = Box::leak(Box::new(FakeClient::default()));
        client.healthy.lock().unwrap().push("http://up:8000".to_string());
        assert!(probe_now(client, "http://up:8000").await);
        assert!(!probe_now(client, "http://down:8000").await);
    }
}
