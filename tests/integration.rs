//! End-to-end coverage for the scenarios in spec §8: bootstrap between two
//! peers, local search with checksum verification, and federated search
//! with one neighbour offline. Drives full `axum::Router`s in-process with
//! `tower::ServiceExt::oneshot`, the way the teacher's own server tests
//! exercise `server_api` handlers without binding a socket.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use p2p_peer::app_state::AppState;
use p2p_peer::client::{FilesResponse, NeighbourClient};
use p2p_peer::config::{PeerConfig, RateLimitConfig};
use p2p_peer::metrics::MetricsSink;
use p2p_peer::peer_state::PeerState;
use p2p_peer::server;

/// Dispatches outbound RPCs to other in-process routers instead of real
/// sockets, keyed by each peer's `self_url`.
#[derive(Debug, Default)]
struct LoopbackClient {
    routers: Mutex<HashMap<String, Router>>,
}

impl LoopbackClient {
    fn register_router(&self, url: &str, router: Router) {
        self.routers.lock().unwrap().insert(url.to_string(), router);
    }

    fn router_for(&self, url: &str) -> Option<Router> {
        self.routers.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl NeighbourClient for LoopbackClient {
    async fn probe_health(&self, url: &str, _timeout: Duration) -> bool {
        let Some(router) = self.router_for(url) else {
            return false;
        };
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        router
            .oneshot(request)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn register(&self, neighbour_url: &str, self_url: &str) -> anyhow::Result<()> {
        let router = self
            .router_for(neighbour_url)
            .ok_or_else(|| anyhow::anyhow!("no router registered for {neighbour_url}"))?;
        let body = serde_json::to_vec(&serde_json::json!({ "url": self_url }))?;
        let request = Request::builder()
            .method("POST")
            .uri("/register")
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        let response = router.oneshot(request).await?;
        if !response.status().is_success() {
            anyhow::bail!("register returned {}", response.status());
        }
        Ok(())
    }

    async fn fetch_files(&self, neighbour_url: &str, ttl: u32) -> anyhow::Result<FilesResponse> {
        let router = self
            .router_for(neighbour_url)
            .ok_or_else(|| anyhow::anyhow!("no router registered for {neighbour_url}"))?;
        let request = Request::builder()
            .uri(format!("/files?ttl={ttl}"))
            .body(Body::empty())?;
        let response = router.oneshot(request).await?;
        if !response.status().is_success() {
            anyhow::bail!("/files returned {}", response.status());
        }
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn test_config(name: &str, self_url: &str, shared_dir: std::path::PathBuf) -> PeerConfig {
    PeerConfig {
        name: name.to_string(),
        rest_port: 0,
        stream_port: 0,
        shared_dir,
        self_url: self_url.to_string(),
        ip: "0.0.0.0".to_string(),
        friend_primary: None,
        friend_secondary: None,
        metrics_port: 9000,
        health_check_interval: 30,
        search_ttl: 3,
        max_fanout: 3,
        rate_limit: RateLimitConfig::default(),
        storage_dir: Some(std::env::temp_dir().join(format!(
            "p2p-peer-it-{name}-{:?}",
            std::thread::current().id()
        ))),
    }
}

fn build_peer(
    name: &str,
    self_url: &str,
    shared_dir: std::path::PathBuf,
    client: &'static LoopbackClient,
) -> (Router, &'static PeerState) {
    let config = test_config(name, self_url, shared_dir);
    let config: &'static PeerConfig = Box::leak(Box::new(config));
    let peer_state = PeerState::new(self_url.to_string(), &config.resolved_storage_dir());
    let peer_state: &'static PeerState = Box::leak(Box::new(peer_state));
    let metrics: &'static MetricsSink = Box::leak(Box::new(MetricsSink::new(name.to_string())));

    let app_state = AppState {
        config,
        peer_state,
        metrics,
        client,
        cancellation_token: tokio_util::sync::CancellationToken::new(),
    };
    (server::control_router(app_state), peer_state)
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn bootstrap_registers_friend_peer() {
    let client: &'static LoopbackClient = Box::leak(Box::new(LoopbackClient::default()));

    let a_dir = std::env::temp_dir().join("p2p-peer-it-a-shared");
    let b_dir = std::env::temp_dir().join("p2p-peer-it-b-shared");
    std::fs::create_dir_all(&a_dir).unwrap();
    std::fs::create_dir_all(&b_dir).unwrap();

    let (router_b, _) = build_peer("peer-b", "http://b", b_dir, client);
    client.register_router("http://b", router_b);

    let mut config_a = test_config("peer-a", "http://a", a_dir);
    config_a.friend_primary = Some("http://b".to_string());
    let config_a: &'static PeerConfig = Box::leak(Box::new(config_a));
    let peer_state_a = PeerState::new("http://a".to_string(), &config_a.resolved_storage_dir());
    let peer_state_a: &'static PeerState = Box::leak(Box::new(peer_state_a));
    let metrics_a: &'static MetricsSink = Box::leak(Box::new(MetricsSink::new("peer-a".to_string())));
    let app_state_a = AppState {
        config: config_a,
        peer_state: peer_state_a,
        metrics: metrics_a,
        client,
        cancellation_token: tokio_util::sync::CancellationToken::new(),
    };
    let router_a = server::control_router(app_state_a);
    client.register_router("http://a", router_a.clone());

    let request = Request::builder()
        .method("POST")
        .uri("/bootstrap")
        .body(Body::empty())
        .unwrap();
    let response = router_a.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert!(body["registered"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v == "http://b"));
    assert!(peer_state_a.list_healthy_peers().contains(&"http://b".to_string()));
}

#[tokio::test]
async fn local_search_matches_indexed_file_with_verified_checksum() {
    let client: &'static LoopbackClient = Box::leak(Box::new(LoopbackClient::default()));
    let shared_dir = std::env::temp_dir().join("p2p-peer-it-search-shared");
    std::fs::create_dir_all(&shared_dir).unwrap();
    std::fs::write(shared_dir.join("hello.txt"), b"hello world").unwrap();

    let (router, _) = build_peer("peer-solo", "http://solo", shared_dir, client);

    let request = Request::builder()
        .uri("/search?query=hello&fanout=0&ttl=0")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["peer"], "http://solo");
    assert_eq!(results[0]["cached"], false);

    let files = results[0]["files"].as_array().unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0]["name"], "hello.txt");
    assert_eq!(files[0]["checksum"], "b94d27b9934d3e08");
}

#[tokio::test]
async fn federated_search_skips_offline_neighbour() {
    let client: &'static LoopbackClient = Box::leak(Box::new(LoopbackClient::default()));

    let up_dir = std::env::temp_dir().join("p2p-peer-it-up-shared");
    std::fs::create_dir_all(&up_dir).unwrap();
    std::fs::write(up_dir.join("shared.bin"), b"payload").unwrap();

    let (router_up, _) = build_peer("peer-up", "http://up", up_dir, client);
    client.register_router("http://up", router_up);
    // "http://down" is intentionally never registered in the loopback
    // client, so probes and RPCs against it fail like an unreachable peer.

    let self_dir = std::env::temp_dir().join("p2p-peer-it-self-shared");
    std::fs::create_dir_all(&self_dir).unwrap();
    let (router_self, peer_state_self) = build_peer("peer-self", "http://self", self_dir, client);
    client.register_router("http://self", router_self.clone());

    peer_state_self.register_peer("http://up");
    peer_state_self.mark_healthy("http://up");
    peer_state_self.register_peer("http://down");
    peer_state_self.mark_healthy("http://down");

    let request = Request::builder()
        .uri("/search?query=shared&fanout=3&ttl=2")
        .body(Body::empty())
        .unwrap();
    let response = router_self.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;

    let results = body["results"].as_array().unwrap();
    let peers: Vec<&str> = results.iter().map(|r| r["peer"].as_str().unwrap()).collect();
    assert_eq!(peers[0], "http://self");
    assert!(peers.contains(&"http://up"));
    assert!(!peers.contains(&"http://down"));

    assert!(!peer_state_self
        .list_healthy_peers()
        .contains(&"http://down".to_string()));
}
