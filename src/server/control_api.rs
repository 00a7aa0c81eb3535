//! C5 — Control Surface: the stateless request/response endpoints.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;

use crate::app_state::{AppError, AppState};
use crate::client::IndexedFile;
use crate::health;
use crate::indexer;
use crate::peer_state::{Admission, RateKind, Stats};
use crate::server::ClientIdentity;

fn query_hash(query: &str, fanout: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b":");
    hasher.update(fanout.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn indexed_files(state: &AppState) -> Vec<IndexedFile> {
    indexer::list(&state.config.shared_dir)
        .into_iter()
        .map(|meta| IndexedFile {
            control_url: format!("{}/files/{}", state.config.self_url, meta.name),
            stream_url: format!(
                "stream://{}:{}",
                state.config.ip, state.config.stream_port
            ),
            meta,
        })
        .collect()
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    status: &'static str,
    peer: String,
    url: String,
    stats: Stats,
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        peer: state.config.name.clone(),
        url: state.config.self_url.clone(),
        stats: state.peer_state.stats(),
    })
}

#[utoipa::path(get, path = "/metrics", responses((status = 200, body = String)))]
pub async fn metrics(State(state): State<AppState>) -> impl axum::response::IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, crate::metrics::CONTENT_TYPE)],
        state.metrics.export(),
    )
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    url: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RegisterResponse {
    ok: bool,
    peers: Vec<String>,
}

#[utoipa::path(post, path = "/register", request_body = RegisterRequest, responses((status = 200, body = RegisterResponse)))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    if payload.url.is_empty() {
        return Err(AppError::bad_request("url must not be empty"));
    }
    state.peer_state.register_peer(&payload.url);
    let healthy = health::probe_now(state.client, &payload.url).await;
    if healthy {
        state.peer_state.mark_healthy(&payload.url);
    } else {
        state.peer_state.mark_failed(&payload.url);
    }
    Ok(Json(RegisterResponse {
        ok: true,
        peers: state.peer_state.list_healthy_peers(),
    }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct PeersResponse {
    peers: Vec<String>,
    all_peers: Vec<String>,
    stats: Stats,
}

#[utoipa::path(get, path = "/peers", responses((status = 200, body = PeersResponse)))]
pub async fn peers(State(state): State<AppState>) -> Json<PeersResponse> {
    Json(PeersResponse {
        peers: state.peer_state.list_healthy_peers(),
        all_peers: state.peer_state.list_peers(),
        stats: state.peer_state.stats(),
    })
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct FilesResponseBody {
    peer: String,
    base: String,
    files: Vec<IndexedFile>,
}

#[utoipa::path(get, path = "/files", responses((status = 200, body = FilesResponseBody)))]
pub async fn files(State(state): State<AppState>) -> Json<FilesResponseBody> {
    Json(FilesResponseBody {
        peer: state.config.name.clone(),
        base: state.config.self_url.clone(),
        files: indexed_files(&state),
    })
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SearchQuery {
    #[serde(default)]
    query: String,
    /// Defaults to the peer's configured `max_fanout` when absent.
    fanout: Option<i64>,
    /// Defaults to the peer's configured `search_ttl` when absent.
    ttl: Option<u32>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchResultEntry {
    peer: String,
    files: Vec<IndexedFile>,
    cached: bool,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SearchResponse {
    query: String,
    ttl: u32,
    fanout_used: usize,
    results: Vec<SearchResultEntry>,
}

fn matches(files: &[IndexedFile], query: &str) -> Vec<IndexedFile> {
    let needle = query.to_lowercase();
    files
        .iter()
        .filter(|f| f.meta.name.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

#[utoipa::path(get, path = "/search", responses((status = 200, body = SearchResponse)))]
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let fanout_request = params.fanout.unwrap_or(state.config.max_fanout as i64);
    let ttl = params.ttl.unwrap_or(state.config.search_ttl);
    let hash = query_hash(&params.query, fanout_request);
    let fanout_used = (fanout_request.max(0) as usize).min(state.config.max_fanout);

    if !state.peer_state.should_search_again(&hash, 10) {
        if let Some(cached) = state.peer_state.get_cached_files(&state.config.self_url, 60) {
            let filtered = matches(
                &cached
                    .into_iter()
                    .map(|meta| IndexedFile {
                        control_url: format!("{}/files/{}", state.config.self_url, meta.name),
                        stream_url: format!(
                            "stream://{}:{}",
                            state.config.ip, state.config.stream_port
                        ),
                        meta,
                    })
                    .collect::<Vec<_>>(),
                &params.query,
            );
            let count = filtered.len();
            state.metrics.record_search(count);
            return Ok(Json(SearchResponse {
                query: params.query,
                ttl,
                fanout_used,
                results: vec![SearchResultEntry {
                    peer: state.config.self_url.clone(),
                    files: filtered,
                    cached: true,
                }],
            }));
        }
    }

    let local_files = indexed_files(&state);
    let local_matches = matches(&local_files, &params.query);
    state.peer_state.cache_files(
        &state.config.self_url,
        local_files.iter().map(|f| f.meta.clone()).collect(),
    );

    let mut results = vec![SearchResultEntry {
        peer: state.config.self_url.clone(),
        files: local_matches,
        cached: false,
    }];

    if ttl > 0 && fanout_used > 0 {
        let healthy: Vec<String> = state
            .peer_state
            .list_healthy_peers()
            .into_iter()
            .filter(|p| p != &state.config.self_url)
            .take(fanout_used)
            .collect();

        let mut join_set = JoinSet::new();
        for neighbour in healthy {
            let peer_state = state.peer_state;
            let client = state.client;
            let query = params.query.clone();
            join_set.spawn(async move {
                if let Some(cached) = peer_state.get_cached_files(&neighbour, 300) {
                    let files = cached
                        .into_iter()
                        .map(|meta| IndexedFile {
                            control_url: format!("{}/files/{}", neighbour, meta.name),
                            stream_url: String::new(),
                            meta,
                        })
                        .collect::<Vec<_>>();
                    let filtered = matches(&files, &query);
                    return Some((neighbour, filtered, true));
                }
                match client.fetch_files(&neighbour, ttl.saturating_sub(1)).await {
                    Ok(response) => {
                        peer_state.cache_files(
                            &neighbour,
                            response.files.iter().map(|f| f.meta.clone()).collect(),
                        );
                        let filtered = matches(&response.files, &query);
                        Some((neighbour, filtered, false))
                    }
                    Err(err) => {
                        tracing::warn!(%neighbour, ?err, "federated search rpc failed");
                        peer_state.mark_failed(&neighbour);
                        None
                    }
                }
            });
        }

        // preserve neighbour-selection order regardless of completion order
        let mut by_peer: std::collections::HashMap<String, (Vec<IndexedFile>, bool)> =
            std::collections::HashMap::new();
        while let Some(outcome) = join_set.join_next().await {
            if let Ok(Some((neighbour, filtered, cached))) = outcome {
                by_peer.insert(neighbour, (filtered, cached));
            }
        }
        for neighbour in state
            .peer_state
            .list_healthy_peers()
            .into_iter()
            .filter(|p| p != &state.config.self_url)
            .take(fanout_used)
        {
            if let Some((files, cached)) = by_peer.remove(&neighbour) {
                results.push(SearchResultEntry {
                    peer: neighbour,
                    files,
                    cached,
                });
            }
        }
    }

    let total_matches: usize = results.iter().map(|r| r.files.len()).sum();
    state.metrics.record_search(total_matches);

    Ok(Json(SearchResponse {
        query: params.query,
        ttl,
        fanout_used,
        results,
    }))
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BootstrapResponse {
    ok: bool,
    peer: String,
    registered: Vec<String>,
    failed: Vec<String>,
    known_peers: Vec<String>,
}

#[utoipa::path(post, path = "/bootstrap", responses((status = 200, body = BootstrapResponse)))]
pub async fn bootstrap(State(state): State<AppState>) -> Json<BootstrapResponse> {
    let mut registered = Vec::new();
    let mut failed = Vec::new();

    let friends = [
        state.config.friend_primary.clone(),
        state.config.friend_secondary.clone(),
    ];
    for friend in friends.into_iter().flatten() {
        let outcome = state.client.register(&friend, &state.config.self_url).await;
        state.peer_state.register_peer(&friend);
        let healthy = health::probe_now(state.client, &friend).await;
        if outcome.is_ok() && healthy {
            state.peer_state.mark_healthy(&friend);
            registered.push(friend);
        } else {
            state.peer_state.mark_failed(&friend);
            failed.push(friend);
        }
    }

    state.peer_state.register_peer(&state.config.self_url);
    state.peer_state.mark_healthy(&state.config.self_url);

    Json(BootstrapResponse {
        ok: true,
        peer: state.config.name.clone(),
        registered,
        failed,
        known_peers: state.peer_state.list_peers(),
    })
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct StatusResponse {
    peer: String,
    self_url: String,
    rest_port: u16,
    stream_port: u16,
    search_ttl: u32,
    max_fanout: usize,
    health_check_interval: u64,
    stats: Stats,
    healthy_peers: Vec<String>,
    all_peers: Vec<String>,
}

#[utoipa::path(get, path = "/status", responses((status = 200, body = StatusResponse)))]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        peer: state.config.name.clone(),
        self_url: state.config.self_url.clone(),
        rest_port: state.config.rest_port,
        stream_port: state.config.stream_port,
        search_ttl: state.config.search_ttl,
        max_fanout: state.config.max_fanout,
        health_check_interval: state.config.health_check_interval,
        stats: state.peer_state.stats(),
        healthy_peers: state.peer_state.list_healthy_peers(),
        all_peers: state.peer_state.list_peers(),
    })
}

/// Applied to every control-surface endpoint except `/health` and
/// `/metrics`, per spec §4.4.
pub async fn rate_limit(
    State(state): State<AppState>,
    identity: ClientIdentity,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let limit = state.config.rate_limit.requests_per_minute;
    match state
        .peer_state
        .check_rate_limit(&identity.0, RateKind::Requests, limit)
    {
        Admission::Allow => next.run(request).await,
        Admission::Deny => {
            state.metrics.record_rate_limit_hit("requests");
            (
                StatusCode::TOO_MANY_REQUESTS,
                Json(serde_json::json!({ "detail": "Rate limit exceeded" })),
            )
                .into_response()
        }
    }
}

use axum::response::IntoResponse;

/// Wraps a handler so its duration and outcome are recorded on the metrics
/// sink, the way the teacher's `AppState` threads a single recording hook
/// through every handler (spec §4.6).
pub async fn record_request(
    State(state): State<AppState>,
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().to_string();
    let endpoint = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    state
        .metrics
        .record_request(&method, &endpoint, start.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_hash_is_deterministic_and_fanout_sensitive() {
        assert_eq!(query_hash("abc", 3), query_hash("abc", 3));
        assert_ne!(query_hash("abc", 3), query_hash("abc", 4));
        assert_ne!(query_hash("abc", 3), query_hash("abd", 3));
    }
}
