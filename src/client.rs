//! Outbound RPC: a `NeighbourClient` trait (mirroring the teacher's
//! provider-trait pattern, e.g. `MetadataProvider`) with a `reqwest`-backed
//! implementation used by search fan-out, registration probing, and
//! bootstrap. Grounded in `torrent/src/tracker.rs`'s outbound HTTP calls.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::indexer::FileMeta;

pub const PROBE_TIMEOUT_IMMEDIATE: Duration = Duration::from_secs(5);
pub const PROBE_TIMEOUT_PERIODIC: Duration = Duration::from_secs(10);
pub const SEARCH_RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedFile {
    #[serde(flatten)]
    pub meta: FileMeta,
    pub control_url: String,
    pub stream_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesResponse {
    pub peer: String,
    pub base: String,
    pub files: Vec<IndexedFile>,
}

#[derive(Debug, Serialize)]
struct RegisterPayload<'a> {
    url: &'a str,
}

/// Abstraction over the control-surface calls a peer makes against its
/// neighbours, so the reconciler and search fan-out can be exercised
/// against a fake in tests without binding a real socket.
#[async_trait]
pub trait NeighbourClient: Send + Sync + std::fmt::Debug {
    async fn probe_health(&self, url: &str, timeout: Duration) -> bool;
    async fn register(&self, neighbour_url: &str, self_url: &str) -> anyhow::Result<()>;
    async fn fetch_files(&self, neighbour_url: &str, ttl: u32) -> anyhow::Result<FilesResponse>;
}

#[derive(Debug, Default)]
pub struct ReqwestNeighbourClient;

#[async_trait]
impl NeighbourClient for ReqwestNeighbourClient {
    async fn probe_health(&self, url: &str, timeout: Duration) -> bool {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(_) => return false,
        };
        match client.get(format!("{url}/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn register(&self, neighbour_url: &str, self_url: &str) -> anyhow::Result<()> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT_IMMEDIATE)
            .build()?;
        let response = client
            .post(format!("{neighbour_url}/register"))
            .json(&RegisterPayload { url: self_url })
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("register against {neighbour_url} returned {}", response.status());
        }
        Ok(())
    }

    async fn fetch_files(&self, neighbour_url: &str, ttl: u32) -> anyhow::Result<FilesResponse> {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_RPC_TIMEOUT)
            .build()?;
        let response = client
            .get(format!("{neighbour_url}/files"))
            .query(&[("ttl", ttl)])
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("/files on {neighbour_url} returned {}", response.status());
        }
        Ok(response.json::<FilesResponse>().await?)
    }
}
