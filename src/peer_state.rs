//! C2 — Peer State: the neighbour table, rate buckets, file cache and query
//! ledger, all guarded by a single lock per §5 of the spec.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::indexer::FileMeta;

pub type PeerUrl = String;

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Failed,
}

#[derive(Debug, Clone)]
struct NeighbourEntry {
    last_seen: i64,
    health: Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateKind {
    Requests,
    Downloads,
}

#[derive(Debug, Clone, Default)]
struct RateBucket {
    timestamps: Vec<i64>,
}

impl RateBucket {
    fn prune(&mut self, at: i64) {
        self.timestamps.retain(|&t| at - t < 60);
    }
}

#[derive(Debug, Clone)]
struct FileCacheEntry {
    files: Vec<FileMeta>,
    cache_time: i64,
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct Stats {
    pub total_peers: usize,
    pub healthy_peers: usize,
    pub failed_peers: usize,
    pub cached_file_lists: usize,
    pub active_rate_limited_peers: usize,
}

/// On-disk mirror of the mutable state, per spec §3/§6. Absent or corrupt
/// files are treated as empty state; the runtime never refuses to start
/// because of them.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    known_peers: HashMap<PeerUrl, i64>,
    file_cache: HashMap<PeerUrl, Vec<FileMeta>>,
    cache_timestamps: HashMap<PeerUrl, i64>,
}

struct Inner {
    self_url: PeerUrl,
    order: Vec<PeerUrl>,
    neighbours: HashMap<PeerUrl, NeighbourEntry>,
    rate_buckets: HashMap<(String, RateKind), RateBucket>,
    file_cache: HashMap<PeerUrl, FileCacheEntry>,
    query_ledger: HashMap<String, i64>,
    snapshot_path: PathBuf,
}

pub struct PeerState {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

impl PeerState {
    /// Builds fresh state for `self_url`, loading `{storage_dir}/peer_state.json`
    /// if present. `storage_dir` is created if it doesn't exist.
    pub fn new(self_url: PeerUrl, storage_dir: &Path) -> Self {
        if let Err(err) = std::fs::create_dir_all(storage_dir) {
            tracing::warn!(?err, dir = %storage_dir.display(), "could not create storage dir");
        }
        let snapshot_path = storage_dir.join("peer_state.json");
        let loaded = std::fs::read(&snapshot_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<PersistentSnapshot>(&bytes).ok())
            .unwrap_or_default();

        let mut order = Vec::new();
        let mut neighbours = HashMap::new();
        for (url, last_seen) in loaded.known_peers {
            order.push(url.clone());
            neighbours.insert(
                url,
                NeighbourEntry {
                    last_seen,
                    health: Health::Failed,
                },
            );
        }

        let mut file_cache = HashMap::new();
        for (url, files) in loaded.file_cache {
            let cache_time = loaded.cache_timestamps.get(&url).copied().unwrap_or(0);
            file_cache.insert(url, FileCacheEntry { files, cache_time });
        }

        let inner = Inner {
            self_url,
            order,
            neighbours,
            rate_buckets: HashMap::new(),
            file_cache,
            query_ledger: HashMap::new(),
            snapshot_path,
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    fn persist(inner: &Inner) {
        let snapshot = PersistentSnapshot {
            known_peers: inner
                .neighbours
                .iter()
                .map(|(url, entry)| (url.clone(), entry.last_seen))
                .collect(),
            file_cache: inner
                .file_cache
                .iter()
                .map(|(url, entry)| (url.clone(), entry.files.clone()))
                .collect(),
            cache_timestamps: inner
                .file_cache
                .iter()
                .map(|(url, entry)| (url.clone(), entry.cache_time))
                .collect(),
        };
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&inner.snapshot_path, bytes) {
                    tracing::warn!(?err, "failed to persist peer state snapshot");
                }
            }
            Err(err) => tracing::warn!(?err, "failed to serialize peer state snapshot"),
        }
    }

    pub fn self_url(&self) -> PeerUrl {
        self.inner.lock().unwrap().self_url.clone()
    }

    /// Sets `last_seen = now`; creates a `failed` entry if previously unseen.
    pub fn register_peer(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        let at = now();
        if let Some(entry) = inner.neighbours.get_mut(url) {
            entry.last_seen = at;
        } else {
            inner.order.push(url.to_string());
            inner.neighbours.insert(
                url.to_string(),
                NeighbourEntry {
                    last_seen: at,
                    health: Health::Failed,
                },
            );
        }
        Self::persist(&inner);
    }

    pub fn mark_healthy(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        let at = now();
        if let Some(entry) = inner.neighbours.get_mut(url) {
            entry.health = Health::Healthy;
            entry.last_seen = at;
        }
        Self::persist(&inner);
    }

    pub fn mark_failed(&self, url: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.neighbours.get_mut(url) {
            entry.health = Health::Failed;
        }
        Self::persist(&inner);
    }

    /// All known peers, self first if not already present.
    pub fn list_peers(&self) -> Vec<PeerUrl> {
        let inner = self.inner.lock().unwrap();
        let mut peers = inner.order.clone();
        if !peers.iter().any(|p| p == &inner.self_url) {
            peers.insert(0, inner.self_url.clone());
        }
        peers
    }

    /// Healthy subset, in insertion order; self is always included
    /// regardless of its entry in the health set (preserves source quirk).
    pub fn list_healthy_peers(&self) -> Vec<PeerUrl> {
        let inner = self.inner.lock().unwrap();
        let mut result: Vec<PeerUrl> = inner
            .order
            .iter()
            .filter(|url| {
                url.as_str() == inner.self_url
                    || inner
                        .neighbours
                        .get(*url)
                        .map(|e| e.health == Health::Healthy)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        if !result.iter().any(|p| p == &inner.self_url) {
            result.insert(0, inner.self_url.clone());
        }
        result
    }

    /// Atomic sliding-window admission check over the last 60 seconds.
    pub fn check_rate_limit(&self, client: &str, kind: RateKind, limit: usize) -> Admission {
        let mut inner = self.inner.lock().unwrap();
        let at = now();
        let bucket = inner
            .rate_buckets
            .entry((client.to_string(), kind))
            .or_default();
        bucket.prune(at);
        if bucket.timestamps.len() >= limit {
            Admission::Deny
        } else {
            bucket.timestamps.push(at);
            Admission::Allow
        }
    }

    pub fn cache_files(&self, peer: &str, files: Vec<FileMeta>) {
        let mut inner = self.inner.lock().unwrap();
        inner.file_cache.insert(
            peer.to_string(),
            FileCacheEntry {
                files,
                cache_time: now(),
            },
        );
        Self::persist(&inner);
    }

    pub fn get_cached_files(&self, peer: &str, max_age: i64) -> Option<Vec<FileMeta>> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.file_cache.get(peer)?;
        if now() - entry.cache_time <= max_age {
            Some(entry.files.clone())
        } else {
            None
        }
    }

    /// Returns `true` at most once per `min_interval`-second window per
    /// `query_hash`; only updates the ledger on the `true` branch so a
    /// caller that short-circuits on the cached path does not poison it.
    pub fn should_search_again(&self, query_hash: &str, min_interval: i64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let at = now();
        let last = inner.query_ledger.get(query_hash).copied().unwrap_or(0);
        if at - last < min_interval {
            return false;
        }
        inner.query_ledger.insert(query_hash.to_string(), at);
        true
    }

    /// Drops neighbours unseen for longer than `ttl`, along with their
    /// cached files and rate buckets, and prunes query-ledger entries older
    /// than one hour.
    pub fn prune(&self, ttl: i64) {
        let mut inner = self.inner.lock().unwrap();
        let at = now();
        let stale: Vec<PeerUrl> = inner
            .neighbours
            .iter()
            .filter(|(_, entry)| at - entry.last_seen > ttl)
            .map(|(url, _)| url.clone())
            .collect();
        for url in &stale {
            inner.neighbours.remove(url);
            inner.order.retain(|u| u != url);
            inner.file_cache.remove(url);
            inner
                .rate_buckets
                .retain(|(bucket_url, _), _| bucket_url != url);
        }
        for bucket in inner.rate_buckets.values_mut() {
            bucket.prune(at);
        }
        inner
            .rate_buckets
            .retain(|_, bucket| !bucket.timestamps.is_empty());
        inner.query_ledger.retain(|_, ts| at - *ts < 3600);
        Self::persist(&inner);
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock().unwrap();
        let healthy = inner
            .neighbours
            .values()
            .filter(|e| e.health == Health::Healthy)
            .count();
        let failed = inner
            .neighbours
            .values()
            .filter(|e| e.health == Health::Failed)
            .count();
        Stats {
            total_peers: inner.neighbours.len(),
            healthy_peers: healthy,
            failed_peers: failed,
            cached_file_lists: inner.file_cache.len(),
            active_rate_limited_peers: inner.rate_buckets.len(),
        }
    }

    /// Non-self neighbours, for the reconciler's probe snapshot.
    pub fn neighbours_snapshot(&self) -> Vec<PeerUrl> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter(|url| *url != &inner.self_url)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> PeerState {
        let dir = std::env::temp_dir().join(format!(
            "p2p-peer-state-test-{:?}-{}",
            std::thread::current().id(),
            now()
        ));
        PeerState::new("http://self:8000".to_string(), &dir)
    }

    #[test]
    fn self_is_always_in_healthy_list() {
        let s = state();
        assert_eq!(s.list_healthy_peers(), vec!["http://self:8000".to_string()]);
    }

    #[test]
    fn register_creates_failed_entry_then_probe_flips_healthy() {
        let s = state();
        s.register_peer("http://a:8000");
        assert!(!s.list_healthy_peers().contains(&"http://a:8000".to_string()));
        s.mark_healthy("http://a:8000");
        assert!(s.list_healthy_peers().contains(&"http://a:8000".to_string()));
        s.mark_failed("http://a:8000");
        assert!(!s.list_healthy_peers().contains(&"http://a:8000".to_string()));
    }

    #[test]
    fn rate_limit_allows_up_to_limit_then_denies() {
        let s = state();
        for _ in 0..10 {
            assert_eq!(
                s.check_rate_limit("client-1", RateKind::Downloads, 10),
                Admission::Allow
            );
        }
        assert_eq!(
            s.check_rate_limit("client-1", RateKind::Downloads, 10),
            Admission::Deny
        );
    }

    #[test]
    fn cache_respects_max_age() {
        let s = state();
        s.cache_files("http://a:8000", Vec::new());
        assert!(s.get_cached_files("http://a:8000", 300).is_some());
        assert!(s.get_cached_files("http://a:8000", -1).is_none());
    }

    #[test]
    fn should_search_again_is_single_shot_per_window() {
        let s = state();
        assert!(s.should_search_again("hash-1", 10));
        assert!(!s.should_search_again("hash-1", 10));
    }

    #[test]
    fn should_search_again_does_not_poison_ledger_on_false_branch() {
        let s = state();
        assert!(s.should_search_again("hash-1", 10));
        assert!(!s.should_search_again("hash-1", 10));
        assert!(!s.should_search_again("hash-1", 10));
    }

    #[test]
    fn prune_drops_stale_neighbours_and_their_cache() {
        let s = state();
        s.register_peer("http://old:8000");
        s.cache_files("http://old:8000", Vec::new());
        {
            let mut inner = s.inner.lock().unwrap();
            inner.neighbours.get_mut("http://old:8000").unwrap().last_seen = now() - 1000;
        }
        s.prune(300);
        assert!(!s.list_peers().contains(&"http://old:8000".to_string()));
        assert!(s.get_cached_files("http://old:8000", 10_000).is_none());
    }

    #[test]
    fn list_peers_preserves_insertion_order() {
        let s = state();
        s.register_peer("http://b:8000");
        s.register_peer("http://a:8000");
        let peers = s.list_peers();
        assert_eq!(
            peers,
            vec![
                "http://self:8000".to_string(),
                "http://b:8000".to_string(),
                "http://a:8000".to_string(),
            ]
        );
    }
}
