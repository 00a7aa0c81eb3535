//! Configuration loading: the JSON document from spec §6, plus a thin CLI
//! layer the way the teacher's `Args` overrides the on-disk config.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;

fn default_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9000
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_search_ttl() -> u32 {
    3
}

fn default_max_fanout() -> usize {
    3
}

fn default_requests_per_minute() -> usize {
    100
}

fn default_downloads_per_minute() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_downloads_per_minute")]
    pub downloads_per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            downloads_per_minute: default_downloads_per_minute(),
        }
    }
}

/// The JSON configuration document. Required keys per spec §6: `name`,
/// `rest_port`, `grpc_port` (named `stream_port` here — see below),
/// `shared_dir`, `self_url`.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub rest_port: u16,
    /// Named `grpc_port` in spec §6; the transfer surface in this crate is
    /// an axum streaming endpoint rather than a gRPC service (SPEC_FULL §9),
    /// but the wire contract (a dedicated port for the stream-scheme URL in
    /// `/files` responses) is unchanged, so the JSON key is kept as-is for
    /// config-file compatibility.
    #[serde(rename = "grpc_port")]
    pub stream_port: u16,
    pub shared_dir: PathBuf,
    pub self_url: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default)]
    pub friend_primary: Option<String>,
    #[serde(default)]
    pub friend_secondary: Option<String>,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
    #[serde(default = "default_search_ttl")]
    pub search_ttl: u32,
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Optional; not in spec §6's required key list. Resolved to a
    /// prod/debug default when absent — see SPEC_FULL §3.
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
}

impl PeerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: PeerConfig = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolves the storage directory used for the persistent snapshot,
    /// following the teacher's `build.rs` prod/debug storage split when the
    /// config doesn't name one explicitly.
    pub fn resolved_storage_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage_dir {
            return dir.clone();
        }
        let base = if cfg!(debug_assertions) {
            PathBuf::from(".")
        } else {
            dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
        };
        base.join("p2p-peer").join(&self.name)
    }
}

/// CLI overrides layered over the `PEER_CONFIG` environment variable and
/// the teacher's `Args::parse().apply_configuration()` pattern, scaled down
/// to the two knobs this crate actually exposes.
#[derive(Debug, Parser)]
#[command(name = "p2p-peer")]
pub struct Args {
    /// Path to the peer's JSON configuration document.
    #[arg(long, env = "PEER_CONFIG", default_value = "configs/peer1.json")]
    pub config: PathBuf,

    /// Log verbosity passed to `tracing_subscriber`'s `EnvFilter`.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_key_is_an_error() {
        let json = r#"{"name": "a"}"#;
        let result: Result<PeerConfig, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn defaults_apply_when_optional_keys_absent() {
        let json = r#"{
            "name": "a",
            "rest_port": 8001,
            "grpc_port": 9001,
            "shared_dir": "/tmp/shared",
            "self_url": "http://a:8001"
        }"#;
        let config: PeerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ip, "0.0.0.0");
        assert_eq!(config.metrics_port, 9000);
        assert_eq!(config.health_check_interval, 30);
        assert_eq!(config.search_ttl, 3);
        assert_eq!(config.max_fanout, 3);
        assert_eq!(config.rate_limit.requests_per_minute, 100);
        assert_eq!(config.rate_limit.downloads_per_minute, 10);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let json = r#"{
            "name": "a",
            "rest_port": 8001,
            "grpc_port": 9001,
            "shared_dir": "/tmp/shared",
            "self_url": "http://a:8001",
            "something_unrelated": true
        }"#;
        let config: Result<PeerConfig, _> = serde_json::from_str(json);
        assert!(config.is_ok());
    }
}
