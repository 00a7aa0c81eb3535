//! C4 — Metrics Sink: in-memory counters/gauges/histograms with a pull-style
//! text export in the Prometheus exposition format.

use std::collections::HashMap;
use std::sync::Mutex;

const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];
const RESULT_COUNT_BUCKETS: &[f64] = &[0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0];

#[derive(Debug, Default)]
struct Histogram {
    buckets: Vec<(f64, u64)>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn new(bounds: &[f64]) -> Self {
        Self {
            buckets: bounds.iter().map(|b| (*b, 0)).collect(),
            sum: 0.0,
            count: 0,
        }
    }

    fn observe(&mut self, value: f64) {
        for (bound, count) in self.buckets.iter_mut() {
            if value <= *bound {
                *count += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Default)]
struct State {
    requests_total: HashMap<(String, String), u64>,
    request_duration: HashMap<(String, String), Histogram>,
    searches_total: u64,
    search_results: Histogram,
    transfers_total: HashMap<String, u64>,
    transfer_bytes: HashMap<String, u64>,
    known_peers: i64,
    healthy_peers: i64,
    rate_limit_hits: HashMap<String, u64>,
}

pub struct MetricsSink {
    peer: String,
    state: Mutex<State>,
}

impl MetricsSink {
    pub fn new(peer: impl Into<String>) -> Self {
        Self {
            peer: peer.into(),
            state: Mutex::new(State {
                search_results: Histogram::new(RESULT_COUNT_BUCKETS),
                ..Default::default()
            }),
        }
    }

    pub fn record_request(&self, method: &str, endpoint: &str, duration_secs: f64) {
        let mut state = self.state.lock().unwrap();
        *state
            .requests_total
            .entry((method.to_string(), endpoint.to_string()))
            .or_insert(0) += 1;
        state
            .request_duration
            .entry((method.to_string(), endpoint.to_string()))
            .or_insert_with(|| Histogram::new(DURATION_BUCKETS))
            .observe(duration_secs);
    }

    pub fn record_search(&self, result_count: usize) {
        let mut state = self.state.lock().unwrap();
        state.searches_total += 1;
        state.search_results.observe(result_count as f64);
    }

    pub fn record_transfer(&self, operation: &str, bytes: u64) {
        let mut state = self.state.lock().unwrap();
        *state.transfers_total.entry(operation.to_string()).or_insert(0) += 1;
        *state.transfer_bytes.entry(operation.to_string()).or_insert(0) += bytes;
    }

    pub fn update_peer_counts(&self, total: i64, healthy: i64) {
        let mut state = self.state.lock().unwrap();
        state.known_peers = total;
        state.healthy_peers = healthy;
    }

    pub fn record_rate_limit_hit(&self, kind: &str) {
        let mut state = self.state.lock().unwrap();
        *state.rate_limit_hits.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Renders the standard Prometheus text exposition format
    /// (`text/plain; version=0.0.4`).
    pub fn export(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut out = String::new();

        out.push_str("# TYPE p2p_requests_total counter\n");
        for ((method, endpoint), count) in &state.requests_total {
            out.push_str(&format!(
                "p2p_requests_total{{method=\"{method}\",endpoint=\"{endpoint}\",peer=\"{}\"}} {count}\n",
                self.peer
            ));
        }

        out.push_str("# TYPE p2p_request_duration_seconds histogram\n");
        for ((method, endpoint), hist) in &state.request_duration {
            for (bound, count) in &hist.buckets {
                out.push_str(&format!(
                    "p2p_request_duration_seconds_bucket{{method=\"{method}\",endpoint=\"{endpoint}\",le=\"{bound}\"}} {count}\n"
                ));
            }
            out.push_str(&format!(
                "p2p_request_duration_seconds_sum{{method=\"{method}\",endpoint=\"{endpoint}\"}} {}\n",
                hist.sum
            ));
            out.push_str(&format!(
                "p2p_request_duration_seconds_count{{method=\"{method}\",endpoint=\"{endpoint}\"}} {}\n",
                hist.count
            ));
        }

        out.push_str("# TYPE p2p_searches_total counter\n");
        out.push_str(&format!(
            "p2p_searches_total{{peer=\"{}\"}} {}\n",
            self.peer, state.searches_total
        ));

        out.push_str("# TYPE p2p_search_results_count histogram\n");
        for (bound, count) in &state.search_results.buckets {
            out.push_str(&format!(
                "p2p_search_results_count_bucket{{peer=\"{}\",le=\"{bound}\"}} {count}\n",
                self.peer
            ));
        }
        out.push_str(&format!(
            "p2p_search_results_count_sum{{peer=\"{}\"}} {}\n",
            self.peer, state.search_results.sum
        ));
        out.push_str(&format!(
            "p2p_search_results_count_count{{peer=\"{}\"}} {}\n",
            self.peer, state.search_results.count
        ));

        out.push_str("# TYPE p2p_file_transfers_total counter\n");
        for (operation, count) in &state.transfers_total {
            out.push_str(&format!(
                "p2p_file_transfers_total{{operation=\"{operation}\",peer=\"{}\"}} {count}\n",
                self.peer
            ));
        }

        out.push_str("# TYPE p2p_transfer_bytes_total counter\n");
        for (operation, bytes) in &state.transfer_bytes {
            out.push_str(&format!(
                "p2p_transfer_bytes_total{{operation=\"{operation}\",peer=\"{}\"}} {bytes}\n",
                self.peer
            ));
        }

        out.push_str("# TYPE p2p_known_peers_count gauge\n");
        out.push_str(&format!(
            "p2p_known_peers_count{{peer=\"{}\"}} {}\n",
            self.peer, state.known_peers
        ));

        out.push_str("# TYPE p2p_healthy_peers_count gauge\n");
        out.push_str(&format!(
            "p2p_healthy_peers_count{{peer=\"{}\"}} {}\n",
            self.peer, state.healthy_peers
        ));

        out.push_str("# TYPE p2p_rate_limit_hits_total counter\n");
        for (kind, count) in &state.rate_limit_hits {
            out.push_str(&format!(
                "p2p_rate_limit_hits_total{{peer=\"{}\",type=\"{kind}\"}} {count}\n",
                self.peer
            ));
        }

        out
    }
}

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_count_advances_once_per_record_call() {
        let sink = MetricsSink::new("peer-a");
        sink.record_search(3);
        sink.record_search(0);
        let body = sink.export();
        assert!(body.contains("p2p_searches_total{peer=\"peer-a\"} 2"));
    }

    #[test]
    fn rate_limit_hits_tracked_per_type() {
        let sink = MetricsSink::new("peer-a");
        sink.record_rate_limit_hit("downloads");
        let body = sink.export();
        assert!(body.contains("type=\"downloads\""));
    }

    #[test]
    fn transfer_bytes_accumulate() {
        let sink = MetricsSink::new("peer-a");
        sink.record_transfer("download", 100);
        sink.record_transfer("download", 50);
        let body = sink.export();
        assert!(body.contains("p2p_transfer_bytes_total{operation=\"download\",peer=\"peer-a\"} 150"));
    }
}
