//! Manual smoke-test client for a running peer. Grounded in the original
//! `client.py` demo script, minus its gRPC download/upload path (this crate's
//! transfer surface is newline-delimited JSON over HTTP, not gRPC). Not part
//! of the library's public contract.

use std::time::Instant;

use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(name = "p2p-client", about = "Manual smoke-test client for a p2p-peer")]
struct Cli {
    /// Base control-surface URL, e.g. http://localhost:8001
    #[arg(long, default_value = "http://localhost:8001")]
    base: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a federated search.
    Search {
        query: String,
        #[arg(long, default_value_t = 3)]
        fanout: i64,
    },
    /// Fetch /status.
    Status,
    /// Download a file from the transfer surface and print byte/chunk totals.
    Download {
        filename: String,
        /// Base transfer-surface URL, e.g. http://localhost:9001
        #[arg(long)]
        transfer_base: String,
    },
    /// Upload `size_mb` megabytes of filler data to the transfer surface.
    Upload {
        #[arg(long)]
        transfer_base: String,
        #[arg(long)]
        size_mb: f64,
    },
}

async fn do_search(client: &reqwest::Client, base: &str, query: &str, fanout: i64) -> anyhow::Result<()> {
    let start = Instant::now();
    let response: Value = client
        .get(format!("{base}/search"))
        .query(&[("query", query), ("fanout", &fanout.to_string())])
        .send()
        .await?
        .json()
        .await?;

    println!("Search completed in {:.2}s", start.elapsed().as_secs_f64());
    println!("Query: {}", response["query"]);
    println!("Fanout used: {}", response["fanout_used"]);
    println!();

    let mut total_files = 0;
    if let Some(results) = response["results"].as_array() {
        for result in results {
            let peer = result["peer"].as_str().unwrap_or("unknown");
            let cached = if result["cached"].as_bool().unwrap_or(false) { " (cached)" } else { "" };
            println!("Peer: {peer}{cached}");
            let files = result["files"].as_array().cloned().unwrap_or_default();
            if files.is_empty() {
                println!("  No matching files");
            } else {
                for file in &files {
                    let size_mb = file["size"].as_u64().unwrap_or(0) as f64 / 1024.0 / 1024.0;
                    let kind = file["type"].as_str().unwrap_or("unknown");
                    let checksum: String = file["checksum"].as_str().unwrap_or("").chars().take(8).collect();
                    println!(
                        "  - {} ({:.2}MB, {}, {})",
                        file["name"].as_str().unwrap_or(""),
                        size_mb,
                        kind,
                        checksum
                    );
                    total_files += 1;
                }
            }
            println!();
        }
    }
    println!("Total files found: {total_files}");
    Ok(())
}

async fn do_status(client: &reqwest::Client, base: &str) -> anyhow::Result<()> {
    let response: Value = client.get(format!("{base}/status")).send().await?.json().await?;
    println!("Peer status: {}", response["peer"]);
    println!("Self URL: {}", response["self_url"]);
    println!();
    println!("Stats: {}", serde_json::to_string_pretty(&response["stats"])?);
    println!();
    if let Some(peers) = response["healthy_peers"].as_array() {
        println!("Healthy peers ({}):", peers.len());
        for peer in peers {
            println!("  - {peer}");
        }
    }
    Ok(())
}

async fn do_download(client: &reqwest::Client, transfer_base: &str, filename: &str) -> anyhow::Result<()> {
    use tokio_stream::StreamExt;

    let start = Instant::now();
    println!("Downloading {filename} from {transfer_base}...");
    let response = client
        .get(format!("{transfer_base}/download/{filename}"))
        .send()
        .await?;

    let mut stream = response.bytes_stream();
    let mut carry: Vec<u8> = Vec::new();
    let mut chunks = 0u32;
    let mut total_bytes = 0u64;

    while let Some(bytes) = stream.next().await {
        carry.extend_from_slice(&bytes?);
        while let Some(pos) = carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = carry.drain(..=pos).collect();
            let chunk: Value = serde_json::from_slice(&line[..line.len() - 1])?;
            if let Some(data) = chunk["data"].as_str() {
                use base64::Engine as _;
                let decoded = base64::engine::general_purpose::STANDARD.decode(data)?;
                total_bytes += decoded.len() as u64;
                chunks += 1;
                if chunks % 100 == 0 {
                    println!("  received {chunks} chunks, {:.2}MB", total_bytes as f64 / 1024.0 / 1024.0);
                }
            }
        }
    }

    let duration = start.elapsed().as_secs_f64();
    let speed = if duration > 0.0 { total_bytes as f64 / 1024.0 / 1024.0 / duration } else { 0.0 };
    println!("Download completed:");
    println!("  Chunks: {chunks}");
    println!("  Size: {:.2}MB", total_bytes as f64 / 1024.0 / 1024.0);
    println!("  Duration: {duration:.2}s");
    println!("  Speed: {speed:.2}MB/s");
    Ok(())
}

async fn do_upload(client: &reqwest::Client, transfer_base: &str, size_mb: f64) -> anyhow::Result<()> {
    use base64::Engine as _;

    let size_bytes = (size_mb * 1024.0 * 1024.0) as u64;
    let chunk_size = 65536usize;
    let payload = vec![b'x'; chunk_size];

    println!("Uploading {size_mb:.2}MB to {transfer_base}...");
    let start = Instant::now();

    let mut body = Vec::new();
    let mut sent = 0u64;
    let mut seq = 0u32;
    while sent < size_bytes {
        seq += 1;
        let remaining = (size_bytes - sent) as usize;
        let take = remaining.min(chunk_size);
        sent += take as u64;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&payload[..take]);
        let line = serde_json::json!({ "data": encoded, "seq": seq });
        body.extend_from_slice(serde_json::to_string(&line)?.as_bytes());
        body.push(b'\n');
    }

    let response: Value = client
        .post(format!("{transfer_base}/upload"))
        .body(body)
        .send()
        .await?
        .json()
        .await?;

    let duration = start.elapsed().as_secs_f64();
    let received = response["received_bytes"].as_u64().unwrap_or(0);
    let speed = if duration > 0.0 { received as f64 / 1024.0 / 1024.0 / duration } else { 0.0 };
    println!("Upload completed:");
    println!("  Chunks sent: {}", response["chunks"]);
    println!("  Bytes received by server: {:.2}MB", received as f64 / 1024.0 / 1024.0);
    println!("  Duration: {duration:.2}s");
    println!("  Speed: {speed:.2}MB/s");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Command::Search { query, fanout } => do_search(&client, &cli.base, &query, fanout).await,
        Command::Status => do_status(&client, &cli.base).await,
        Command::Download { filename, transfer_base } => {
            do_download(&client, &transfer_base, &filename).await
        }
        Command::Upload { transfer_base, size_mb } => {
            do_upload(&client, &transfer_base, size_mb).await
        }
    }
}
