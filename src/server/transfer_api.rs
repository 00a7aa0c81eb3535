//! C6 — Transfer Surface: chunked download/upload streaming endpoints.
//!
//! Framed as newline-delimited JSON (`FileChunk` per line) over a plain
//! HTTP streaming body rather than gRPC/tonic — see SPEC_FULL §9. Each
//! message corresponds 1:1 to the `FileChunk`/`UploadStatus` schemas in
//! spec §6.

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::app_state::AppState;
use crate::peer_state::{Admission, RateKind};
use crate::server::ClientIdentity;

const CHUNK_SIZE: usize = 64 * 1024;
const CHUNK_PAUSE: Duration = Duration::from_millis(1);
const UPLOAD_SIZE_CAP: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FileChunk {
    /// Base64-encoded in the wire JSON so arbitrary bytes survive the
    /// newline-delimited text framing.
    #[serde(with = "chunk_data_b64")]
    pub data: Vec<u8>,
    pub seq: u32,
}

mod chunk_data_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UploadStatus {
    pub received_bytes: u64,
    pub chunks: u32,
}

fn chunk_line(chunk: &FileChunk) -> Bytes {
    let mut line = serde_json::to_vec(chunk).expect("FileChunk always serializes");
    line.push(b'\n');
    Bytes::from(line)
}

fn error_chunk(text: &str) -> FileChunk {
    FileChunk {
        data: text.as_bytes().to_vec(),
        seq: 1,
    }
}

pub async fn download(
    State(state): State<AppState>,
    identity: ClientIdentity,
    Path(filename): Path<String>,
) -> Response {
    let limit = state.config.rate_limit.downloads_per_minute;
    if state
        .peer_state
        .check_rate_limit(&identity.0, RateKind::Downloads, limit)
        == Admission::Deny
    {
        state.metrics.record_rate_limit_hit("downloads");
        return (StatusCode::TOO_MANY_REQUESTS, "resource-exhausted: download rate limit exceeded")
            .into_response();
    }

    let path: PathBuf = state.config.shared_dir.join(&filename);
    let peer_name = state.config.name.clone();
    let metrics = state.metrics;

    let metadata = tokio::fs::metadata(&path).await;
    if metadata.is_err() || !metadata.as_ref().map(|m| m.is_file()).unwrap_or(false) {
        let chunk = error_chunk(&format!("File {filename} not found on {peer_name}"));
        metrics.record_transfer("download", chunk.data.len() as u64);
        let body = Body::from(chunk_line(&chunk));
        return (StatusCode::OK, body).into_response();
    }

    // A background task pushes framed chunks into the channel; the receiver
    // becomes the streaming response body. This keeps the cooperative pause
    // between chunks cancellable (dropping the receiver/body aborts the
    // task) without pulling in a stream-generator macro crate.
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(4);
    tokio::spawn(async move {
        let mut total: u64 = 0;
        match tokio::fs::File::open(&path).await {
            Ok(mut file) => {
                use tokio::io::AsyncReadExt;
                let mut seq = 0u32;
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    match file.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            seq += 1;
                            total += n as u64;
                            let chunk = FileChunk {
                                data: buf[..n].to_vec(),
                                seq,
                            };
                            if tx.send(Ok(chunk_line(&chunk))).await.is_err() {
                                return;
                            }
                            tokio::time::sleep(CHUNK_PAUSE).await;
                        }
                        Err(err) => {
                            tracing::warn!(?err, %filename, "read error mid-stream");
                            let chunk = error_chunk(&format!("Error reading {filename}: {err}"));
                            let _ = tx.send(Ok(chunk_line(&chunk))).await;
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                let chunk = error_chunk(&format!("Error reading {filename}: {err}"));
                let _ = tx.send(Ok(chunk_line(&chunk))).await;
            }
        }
        metrics.record_transfer("download", total);
    });

    let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
    (StatusCode::OK, Body::from_stream(stream)).into_response()
}

pub async fn upload(
    State(state): State<AppState>,
    identity: ClientIdentity,
    request: axum::extract::Request,
) -> Response {
    let limit = state.config.rate_limit.downloads_per_minute;
    if state
        .peer_state
        .check_rate_limit(&identity.0, RateKind::Downloads, limit)
        == Admission::Deny
    {
        state.metrics.record_rate_limit_hit("downloads");
        return (StatusCode::TOO_MANY_REQUESTS, "resource-exhausted: upload rate limit exceeded")
            .into_response();
    }

    let mut body_stream = request.into_body().into_data_stream();
    let mut carry = Vec::new();
    let mut received_bytes: u64 = 0;
    let mut chunks: u32 = 0;
    let mut last_seq: u32 = 0;

    loop {
        let next = body_stream.next().await;
        let bytes = match next {
            Some(Ok(bytes)) => bytes,
            Some(Err(err)) => {
                tracing::warn!(?err, "upload stream error");
                return (StatusCode::BAD_REQUEST, "invalid-argument: upload stream error")
                    .into_response();
            }
            None => break,
        };
        carry.extend_from_slice(&bytes);

        while let Some(pos) = carry.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = carry.drain(..=pos).collect();
            let line = &line[..line.len() - 1];
            if line.is_empty() {
                continue;
            }
            let chunk: FileChunk = match serde_json::from_slice(line) {
                Ok(chunk) => chunk,
                Err(err) => {
                    tracing::warn!(?err, "malformed upload chunk");
                    return (StatusCode::BAD_REQUEST, "invalid-argument: malformed chunk")
                        .into_response();
                }
            };
            if !chunk.data.is_empty() {
                chunks += 1;
                received_bytes += chunk.data.len() as u64;
                if chunk.seq < last_seq {
                    tracing::warn!(seq = chunk.seq, last_seq, "out of order upload chunk");
                }
                last_seq = chunk.seq;
                tokio::time::sleep(CHUNK_PAUSE).await;
            }
            if received_bytes > UPLOAD_SIZE_CAP {
                return (StatusCode::PAYLOAD_TOO_LARGE, "resource-exhausted: upload size limit exceeded")
                    .into_response();
            }
        }
    }

    state.metrics.record_transfer("upload", received_bytes);
    Json(UploadStatus {
        received_bytes,
        chunks,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_data_round_trips_through_json() {
        let chunk = FileChunk {
            data: b"hello world".to_vec(),
            seq: 1,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        let decoded: FileChunk = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.data, chunk.data);
        assert_eq!(decoded.seq, chunk.seq);
    }

    #[test]
    fn error_chunk_has_seq_one() {
        let chunk = error_chunk("File x.txt not found on peer-a");
        assert_eq!(chunk.seq, 1);
        assert_eq!(chunk.data, b"File x.txt not found on peer-a");
    }
}
