//! C1 — File Indexer: scans a shared directory and reports file metadata.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const CHECKSUM_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Code,
    Other,
}

impl FileKind {
    fn from_extension(extension: &str) -> Self {
        match extension {
            ".txt" | ".md" | ".log" | ".json" | ".xml" | ".csv" => FileKind::Text,
            ".jpg" | ".jpeg" | ".png" | ".gif" | ".bmp" | ".svg" => FileKind::Image,
            ".mp4" | ".avi" | ".mkv" | ".mov" | ".wmv" | ".flv" => FileKind::Video,
            ".mp3" | ".wav" | ".flac" | ".aac" | ".ogg" => FileKind::Audio,
            ".pdf" | ".doc" | ".docx" | ".xls" | ".xlsx" | ".ppt" | ".pptx" => FileKind::Document,
            ".py" | ".js" | ".java" | ".cpp" | ".c" | ".h" | ".go" | ".rs" => FileKind::Code,
            _ => FileKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    pub checksum: String,
    pub extension: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

fn checksum_file(path: &Path) -> std::io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHECKSUM_CHUNK];
    use std::io::Read;
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    Ok(digest.iter().map(|b| format!("{:02x}", b)).take(8).collect::<String>())
}

fn extension_of(name: &str) -> String {
    match name.rfind('.') {
        // a leading dot with nothing before it (".gitignore") has no extension
        Some(0) => String::new(),
        Some(idx) => name[idx..].to_ascii_lowercase(),
        None => String::new(),
    }
}

fn meta_for_entry(path: &Path, name: String) -> Option<FileMeta> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    let size = metadata.len();
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let checksum = checksum_file(path).ok()?;
    let extension = extension_of(&name);
    let kind = FileKind::from_extension(&extension);
    Some(FileMeta {
        name,
        size,
        mtime,
        checksum,
        extension,
        kind,
    })
}

/// Scans `dir` non-recursively, skipping anything that isn't a regular file
/// and silently omitting files that fail to read. A missing directory yields
/// an empty list rather than an error.
pub fn list(dir: &Path) -> Vec<FileMeta> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<FileMeta> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_owned();
            meta_for_entry(&entry.path(), name)
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}
