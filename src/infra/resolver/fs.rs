//! Directory listings for the pending and discovered datasets.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs;
use tracing::{debug, warn};

use crate::cache::{ResolveError, SourceResolver};
use crate::domain::dataset::{Dataset, Row};
use crate::domain::keys::RootKey;
use crate::domain::uploads::is_temp_name;

/// Lists completed uploads and discovered data files.
#[derive(Debug, Clone, Default)]
pub struct FilesystemResolver {
    pending_dir: Option<PathBuf>,
    discovery_dir: Option<PathBuf>,
}

struct Listed {
    path: PathBuf,
    name: String,
    modified: Option<SystemTime>,
}

impl FilesystemResolver {
    pub fn new(pending_dir: Option<PathBuf>, discovery_dir: Option<PathBuf>) -> Self {
        Self {
            pending_dir,
            discovery_dir,
        }
    }

    async fn pending_rows(&self, dir: &Path) -> Result<Vec<Row>, std::io::Error> {
        let mut rows = Vec::new();
        for entry in list_dir(dir, false).await? {
            if is_temp_name(&entry.name) {
                continue;
            }
            let mut row = Row::new();
            row.insert("id".into(), Value::String(path_id(&entry.path)));
            row.insert("filename".into(), Value::String(entry.name));
            row.insert("uploaded".into(), timestamp(entry.modified));
            // The filesystem does not record who uploaded a file.
            row.insert("uploaded_by".into(), Value::Null);
            rows.push(row);
        }
        Ok(rows)
    }

    async fn discovered_rows(&self, dir: &Path) -> Result<Vec<Row>, std::io::Error> {
        let mut rows = Vec::new();
        for entry in list_dir(dir, true).await? {
            let mut row = Row::new();
            row.insert("id".into(), Value::String(path_id(&entry.path)));
            row.insert("filename".into(), Value::String(entry.name));
            row.insert("last_modified".into(), timestamp(entry.modified));
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl SourceResolver for FilesystemResolver {
    async fn resolve(&self, key: RootKey) -> Result<Vec<u8>, ResolveError> {
        let (dir, rows) = match (key, &self.pending_dir, &self.discovery_dir) {
            (RootKey::PendingFiles, Some(dir), _) => (dir, self.pending_rows(dir).await),
            (RootKey::DiscoveredFiles, _, Some(dir)) => (dir, self.discovered_rows(dir).await),
            _ => return Err(ResolveError::not_defined(key)),
        };

        let rows = rows.map_err(|err| {
            ResolveError::failed(key, format!("listing {}: {err}", dir.display()))
        })?;
        debug!(key = %key, rows = rows.len(), dir = %dir.display(), "Listed directory");
        Ok(Dataset::with_rows(key, rows).encode())
    }
}

/// Regular files under `root`, sorted by name. Names are relative to `root` with
/// `/` separators. Hidden entries are skipped only when walking recursively.
async fn list_dir(root: &Path, recursive: bool) -> Result<Vec<Listed>, std::io::Error> {
    let mut listed = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && dir == root => {
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = match entry.file_type().await {
                Ok(file_type) => file_type,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping unreadable entry");
                    continue;
                }
            };
            let hidden = entry.file_name().to_string_lossy().starts_with('.');

            if file_type.is_dir() {
                if recursive && !hidden {
                    pending.push(path);
                }
                continue;
            }
            if !file_type.is_file() || (recursive && hidden) {
                continue;
            }

            let modified = entry
                .metadata()
                .await
                .ok()
                .and_then(|meta| meta.modified().ok());
            let name = relative_name(root, &path);
            listed.push(Listed {
                path,
                name,
                modified,
            });
        }
    }

    listed.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(listed)
}

fn relative_name(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Stable row id: hex SHA-256 of the full path.
fn path_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    hex::encode(digest)
}

fn timestamp(modified: Option<SystemTime>) -> Value {
    modified
        .and_then(|at| OffsetDateTime::from(at).format(&Rfc3339).ok())
        .map_or(Value::Null, Value::String)
}
