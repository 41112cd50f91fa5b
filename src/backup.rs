//! Backup recorder.
//!
//! Metadata of every image is appended to a JSON Lines log before its removal
//! is attempted, and a second, finalized record is appended once the removal
//! succeeded. Nothing is ever rewritten in place, so a crash leaves at worst a
//! torn last line and a pending record that is still readable afterwards.

use crate::model::ImageRecord;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("backup log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup entry encoding: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
    /// Links a pending record to its finalized counterpart.
    pub entry_id: String,
    pub image_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub size_bytes: u64,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub deleted_at: Option<OffsetDateTime>,
}

impl BackupEntry {
    pub fn is_pending(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupStats {
    pub entries: usize,
    pub pending: usize,
}

/// Writes the backup log. A disabled recorder turns every call into a no-op.
#[derive(Debug, Clone)]
pub struct BackupRecorder {
    path: Option<PathBuf>,
}

impl BackupRecorder {
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Durably record an image about to be removed. Returns the pending entry.
    pub async fn record_pending(&self, record: &ImageRecord) -> Result<BackupEntry, BackupError> {
        let entry = BackupEntry {
            entry_id: gen_entry_id(),
            image_id: record.id.clone(),
            tags: record.tags.clone(),
            created_at: record.created_at,
            size_bytes: record.size_bytes,
            labels: record.labels.clone(),
            recorded_at: OffsetDateTime::now_utc(),
            deleted_at: None,
        };
        if let Some(path) = &self.path {
            append_line(path, &entry).await?;
            debug!(image_id = %entry.image_id, entry_id = %entry.entry_id, "backup entry recorded");
        }
        Ok(entry)
    }

    /// Append the finalized version of `entry`, stamped with `deleted_at`.
    pub async fn finalize(
        &self,
        entry: &BackupEntry,
        deleted_at: OffsetDateTime,
    ) -> Result<BackupEntry, BackupError> {
        let finalized = BackupEntry {
            deleted_at: Some(deleted_at),
            ..entry.clone()
        };
        if let Some(path) = &self.path {
            append_line(path, &finalized).await?;
            debug!(image_id = %finalized.image_id, entry_id = %finalized.entry_id, "backup entry finalized");
        }
        Ok(finalized)
    }

    /// Read the log back, one entry per `entry_id` (finalized records win).
    /// Entries keep the order in which they were first recorded.
    pub async fn load_entries(&self) -> Result<Vec<BackupEntry>, BackupError> {
        let Some(path) = &self.path else {
            return Ok(Vec::new());
        };
        let content = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(BackupError::Io {
                    path: path.clone(),
                    source,
                })
            }
        };
        Ok(fold_entries(&content))
    }

    pub async fn stats(&self) -> Result<BackupStats, BackupError> {
        let entries = self.load_entries().await?;
        Ok(BackupStats {
            entries: entries.len(),
            pending: entries.iter().filter(|e| e.is_pending()).count(),
        })
    }
}

fn fold_entries(content: &str) -> Vec<BackupEntry> {
    let mut entries: Vec<BackupEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry = match serde_json::from_str::<BackupEntry>(line) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable backup line");
                continue;
            }
        };
        match index.get(&entry.entry_id) {
            Some(&i) => {
                if entry.deleted_at.is_some() || entries[i].deleted_at.is_none() {
                    entries[i] = entry;
                }
            }
            None => {
                index.insert(entry.entry_id.clone(), entries.len());
                entries.push(entry);
            }
        }
    }
    entries
}

async fn append_line(path: &Path, entry: &BackupEntry) -> Result<(), BackupError> {
    let io_err = |source| BackupError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await
        .map_err(io_err)?;

    // A crash may have left a torn last line; start the record on a fresh one.
    let len = file.metadata().await.map_err(io_err)?.len();
    if len > 0 {
        let mut last = [0u8; 1];
        file.seek(SeekFrom::End(-1)).await.map_err(io_err)?;
        file.read_exact(&mut last).await.map_err(io_err)?;
        if last[0] != b'\n' {
            line.insert(0, '\n');
        }
    }
    // One write per record keeps a concurrent reader from seeing half a line.
    file.write_all(line.as_bytes()).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    Ok(())
}

fn gen_entry_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}
