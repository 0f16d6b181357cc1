//! Append-only analysis history, one JSON file per record.
//!
//! File names are `{timestamp}_{kind}_{url}.json` with a UTC timestamp
//! down to microseconds and the URL reduced to `[A-Za-z0-9_]` and cut at
//! 50 characters. A taken name gets a `-N` suffix. Each record is written
//! to a hidden temp file first and then linked into place, so readers
//! never see a half-written record and an existing record is never
//! overwritten. Where the filesystem has no hard links the temp file is
//! renamed instead.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, WizardError};
use crate::models::HistoryRecord;

const MAX_URL_CHARS: usize = 50;
const MAX_NAME_ATTEMPTS: usize = 1000;

/// File name of a stored record.
pub type RecordId = String;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn record(&self, kind: &str, text: &str, repo_url: &str) -> Result<RecordId> {
        self.record_at(kind, text, repo_url, Utc::now()).await
    }

    /// Like [`record`](Self::record) but never fails: a write error is
    /// logged and `None` returned.
    pub async fn record_best_effort(&self, kind: &str, text: &str, repo_url: &str) -> Option<RecordId> {
        match self.record(kind, text, repo_url).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to save analysis history: {}", e);
                None
            }
        }
    }

    pub(crate) async fn record_at(
        &self,
        kind: &str,
        text: &str,
        repo_url: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<RecordId> {
        let record = HistoryRecord {
            kind: kind.to_string(),
            text: text.to_string(),
            repo_url: repo_url.to_string(),
            timestamp,
        };
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| WizardError::HistoryWrite(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| write_error(&self.dir, e))?;

        let stem = file_stem(kind, repo_url, timestamp);
        let tmp = self.dir.join(format!(".{}.{}.tmp", stem, Uuid::new_v4()));
        tokio::fs::write(&tmp, &body)
            .await
            .map_err(|e| write_error(&tmp, e))?;

        let result = self.link_unique(&tmp, &stem).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        result
    }

    async fn link_unique(&self, tmp: &Path, stem: &str) -> Result<RecordId> {
        for n in 0..MAX_NAME_ATTEMPTS {
            let name = if n == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}-{}.json", stem, n)
            };
            let target = self.dir.join(&name);
            match tokio::fs::hard_link(tmp, &target).await {
                Ok(()) => return Ok(name),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    debug!("hard link into {} failed ({}), renaming instead", self.dir.display(), e);
                    return self.rename_unique(tmp, stem).await;
                }
            }
        }
        Err(no_free_name(stem))
    }

    /// Fallback for filesystems without hard links. A name that exists is
    /// skipped, so records are still never overwritten by this writer.
    async fn rename_unique(&self, tmp: &Path, stem: &str) -> Result<RecordId> {
        for n in 0..MAX_NAME_ATTEMPTS {
            let name = if n == 0 {
                format!("{}.json", stem)
            } else {
                format!("{}-{}.json", stem, n)
            };
            let target = self.dir.join(&name);
            if tokio::fs::try_exists(&target)
                .await
                .map_err(|e| write_error(&target, e))?
            {
                continue;
            }
            tokio::fs::rename(tmp, &target)
                .await
                .map_err(|e| write_error(&target, e))?;
            return Ok(name);
        }
        Err(no_free_name(stem))
    }

    /// All readable records, newest first.
    pub async fn list(&self) -> Result<Vec<HistoryRecord>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(WizardError::Internal(anyhow::anyhow!(
                    "cannot read history dir {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        let mut records: Vec<(HistoryRecord, SystemTime)> = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| WizardError::Internal(e.into()))?
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable history file {}: {}", path.display(), e);
                    continue;
                }
            };
            let record: HistoryRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed history file {}: {}", path.display(), e);
                    continue;
                }
            };
            let mtime = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            records.push((record, mtime));
        }

        records.sort_by(|(a, a_mtime), (b, b_mtime)| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b_mtime.cmp(a_mtime))
        });
        Ok(records.into_iter().map(|(record, _)| record).collect())
    }
}

fn no_free_name(stem: &str) -> WizardError {
    WizardError::HistoryWrite(format!("no free file name for {}", stem))
}

fn write_error(path: &Path, e: std::io::Error) -> WizardError {
    WizardError::HistoryWrite(format!("{}: {}", path.display(), e))
}

fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn file_stem(kind: &str, repo_url: &str, timestamp: DateTime<Utc>) -> String {
    let url: String = sanitize(repo_url).chars().take(MAX_URL_CHARS).collect();
    format!(
        "{}_{}_{}",
        timestamp.format("%Y%m%d_%H%M%S_%6f"),
        sanitize(kind),
        url
    )
}
