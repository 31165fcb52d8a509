//! Durable crawl progress
//!
//! One [`ProgressCheckpoint`] per run owns the in-memory [`CrawlProgress`]
//! behind a single async mutex. Every mutation is written out while the lock
//! is still held: JSON goes to a sibling temp file which is synced and then
//! renamed over the checkpoint, so readers only ever see a complete file.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::CrawlProgress;

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Checkpoint {path} is not valid progress JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ProgressCheckpoint {
    path: PathBuf,
    state: Mutex<CrawlProgress>,
}

impl ProgressCheckpoint {
    /// Reads the last saved progress; a missing file is an empty checkpoint.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let path = path.into();
        let progress = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let mut progress: CrawlProgress = serde_json::from_slice(&bytes)
                    .map_err(|source| CheckpointError::Corrupt {
                        path: path.clone(),
                        source,
                    })?;
                progress.normalize();
                info!(
                    "Loaded checkpoint {}: {} categories completed, {} in progress",
                    path.display(),
                    progress.completed_categories.len(),
                    progress.category_pages.len()
                );
                progress
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                info!("No checkpoint at {}, starting fresh", path.display());
                CrawlProgress::default()
            }
            Err(source) => return Err(CheckpointError::Read { path, source }),
        };

        Ok(Self {
            path,
            state: Mutex::new(progress),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn snapshot(&self) -> CrawlProgress {
        self.state.lock().await.clone()
    }

    pub async fn is_completed(&self, category_id: i64) -> bool {
        self.state.lock().await.is_completed(category_id)
    }

    pub async fn resume_page(&self, category_id: i64) -> u32 {
        self.state.lock().await.resume_page(category_id)
    }

    /// Moves the category's cursor forward and persists. A cursor at or past
    /// `next_page` is left alone and nothing is written.
    pub async fn advance(&self, category_id: i64, next_page: u32) -> Result<bool, CheckpointError> {
        let mut state = self.state.lock().await;
        if !state.advance(category_id, next_page) {
            return Ok(false);
        }
        debug!("Category {} resumes at page {}", category_id, next_page);
        persist(&self.path, &state).await?;
        Ok(true)
    }

    /// Marks the category drained and persists.
    pub async fn complete(&self, category_id: i64) -> Result<bool, CheckpointError> {
        let mut state = self.state.lock().await;
        if !state.complete(category_id) {
            return Ok(false);
        }
        debug!("Category {} completed", category_id);
        persist(&self.path, &state).await?;
        Ok(true)
    }

    /// Writes the current state regardless of changes.
    pub async fn flush(&self) -> Result<(), CheckpointError> {
        let state = self.state.lock().await;
        persist(&self.path, &state).await
    }
}

async fn persist(path: &Path, progress: &CrawlProgress) -> Result<(), CheckpointError> {
    let bytes = serde_json::to_vec_pretty(progress)?;
    let write_err = |source| CheckpointError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp = temp_path(path);
    let mut file = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
    file.write_all(&bytes).await.map_err(write_err)?;
    file.sync_all().await.map_err(write_err)?;
    drop(file);

    tokio::fs::rename(&tmp, path).await.map_err(write_err)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}
