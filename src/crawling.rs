//! # Crawling
//!
//! Drives the infrastructure pieces through a run:
//! - [`scheduler`]: which categories run, and how many at once
//! - [`orchestrator`]: one category from its resume page to the end of its listing
//! - [`cursor`]: resume position over pages finishing out of order
//! - [`context`]: the shared state handed to every orchestrator
//! - [`inspect`]: read-only preview and survey

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub mod context;
pub mod cursor;
pub mod inspect;
pub mod orchestrator;
pub mod scheduler;

pub use context::CrawlContext;
pub use cursor::PageCursor;
pub use inspect::{CategorySurvey, preview, survey_category};
pub use orchestrator::{CategoryCrawlOrchestrator, CategoryOutcome, CategoryState};
pub use scheduler::CrawlScheduler;

use crate::infrastructure::checkpoint::CheckpointError;
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::http_client_pool::ClientPoolError;
use crate::infrastructure::registry::RegistryError;

/// Errors that end a run before or outside category processing.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load categories: {0}")]
    CategorySource(RegistryError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("HTTP client pool error: {0}")]
    ClientPool(#[from] ClientPoolError),
}

/// What a run did.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Categories the run set out to crawl
    pub eligible: usize,
    pub completed: usize,
    pub pending: usize,
    pub failed_pages: usize,
    pub records_upserted: usize,
    pub cancelled: bool,
}
