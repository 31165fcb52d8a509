//! Top-level crawl loop over categories.
//!
//! Eligible categories (leaf, not completed, optionally restricted to a
//! selection) run through [`CategoryCrawlOrchestrator`]s, at most
//! `max_category_concurrency` at a time. The run ends when every category
//! finished or the cancellation token fired; either way the checkpoint is
//! flushed and the HTTP client pool is shut down exactly once.

use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::context::CrawlContext;
use super::orchestrator::{CategoryCrawlOrchestrator, CategoryOutcome, CategoryState};
use super::{CrawlError, CrawlSummary};
use crate::domain::Category;
use crate::infrastructure::registry::CategorySource;

pub struct CrawlScheduler {
    ctx: Arc<CrawlContext>,
    categories: Arc<dyn CategorySource>,
    selected: Option<BTreeSet<i64>>,
}

impl CrawlScheduler {
    pub fn new(ctx: Arc<CrawlContext>, categories: Arc<dyn CategorySource>) -> Self {
        Self {
            ctx,
            categories,
            selected: None,
        }
    }

    /// Restricts the run to these category ids.
    pub fn with_selection(mut self, ids: impl IntoIterator<Item = i64>) -> Self {
        let ids: BTreeSet<i64> = ids.into_iter().collect();
        self.selected = (!ids.is_empty()).then_some(ids);
        self
    }

    /// Leaf categories still to crawl, in source order.
    pub async fn eligible_categories(&self) -> Result<Vec<Category>, CrawlError> {
        let all = self
            .categories
            .categories()
            .await
            .map_err(CrawlError::CategorySource)?;
        let progress = self.ctx.checkpoint.snapshot().await;

        Ok(all
            .into_iter()
            .filter(Category::is_crawlable)
            .filter(|c| !progress.is_completed(c.id))
            .filter(|c| self.selected.as_ref().is_none_or(|ids| ids.contains(&c.id)))
            .collect())
    }

    pub async fn run(&self) -> Result<CrawlSummary, CrawlError> {
        let result = self.run_categories().await;

        if let Err(err) = self.ctx.checkpoint.flush().await {
            error!("Final checkpoint write failed: {}", err);
        }
        self.ctx.shutdown().await;

        if let Ok(summary) = &result {
            info!(
                "Run {} finished: {} categories completed, {} pending, {} failed pages, {} records{}",
                summary.run_id,
                summary.completed,
                summary.pending,
                summary.failed_pages,
                summary.records_upserted,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
        }
        result
    }

    async fn run_categories(&self) -> Result<CrawlSummary, CrawlError> {
        let mut summary = CrawlSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            eligible: 0,
            completed: 0,
            pending: 0,
            failed_pages: 0,
            records_upserted: 0,
            cancelled: false,
        };

        let categories = self.eligible_categories().await?;
        summary.eligible = categories.len();
        info!(
            "Run {}: {} categories to crawl, {} at a time",
            summary.run_id,
            categories.len(),
            self.ctx.config.max_category_concurrency
        );

        let limit = Arc::new(Semaphore::new(self.ctx.config.max_category_concurrency.max(1)));
        let mut tasks: JoinSet<CategoryOutcome> = JoinSet::new();
        let mut started = 0usize;

        for category in categories {
            let permit = tokio::select! {
                biased;
                _ = self.ctx.cancel.cancelled() => break,
                permit = Arc::clone(&limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // Reap whatever finished meanwhile so the set stays small.
            while let Some(joined) = tasks.try_join_next() {
                tally(&mut summary, joined);
            }

            let orchestrator = CategoryCrawlOrchestrator::new(Arc::clone(&self.ctx));
            started += 1;
            tasks.spawn(async move {
                let outcome = orchestrator.run(&category).await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = tasks.join_next().await {
            tally(&mut summary, joined);
        }

        summary.cancelled = self.ctx.cancel.is_cancelled();
        // Categories never started are pending too.
        summary.pending += summary.eligible - started;
        summary.finished_at = Some(Utc::now());
        Ok(summary)
    }
}

fn tally(summary: &mut CrawlSummary, joined: Result<CategoryOutcome, tokio::task::JoinError>) {
    match joined {
        Ok(outcome) => {
            summary.failed_pages += outcome.failed_pages.len();
            summary.records_upserted += outcome.records_upserted;
            match outcome.state {
                CategoryState::Completed => summary.completed += 1,
                CategoryState::Pending | CategoryState::Cancelled => summary.pending += 1,
            }
        }
        Err(err) => {
            warn!("Category task ended abnormally: {}", err);
            summary.pending += 1;
        }
    }
}
