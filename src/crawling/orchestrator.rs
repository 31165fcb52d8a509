//! Per-category crawl.
//!
//! A category goes through three phases:
//!
//! 1. **Size**: the resume page (page 1 on a fresh category) is fetched and
//!    its `page__N` markers give the last page. A category whose first page
//!    cannot be fetched, or that has neither markers nor cards, is done.
//! 2. **Pages**: the resume page is processed from the body already in hand,
//!    the remaining pages are fetched, parsed and persisted with at most
//!    `max_page_concurrency_per_category` in flight. Every processed page
//!    moves the checkpoint cursor to the lowest unfinished page.
//! 3. **Drained**: when every page up to the end of the listing (the last
//!    page, or the first page without cards) was processed, the category is
//!    marked completed. Pages that failed keep it pending for the next run.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, error, info, warn};

use super::context::CrawlContext;
use super::cursor::PageCursor;
use crate::domain::{Category, ProductRecord};
use crate::infrastructure::page_fetcher::FetchFailure;
use crate::infrastructure::parsing::{ListingPage, total_pages};

/// How a category run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryState {
    Completed,
    /// Some page failed; the checkpoint holds the cursor for the next run
    Pending,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryOutcome {
    pub category_id: i64,
    pub state: CategoryState,
    pub total_pages: u32,
    pub pages_processed: usize,
    pub failed_pages: Vec<u32>,
    pub records_upserted: usize,
}

impl CategoryOutcome {
    fn new(category_id: i64, state: CategoryState) -> Self {
        Self {
            category_id,
            state,
            total_pages: 0,
            pages_processed: 0,
            failed_pages: Vec::new(),
            records_upserted: 0,
        }
    }
}

/// Result of one page.
#[derive(Debug)]
enum PageResult {
    Processed { raw_items: usize, upserted: usize },
    /// Above an end of listing found meanwhile; not fetched
    Skipped,
    Failed(String),
    Cancelled,
}

pub struct CategoryCrawlOrchestrator {
    ctx: Arc<CrawlContext>,
}

impl CategoryCrawlOrchestrator {
    pub fn new(ctx: Arc<CrawlContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, category: &Category) -> CategoryOutcome {
        let id = category.id;
        if self.ctx.checkpoint.is_completed(id).await {
            debug!("Category {} already completed", category);
            return CategoryOutcome::new(id, CategoryState::Completed);
        }

        let start = self.ctx.checkpoint.resume_page(id).await;
        info!("Category {} starting at page {}", category, start);

        let body = match self.ctx.source.fetch(category, start).await {
            Ok(body) => body,
            Err(FetchFailure::Cancelled | FetchFailure::PoolClosed) => {
                return CategoryOutcome::new(id, CategoryState::Cancelled);
            }
            Err(failure) if start == 1 => {
                warn!("Category {} first page unavailable ({}), treating as empty", category, failure);
                self.complete(category).await;
                return CategoryOutcome::new(id, CategoryState::Completed);
            }
            Err(failure) => {
                warn!("Category {} resume page {} failed: {}", category, start, failure);
                let mut outcome = CategoryOutcome::new(id, CategoryState::Pending);
                outcome.failed_pages.push(start);
                return outcome;
            }
        };

        let (first, total) = match self.size_up(body).await {
            Ok(sized) => sized,
            Err(reason) => {
                error!("Category {} page {} could not be parsed: {}", category, start, reason);
                let mut outcome = CategoryOutcome::new(id, CategoryState::Pending);
                outcome.failed_pages.push(start);
                return outcome;
            }
        };

        let mut outcome = CategoryOutcome::new(id, CategoryState::Pending);
        outcome.total_pages = total;
        if total == 0 {
            info!("Category {} has no listing, marking completed", category);
            self.complete(category).await;
            outcome.state = CategoryState::Completed;
            return outcome;
        }

        let last = total.max(start);
        info!("Category {}: {} pages, resuming at {}", category, last, start);

        let mut cursor = PageCursor::new(start, last);
        let end_of_listing = Arc::new(AtomicU32::new(u32::MAX));

        let first_result = self.persist(category, start, first).await;
        let mut cancelled = self
            .record(category, start, first_result, &mut cursor, &end_of_listing, &mut outcome)
            .await;

        if !cancelled && !cursor.is_drained() {
            let concurrency = self.ctx.config.max_page_concurrency_per_category.max(1);
            let mut results = stream::iter(start + 1..=last)
                .map(|page| {
                    let end_of_listing = Arc::clone(&end_of_listing);
                    async move {
                        let result = self.process_page(category, page, &end_of_listing).await;
                        (page, result)
                    }
                })
                .buffer_unordered(concurrency);

            while let Some((page, result)) = results.next().await {
                cancelled |= self
                    .record(category, page, result, &mut cursor, &end_of_listing, &mut outcome)
                    .await;
            }
        }

        outcome.failed_pages = cursor.failed_pages().collect();
        outcome.state = if cancelled || (self.ctx.cancel.is_cancelled() && !cursor.is_drained()) {
            CategoryState::Cancelled
        } else if cursor.is_drained() {
            self.complete(category).await;
            CategoryState::Completed
        } else {
            CategoryState::Pending
        };

        match outcome.state {
            CategoryState::Completed => info!(
                "Category {} completed: {} pages, {} records",
                category, outcome.pages_processed, outcome.records_upserted
            ),
            CategoryState::Pending => warn!(
                "Category {} left pending at page {}: failed pages {:?}",
                category,
                cursor.position(),
                outcome.failed_pages
            ),
            CategoryState::Cancelled => info!(
                "Category {} interrupted, resumes at page {}",
                category,
                cursor.position()
            ),
        }
        outcome
    }

    /// Folds one page result into the cursor and the checkpoint. Returns
    /// whether the run was cancelled.
    async fn record(
        &self,
        category: &Category,
        page: u32,
        result: PageResult,
        cursor: &mut PageCursor,
        end_of_listing: &AtomicU32,
        outcome: &mut CategoryOutcome,
    ) -> bool {
        let moved = match result {
            PageResult::Processed { raw_items: 0, .. } => {
                debug!("Category {} page {} is past the end of the listing", category, page);
                outcome.pages_processed += 1;
                end_of_listing.fetch_min(page, Ordering::AcqRel);
                cursor.end_at(page)
            }
            PageResult::Processed { raw_items, upserted } => {
                debug!(
                    "Category {} page {}: {} cards, {} records",
                    category, page, raw_items, upserted
                );
                outcome.pages_processed += 1;
                outcome.records_upserted += upserted;
                cursor.finish(page)
            }
            PageResult::Skipped => cursor.finish(page),
            PageResult::Failed(reason) => {
                warn!("Category {} page {} left unprocessed: {}", category, page, reason);
                cursor.fail(page);
                None
            }
            PageResult::Cancelled => return true,
        };

        if let Some(next) = moved {
            if let Err(err) = self.ctx.checkpoint.advance(category.id, next).await {
                error!("Failed to save checkpoint for category {}: {}", category, err);
            }
        }
        false
    }

    async fn process_page(
        &self,
        category: &Category,
        page: u32,
        end_of_listing: &AtomicU32,
    ) -> PageResult {
        if self.ctx.cancel.is_cancelled() {
            return PageResult::Cancelled;
        }
        if page > end_of_listing.load(Ordering::Acquire) {
            return PageResult::Skipped;
        }

        let body = match self.ctx.source.fetch(category, page).await {
            Ok(body) => body,
            Err(FetchFailure::Cancelled | FetchFailure::PoolClosed) => return PageResult::Cancelled,
            Err(failure) => return PageResult::Failed(failure.to_string()),
        };

        match self.parse(body).await {
            Ok(listing) => self.persist(category, page, listing).await,
            Err(reason) => PageResult::Failed(reason),
        }
    }

    /// Parses off the async workers.
    async fn parse(&self, body: String) -> Result<ListingPage, String> {
        let parser = Arc::clone(&self.ctx.parser);
        tokio::task::spawn_blocking(move || parser.parse(&body))
            .await
            .map_err(|err| format!("parser task failed: {err}"))
    }

    /// Parses the first page and reads the page count from it.
    async fn size_up(&self, body: String) -> Result<(ListingPage, u32), String> {
        let parser = Arc::clone(&self.ctx.parser);
        tokio::task::spawn_blocking(move || {
            let page = parser.parse(&body);
            let total = total_pages(&body, page.raw_items);
            (page, total)
        })
        .await
        .map_err(|err| format!("parser task failed: {err}"))
    }

    async fn persist(&self, category: &Category, page: u32, listing: ListingPage) -> PageResult {
        let raw_items = listing.raw_items;
        let records: Vec<ProductRecord> = listing
            .items
            .into_iter()
            .filter_map(|item| ProductRecord::from_listing(item, category))
            .collect();

        if records.is_empty() {
            return PageResult::Processed {
                raw_items,
                upserted: 0,
            };
        }

        match self.ctx.sink.upsert(&records).await {
            Ok(upserted) => PageResult::Processed { raw_items, upserted },
            Err(err) => {
                error!("Category {} page {}: saving {} records failed: {}", category, page, records.len(), err);
                PageResult::Failed(err.to_string())
            }
        }
    }

    async fn complete(&self, category: &Category) {
        if let Err(err) = self.ctx.checkpoint.complete(category.id).await {
            error!("Failed to save completion of category {}: {}", category, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::config::CrawlerConfig;
    use crate::infrastructure::ProgressCheckpoint;
    use crate::test_utils::{RecordingSink, ScriptedSource, listing_html};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        source: Arc<ScriptedSource>,
        sink: Arc<RecordingSink>,
        checkpoint: Arc<ProgressCheckpoint>,
        orchestrator: CategoryCrawlOrchestrator,
    }

    async fn harness(source: ScriptedSource, sink: RecordingSink, progress: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        if let Some(json) = progress {
            std::fs::write(&path, json).unwrap();
        }
        let checkpoint = Arc::new(ProgressCheckpoint::load(&path).await.unwrap());
        let source = Arc::new(source);
        let sink = Arc::new(sink);
        let ctx = CrawlContext::new(
            CrawlerConfig {
                max_page_concurrency_per_category: 3,
                ..CrawlerConfig::default()
            },
            source.clone(),
            Arc::clone(&checkpoint),
            sink.clone(),
        )
        .unwrap();
        Harness {
            _dir: dir,
            source,
            sink,
            checkpoint,
            orchestrator: CategoryCrawlOrchestrator::new(Arc::new(ctx)),
        }
    }

    #[tokio::test]
    async fn empty_second_page_completes_the_category() {
        let category = Category::leaf(3, "krepezh");
        let source = ScriptedSource::default()
            .page(3, 1, listing_html(&[("1", "Болт М8х40 оцинкованный", "12,50"), ("2", "Гайка М8 оцинкованная", "3,10")], Some(2)))
            .page(3, 2, listing_html(&[], Some(2)));
        let h = harness(source, RecordingSink::default(), None).await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Completed);
        assert_eq!(outcome.total_pages, 2);
        assert_eq!(outcome.records_upserted, 2);
        assert_eq!(h.sink.records().len(), 2);
        let progress = h.checkpoint.snapshot().await;
        assert!(progress.is_completed(3));
        assert_eq!(progress.next_page(3), None);
    }

    #[tokio::test]
    async fn failed_page_keeps_category_pending_at_that_page() {
        let category = Category::leaf(5, "truby");
        let source = ScriptedSource::default()
            .page(5, 1, listing_html(&[("1", "Труба профильная 20х20", "100")], Some(4)))
            .page(5, 2, listing_html(&[("2", "Труба профильная 40х20", "150")], Some(4)))
            .failure(5, 3, FetchFailure::TransientExhausted { attempts: 4, last_error: "HTTP 503".into() })
            .page(5, 4, listing_html(&[("4", "Труба профильная 60х40", "300")], Some(4)));
        let h = harness(source, RecordingSink::default(), None).await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Pending);
        assert_eq!(outcome.failed_pages, [3]);
        assert_eq!(outcome.records_upserted, 3);
        let progress = h.checkpoint.snapshot().await;
        assert!(!progress.is_completed(5));
        assert_eq!(progress.next_page(5), Some(3));
    }

    #[tokio::test]
    async fn sink_failure_does_not_advance_past_the_page() {
        let category = Category::leaf(8, "listy");
        let source = ScriptedSource::default()
            .page(8, 1, listing_html(&[("1", "Лист горячекатаный 2мм", "990")], None));
        let h = harness(source, RecordingSink::failing(), None).await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Pending);
        assert_eq!(outcome.failed_pages, [1]);
        let progress = h.checkpoint.snapshot().await;
        assert!(!progress.is_completed(8));
        assert_eq!(progress.resume_page(8), 1);
    }

    #[tokio::test]
    async fn unreachable_first_page_is_an_empty_category() {
        let category = Category::leaf(9, "mertvaya");
        let source = ScriptedSource::default()
            .failure(9, 1, FetchFailure::non_retryable("HTTP 404 Not Found"));
        let h = harness(source, RecordingSink::default(), None).await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Completed);
        assert!(h.checkpoint.is_completed(9).await);
        assert!(h.sink.records().is_empty());
    }

    #[tokio::test]
    async fn all_invalid_cards_is_a_processed_page_not_the_end() {
        let category = Category::leaf(11, "armatura");
        let no_price = r#"<li class="listing-cards__item" data-product-id="1"><span>Арматура А500С 12мм</span></li>
                          <a href="/catalog/armatura/page__2/">2</a>"#;
        let source = ScriptedSource::default()
            .page(11, 1, no_price.to_string())
            .page(11, 2, listing_html(&[("2", "Арматура А500С 14мм", "55,00")], Some(2)));
        let h = harness(source, RecordingSink::default(), None).await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Completed);
        assert_eq!(outcome.pages_processed, 2);
        assert_eq!(outcome.records_upserted, 1);
        assert_eq!(h.source.fetched(11), [1, 2]);
    }

    #[tokio::test]
    async fn resumes_from_saved_cursor() {
        let category = Category::leaf(42, "shvellery");
        let mut source = ScriptedSource::default();
        for page in 1..=6 {
            let (id, name) = (page.to_string(), format!("Швеллер стальной №{page}"));
            source = source.page(42, page, listing_html(&[(id.as_str(), name.as_str(), "10")], Some(6)));
        }
        let h = harness(
            source,
            RecordingSink::default(),
            Some(r#"{"completed_categories":[],"category_pages":{"42":5}}"#),
        )
        .await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Completed);
        assert_eq!(h.source.fetched(42), [5, 6]);
        assert_eq!(outcome.records_upserted, 2);
    }

    #[tokio::test]
    async fn cancellation_leaves_category_resumable() {
        let category = Category::leaf(12, "profnastil");
        let source = ScriptedSource::default()
            .page(12, 1, listing_html(&[("1", "Профнастил С8 оцинкованный", "450")], Some(3)))
            .failure(12, 2, FetchFailure::Cancelled)
            .failure(12, 3, FetchFailure::Cancelled);
        let h = harness(source, RecordingSink::default(), None).await;

        let outcome = h.orchestrator.run(&category).await;

        assert_eq!(outcome.state, CategoryState::Cancelled);
        let progress = h.checkpoint.snapshot().await;
        assert!(!progress.is_completed(12));
        assert_eq!(progress.next_page(12), Some(2));
    }
}
