//! Read-only looks at the catalog: a preview of the first records a crawl
//! would store, and a per-category page/item survey. Neither touches the
//! checkpoint or the sink.

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{Category, ProductRecord};
use crate::infrastructure::page_fetcher::ListingSource;
use crate::infrastructure::parsing::{ListingParser, total_pages};

/// Page count and size of the last page of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySurvey {
    pub category_id: i64,
    pub slug: String,
    pub pages: u32,
    pub items_on_last_page: usize,
}

impl CategorySurvey {
    fn empty(category: &Category) -> Self {
        Self {
            category_id: category.id,
            slug: category.slug.clone(),
            pages: 0,
            items_on_last_page: 0,
        }
    }
}

/// Walks the given categories page by page and returns up to `limit`
/// records. Stops a category at its first failing or empty page.
pub async fn preview(
    source: &dyn ListingSource,
    parser: &ListingParser,
    categories: &[Category],
    limit: usize,
) -> Vec<ProductRecord> {
    let mut records = Vec::new();

    for category in categories.iter().filter(|c| c.is_crawlable()) {
        let mut page = 1;
        while records.len() < limit {
            let body = match source.fetch(category, page).await {
                Ok(body) => body,
                Err(failure) => {
                    warn!("Preview of {} stopped at page {}: {}", category, page, failure);
                    break;
                }
            };
            let listing = parser.parse(&body);
            if listing.is_end_of_listing() {
                break;
            }
            let last = total_pages(&body, listing.raw_items);
            records.extend(
                listing
                    .items
                    .into_iter()
                    .filter_map(|item| ProductRecord::from_listing(item, category))
                    .take(limit - records.len()),
            );
            if page >= last {
                break;
            }
            page += 1;
        }
        if records.len() >= limit {
            break;
        }
    }

    debug!("Preview collected {} records", records.len());
    records
}

/// Counts pages and the cards on the last page of a category.
pub async fn survey_category(
    source: &dyn ListingSource,
    parser: &ListingParser,
    category: &Category,
) -> CategorySurvey {
    if category.slug.trim().is_empty() {
        return CategorySurvey::empty(category);
    }

    let first = match source.fetch(category, 1).await {
        Ok(body) => body,
        Err(failure) => {
            warn!("Survey of {} failed: {}", category, failure);
            return CategorySurvey::empty(category);
        }
    };
    let listing = parser.parse(&first);
    let pages = total_pages(&first, listing.raw_items);

    if pages <= 1 {
        return CategorySurvey {
            pages,
            items_on_last_page: listing.raw_items,
            ..CategorySurvey::empty(category)
        };
    }

    match source.fetch(category, pages).await {
        Ok(body) => CategorySurvey {
            pages,
            items_on_last_page: parser.parse(&body).raw_items,
            ..CategorySurvey::empty(category)
        },
        Err(failure) => {
            warn!("Survey of {} failed on page {}: {}", category, pages, failure);
            CategorySurvey {
                pages,
                ..CategorySurvey::empty(category)
            }
        }
    }
}
