//! Test utilities for listing-harvester
//!
//! Scripted listing pages, an in-memory sink and a fresh in-memory database,
//! shared by unit tests and the integration tests under `tests/`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::domain::{Category, ProductRecord};
use crate::infrastructure::page_fetcher::{FetchFailure, ListingSource};
use crate::infrastructure::product_sink::{ProductSink, SinkError};
use crate::infrastructure::DatabaseConnection;

/// Test database configuration
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    /// Fresh, migrated in-memory database.
    pub async fn new() -> Result<Self> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(Self { connection: db })
    }

    pub fn pool(&self) -> sqlx::Pool<sqlx::Sqlite> {
        self.connection.pool().clone()
    }
}

/// Listing source answering from a script.
///
/// Each `(category, page)` holds a queue of responses; the last one repeats.
/// Unscripted pages answer with an empty listing. Every call is logged.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<HashMap<(i64, u32), VecDeque<Result<String, FetchFailure>>>>,
    log: Mutex<Vec<(i64, u32)>>,
}

impl ScriptedSource {
    pub fn page(self, category_id: i64, page: u32, html: impl Into<String>) -> Self {
        self.push(category_id, page, Ok(html.into()))
    }

    pub fn failure(self, category_id: i64, page: u32, failure: FetchFailure) -> Self {
        self.push(category_id, page, Err(failure))
    }

    fn push(self, category_id: i64, page: u32, response: Result<String, FetchFailure>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.entry((category_id, page)).or_default().push_back(response);
        }
        self
    }

    /// Pages fetched for a category, in call order.
    pub fn fetched(&self, category_id: i64) -> Vec<u32> {
        let mut pages: Vec<u32> = self
            .log
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|(id, _)| *id == category_id)
                    .map(|(_, page)| *page)
                    .collect()
            })
            .unwrap_or_default();
        pages.sort_unstable();
        pages
    }

    pub fn calls(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or_default()
    }
}

#[async_trait]
impl ListingSource for ScriptedSource {
    async fn fetch(&self, category: &Category, page: u32) -> Result<String, FetchFailure> {
        if let Ok(mut log) = self.log.lock() {
            log.push((category.id, page));
        }
        let Ok(mut script) = self.script.lock() else {
            return Err(FetchFailure::non_retryable("script poisoned"));
        };
        match script.get_mut(&(category.id, page)) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or_else(|| Ok(String::new())),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(String::new())),
            None => Ok(String::new()),
        }
    }
}

/// Sink keeping every upserted record in memory.
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<ProductRecord>>,
    failing: bool,
}

impl RecordingSink {
    /// A sink whose every write fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn records(&self) -> Vec<ProductRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ProductSink for RecordingSink {
    async fn upsert(&self, records: &[ProductRecord]) -> Result<usize, SinkError> {
        if self.failing {
            return Err(SinkError::Database(sqlx::Error::PoolClosed));
        }
        if let Ok(mut stored) = self.records.lock() {
            stored.extend_from_slice(records);
        }
        Ok(records.len())
    }
}

/// Listing page markup with one card per `(id, name, price)` and, when
/// `last_page` is set, pagination links up to it.
pub fn listing_html(items: &[(&str, &str, &str)], last_page: Option<u32>) -> String {
    let mut html = String::from("<html><body><ul class=\"listing-cards\">\n");
    for (id, name, price) in items {
        html.push_str(&format!(
            "<li class=\"listing-cards__item\" data-product-id=\"{id}\">\
             <meta itemprop=\"name\" content=\"{name}\">\
             <a class=\"listing-cards__link\" href=\"/product/item-{id}/\">{name}</a>\
             <div class=\"listing-cards__price\">{price} ₽</div></li>\n"
        ));
    }
    html.push_str("</ul>\n");
    if let Some(last) = last_page {
        html.push_str("<div class=\"pagination\">");
        for page in 1..=last {
            html.push_str(&format!("<a href=\"/catalog/x/page__{page}/\">{page}</a>"));
        }
        html.push_str("</div>");
    }
    html.push_str("</body></html>");
    html
}
