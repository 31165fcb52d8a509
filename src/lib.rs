//! Listing Harvester - resumable catalog crawler
//!
//! Walks the paginated listings of every leaf category of a remote catalog
//! through a rotating set of proxies, turns listing cards into product
//! records and upserts them into SQLite. Progress is checkpointed per page,
//! so an interrupted run resumes where it stopped.

// Module declarations
pub mod crawling;
pub mod domain;
pub mod infrastructure;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use crawling::{CrawlContext, CrawlError, CrawlScheduler, CrawlSummary};
pub use domain::{Category, Price, ProductRecord, ProxyEndpoint};
pub use infrastructure::CrawlerConfig;
