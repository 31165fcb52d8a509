//! Infrastructure layer for egress, HTTP, parsing, persistence and logging
//!
//! Everything that talks to the outside world lives here: proxy rotation,
//! pooled HTTP clients and the retrying page fetcher, the listing parser,
//! the SQLite connection with the product sink and category/proxy registry,
//! the JSON checkpoint file, configuration loading and logging setup.

pub mod checkpoint;
pub mod config;
pub mod database_connection;
pub mod http_client_pool;
pub mod logging;
pub mod page_fetcher;
pub mod parsing;
pub mod product_sink;
pub mod proxy_pool;
pub mod registry;

// Re-export commonly used items
pub use checkpoint::{CheckpointError, ProgressCheckpoint};
pub use self::config::{ConfigError, CrawlerConfig};
pub use database_connection::DatabaseConnection;
pub use http_client_pool::{ClientPoolError, ClientSettings, HttpClientPool};
pub use logging::init_logging_with_config;
pub use page_fetcher::{FetchFailure, ListingSource, PageFetcher, RetryPolicy};
pub use parsing::{ListingPage, ListingParser, ListingSelectors};
pub use product_sink::{ProductSink, SinkError, SqliteProductSink};
pub use proxy_pool::ProxyPool;
pub use registry::{
    CategorySource, ProxySource, RegistryError, SqliteRegistry, StaticCategorySource,
};
