//! Shared state for one crawl run.
//!
//! Everything the orchestrators need is built once and handed around behind
//! an `Arc`: configuration, the listing source, parser, checkpoint, sink,
//! the pooled HTTP clients and the run's cancellation token.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::{ConfigError, CrawlerConfig};
use crate::infrastructure::http_client_pool::{ClientSettings, HttpClientPool};
use crate::infrastructure::page_fetcher::{ListingSource, PageFetcher};
use crate::infrastructure::parsing::ListingParser;
use crate::infrastructure::product_sink::ProductSink;
use crate::infrastructure::proxy_pool::ProxyPool;
use crate::infrastructure::ProgressCheckpoint;

pub struct CrawlContext {
    pub config: Arc<CrawlerConfig>,
    pub source: Arc<dyn ListingSource>,
    pub parser: Arc<ListingParser>,
    pub checkpoint: Arc<ProgressCheckpoint>,
    pub sink: Arc<dyn ProductSink>,
    /// Pooled clients behind `source`, closed when the run ends
    pub clients: Option<Arc<HttpClientPool>>,
    pub cancel: CancellationToken,
}

impl CrawlContext {
    /// Context over an arbitrary listing source.
    pub fn new(
        config: CrawlerConfig,
        source: Arc<dyn ListingSource>,
        checkpoint: Arc<ProgressCheckpoint>,
        sink: Arc<dyn ProductSink>,
    ) -> Result<Self, ConfigError> {
        let parser = listing_parser(&config)?;
        Ok(Self {
            config: Arc::new(config),
            source,
            parser: Arc::new(parser),
            checkpoint,
            sink,
            clients: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Context fetching over HTTP through `proxies`.
    pub fn over_http(
        config: CrawlerConfig,
        proxies: ProxyPool,
        checkpoint: Arc<ProgressCheckpoint>,
        sink: Arc<dyn ProductSink>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        let clients = Arc::new(HttpClientPool::new(ClientSettings::from_config(&config)));
        let fetcher = PageFetcher::new(
            Arc::new(proxies),
            Arc::clone(&clients),
            config.site.clone(),
            config.retry_policy(),
        )
        .with_rate_limiter(rate_limiter(&config))
        .with_cancellation(cancel.clone());

        let parser = listing_parser(&config)?;
        Ok(Self {
            config: Arc::new(config),
            source: Arc::new(fetcher),
            parser: Arc::new(parser),
            checkpoint,
            sink,
            clients: Some(clients),
            cancel,
        })
    }

    /// Releases pooled HTTP connections, if this context owns any.
    pub async fn shutdown(&self) {
        if let Some(clients) = &self.clients {
            clients.shutdown().await;
        }
    }
}

pub fn listing_parser(config: &CrawlerConfig) -> Result<ListingParser, ConfigError> {
    let base = config.site.base().map_err(|err| ConfigError::Validation {
        message: format!("site.base_url: {err}"),
    })?;
    Ok(ListingParser::new(
        config.selectors.clone(),
        base,
        config.site.product_path_prefix.clone(),
    ))
}

/// Process-wide request budget shared by every fetch of the run.
fn rate_limiter(config: &CrawlerConfig) -> Option<Arc<DefaultDirectRateLimiter>> {
    config
        .max_requests_per_second
        .and_then(NonZeroU32::new)
        .map(|rate| Arc::new(RateLimiter::direct(Quota::per_second(rate))))
}
