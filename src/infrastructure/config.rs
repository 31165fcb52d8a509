//! Configuration infrastructure
//!
//! Contains configuration loading and validation for the catalog crawl.
//!
//! Sources are layered, later ones winning:
//! 1. Built-in defaults (see [`defaults`])
//! 2. An optional TOML file (`config/harvester.toml` or an explicit path)
//! 3. Environment variables prefixed `HARVESTER_`, `__` separating nested keys
//!    (e.g. `HARVESTER_STORAGE__DATABASE_URL`)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::infrastructure::page_fetcher::RetryPolicy;
use crate::infrastructure::parsing::ListingSelectors;

/// Default values, mirroring what the production crawl was tuned to.
pub mod defaults {
    pub const CONFIG_FILE: &str = "config/harvester";
    pub const ENV_PREFIX: &str = "HARVESTER";

    pub const BASE_URL: &str = "https://truboproduct.ru";
    pub const LISTING_PATH_TEMPLATE: &str = "/catalog/{slug}/page__{page}/";
    pub const PRODUCT_PATH_PREFIX: &str = "product/";

    pub const MAX_CATEGORY_CONCURRENCY: usize = 60;
    pub const MAX_PAGE_CONCURRENCY_PER_CATEGORY: usize = 10;
    pub const REQUEST_TIMEOUT_SECONDS: f64 = 25.0;
    pub const RETRY_BASE_DELAY_SECONDS: f64 = 0.25;
    pub const RETRY_MAX_DELAY_SECONDS: f64 = 8.0;
    pub const RETRY_MAX_ATTEMPTS: u32 = 4;

    pub const MAX_CONNECTIONS: usize = 200;
    pub const MAX_KEEPALIVE_PER_HOST: usize = 100;
    pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
    pub const ACCEPT_LANGUAGE: &str = "ru-RU,ru;q=0.9,en-US;q=0.8,en;q=0.7";

    pub const DATABASE_URL: &str = "sqlite://data/catalog.db";
    pub const CHECKPOINT_PATH: &str = "data/parse_progress.json";
    pub const DB_MAX_CONNECTIONS: u32 = 10;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_DIR: &str = "logs";
    pub const LOG_FILE_PREFIX: &str = "listing-harvester.log";
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid listing URL for {slug} page {page}: {source}")]
    ListingUrl {
        slug: String,
        page: u32,
        source: url::ParseError,
    },
}

/// Complete crawler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Categories processed at the same time
    #[serde(alias = "maxCategoryConcurrency", alias = "maxcategoryconcurrency")]
    pub max_category_concurrency: usize,

    /// Listing pages in flight within one category
    #[serde(alias = "maxPageConcurrencyPerCategory", alias = "maxpageconcurrencypercategory")]
    pub max_page_concurrency_per_category: usize,

    #[serde(alias = "requestTimeoutSeconds", alias = "requesttimeoutseconds")]
    pub request_timeout_seconds: f64,

    /// First backoff delay; doubles per retry up to `retry_max_delay_seconds`
    #[serde(alias = "retryBaseDelaySeconds", alias = "retrybasedelayseconds")]
    pub retry_base_delay_seconds: f64,

    #[serde(alias = "retryMaxDelaySeconds", alias = "retrymaxdelayseconds")]
    pub retry_max_delay_seconds: f64,

    /// Total attempts per page, first try included
    #[serde(alias = "retryMaxAttempts", alias = "retrymaxattempts")]
    pub retry_max_attempts: u32,

    /// Process-wide request budget; unset means unthrottled
    #[serde(alias = "maxRequestsPerSecond", alias = "maxrequestspersecond")]
    pub max_requests_per_second: Option<u32>,

    pub site: SiteConfig,
    pub http: HttpConfig,
    pub storage: StorageConfig,
    pub selectors: ListingSelectors,
    pub logging: LoggingConfig,
}

/// Where listings live on the remote site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub base_url: String,
    /// Path with `{slug}` and `{page}` placeholders
    pub listing_path_template: String,
    /// Stripped from product link paths to obtain the slug
    pub product_path_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Requests in flight across every pooled client
    pub max_connections: usize,
    /// Idle keep-alive connections kept per host and client
    pub max_keepalive_per_host: usize,
    pub user_agent: String,
    pub accept_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub checkpoint_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable daily rolling file output
    pub file_output: bool,

    pub log_dir: PathBuf,
    pub file_prefix: String,

    /// Module-specific log level filters (e.g., "sqlx": "warn", "reqwest": "info")
    pub module_filters: HashMap<String, String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_category_concurrency: defaults::MAX_CATEGORY_CONCURRENCY,
            max_page_concurrency_per_category: defaults::MAX_PAGE_CONCURRENCY_PER_CATEGORY,
            request_timeout_seconds: defaults::REQUEST_TIMEOUT_SECONDS,
            retry_base_delay_seconds: defaults::RETRY_BASE_DELAY_SECONDS,
            retry_max_delay_seconds: defaults::RETRY_MAX_DELAY_SECONDS,
            retry_max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            max_requests_per_second: None,
            site: SiteConfig::default(),
            http: HttpConfig::default(),
            storage: StorageConfig::default(),
            selectors: ListingSelectors::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::BASE_URL.to_string(),
            listing_path_template: defaults::LISTING_PATH_TEMPLATE.to_string(),
            product_path_prefix: defaults::PRODUCT_PATH_PREFIX.to_string(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::MAX_CONNECTIONS,
            max_keepalive_per_host: defaults::MAX_KEEPALIVE_PER_HOST,
            user_agent: defaults::USER_AGENT.to_string(),
            accept_language: defaults::ACCEPT_LANGUAGE.to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: defaults::DATABASE_URL.to_string(),
            db_max_connections: defaults::DB_MAX_CONNECTIONS,
            checkpoint_path: PathBuf::from(defaults::CHECKPOINT_PATH),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_filters = HashMap::new();
        module_filters.insert("sqlx".to_string(), "warn".to_string());
        module_filters.insert("hyper".to_string(), "warn".to_string());
        module_filters.insert("reqwest".to_string(), "info".to_string());

        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: PathBuf::from(defaults::LOG_DIR),
            file_prefix: defaults::LOG_FILE_PREFIX.to_string(),
            module_filters,
        }
    }
}

impl CrawlerConfig {
    /// Load the optional file, then `HARVESTER_*` variables. Options set by
    /// neither keep their `Default` values.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(defaults::CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(defaults::ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: &str| {
            Err(ConfigError::Validation {
                message: message.to_string(),
            })
        };

        if self.max_category_concurrency == 0 {
            return fail("max_category_concurrency must be greater than 0");
        }
        if self.max_page_concurrency_per_category == 0 {
            return fail("max_page_concurrency_per_category must be greater than 0");
        }
        if self.retry_max_attempts == 0 {
            return fail("retry_max_attempts must be at least 1");
        }
        if !(self.request_timeout_seconds.is_finite() && self.request_timeout_seconds > 0.0) {
            return fail("request_timeout_seconds must be a positive number");
        }
        if !(self.retry_base_delay_seconds.is_finite() && self.retry_base_delay_seconds >= 0.0) {
            return fail("retry_base_delay_seconds must not be negative");
        }
        if !self.retry_max_delay_seconds.is_finite()
            || self.retry_max_delay_seconds < self.retry_base_delay_seconds
        {
            return fail("retry_max_delay_seconds must not be below retry_base_delay_seconds");
        }
        if self.max_requests_per_second == Some(0) {
            return fail("max_requests_per_second must be greater than 0 when set");
        }
        if self.http.max_connections == 0 {
            return fail("http.max_connections must be greater than 0");
        }
        if Url::parse(&self.site.base_url).is_err() {
            return fail("site.base_url must be an absolute URL");
        }
        if !self.site.listing_path_template.contains("{slug}")
            || !self.site.listing_path_template.contains("{page}")
        {
            return fail("site.listing_path_template needs {slug} and {page} placeholders");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: seconds(self.retry_base_delay_seconds),
            max_delay: seconds(self.retry_max_delay_seconds),
        }
    }
}

impl SiteConfig {
    pub fn base(&self) -> Result<Url, url::ParseError> {
        Url::parse(&self.base_url)
    }

    /// Absolute URL of one listing page of a category.
    pub fn listing_url(&self, slug: &str, page: u32) -> Result<Url, ConfigError> {
        let path = self
            .listing_path_template
            .replace("{slug}", slug.trim().trim_matches('/'))
            .replace("{page}", &page.to_string());
        self.base()
            .and_then(|base| base.join(&path))
            .map_err(|source| ConfigError::ListingUrl {
                slug: slug.to_string(),
                page,
                source,
            })
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}
