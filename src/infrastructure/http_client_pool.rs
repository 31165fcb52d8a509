//! Connection-pooled HTTP clients, one per egress path
//!
//! A `reqwest::Client` owns its connection pool, so keeping exactly one per
//! proxy (plus one for direct egress) reuses TLS sessions and keep-alive
//! sockets across every page fetched through that path. Clients are built on
//! first use.
//!
//! The total number of requests in flight across all clients is bounded by a
//! semaphore; a caller holds its permit until the response body is read.

use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderValue, USER_AGENT};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::domain::Egress;
use crate::infrastructure::config::CrawlerConfig;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

#[derive(Error, Debug)]
pub enum ClientPoolError {
    #[error("HTTP client pool is shut down")]
    Closed,

    #[error("Invalid header value for {header}")]
    Header { header: &'static str },

    #[error("Invalid proxy address {egress}: {source}")]
    ProxyAddress {
        egress: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid proxy {egress}: {source}")]
    Proxy {
        egress: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build HTTP client for {egress}: {source}")]
    Build {
        egress: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Settings shared by every client the pool builds.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub timeout: Duration,
    pub max_connections: usize,
    pub max_idle_per_host: usize,
    pub user_agent: String,
    pub accept_language: String,
}

impl ClientSettings {
    pub fn from_config(config: &CrawlerConfig) -> Self {
        Self {
            timeout: config.request_timeout(),
            max_connections: config.http.max_connections,
            max_idle_per_host: config.http.max_keepalive_per_host,
            user_agent: config.http.user_agent.clone(),
            accept_language: config.http.accept_language.clone(),
        }
    }

    fn default_headers(&self) -> Result<HeaderMap, ClientPoolError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| ClientPoolError::Header { header: "user-agent" })?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.accept_language)
                .map_err(|_| ClientPoolError::Header { header: "accept-language" })?,
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(headers)
    }
}

/// A client checked out of the pool together with its connection permit.
pub struct PooledClient {
    pub client: Client,
    _permit: OwnedSemaphorePermit,
}

pub struct HttpClientPool {
    settings: ClientSettings,
    clients: Mutex<HashMap<Egress, Client>>,
    connections: Arc<Semaphore>,
    closed: AtomicBool,
}

impl HttpClientPool {
    pub fn new(settings: ClientSettings) -> Self {
        let permits = settings.max_connections.max(1);
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
            connections: Arc::new(Semaphore::new(permits)),
            closed: AtomicBool::new(false),
        }
    }

    /// Client bound to `egress`, built on first use.
    pub async fn client(&self, egress: &Egress) -> Result<Client, ClientPoolError> {
        if self.is_closed() {
            return Err(ClientPoolError::Closed);
        }

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(egress) {
            return Ok(client.clone());
        }

        let client = self.build_client(egress)?;
        debug!("Created HTTP client for {} ({} pooled)", egress, clients.len() + 1);
        clients.insert(egress.clone(), client.clone());
        Ok(client)
    }

    /// Waits for a connection slot, then hands out the client for `egress`.
    pub async fn acquire(&self, egress: &Egress) -> Result<PooledClient, ClientPoolError> {
        let permit = Arc::clone(&self.connections)
            .acquire_owned()
            .await
            .map_err(|_| ClientPoolError::Closed)?;
        let client = self.client(egress).await?;
        Ok(PooledClient {
            client,
            _permit: permit,
        })
    }

    /// Number of clients built so far.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drops every pooled client, releasing their sockets, and refuses
    /// further checkouts. Requests already holding a client finish normally.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            warn!("HTTP client pool shutdown requested twice");
            return;
        }
        self.connections.close();
        let mut clients = self.clients.lock().await;
        let count = clients.len();
        clients.clear();
        info!("HTTP client pool shut down, {} clients closed", count);
    }

    fn build_client(&self, egress: &Egress) -> Result<Client, ClientPoolError> {
        let builder = Client::builder()
            .default_headers(self.settings.default_headers()?)
            .timeout(self.settings.timeout)
            .connect_timeout(self.settings.timeout)
            .pool_max_idle_per_host(self.settings.max_idle_per_host)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10));

        let builder = match egress {
            Egress::Direct => builder.no_proxy(),
            Egress::Proxy(endpoint) => {
                let url = endpoint
                    .proxy_url()
                    .map_err(|source| ClientPoolError::ProxyAddress {
                        egress: egress.to_string(),
                        source,
                    })?;
                let proxy = reqwest::Proxy::all(url).map_err(|source| {
                    ClientPoolError::Proxy {
                        egress: egress.to_string(),
                        source,
                    }
                })?;
                builder.proxy(proxy)
            }
        };

        builder.build().map_err(|source| ClientPoolError::Build {
            egress: egress.to_string(),
            source,
        })
    }
}
