//! Page retrieval from the file host.
//!
//! Two interchangeable fetchers sit behind [`PageFetcher`]: a plain HTTP GET
//! ([`StaticFetcher`]) and, with the `browser` feature, a headless browser that
//! lets page scripts run before the markup is captured. Which one serves
//! requests is decided once at startup from [`RenderMode`].

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::{Config, RenderMode};
use crate::validate::PageUrl;

#[cfg(feature = "browser")]
pub mod browser;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The host answered, but with a non-2xx status.
    #[error("Request failed with status code {status}")]
    Upstream { status: u16 },
    /// No response was received at all.
    #[error("{0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    /// Local failure before anything went over the wire.
    #[error("{0}")]
    Setup(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FetchError::Setup(format!("RequestBuilderError: {}", e))
        } else if let Some(status) = e.status() {
            FetchError::Upstream { status: status.as_u16() }
        } else if e.is_timeout() {
            FetchError::Timeout(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            FetchError::Network(format!("ConnectError: {}", e))
        } else {
            FetchError::Network(format!("RequestError: {}", e))
        }
    }
}

// ── Fetcher capability ───────────────────────────────────────────────────────

/// Markup of a file page, either as served or after script execution.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub html: String,
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &PageUrl) -> Result<PageContent, FetchError>;

    fn mode(&self) -> RenderMode;
}

/// Select the fetcher for the configured render mode.
pub fn build_fetcher(
    config: &Config,
    client: reqwest::Client,
) -> anyhow::Result<Arc<dyn PageFetcher>> {
    match config.render_mode {
        RenderMode::Static => Ok(Arc::new(StaticFetcher::new(client))),
        #[cfg(feature = "browser")]
        RenderMode::Dynamic => Ok(Arc::new(browser::DynamicFetcher::new(config))),
        #[cfg(not(feature = "browser"))]
        RenderMode::Dynamic => anyhow::bail!(
            "render mode 'dynamic' requires a build with the `browser` feature"
        ),
    }
}

// ── HTTP clients ─────────────────────────────────────────────────────────────

/// Client for page GETs: browser-like identification and a hard overall timeout.
pub fn page_client(config: &Config) -> Result<reqwest::Client, FetchError> {
    client_builder(config)
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| FetchError::Setup(e.to_string()))
}

/// Client for proxying file bodies. No overall timeout, since files can be large.
pub fn stream_client(config: &Config) -> Result<reqwest::Client, FetchError> {
    client_builder(config)
        .build()
        .map_err(|e| FetchError::Setup(e.to_string()))
}

fn client_builder(config: &Config) -> reqwest::ClientBuilder {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static(
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        ),
    );
    headers.insert(
        reqwest::header::ACCEPT_LANGUAGE,
        reqwest::header::HeaderValue::from_static("en-US,en;q=0.9"),
    );

    let mut builder = reqwest::ClientBuilder::new()
        .connect_timeout(config.connect_timeout())
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(config.user_agent.clone())
        .default_headers(headers);

    if config.insecure_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }

    builder
}

/// Open a GET against `url`, failing on anything but a 2xx status.
pub async fn get_checked(
    client: &reqwest::Client,
    url: &str,
) -> Result<reqwest::Response, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Upstream {
            status: status.as_u16(),
        });
    }
    Ok(response)
}

// ── Static strategy ──────────────────────────────────────────────────────────

/// Single non-rendering GET. No retries.
pub struct StaticFetcher {
    client: reqwest::Client,
}

impl StaticFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch_url(&self, url: &str) -> Result<PageContent, FetchError> {
        let response = get_checked(&self.client, url).await?;
        let html = response.text().await?;
        debug!(page_url = url, bytes = html.len(), "fetched page");
        Ok(PageContent { html })
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &PageUrl) -> Result<PageContent, FetchError> {
        self.fetch_url(url.as_str()).await
    }

    fn mode(&self) -> RenderMode {
        RenderMode::Static
    }
}
