//! Headless-browser page rendering.
//!
//! Every fetch launches its own browser process with a throwaway profile
//! directory and tears it down before returning. [`BrowserSession`] owns the
//! process; if a fetch future is dropped or panics before the explicit close,
//! its `Drop` kills the process in the background.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use futures::StreamExt;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FetchError, PageContent, PageFetcher};
use crate::config::{Config, RenderMode};
use crate::validate::PageUrl;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// True once the DOM is parsed and `a#downloadButton` carries a real `href`
/// or a scrambled link.
const DOWNLOAD_BUTTON_READY: &str = r#"
(() => {
    if (document.readyState === 'loading') return false;
    const button = document.querySelector('a#downloadButton');
    if (!button) return false;
    const href = (button.getAttribute('href') || '').trim();
    const scrambled = (button.getAttribute('data-scrambled-url') || '').trim();
    const placeholder = href === '' || href === '#' || href.toLowerCase().startsWith('javascript:');
    return !placeholder || scrambled !== '';
})()
"#;

// ── Fetcher ──────────────────────────────────────────────────────────────────

pub struct DynamicFetcher {
    timeout: Duration,
    user_agent: String,
    chrome_executable: Option<std::path::PathBuf>,
    live_sessions: Arc<AtomicUsize>,
}

impl DynamicFetcher {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.browser_timeout(),
            user_agent: config.user_agent.clone(),
            chrome_executable: config.chrome_executable.clone(),
            live_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of browser processes that have been launched and not yet reaped.
    pub fn live_sessions(&self) -> usize {
        self.live_sessions.load(Ordering::SeqCst)
    }

    async fn render_url(&self, url: &str) -> Result<PageContent, FetchError> {
        let session = BrowserSession::launch(
            self.chrome_executable.as_deref(),
            self.timeout,
            Arc::clone(&self.live_sessions),
        )
        .await?;

        let result = match tokio::time::timeout(
            self.timeout,
            render(&session, url, &self.user_agent),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(format!(
                "download button not ready after {}s",
                self.timeout.as_secs()
            ))),
        };

        session.close().await;
        result
    }
}

#[async_trait]
impl PageFetcher for DynamicFetcher {
    async fn fetch(&self, url: &PageUrl) -> Result<PageContent, FetchError> {
        self.render_url(url.as_str()).await
    }

    fn mode(&self) -> RenderMode {
        RenderMode::Dynamic
    }
}

async fn render(
    session: &BrowserSession,
    url: &str,
    user_agent: &str,
) -> Result<PageContent, FetchError> {
    let page = session
        .browser()?
        .new_page("about:blank")
        .await
        .map_err(|e| FetchError::Setup(format!("failed to open page: {}", e)))?;

    page.execute(SetUserAgentOverrideParams::new(user_agent.to_string()))
        .await
        .map_err(|e| FetchError::Setup(format!("failed to set user agent: {}", e)))?;

    // Raw navigate returns once the document is committed, without waiting
    // for the load event; readiness is decided by the polling below.
    let navigation = page
        .execute(NavigateParams::new(url))
        .await
        .map_err(|e| FetchError::Network(format!("NavigationError: {}", e)))?;
    if let Some(error_text) = navigation.result.error_text.as_deref() {
        return Err(FetchError::Network(format!("NavigationError: {}", error_text)));
    }
    debug!(page_url = url, "navigated, waiting for download button");

    loop {
        // Evaluation can fail while the new document replaces about:blank.
        let ready = match page.evaluate(DOWNLOAD_BUTTON_READY).await {
            Ok(result) => result.into_value::<bool>().unwrap_or(false),
            Err(e) => {
                debug!("readiness check failed: {}", e);
                false
            }
        };
        if ready {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let html = page
        .content()
        .await
        .map_err(|e| FetchError::Network(format!("ContentError: {}", e)))?;
    Ok(PageContent { html })
}

// ── Scoped browser process ───────────────────────────────────────────────────

struct BrowserSession {
    browser: Option<Browser>,
    handler: JoinHandle<()>,
    profile: Option<TempDir>,
    live: Arc<AtomicUsize>,
    runtime: tokio::runtime::Handle,
}

impl BrowserSession {
    async fn launch(
        executable: Option<&std::path::Path>,
        request_timeout: Duration,
        live: Arc<AtomicUsize>,
    ) -> Result<Self, FetchError> {
        let profile = tempfile::Builder::new()
            .prefix("mediafire-dl-profile-")
            .tempdir()
            .map_err(|e| FetchError::Setup(format!("failed to create browser profile: {}", e)))?;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .user_data_dir(profile.path())
            .request_timeout(request_timeout);
        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder
            .build()
            .map_err(|e| FetchError::Setup(format!("failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Setup(format!("failed to launch browser: {}", e)))?;
        live.fetch_add(1, Ordering::SeqCst);
        info!("browser launched");

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            browser: Some(browser),
            handler,
            profile: Some(profile),
            live,
            runtime: tokio::runtime::Handle::current(),
        })
    }

    fn browser(&self) -> Result<&Browser, FetchError> {
        self.browser
            .as_ref()
            .ok_or_else(|| FetchError::Setup("browser already closed".to_string()))
    }

    /// Close the browser and wait for its process to exit.
    async fn close(mut self) {
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                warn!("graceful browser close failed: {}", e);
                if let Some(Err(e)) = browser.kill().await {
                    warn!("failed to kill browser: {}", e);
                }
            }
            if let Err(e) = browser.wait().await {
                warn!("failed to reap browser process: {}", e);
            }
            self.live.fetch_sub(1, Ordering::SeqCst);
            debug!("browser closed");
        }
        self.handler.abort();
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(mut browser) = self.browser.take() {
            let profile = self.profile.take();
            let live = Arc::clone(&self.live);
            self.runtime.spawn(async move {
                if let Some(Err(e)) = browser.kill().await {
                    warn!("failed to kill abandoned browser: {}", e);
                }
                let _ = browser.wait().await;
                live.fetch_sub(1, Ordering::SeqCst);
                drop(profile);
            });
        }
    }
}
