//! Rendering and fetching.
//!
//! The pipeline consumes rendering as an opaque capability behind the
//! [`Renderer`] trait: given a URL it returns final HTML plus the raw
//! reference strings found in that rendering, or a failure signal. The
//! bundled [`HttpRenderer`] fetches over plain HTTP and extracts
//! references with a CSS-selector walk; a headless-browser renderer
//! can implement the same trait.

use async_trait::async_trait;
use futures_util::StreamExt;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::timeout;

use crate::assets;
use crate::config::Config;

/// HTTP client tuned for polite single-site capture.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    timeout_duration: Duration,
    max_content_size: usize,
}

impl FetchClient {
    pub fn new(user_agent: &str, timeout_secs: u64) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(Config::CONNECT_TIMEOUT_SECS))
            .pool_max_idle_per_host(Config::POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(Config::POOL_IDLE_TIMEOUT_SECS))
            // HTTP/1.1 is more broadly compatible than HTTP/2 for small sites
            .http1_only()
            .tcp_nodelay(true)
            .redirect(reqwest::redirect::Policy::limited(Config::MAX_REDIRECTS))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self {
            client,
            timeout_duration: Duration::from_secs(timeout_secs),
            max_content_size: Config::MAX_CONTENT_SIZE,
        })
    }

    /// Fetch a URL and return the body as text. Non-2xx statuses are
    /// errors; the pipeline records them against the target and moves
    /// on, there is no automatic retry.
    pub async fn fetch_text(&self, url: &str) -> Result<FetchedText, FetchError> {
        let response = timeout(self.timeout_duration, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(Self::classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let content = timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(|e| FetchError::Body(e.to_string()))?;

        if content.len() > self.max_content_size {
            return Err(FetchError::ContentTooLarge(content.len(), self.max_content_size));
        }

        Ok(FetchedText { content, content_type })
    }

    /// Fetch a URL and return raw bytes, enforcing the size cap while
    /// streaming so oversized downloads abort early.
    pub async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = timeout(self.timeout_duration, self.client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(Self::classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length as usize > self.max_content_size {
                return Err(FetchError::ContentTooLarge(length as usize, self.max_content_size));
            }
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = timeout(self.timeout_duration, stream.next())
            .await
            .map_err(|_| FetchError::Timeout)?
        {
            let chunk = chunk.map_err(|e| FetchError::Body(e.to_string()))?;
            if bytes.len() + chunk.len() > self.max_content_size {
                return Err(FetchError::ContentTooLarge(
                    bytes.len() + chunk.len(),
                    self.max_content_size,
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }

    fn classify_error(error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            return FetchError::Timeout;
        }
        if error.is_connect() {
            return FetchError::Connect(error.to_string());
        }
        FetchError::Network(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FetchedText {
    pub content: String,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Failed to read response body: {0}")]
    Body(String),

    #[error("Content too large: {0} bytes (max: {1} bytes)")]
    ContentTooLarge(usize, usize),

    #[error("Not an HTML document: {0}")]
    NotHtml(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

impl FetchError {
    /// Transient failures that a later run may not hit; permanent ones
    /// reflect the remote's definitive answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) | FetchError::Network(_) => true,
            FetchError::HttpStatus(status) => *status >= 500,
            _ => false,
        }
    }
}

pub fn is_html_content_type(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    lower.starts_with("text/html") || lower.starts_with("application/xhtml+xml")
}

/// Output of one render call: the final HTML plus every raw reference
/// string found in it, split into page links and asset references.
#[derive(Debug, Clone)]
pub struct Rendering {
    pub html: String,
    pub links: Vec<String>,
    pub asset_refs: Vec<String>,
}

/// External rendering capability. One call per target, bounded by the
/// caller-supplied timeout; failures mark the target failed and the
/// capture continues.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str, render_timeout: Duration) -> Result<Rendering, FetchError>;
}

/// Renderer that fetches server-produced HTML without executing
/// scripts.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    fetch: FetchClient,
}

impl HttpRenderer {
    pub fn new(fetch: FetchClient) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(&self, url: &str, render_timeout: Duration) -> Result<Rendering, FetchError> {
        let fetched = timeout(render_timeout, self.fetch.fetch_text(url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        if let Some(ct) = fetched.content_type.as_deref() {
            if !is_html_content_type(ct) {
                return Err(FetchError::NotHtml(ct.to_string()));
            }
        }

        let links = extract_links(&fetched.content);
        let asset_refs = assets::extract_asset_refs(&fetched.content);

        Ok(Rendering { html: fetched.content, links, asset_refs })
    }
}

/// Extract all hyperlink URLs from HTML content, skipping pseudo
/// schemes that never lead to pages.
pub fn extract_links(html_body: &str) -> Vec<String> {
    let document = Html::parse_document(html_body);
    let selector = Selector::parse("a[href]").expect("Invalid CSS selector");

    let mut links = Vec::new();
    for element in document.select(&selector) {
        if let Some(href) = element.value().attr("href") {
            let cleaned = href.trim();
            if !cleaned.is_empty()
                && !cleaned.starts_with("javascript:")
                && !cleaned.starts_with("mailto:")
                && !cleaned.starts_with("tel:")
                && !cleaned.starts_with("data:")
                && !cleaned.starts_with("file:")
            {
                links.push(cleaned.to_string());
            }
        }
    }

    links
}
