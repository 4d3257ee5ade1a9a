//! Article capture from a rendered page.
//!
//! A capture visits one URL through a [`RenderingSession`], waits for the page
//! to finish loading, and turns the rendered DOM into a [`CapturedArtifact`]:
//!
//! 1. **Load**: open a page and wait for readiness, bounded by a deadline and
//!    the caller's cancellation token
//! 2. **Read**: pull the rendered markup and the text of every `<p>` element
//! 3. **Assemble**: join paragraph texts in document order and match the
//!    schema.org `Person` annotation for the author
//!
//! # Sessions
//!
//! | Session | Module | Notes |
//! |---------|--------|-------|
//! | Headless Chromium | [`chromium`] | Runs page scripts before reading the DOM |
//! | Plain HTTP | [`http`] | Fetches server-rendered HTML, no script execution |
//!
//! Paragraphs whose text cannot be read are skipped; partial content is
//! preferred over no content.

pub mod chromium;
pub mod http;

use crate::models::CapturedArtifact;
use chrono::Utc;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Structured-data pattern for the article author.
static AUTHOR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""@type":"Person","name":"(.*?)""#).expect("valid author regex"));

/// Failure reported by a rendering backend.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PageError {
    message: String,
}

impl PageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced by [`extract`].
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid article URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("page {url} did not finish loading before the deadline or cancellation")]
    LoadTimeout { url: String },
    #[error("failed to render {url}: {source}")]
    Render {
        url: String,
        #[source]
        source: PageError,
    },
}

/// A live browser (or browser stand-in) that can open pages.
pub trait RenderingSession {
    type Page: PageHandle;

    /// Open a page that will load `url`. Loading starts no later than
    /// [`PageHandle::wait_load`].
    async fn new_page(&self, url: &str) -> Result<Self::Page, PageError>;
}

/// One open page. Must be released with [`PageHandle::close`].
pub trait PageHandle {
    /// Drive the page until it reports load completion.
    async fn wait_load(&mut self) -> Result<(), PageError>;

    /// Fully rendered markup of the document.
    async fn html(&self) -> Result<String, PageError>;

    /// Text of every paragraph element in document order. Each element can
    /// fail on its own without failing the query.
    async fn paragraph_texts(&self) -> Result<Vec<Result<String, PageError>>, PageError>;

    /// Release the page.
    async fn close(self) -> Result<(), PageError>;
}

/// Capture one article.
///
/// The page opened here is closed on every exit path, including load timeouts
/// and cancellation.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn extract<S: RenderingSession>(
    session: &S,
    url: &str,
    load_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CapturedArtifact, ExtractError> {
    validate_url(url)?;

    let mut page = session.new_page(url).await.map_err(|source| ExtractError::Render {
        url: url.to_string(),
        source,
    })?;

    let outcome = read_page(&mut page, url, load_timeout, cancel).await;

    if let Err(e) = page.close().await {
        warn!(%url, error = %e, "Failed to close page");
    }

    outcome
}

async fn read_page<P: PageHandle>(
    page: &mut P,
    url: &str,
    load_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CapturedArtifact, ExtractError> {
    let render_err = |source: PageError| ExtractError::Render {
        url: url.to_string(),
        source,
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            warn!(%url, "Page load cancelled");
            return Err(ExtractError::LoadTimeout { url: url.to_string() });
        }
        loaded = tokio::time::timeout(load_timeout, page.wait_load()) => match loaded {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(render_err(e)),
            Err(_) => {
                warn!(%url, timeout_ms = load_timeout.as_millis() as u64, "Page load timed out");
                return Err(ExtractError::LoadTimeout { url: url.to_string() });
            }
        }
    }

    let html = page.html().await.map_err(render_err)?;
    let paragraphs = page.paragraph_texts().await.map_err(render_err)?;
    let total = paragraphs.len();

    let content = paragraphs
        .into_iter()
        .enumerate()
        .filter_map(|(index, text)| match text {
            Ok(text) => Some(text),
            Err(e) => {
                debug!(index, error = %e, "Skipping unreadable paragraph");
                None
            }
        })
        .join("\n");

    let author = extract_author(&html);

    info!(
        paragraphs = total,
        bytes = content.len(),
        has_author = author.is_some(),
        "Captured article"
    );

    Ok(CapturedArtifact {
        timestamp: Utc::now(),
        url: url.to_string(),
        author,
        content,
    })
}

fn validate_url(url: &str) -> Result<(), ExtractError> {
    let invalid = |reason: String| ExtractError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    if url.trim().is_empty() {
        return Err(invalid("empty URL".to_string()));
    }
    Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    Ok(())
}

/// First `"@type":"Person","name":"…"` match in `html`, trimmed.
///
/// Returns `None` when there is no match or the captured name is blank.
pub fn extract_author(html: &str) -> Option<String> {
    AUTHOR_PATTERN
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}
