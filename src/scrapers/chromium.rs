//! Headless Chromium session backed by `chromiumoxide`.
//!
//! Pages are opened on `about:blank` and only navigated inside
//! [`PageHandle::wait_load`], so the caller's deadline bounds the whole load.

use super::{PageError, PageHandle, RenderingSession};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Executables probed on `PATH` when no explicit Chromium path is configured.
const CHROMIUM_CANDIDATES: &[&str] = &["chromium", "chromium-browser", "google-chrome"];

/// A running headless browser.
pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl ChromiumSession {
    /// Launch headless Chromium.
    ///
    /// `executable` overrides the binary; otherwise the first of
    /// [`CHROMIUM_CANDIDATES`] found on `PATH` is used, falling back to
    /// chromiumoxide's own detection.
    #[instrument(level = "info", skip_all)]
    pub async fn launch(executable: Option<PathBuf>) -> Result<Self, PageError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions");

        if let Some(path) = executable.or_else(find_chromium) {
            debug!(path = %path.display(), "Using Chromium executable");
            builder = builder.chrome_executable(path);
        }

        let config = builder
            .build()
            .map_err(|e| PageError::new(format!("failed to configure chromium: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| PageError::new(format!("failed to launch chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "Chromium handler event error");
                }
            }
        });

        info!("Chromium launched");
        Ok(Self { browser, handler })
    }

    /// Close the browser and stop its event handler.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Failed to close Chromium cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Failed waiting for Chromium to exit");
        }
        self.handler.abort();
    }
}

impl RenderingSession for ChromiumSession {
    type Page = ChromiumPage;

    async fn new_page(&self, url: &str) -> Result<ChromiumPage, PageError> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| PageError::new(format!("failed to create page: {e}")))?;

        Ok(ChromiumPage {
            page,
            url: url.to_string(),
        })
    }
}

/// One Chromium tab.
pub struct ChromiumPage {
    page: Page,
    url: String,
}

impl PageHandle for ChromiumPage {
    async fn wait_load(&mut self) -> Result<(), PageError> {
        self.page
            .goto(self.url.as_str())
            .await
            .map_err(|e| PageError::new(format!("navigation failed: {e}")))?;
        self.page
            .wait_for_navigation()
            .await
            .map_err(|e| PageError::new(format!("waiting for load failed: {e}")))?;
        Ok(())
    }

    async fn html(&self) -> Result<String, PageError> {
        self.page
            .evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| PageError::new(format!("failed to read outerHTML: {e}")))?
            .into_value::<String>()
            .map_err(|e| PageError::new(format!("outerHTML was not a string: {e}")))
    }

    async fn paragraph_texts(&self) -> Result<Vec<Result<String, PageError>>, PageError> {
        let elements = self
            .page
            .find_elements("p")
            .await
            .map_err(|e| PageError::new(format!("failed to find paragraph elements: {e}")))?;

        let mut texts = Vec::with_capacity(elements.len());
        for element in elements {
            let text = match element.inner_text().await {
                Ok(Some(text)) => Ok(text),
                Ok(None) => Err(PageError::new("paragraph has no text")),
                Err(e) => Err(PageError::new(e.to_string())),
            };
            texts.push(text);
        }
        Ok(texts)
    }

    async fn close(self) -> Result<(), PageError> {
        self.page
            .close()
            .await
            .map_err(|e| PageError::new(format!("failed to close page: {e}")))
    }
}

fn find_chromium() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .flat_map(|dir| CHROMIUM_CANDIDATES.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}
