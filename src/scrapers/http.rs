//! Plain HTTP session for server-rendered articles.
//!
//! The "rendered" markup is the response body as served; paragraphs are
//! selected with `scraper`. No scripts run, so client-rendered pages come back
//! with whatever the server put in the initial HTML.

use super::{PageError, PageHandle, RenderingSession};
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

/// Session that loads pages with a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: Client,
}

impl HttpSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl RenderingSession for HttpSession {
    type Page = HttpPage;

    async fn new_page(&self, url: &str) -> Result<HttpPage, PageError> {
        Ok(HttpPage {
            client: self.client.clone(),
            url: url.to_string(),
            body: None,
        })
    }
}

/// A page whose body is fetched by [`PageHandle::wait_load`].
#[derive(Debug)]
pub struct HttpPage {
    client: Client,
    url: String,
    body: Option<String>,
}

impl HttpPage {
    fn body(&self) -> Result<&str, PageError> {
        self.body
            .as_deref()
            .ok_or_else(|| PageError::new("page has not been loaded"))
    }
}

impl PageHandle for HttpPage {
    #[instrument(level = "info", skip_all, fields(url = %self.url))]
    async fn wait_load(&mut self) -> Result<(), PageError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| PageError::new(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PageError::new(format!("server responded with {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PageError::new(format!("failed to read body: {e}")))?;
        debug!(bytes = body.len(), "Fetched page body");
        self.body = Some(body);
        Ok(())
    }

    async fn html(&self) -> Result<String, PageError> {
        self.body().map(str::to_string)
    }

    async fn paragraph_texts(&self) -> Result<Vec<Result<String, PageError>>, PageError> {
        let body = self.body()?;
        let selector = Selector::parse("p")
            .map_err(|e| PageError::new(format!("invalid paragraph selector: {e}")))?;
        let document = Html::parse_document(body);

        Ok(document
            .select(&selector)
            .map(|element| Ok(element.text().collect::<String>()))
            .collect())
    }

    async fn close(self) -> Result<(), PageError> {
        Ok(())
    }
}
