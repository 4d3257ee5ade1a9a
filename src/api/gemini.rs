//! Gemini `generateContent` transport.
//!
//! Sends one user turn per call:
//!
//! ```text
//! POST {api_base}/models/{model}:generateContent
//! x-goog-api-key: …
//! {"contents":[{"role":"user","parts":[{"text":"…"}]}],"generationConfig":{…}}
//! ```
//!
//! and reads `candidates[].content.parts[].text` from the reply. Non-2xx
//! responses are returned as [`EnrichError::Upstream`] with the raw body.

use super::{Candidate, ClassifierReply, ClassifierTransport, EnrichError, GenerationParams};
use crate::utils::truncate_for_log;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Connection settings for [`GeminiTransport`].
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: &'a GenerationParams,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Debug, Deserialize)]
struct ResponseCandidate {
    #[serde(default)]
    content: Option<ResponseContent>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

impl From<GenerateContentResponse> for ClassifierReply {
    fn from(response: GenerateContentResponse) -> Self {
        let candidates = response
            .candidates
            .into_iter()
            .map(|c| Candidate {
                parts: c
                    .content
                    .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
                    .unwrap_or_default(),
            })
            .collect();
        ClassifierReply { candidates }
    }
}

/// HTTPS transport for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    client: Client,
    config: GeminiConfig,
}

impl GeminiTransport {
    pub fn new(config: GeminiConfig) -> Result<Self, EnrichError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| EnrichError::Transport(Box::new(e)))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

impl ClassifierTransport for GeminiTransport {
    #[instrument(level = "info", skip_all, fields(model = %self.config.model))]
    async fn send(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ClassifierReply, EnrichError> {
        let t0 = Instant::now();
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: params,
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "Classifier request failed");
                EnrichError::Transport(Box::new(e))
            })?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| EnrichError::Transport(Box::new(e)))?;

        debug!(
            status = status.as_u16(),
            bytes = raw.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Classifier responded"
        );

        if !status.is_success() {
            warn!(status = status.as_u16(), body = %truncate_for_log(&raw, 300), "Classifier returned error status");
            return Err(EnrichError::Upstream {
                status: status.as_u16(),
                body: raw,
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&raw).map_err(|e| EnrichError::MalformedResponse {
                reason: format!("{e}; body: {}", truncate_for_log(&raw, 300)),
            })?;

        Ok(parsed.into())
    }
}
