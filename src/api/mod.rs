//! Remote classifier interface.
//!
//! The enrichment client talks to the classifier only through
//! [`ClassifierTransport`], which keeps the wire protocol and any caller-side
//! policy (such as retries) outside the client:
//!
//! - [`ClassifierTransport`]: send one prompt, get back the candidate texts
//! - [`gemini::GeminiTransport`]: HTTPS/JSON implementation for Gemini
//! - [`retry::RetryTransport`]: decorator adding exponential backoff
//!
//! All failures are reported as [`EnrichError`].

pub mod gemini;
pub mod retry;

use serde::Serialize;
use std::error::Error as StdError;
use thiserror::Error;

/// Errors surfaced by the enrichment client and its transports.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// `enrich` was called before a successful `initialize`.
    #[error("classifier session is not initialized; the handshake must succeed before enrichment")]
    NotInitialized,
    #[error("classifier session is already initialized")]
    AlreadyInitialized,
    #[error("classifier did not acknowledge the instructions; reply: {reply}")]
    HandshakeRejected { reply: String },
    #[error("transport failure: {0}")]
    Transport(#[source] Box<dyn StdError + Send + Sync>),
    #[error("classifier responded with HTTP {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("malformed classifier response: {reason}")]
    MalformedResponse { reason: String },
    #[error("classifier returned no candidate text")]
    EmptyResult,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("classifier call cancelled")]
    Cancelled,
}

impl EnrichError {
    /// Whether a caller-side retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EnrichError::Transport(_) => true,
            EnrichError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Sampling knobs sent with every request.
///
/// Serialized as the Gemini `generationConfig` object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub max_output_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_k: 40,
            top_p: 0.8,
            max_output_tokens: 2048,
        }
    }
}

/// One candidate answer: its content parts in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub parts: Vec<String>,
}

/// Parsed classifier reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifierReply {
    pub candidates: Vec<Candidate>,
}

impl ClassifierReply {
    /// Reply with a single one-part candidate.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            candidates: vec![Candidate {
                parts: vec![text.into()],
            }],
        }
    }

    /// Text of the first part of the first candidate.
    pub fn first_text(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|c| c.parts.first())
            .map(String::as_str)
    }
}

/// Text-in/text-out access to the remote classifier.
pub trait ClassifierTransport {
    /// Send one prompt with the given sampling parameters.
    async fn send(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ClassifierReply, EnrichError>;
}
