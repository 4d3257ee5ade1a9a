//! Enrichment client: handshake, then per-article classification.
//!
//! A client starts [`SessionState::Uninitialized`]. [`EnrichmentClient::initialize`]
//! sends the instructions and taxonomy once and moves it to
//! [`SessionState::Ready`] only if the classifier acknowledges them. Every
//! [`EnrichmentClient::enrich`] call checks that state first, so an
//! unacknowledged classifier never sees article content.
//!
//! The client never retries; wrap the transport in
//! [`crate::api::retry::RetryTransport`] for that.

pub mod prompt;

use crate::api::{ClassifierTransport, EnrichError, GenerationParams};
use crate::models::{CapturedArtifact, EnrichmentVerdict, Taxonomy};
use crate::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use prompt::{ACK_TOKEN, PromptTemplate, handshake_message};
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Handshake state of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready { acknowledged_at: DateTime<Utc> },
}

/// Classifier client bound to one prompt template.
#[derive(Debug)]
pub struct EnrichmentClient<T> {
    transport: T,
    template: PromptTemplate,
    params: GenerationParams,
    state: SessionState,
}

impl<T> EnrichmentClient<T>
where
    T: ClassifierTransport,
{
    pub fn new(transport: T, template: PromptTemplate, params: GenerationParams) -> Self {
        Self {
            transport,
            template,
            params,
            state: SessionState::Uninitialized,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, SessionState::Ready { .. })
    }

    /// Run the handshake. Must succeed exactly once before [`Self::enrich`].
    ///
    /// On failure the client stays uninitialized and the handshake may be
    /// attempted again.
    #[instrument(level = "info", skip_all, fields(categories = taxonomy.categories.len()))]
    pub async fn initialize(
        &mut self,
        instructions: &str,
        taxonomy: &Taxonomy,
        cancel: &CancellationToken,
    ) -> Result<(), EnrichError> {
        if self.is_ready() {
            return Err(EnrichError::AlreadyInitialized);
        }
        taxonomy
            .validate()
            .map_err(|e| EnrichError::InvalidInput(e.to_string()))?;

        let message = handshake_message(instructions, taxonomy);
        let reply = cancellable(cancel, self.transport.send(&message, &self.params)).await?;

        let text = reply
            .first_text()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| EnrichError::MalformedResponse {
                reason: "handshake reply has no candidate content".to_string(),
            })?;

        if !text.to_lowercase().contains(ACK_TOKEN) {
            warn!(reply = %truncate_for_log(text, 300), "Classifier did not acknowledge instructions");
            return Err(EnrichError::HandshakeRejected {
                reply: text.to_string(),
            });
        }

        self.state = SessionState::Ready {
            acknowledged_at: Utc::now(),
        };
        info!("Classifier acknowledged instructions");
        Ok(())
    }

    /// Classify one artifact. Requires a completed handshake.
    #[instrument(level = "info", skip_all, fields(url = %artifact.url))]
    pub async fn enrich(
        &self,
        artifact: &CapturedArtifact,
        taxonomy: &Taxonomy,
        cancel: &CancellationToken,
    ) -> Result<EnrichmentVerdict, EnrichError> {
        if !self.is_ready() {
            return Err(EnrichError::NotInitialized);
        }
        if artifact.content.trim().is_empty() {
            return Err(EnrichError::InvalidInput(format!(
                "artifact from {} has empty content",
                artifact.url
            )));
        }
        taxonomy
            .validate()
            .map_err(|e| EnrichError::InvalidInput(e.to_string()))?;

        let prompt = self.template.render_article(artifact, taxonomy);
        let reply = cancellable(cancel, self.transport.send(&prompt, &self.params)).await?;

        let verdict = reply
            .first_text()
            .and_then(EnrichmentVerdict::new)
            .ok_or(EnrichError::EmptyResult)?;

        info!(
            prompt_bytes = prompt.len(),
            verdict_bytes = verdict.as_str().len(),
            "Artifact enriched"
        );
        Ok(verdict)
    }
}

async fn cancellable<F, R>(cancel: &CancellationToken, call: F) -> Result<R, EnrichError>
where
    F: Future<Output = Result<R, EnrichError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EnrichError::Cancelled),
        result = call => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::gemini::{GeminiConfig, GeminiTransport};
    use crate::api::{Candidate, ClassifierReply};
    use crate::models::Category;
    use chrono::TimeZone;
    use serde_json::json;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Transport that replays scripted replies and records prompts.
    #[derive(Debug, Default)]
    struct Scripted {
        replies: RefCell<VecDeque<Result<ClassifierReply, EnrichError>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn replying(texts: &[&str]) -> Self {
            let s = Self::default();
            for t in texts {
                s.replies
                    .borrow_mut()
                    .push_back(Ok(ClassifierReply::from_text(*t)));
            }
            s
        }

        fn push(&self, reply: Result<ClassifierReply, EnrichError>) {
            self.replies.borrow_mut().push_back(reply);
        }
    }

    impl ClassifierTransport for Scripted {
        async fn send(
            &self,
            prompt: &str,
            _params: &GenerationParams,
        ) -> Result<ClassifierReply, EnrichError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(ClassifierReply::from_text("unscripted")))
        }
    }

    /// Transport whose calls never complete.
    #[derive(Debug)]
    struct Stalled;

    impl ClassifierTransport for Stalled {
        async fn send(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<ClassifierReply, EnrichError> {
            std::future::pending().await
        }
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy {
            categories: vec![Category {
                name: "Cyber".to_string(),
                subcategories: vec!["Phishing".to_string(), "Ransomware".to_string()],
            }],
        }
    }

    fn artifact(content: &str) -> CapturedArtifact {
        CapturedArtifact {
            timestamp: Utc.with_ymd_and_hms(2025, 5, 6, 14, 30, 0).unwrap(),
            url: "https://news.example.com/breach".to_string(),
            author: Some("Jane Roe".to_string()),
            content: content.to_string(),
        }
    }

    fn client<T: ClassifierTransport>(transport: T) -> EnrichmentClient<T> {
        EnrichmentClient::new(
            transport,
            PromptTemplate::new("URL: %s\nAuthor: %s\nTime: %s\n\n%s\n\n%s"),
            GenerationParams::default(),
        )
    }

    #[tokio::test]
    async fn test_enrich_before_initialize_fails_without_calling_transport() {
        let c = client(Scripted::replying(&["would have been accepted"]));

        let err = c
            .enrich(&artifact("Body"), &taxonomy(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichError::NotInitialized));
        assert!(c.transport.prompts.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_initialize_then_enrich() {
        let mut c = client(Scripted::replying(&[
            "I ACKNOWLEDGE these instructions.",
            "Category: Cyber / Ransomware",
        ]));
        let cancel = CancellationToken::new();

        c.initialize("Write a Recon Byte.", &taxonomy(), &cancel)
            .await
            .unwrap();
        assert!(c.is_ready());

        let verdict = c
            .enrich(&artifact("Hospital systems encrypted."), &taxonomy(), &cancel)
            .await
            .unwrap();
        assert_eq!(verdict.as_str(), "Category: Cyber / Ransomware");

        let prompts = c.transport.prompts.borrow();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Write a Recon Byte."));
        assert!(prompts[0].contains("Cyber:\n  - Phishing"));
        assert!(prompts[1].contains("URL: https://news.example.com/breach"));
        assert!(prompts[1].contains("Author: Jane Roe"));
        assert!(prompts[1].contains("Time: 2025-05-06T14:30:00Z"));
        assert!(prompts[1].contains("Hospital systems encrypted."));
        assert!(prompts[1].contains("Cyber:\n  - Phishing\n  - Ransomware"));
    }

    #[tokio::test]
    async fn test_acknowledgment_is_case_insensitive() {
        for reply in ["acknowledged", "Acknowledge.", "ACKNOWLEDGE"] {
            let mut c = client(Scripted::replying(&[reply]));
            c.initialize("i", &taxonomy(), &CancellationToken::new())
                .await
                .unwrap_or_else(|e| panic!("{reply:?} rejected: {e}"));
        }
    }

    #[tokio::test]
    async fn test_missing_acknowledgment_is_rejected() {
        for reply in ["Understood.", "I agree", "ack"] {
            let mut c = client(Scripted::replying(&[reply]));
            let err = c
                .initialize("i", &taxonomy(), &CancellationToken::new())
                .await
                .unwrap_err();
            match err {
                EnrichError::HandshakeRejected { reply: r } => assert_eq!(r, reply),
                other => panic!("expected rejection, got {other:?}"),
            }
            assert_eq!(c.state(), &SessionState::Uninitialized);
        }
    }

    #[tokio::test]
    async fn test_failed_handshake_can_be_retried() {
        let mut c = client(Scripted::replying(&["no", "acknowledge"]));
        let cancel = CancellationToken::new();

        assert!(c.initialize("i", &taxonomy(), &cancel).await.is_err());
        c.initialize("i", &taxonomy(), &cancel).await.unwrap();
        assert!(c.is_ready());

        let err = c.initialize("i", &taxonomy(), &cancel).await.unwrap_err();
        assert!(matches!(err, EnrichError::AlreadyInitialized));
    }

    #[tokio::test]
    async fn test_handshake_without_content_is_malformed() {
        let transport = Scripted::default();
        transport.push(Ok(ClassifierReply::default()));
        transport.push(Ok(ClassifierReply {
            candidates: vec![Candidate::default()],
        }));
        let mut c = client(transport);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            let err = c.initialize("i", &taxonomy(), &cancel).await.unwrap_err();
            assert!(matches!(err, EnrichError::MalformedResponse { .. }));
        }
    }

    #[tokio::test]
    async fn test_enrich_rejects_empty_body() {
        let mut c = client(Scripted::replying(&["acknowledge"]));
        let cancel = CancellationToken::new();
        c.initialize("i", &taxonomy(), &cancel).await.unwrap();

        let err = c
            .enrich(&artifact("  \n "), &taxonomy(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichError::InvalidInput(_)));
        assert_eq!(c.transport.prompts.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_enrich_never_returns_empty_success() {
        let transport = Scripted::replying(&["acknowledge"]);
        transport.push(Ok(ClassifierReply::default()));
        transport.push(Ok(ClassifierReply {
            candidates: vec![Candidate::default()],
        }));
        transport.push(Ok(ClassifierReply::from_text("   ")));
        let mut c = client(transport);
        let cancel = CancellationToken::new();
        c.initialize("i", &taxonomy(), &cancel).await.unwrap();

        for _ in 0..3 {
            let err = c
                .enrich(&artifact("Body"), &taxonomy(), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, EnrichError::EmptyResult));
        }
    }

    #[tokio::test]
    async fn test_initialize_rejects_blank_category_names() {
        let mut c = client(Scripted::replying(&["acknowledge"]));
        let bad = Taxonomy {
            categories: vec![Category {
                name: String::new(),
                subcategories: vec![],
            }],
        };

        let err = c
            .initialize("i", &bad, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichError::InvalidInput(_)));
        assert!(c.transport.prompts.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_pending_call() {
        let mut c = client(Stalled);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = c.initialize("i", &taxonomy(), &cancel).await.unwrap_err();

        assert!(matches!(err, EnrichError::Cancelled));
        assert!(!c.is_ready());
    }

    #[tokio::test]
    async fn test_upstream_500_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("Please acknowledge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "I acknowledge the instructions."}]}}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("news.example.com"))
            .respond_with(ResponseTemplate::new(500).set_body_string("{\"error\":\"internal\"}"))
            .mount(&server)
            .await;

        let mut config = GeminiConfig::new("test-key");
        config.api_base = server.uri();
        let mut c = client(GeminiTransport::new(config).unwrap());
        let cancel = CancellationToken::new();

        c.initialize("Write a Recon Byte.", &taxonomy(), &cancel)
            .await
            .unwrap();
        let err = c
            .enrich(&artifact("Body"), &taxonomy(), &cancel)
            .await
            .unwrap_err();

        match err {
            EnrichError::Upstream { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "{\"error\":\"internal\"}");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }
}
