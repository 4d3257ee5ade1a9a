//! # Recon Bytes
//!
//! Captures a single news article from a rendered web page, classifies it
//! against a category taxonomy with Gemini, and records each artifact's
//! progress in a SQLite ledger so interrupted runs can be resumed.
//!
//! ## Usage
//!
//! ```sh
//! recon_bytes https://news.example.com/breach
//! recon_bytes --resume
//! ```
//!
//! ## Pipeline
//!
//! 1. **Capture**: render the page and collect paragraph text and author
//! 2. **Persist**: write `{output_dir}/{unix}.json` and register it in the ledger
//! 3. **Enrich**: handshake once, then send the filled prompt to the classifier
//! 4. **Record**: write `gemini_response_{unix}.json` and mark the entry processed

use clap::Parser;
use std::error::Error;
use std::io::Write as _;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod enrichment;
mod ledger;
mod models;
mod outputs;
mod scrapers;
mod utils;

use api::gemini::{GeminiConfig, GeminiTransport};
use api::retry::RetryTransport;
use api::{ClassifierTransport, GenerationParams};
use cli::{Cli, Renderer};
use enrichment::EnrichmentClient;
use enrichment::prompt::PromptTemplate;
use ledger::{Ledger, LedgerError};
use models::{CapturedArtifact, Taxonomy};
use outputs::json;
use scrapers::RenderingSession;
use scrapers::chromium::ChromiumSession;
use scrapers::http::HttpSession;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("recon_bytes starting up");

    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }
    let args = Cli::parse();
    debug!(
        output_dir = %args.output_dir.display(),
        db_path = %args.db_path.display(),
        renderer = ?args.renderer,
        resume = args.resume,
        "Parsed CLI arguments"
    );

    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // Ctrl-C cancels every suspended wait below.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling");
                cancel.cancel();
            }
        });
    }

    // ---- Load taxonomy, template & ledger ----
    let taxonomy = Taxonomy::load(&args.categories_path).await?;
    taxonomy.validate()?;
    info!(
        path = %args.categories_path.display(),
        categories = taxonomy.categories.len(),
        "Loaded taxonomy"
    );

    let template = PromptTemplate::load(&args.prompt_path)
        .await
        .map_err(|e| format!("failed to read prompt {}: {e}", args.prompt_path.display()))?;
    info!(path = %args.prompt_path.display(), slots = template.slot_count(), "Loaded prompt template");

    let ledger = Ledger::open(&args.db_path)?;

    // ---- Classifier session ----
    let mut config = GeminiConfig::new(args.gemini_api_key.clone());
    config.model = args.model.clone();
    config.api_base = args.api_base.clone();
    config.request_timeout = Duration::from_secs(args.request_timeout_secs);
    info!(model = %config.model, "Configured classifier");

    let transport = RetryTransport::new(
        GeminiTransport::new(config)?,
        args.max_retries,
        Duration::from_secs(1),
    );
    let instructions = template.as_str().to_string();
    let mut client = EnrichmentClient::new(transport, template, GenerationParams::default());
    client.initialize(&instructions, &taxonomy, &cancel).await?;

    if args.resume {
        resume(&client, &ledger, &taxonomy, &args.output_dir, &cancel).await?;
    } else {
        let url = match args.url.clone() {
            Some(url) => url,
            None => prompt_for_url().await?,
        };
        let artifact = capture(&args, &url, &cancel).await?;
        process_new(&client, &ledger, &taxonomy, &args.output_dir, &artifact, &cancel).await?;
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );
    Ok(())
}

async fn prompt_for_url() -> Result<String, Box<dyn Error>> {
    print!("Enter the URL of the news article: ");
    std::io::stdout().flush()?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let url = line.trim().to_string();
    if url.is_empty() {
        return Err("no URL given".into());
    }
    Ok(url)
}

/// Render `url` with the configured renderer.
async fn capture(
    args: &Cli,
    url: &str,
    cancel: &CancellationToken,
) -> Result<CapturedArtifact, Box<dyn Error>> {
    let load_timeout = Duration::from_secs(args.load_timeout_secs);
    match args.renderer {
        Renderer::Chromium => {
            let session = ChromiumSession::launch(args.chromium_path.clone()).await?;
            let outcome = capture_with(&session, url, load_timeout, cancel).await;
            session.shutdown().await;
            outcome
        }
        Renderer::Http => {
            let client = reqwest::Client::builder()
                .user_agent(concat!("recon_bytes/", env!("CARGO_PKG_VERSION")))
                .build()?;
            capture_with(&HttpSession::new(client), url, load_timeout, cancel).await
        }
    }
}

async fn capture_with<S: RenderingSession>(
    session: &S,
    url: &str,
    load_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CapturedArtifact, Box<dyn Error>> {
    Ok(scrapers::extract(session, url, load_timeout, cancel).await?)
}

/// Persist, register, enrich and mark one freshly captured artifact.
///
/// An artifact without body text is rejected before anything is written, so
/// the ledger only ever holds entries the classifier will accept.
#[instrument(level = "info", skip_all, fields(identifier = %artifact.identifier()))]
async fn process_new<T: ClassifierTransport>(
    client: &EnrichmentClient<T>,
    ledger: &Ledger,
    taxonomy: &Taxonomy,
    output_dir: &Path,
    artifact: &CapturedArtifact,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn Error>> {
    if artifact.content.trim().is_empty() {
        error!(url = %artifact.url, "Page had no paragraph text; nothing to classify");
        return Err(format!("no article text captured from {}", artifact.url).into());
    }

    let identifier = artifact.identifier();
    json::write_artifact(output_dir, artifact).await?;

    match ledger.register(&identifier) {
        Ok(_) => {}
        // Two captures within one second share an identifier; the file was
        // overwritten, so the existing entry still describes it.
        Err(LedgerError::DuplicateIdentifier(_)) => {
            warn!("Identifier already registered; reusing existing entry");
        }
        Err(e) => return Err(e.into()),
    }

    let verdict = client.enrich(artifact, taxonomy, cancel).await?;
    json::write_verdict(output_dir, &identifier, &verdict).await?;
    ledger.mark_processed(&identifier)?;
    info!("Recon Byte complete");
    Ok(())
}

/// Drain the ledger, oldest first, stopping at the first failure.
#[instrument(level = "info", skip_all)]
async fn resume<T: ClassifierTransport>(
    client: &EnrichmentClient<T>,
    ledger: &Ledger,
    taxonomy: &Taxonomy,
    output_dir: &Path,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let mut processed = 0usize;
    while let Some(entry) = ledger.next_unprocessed()? {
        let identifier = entry.identifier;
        info!(%identifier, registered_at = %entry.registered_at, "Resuming artifact");

        let artifact = json::read_artifact(output_dir, &identifier).await?;
        let verdict = client.enrich(&artifact, taxonomy, cancel).await?;
        json::write_verdict(output_dir, &identifier, &verdict).await?;
        ledger.mark_processed(&identifier)?;
        processed += 1;
    }
    info!(processed, "Ledger drained");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ClassifierReply, EnrichError};
    use chrono::{TimeZone, Utc};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct Scripted {
        replies: RefCell<VecDeque<Result<ClassifierReply, EnrichError>>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<ClassifierReply, EnrichError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
            }
        }
    }

    impl ClassifierTransport for Scripted {
        async fn send(
            &self,
            _prompt: &str,
            _params: &GenerationParams,
        ) -> Result<ClassifierReply, EnrichError> {
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or(Err(EnrichError::EmptyResult))
        }
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::from_json_str(r#"{"categories":[{"name":"Cyber","subcategories":["Phishing"]}]}"#)
            .unwrap()
    }

    fn artifact(secs: i64) -> CapturedArtifact {
        CapturedArtifact {
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            url: format!("https://news.example.com/{secs}"),
            author: None,
            content: "Body".to_string(),
        }
    }

    async fn ready_client(
        replies: Vec<Result<ClassifierReply, EnrichError>>,
    ) -> EnrichmentClient<Scripted> {
        let mut all = vec![Ok(ClassifierReply::from_text("I acknowledge."))];
        all.extend(replies);
        let mut client = EnrichmentClient::new(
            Scripted::new(all),
            PromptTemplate::new("%s %s %s %s %s"),
            GenerationParams::default(),
        );
        client
            .initialize("Instr", &taxonomy(), &CancellationToken::new())
            .await
            .unwrap();
        client
    }

    #[tokio::test]
    async fn test_process_new_registers_then_marks() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        let client = ready_client(vec![Ok(ClassifierReply::from_text("Cyber"))]).await;

        process_new(
            &client,
            &ledger,
            &taxonomy(),
            dir.path(),
            &artifact(100),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(ledger.get("100.json").unwrap().unwrap().processed);
        assert!(dir.path().join("100.json").exists());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("gemini_response_100.json")).unwrap(),
            "Cyber"
        );
    }

    #[tokio::test]
    async fn test_failed_enrichment_leaves_entry_pending() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        let client = ready_client(vec![Err(EnrichError::Upstream {
            status: 500,
            body: "down".to_string(),
        })])
        .await;

        let result = process_new(
            &client,
            &ledger,
            &taxonomy(),
            dir.path(),
            &artifact(200),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        let pending = ledger.next_unprocessed().unwrap().unwrap();
        assert_eq!(pending.identifier, "200.json");
        assert!(!dir.path().join("gemini_response_200.json").exists());
    }

    #[tokio::test]
    async fn test_empty_capture_is_not_registered_and_resume_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        let client = ready_client(vec![Ok(ClassifierReply::from_text("Cyber"))]).await;

        let mut empty = artifact(10);
        empty.content = String::new();
        let result = process_new(
            &client,
            &ledger,
            &taxonomy(),
            dir.path(),
            &empty,
            &CancellationToken::new(),
        )
        .await;

        assert!(result.unwrap_err().to_string().contains("no article text"));
        assert_eq!(ledger.get("10.json").unwrap(), None);
        assert!(!dir.path().join("10.json").exists());

        let later = artifact(20);
        json::write_artifact(dir.path(), &later).await.unwrap();
        ledger.register_at("20.json", later.timestamp).unwrap();

        resume(
            &client,
            &ledger,
            &taxonomy(),
            dir.path(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(ledger.get("20.json").unwrap().unwrap().processed);
        assert_eq!(ledger.next_unprocessed().unwrap(), None);
    }

    #[tokio::test]
    async fn test_resume_drains_oldest_first_and_stops_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        for secs in [1, 2, 3] {
            let a = artifact(secs);
            json::write_artifact(dir.path(), &a).await.unwrap();
            ledger
                .register_at(&a.identifier(), a.timestamp)
                .unwrap();
        }
        let client = ready_client(vec![
            Ok(ClassifierReply::from_text("first")),
            Err(EnrichError::EmptyResult),
        ])
        .await;

        let result = resume(
            &client,
            &ledger,
            &taxonomy(),
            dir.path(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert!(ledger.get("1.json").unwrap().unwrap().processed);
        assert_eq!(
            ledger.next_unprocessed().unwrap().unwrap().identifier,
            "2.json"
        );
        assert!(!ledger.get("3.json").unwrap().unwrap().processed);
    }
}
