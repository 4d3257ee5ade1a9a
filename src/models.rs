//! Data models shared by the capture, enrichment and ledger stages.
//!
//! - [`CapturedArtifact`]: structured record extracted from one rendered article
//! - [`Taxonomy`]: the category schema handed to the classifier
//! - [`EnrichmentVerdict`]: the classifier's free-text answer for one artifact
//! - [`LedgerEntry`]: processing state of one artifact identifier

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// One captured article.
///
/// Built once by [`crate::scrapers::extract`] and never mutated afterwards.
/// The orchestrator derives the ledger identifier from `timestamp` via
/// [`CapturedArtifact::identifier`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedArtifact {
    /// When the page was captured.
    pub timestamp: DateTime<Utc>,
    /// The URL the page was loaded from.
    pub url: String,
    /// Author name from the page's structured data, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Paragraph texts in document order, joined with `\n`.
    pub content: String,
}

impl CapturedArtifact {
    /// Stable identifier for this capture: `"{unix-seconds}.json"`.
    pub fn identifier(&self) -> String {
        format!("{}.json", self.timestamp.timestamp())
    }

    /// Author for display in prompts; empty when unknown.
    pub fn author_or_empty(&self) -> &str {
        self.author.as_deref().unwrap_or("")
    }
}

/// Errors raised while loading or validating a [`Taxonomy`].
#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("failed to read taxonomy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse taxonomy JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to parse taxonomy YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("category #{index} has an empty name")]
    EmptyCategoryName { index: usize },
}

/// A single top-level category with its ordered subcategories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub subcategories: Vec<String>,
}

/// Classification schema shared by the handshake and every enrichment call.
///
/// Category names are placed verbatim into prompts, so they must be non-empty;
/// every constructor in this module runs [`Taxonomy::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Taxonomy {
    pub categories: Vec<Category>,
}

impl Taxonomy {
    /// Parse a taxonomy from a JSON document shaped like
    /// `{"categories":[{"name":"…","subcategories":["…"]}]}`.
    pub fn from_json_str(s: &str) -> Result<Self, TaxonomyError> {
        let taxonomy: Taxonomy = serde_json::from_str(s)?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    /// Parse a taxonomy from the equivalent YAML document.
    pub fn from_yaml_str(s: &str) -> Result<Self, TaxonomyError> {
        let taxonomy: Taxonomy = serde_yaml::from_str(s)?;
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    /// Load a taxonomy file. `.yaml`/`.yml` files are read as YAML, anything
    /// else as JSON.
    pub async fn load(path: &Path) -> Result<Self, TaxonomyError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| TaxonomyError::Read {
                path: path.display().to_string(),
                source,
            })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&raw),
            _ => Self::from_json_str(&raw),
        }
    }

    /// Check that every category name is non-blank.
    pub fn validate(&self) -> Result<(), TaxonomyError> {
        match self
            .categories
            .iter()
            .position(|c| c.name.trim().is_empty())
        {
            Some(index) => Err(TaxonomyError::EmptyCategoryName { index }),
            None => Ok(()),
        }
    }
}

/// Free-text answer from the remote classifier.
///
/// Only constructed by the enrichment client, which refuses blank replies,
/// so a verdict is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentVerdict(String);

impl EnrichmentVerdict {
    /// Wrap non-blank text. Returns `None` for blank input.
    pub fn new(text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            None
        } else {
            Some(Self(text))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Processing state of one artifact identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identifier: String,
    pub registered_at: DateTime<Utc>,
    pub processed: bool,
}
