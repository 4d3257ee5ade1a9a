//! Prompt construction for the classifier.
//!
//! The template carries `%s` slots filled in order with URL, author,
//! timestamp, body and the rendered taxonomy. `%%` produces a literal `%`.

use crate::models::{CapturedArtifact, Taxonomy};
use chrono::SecondsFormat;
use std::fmt::Write;
use std::path::Path;
use tracing::warn;

/// Number of positional slots a well-formed template provides.
pub const TEMPLATE_SLOTS: usize = 5;

/// Substring the classifier's handshake reply must contain (case-insensitive).
pub const ACK_TOKEN: &str = "acknowledge";

/// Human-readable listing of the taxonomy.
///
/// ```text
/// Available Categories:
///
/// Cyber:
///   - Phishing
///   - Ransomware
/// ```
pub fn render_taxonomy(taxonomy: &Taxonomy) -> String {
    let mut out = String::from("Available Categories:\n");
    for category in &taxonomy.categories {
        let _ = write!(out, "\n{}:\n", category.name);
        for sub in &category.subcategories {
            let _ = writeln!(out, "  - {sub}");
        }
    }
    out
}

/// The one-time instruction message sent before any article.
pub fn handshake_message(instructions: &str, taxonomy: &Taxonomy) -> String {
    format!(
        "Instructions for generating Recon Bytes:\n\n{}\n\n{}\n\nPlease {} if you understand these instructions.",
        instructions,
        render_taxonomy(taxonomy),
        ACK_TOKEN
    )
}

/// A caller-supplied prompt template with positional `%s` slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    text: String,
}

impl PromptTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Read a template file.
    pub async fn load(path: &Path) -> std::io::Result<Self> {
        tokio::fs::read_to_string(path).await.map(Self::new)
    }

    /// Raw template text, also used as the handshake instructions.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Number of `%s` slots in the template.
    pub fn slot_count(&self) -> usize {
        let mut count = 0;
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.peek() {
                    Some('s') => {
                        count += 1;
                        chars.next();
                    }
                    Some('%') => {
                        chars.next();
                    }
                    _ => {}
                }
            }
        }
        count
    }

    /// Substitute `values` into the slots in order.
    ///
    /// Slots beyond the supplied values are left as `%s`; values beyond the
    /// available slots are dropped.
    pub fn render(&self, values: &[&str]) -> String {
        let mut out = String::with_capacity(self.text.len() + values.iter().map(|v| v.len()).sum::<usize>());
        let mut values = values.iter();
        let mut chars = self.text.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek() {
                Some('s') => {
                    chars.next();
                    match values.next() {
                        Some(value) => out.push_str(value),
                        None => out.push_str("%s"),
                    }
                }
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                _ => out.push('%'),
            }
        }
        out
    }

    /// Fill the template for one artifact.
    pub fn render_article(&self, artifact: &CapturedArtifact, taxonomy: &Taxonomy) -> String {
        let slots = self.slot_count();
        if slots < TEMPLATE_SLOTS {
            warn!(slots, expected = TEMPLATE_SLOTS, "Prompt template has fewer slots than article fields");
        }
        let timestamp = artifact.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true);
        let rendered_taxonomy = render_taxonomy(taxonomy);
        self.render(&[
            artifact.url.as_str(),
            artifact.author_or_empty(),
            timestamp.as_str(),
            artifact.content.as_str(),
            rendered_taxonomy.as_str(),
        ])
    }
}
