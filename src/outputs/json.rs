//! Artifact and verdict persistence.
//!
//! Artifacts are pretty-printed JSON named after their identifier; verdicts
//! are stored verbatim next to them with a `gemini_response_` prefix.

use crate::models::{CapturedArtifact, EnrichmentVerdict};
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, instrument};

const VERDICT_PREFIX: &str = "gemini_response_";

/// Path of the artifact file for `identifier`.
pub fn artifact_path(output_dir: &Path, identifier: &str) -> PathBuf {
    output_dir.join(identifier)
}

/// Path of the verdict file for `identifier`.
pub fn verdict_path(output_dir: &Path, identifier: &str) -> PathBuf {
    output_dir.join(format!("{VERDICT_PREFIX}{identifier}"))
}

/// Write a [`CapturedArtifact`] as pretty-printed JSON.
///
/// # Arguments
///
/// * `output_dir` - Directory the artifact is written to (must exist)
/// * `artifact` - The captured article
///
/// # Returns
///
/// The path written, `{output_dir}/{identifier}`.
///
/// # Errors
///
/// Fails if serialization or the file write fails.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display()))]
pub async fn write_artifact(
    output_dir: &Path,
    artifact: &CapturedArtifact,
) -> Result<PathBuf, Box<dyn Error>> {
    let path = artifact_path(output_dir, &artifact.identifier());
    let json = serde_json::to_string_pretty(artifact)?;
    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote artifact");
    Ok(path)
}

/// Read back an artifact written by [`write_artifact`].
///
/// # Arguments
///
/// * `output_dir` - Directory holding the artifact files
/// * `identifier` - Ledger identifier, which is also the file name
///
/// # Errors
///
/// Fails if the file is missing or does not hold a valid artifact; the
/// message names the file.
pub async fn read_artifact(
    output_dir: &Path,
    identifier: &str,
) -> Result<CapturedArtifact, Box<dyn Error>> {
    let path = artifact_path(output_dir, identifier);
    let raw = fs::read_to_string(&path)
        .await
        .map_err(|e| format!("failed to read artifact {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write the classifier verdict next to its artifact.
///
/// # Arguments
///
/// * `output_dir` - Directory holding the artifact files
/// * `identifier` - Ledger identifier of the artifact
/// * `verdict` - Classifier text, written verbatim
///
/// # Returns
///
/// The path written, `{output_dir}/gemini_response_{identifier}`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir.display(), %identifier))]
pub async fn write_verdict(
    output_dir: &Path,
    identifier: &str,
    verdict: &EnrichmentVerdict,
) -> Result<PathBuf, Box<dyn Error>> {
    let path = verdict_path(output_dir, identifier);
    fs::write(&path, verdict.as_str()).await?;
    info!(path = %path.display(), "Wrote verdict");
    Ok(path)
}
