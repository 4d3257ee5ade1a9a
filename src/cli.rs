//! Command-line interface definitions for Recon Bytes.
//!
//! Every option can also be supplied through the environment (a `.env` file in
//! the working directory is loaded first).

use crate::api::gemini::{DEFAULT_API_BASE, DEFAULT_MODEL};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// How article pages are rendered before extraction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum Renderer {
    /// Headless Chromium; runs page scripts.
    Chromium,
    /// Plain HTTP fetch; for servers that return complete HTML.
    Http,
}

/// Capture one article and turn it into a Recon Byte.
///
/// ```sh
/// # Capture a page (prompted on stdin when URL is omitted)
/// recon_bytes https://news.example.com/breach
///
/// # Finish artifacts left unprocessed by an interrupted run
/// recon_bytes --resume
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Article URL to capture
    pub url: Option<String>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: String,

    /// Gemini model name
    #[arg(long, env = "GEMINI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Base URL of the Gemini API
    #[arg(long, env = "GEMINI_API_BASE", default_value = DEFAULT_API_BASE)]
    pub api_base: String,

    /// SQLite processing ledger
    #[arg(long, env = "DB_PATH", default_value = "files.db")]
    pub db_path: PathBuf,

    /// Prompt template with five `%s` slots
    #[arg(long, env = "PROMPT_PATH", default_value = "prompt.txt")]
    pub prompt_path: PathBuf,

    /// Category taxonomy (JSON, or YAML by extension)
    #[arg(long, env = "CATEGORIES_PATH", default_value = "Categories.json")]
    pub categories_path: PathBuf,

    /// Directory for artifact and verdict files
    #[arg(short, long, env = "OUTPUT_DIR", default_value = "recon_bytes")]
    pub output_dir: PathBuf,

    /// Seconds to wait for a page to finish loading
    #[arg(long, default_value_t = 30)]
    pub load_timeout_secs: u64,

    /// Seconds before a classifier request is abandoned
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,

    /// Retries for transient classifier failures (0 disables)
    #[arg(long, default_value_t = 3)]
    pub max_retries: usize,

    /// Page renderer
    #[arg(long, value_enum, default_value_t = Renderer::Chromium)]
    pub renderer: Renderer,

    /// Chromium executable (defaults to the first one found on PATH)
    #[arg(long, env = "CHROMIUM_PATH")]
    pub chromium_path: Option<PathBuf>,

    /// Process unprocessed ledger entries instead of capturing a new URL
    #[arg(long, conflicts_with = "url")]
    pub resume: bool,
}
