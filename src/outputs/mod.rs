//! Files written by a run.
//!
//! ```text
//! output_dir/
//! ├── 1746541800.json                  # captured artifact
//! └── gemini_response_1746541800.json  # classifier verdict (raw text)
//! ```
//!
//! The artifact file name doubles as the ledger identifier, which is how the
//! resume flow finds the artifact for an unprocessed entry.

pub mod json;
