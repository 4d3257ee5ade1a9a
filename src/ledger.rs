//! Processing ledger backed by SQLite.
//!
//! Each artifact identifier moves `Unregistered → Registered → Processed`.
//! Registration and completion are separate writes so a crashed run can be
//! resumed from [`Ledger::next_unprocessed`] without redoing finished work.
//!
//! Policies:
//! - registering an existing identifier fails with [`LedgerError::DuplicateIdentifier`]
//!   (enforced by the `UNIQUE` constraint)
//! - marking an unknown identifier fails with [`LedgerError::NotFound`]
//! - marking an already-processed identifier is a successful no-op

use crate::models::LedgerEntry;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("identifier must not be empty")]
    InvalidIdentifier,
    #[error("identifier {0:?} is already registered")]
    DuplicateIdentifier(String),
    #[error("identifier {0:?} is not registered")]
    NotFound(String),
    #[error("stored timestamp {value:?} for {identifier:?} is invalid")]
    CorruptTimestamp { identifier: String, value: String },
    #[error("failed to create ledger directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger lock poisoned")]
    Poisoned,
    #[error("ledger storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

/// Durable registered/processed record per artifact identifier.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identifier TEXT NOT NULL UNIQUE,
            registered_at TEXT NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_files_pending
        ON files(processed, registered_at);
    ";

    /// Open or create the ledger database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| LedgerError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        info!(path = %path.display(), "Opened processing ledger");
        Self::initialize(conn)
    }

    /// In-memory ledger, mainly for tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        conn.execute_batch(Self::SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::Poisoned)
    }

    /// Register `identifier` now.
    pub fn register(&self, identifier: &str) -> Result<LedgerEntry, LedgerError> {
        self.register_at(identifier, Utc::now())
    }

    /// Register `identifier` with an explicit registration time.
    #[instrument(level = "info", skip_all, fields(%identifier))]
    pub fn register_at(
        &self,
        identifier: &str,
        registered_at: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        if identifier.trim().is_empty() {
            return Err(LedgerError::InvalidIdentifier);
        }
        let stamp = format_timestamp(registered_at);
        let conn = self.lock()?;
        match conn.execute(
            "INSERT INTO files (identifier, registered_at, processed) VALUES (?1, ?2, 0)",
            params![identifier, stamp],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                return Err(LedgerError::DuplicateIdentifier(identifier.to_string()));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(registered_at = %stamp, "Registered artifact");

        Ok(LedgerEntry {
            identifier: identifier.to_string(),
            registered_at: parse_timestamp(identifier, &stamp)?,
            processed: false,
        })
    }

    /// Mark a registered identifier processed.
    #[instrument(level = "info", skip_all, fields(%identifier))]
    pub fn mark_processed(&self, identifier: &str) -> Result<(), LedgerError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE files SET processed = 1 WHERE identifier = ?1",
            params![identifier],
        )?;
        if updated == 0 {
            return Err(LedgerError::NotFound(identifier.to_string()));
        }
        debug!("Marked artifact processed");
        Ok(())
    }

    /// Earliest-registered entry not yet processed.
    pub fn next_unprocessed(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT identifier, registered_at, processed FROM files
                 WHERE processed = 0
                 ORDER BY registered_at, id
                 LIMIT 1",
                [],
                raw_entry,
            )
            .optional()?;
        row.map(RawEntry::into_entry).transpose()
    }

    /// Look up one identifier.
    pub fn get(&self, identifier: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT identifier, registered_at, processed FROM files WHERE identifier = ?1",
                params![identifier],
                raw_entry,
            )
            .optional()?;
        row.map(RawEntry::into_entry).transpose()
    }
}

struct RawEntry {
    identifier: String,
    registered_at: String,
    processed: bool,
}

impl RawEntry {
    fn into_entry(self) -> Result<LedgerEntry, LedgerError> {
        Ok(LedgerEntry {
            registered_at: parse_timestamp(&self.identifier, &self.registered_at)?,
            identifier: self.identifier,
            processed: self.processed,
        })
    }
}

fn raw_entry(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        identifier: row.get(0)?,
        registered_at: row.get(1)?,
        processed: row.get::<_, i64>(2)? != 0,
    })
}

/// Fixed-width UTC form so text order matches time order.
fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(identifier: &str, value: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| LedgerError::CorruptTimestamp {
            identifier: identifier.to_string(),
            value: value.to_string(),
        })
}
