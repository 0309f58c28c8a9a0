// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Audit trail: append-only SQLite log of uploads, watermark operations and
// link issuance/redemption.
//
// Schema:
//   audit_log(
//     id          INTEGER PRIMARY KEY AUTOINCREMENT,
//     timestamp   TEXT    NOT NULL,   -- RFC 3339
//     action      TEXT    NOT NULL,   -- see AuditAction
//     document_id INTEGER,            -- absent for protocol failures
//     fingerprint TEXT,               -- SHA-256 hex of the version involved
//     success     INTEGER NOT NULL,   -- 0 = failure, 1 = success
//     details     TEXT                -- method, recipient, error code
//   )
//
// Entries never contain watermark secrets, identity keys or token bytes.

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tatou_core::types::DocumentId;
use tracing::{debug, instrument};

fn db_err(e: rusqlite::Error) -> TatouError {
    TatouError::Database(e.to_string())
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp   TEXT    NOT NULL,
    action      TEXT    NOT NULL,
    document_id INTEGER,
    fingerprint TEXT,
    success     INTEGER NOT NULL,
    details     TEXT
);
CREATE INDEX IF NOT EXISTS audit_log_fingerprint ON audit_log(fingerprint);";

/// Kind of operation being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Upload,
    Embed,
    Extract,
    IssueLink,
    Redeem,
    Delete,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Embed => "embed",
            Self::Extract => "extract",
            Self::IssueLink => "issue_link",
            Self::Redeem => "redeem",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single entry in the audit log, used for queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub document_id: Option<DocumentId>,
    pub fingerprint: Option<String>,
    pub success: bool,
    pub details: Option<String>,
}

/// A pending audit record.
#[derive(Debug, Clone, Copy)]
pub struct AuditRecord<'a> {
    pub action: AuditAction,
    pub document_id: Option<DocumentId>,
    pub fingerprint: Option<&'a str>,
    pub success: bool,
    pub details: Option<&'a str>,
}

impl<'a> AuditRecord<'a> {
    pub fn success(action: AuditAction) -> Self {
        Self {
            action,
            document_id: None,
            fingerprint: None,
            success: true,
            details: None,
        }
    }

    pub fn failure(action: AuditAction) -> Self {
        Self {
            success: false,
            ..Self::success(action)
        }
    }

    pub fn document(mut self, id: DocumentId) -> Self {
        self.document_id = Some(id);
        self
    }

    pub fn fingerprint(mut self, fingerprint: &'a str) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn details(mut self, details: &'a str) -> Self {
        self.details = Some(details);
        self
    }
}

/// Append-only audit log backed by a SQLite database.
///
/// The connection sits behind a mutex so one log can be shared between the
/// watermark engine, the protocol engine and the link validator.
pub struct AuditLog {
    conn: Mutex<Connection>,
}

impl AuditLog {
    /// Open (or create) the audit database at `path` in WAL mode.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory audit database (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("in-memory audit log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| TatouError::poisoned("audit log"))
    }

    /// Append one entry.
    #[instrument(skip_all, fields(action = %record.action, success = record.success))]
    pub fn record(&self, record: AuditRecord<'_>) -> Result<()> {
        let timestamp = Utc::now().to_rfc3339();
        let document_id = record.document_id.map(|id| id.0 as i64);
        self.conn()?
            .execute(
                "INSERT INTO audit_log (timestamp, action, document_id, fingerprint, success, details)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    timestamp,
                    record.action.as_str(),
                    document_id,
                    record.fingerprint,
                    record.success as i32,
                    record.details
                ],
            )
            .map_err(db_err)?;
        debug!("audit entry recorded");
        Ok(())
    }

    /// All entries touching the given fingerprint, oldest first.
    pub fn entries_for_fingerprint(&self, fingerprint: &str) -> Result<Vec<AuditEntry>> {
        self.query(
            "SELECT id, timestamp, action, document_id, fingerprint, success, details
             FROM audit_log WHERE fingerprint = ?1 ORDER BY id ASC",
            params![fingerprint],
        )
    }

    /// All entries for a document, oldest first.
    pub fn entries_for_document(&self, id: DocumentId) -> Result<Vec<AuditEntry>> {
        self.query(
            "SELECT id, timestamp, action, document_id, fingerprint, success, details
             FROM audit_log WHERE document_id = ?1 ORDER BY id ASC",
            params![id.0 as i64],
        )
    }

    /// The most recent `limit` entries, newest first.
    pub fn recent_entries(&self, limit: u32) -> Result<Vec<AuditEntry>> {
        self.query(
            "SELECT id, timestamp, action, document_id, fingerprint, success, details
             FROM audit_log ORDER BY id DESC LIMIT ?1",
            params![limit],
        )
    }

    pub fn count(&self) -> Result<u64> {
        self.conn()?
            .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn query(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<AuditEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok(AuditEntry {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    action: row.get(2)?,
                    document_id: row.get::<_, Option<i64>>(3)?.map(|id| DocumentId(id as u64)),
                    fingerprint: row.get(4)?,
                    success: row.get::<_, i32>(5)? != 0,
                    details: row.get(6)?,
                })
            })
            .map_err(db_err)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(db_err)?);
        }
        Ok(entries)
    }
}
