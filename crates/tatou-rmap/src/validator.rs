// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Link token validator: verifies a token, burns its nonce in a durable
// ledger, then hands out the version it names.
//
// The ledger insert commits before any bytes are read, and the nonce is the
// table's primary key, so across threads and restarts a token is redeemed
// at most once.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, params};
use tatou_core::clock::{Clock, SystemClock};
use tatou_core::error::{Result, TatouError};
use tatou_core::types::VersionMeta;
use tatou_security::{AuditAction, AuditLog, AuditRecord, LinkVerifyingKey};
use tatou_store::VersionStore;
use tracing::{debug, info, instrument, warn};

use crate::token::{self, LinkClaims};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS used_tokens (
        nonce TEXT PRIMARY KEY,
        document_id INTEGER NOT NULL,
        version_index INTEGER NOT NULL,
        intended_for TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        redeemed_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_used_tokens_expiry ON used_tokens(expires_at);
"#;

fn db_err(e: rusqlite::Error) -> TatouError {
    TatouError::Database(format!("token ledger: {e}"))
}

pub struct LinkValidator {
    verifier: LinkVerifyingKey,
    store: Arc<VersionStore>,
    ledger: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLog>>,
}

impl LinkValidator {
    /// Open (or create) the used-token ledger at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(
        path: impl AsRef<Path>,
        verifier: LinkVerifyingKey,
        store: Arc<VersionStore>,
    ) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        info!("token ledger opened");
        Ok(Self::from_parts(conn, verifier, store))
    }

    /// Ledger in memory (useful for tests).
    pub fn open_in_memory(verifier: LinkVerifyingKey, store: Arc<VersionStore>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        debug!("in-memory token ledger opened");
        Ok(Self::from_parts(conn, verifier, store))
    }

    fn from_parts(conn: Connection, verifier: LinkVerifyingKey, store: Arc<VersionStore>) -> Self {
        Self {
            verifier,
            store,
            ledger: Mutex::new(conn),
            clock: Arc::new(SystemClock),
            audit: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Connection>> {
        self.ledger
            .lock()
            .map_err(|_| TatouError::poisoned("token ledger"))
    }

    /// Verified claims of `token`, without consuming it.
    pub fn inspect(&self, token: &str) -> Result<LinkClaims> {
        token::decode(token, &self.verifier)
    }

    /// Consume `token` and return the version it grants.
    #[instrument(skip_all)]
    pub fn redeem(&self, token: &str) -> Result<(Vec<u8>, VersionMeta)> {
        let claims = match token::decode(token, &self.verifier) {
            Ok(claims) => claims,
            Err(e) => {
                warn!("link token failed verification");
                self.audit(AuditRecord::failure(AuditAction::Redeem).details("error=invalid_token"));
                return Err(e);
            }
        };

        let result = self.try_redeem(&claims);
        let details = match &result {
            Ok(_) => format!("intended_for={} version={}", claims.intended_for, claims.version_index),
            Err(e) => format!("intended_for={} error={}", claims.intended_for, e.code()),
        };
        let record = match &result {
            Ok((_, meta)) => AuditRecord::success(AuditAction::Redeem).fingerprint(meta.fingerprint.as_str()),
            Err(_) => AuditRecord::failure(AuditAction::Redeem),
        };
        self.audit(record.document(claims.document_id).details(&details));
        result
    }

    fn try_redeem(&self, claims: &LinkClaims) -> Result<(Vec<u8>, VersionMeta)> {
        let now = self.clock.now();
        if claims.is_expired(now) {
            debug!(expires_at = %claims.expires_at, "link token expired");
            return Err(TatouError::TokenExpired);
        }

        self.burn(claims, now)?;
        let found = self.store.get_version(claims.document_id, claims.version_index)?;
        info!(
            document_id = %claims.document_id,
            index = %claims.version_index,
            intended_for = %claims.intended_for,
            "link redeemed"
        );
        Ok(found)
    }

    fn burn(&self, claims: &LinkClaims, now: DateTime<Utc>) -> Result<()> {
        let inserted = self.ledger()?.execute(
            "INSERT INTO used_tokens (nonce, document_id, version_index, intended_for, expires_at, redeemed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                claims.nonce,
                claims.document_id.0 as i64,
                claims.version_index.0,
                claims.intended_for,
                claims.expires_at.timestamp_millis(),
                now.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == ErrorCode::ConstraintViolation => {
                warn!(intended_for = %claims.intended_for, "link token replayed");
                Err(TatouError::TokenAlreadyUsed)
            }
            Err(e) => Err(db_err(e)),
        }
    }

    /// Forget nonces of tokens that have expired by `now`. Returns the number
    /// of rows removed.
    pub fn prune_used(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self
            .ledger()?
            .execute(
                "DELETE FROM used_tokens WHERE expires_at <= ?1",
                params![now.timestamp_millis()],
            )
            .map_err(db_err)?;
        if removed > 0 {
            info!(removed, "expired token nonces pruned");
        }
        Ok(removed)
    }

    /// Rows currently held in the ledger.
    pub fn used_count(&self) -> Result<u64> {
        self.ledger()?
            .query_row("SELECT COUNT(*) FROM used_tokens", [], |row| row.get(0))
            .map_err(db_err)
    }

    fn audit(&self, record: AuditRecord<'_>) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(record) {
                warn!(error = %e, "failed to write audit entry");
            }
        }
    }
}
