// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document version store backed by SQLite.
//
// Every document is a chain of immutable versions: index 0 is the upload,
// every later index is a watermarked derivative of an earlier one. Chain
// metadata is mirrored in memory; payload bytes live only in the database
// and are re-verified against their fingerprint on every read.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, instrument};

use tatou_core::error::{Result, TatouError};
use tatou_core::types::{DocumentId, DocumentSummary, VersionIndex, VersionMeta};
use tatou_security::{fingerprint, verify_fingerprint};

use crate::chain::Chain;

/// Upload size limit used unless the caller configures another one.
pub const DEFAULT_MAX_DOCUMENT_BYTES: u64 = 20 * 1024 * 1024;

/// Display name given to documents uploaded without one.
pub const DEFAULT_NAME: &str = "document";

/// Owner recorded for documents uploaded without a principal.
pub const DEFAULT_OWNER: &str = "anonymous";

const CREATE_TABLES_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        owner TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS versions (
        document_id INTEGER NOT NULL,
        idx INTEGER NOT NULL,
        parent INTEGER,
        method TEXT,
        secret_ref TEXT,
        intended_for TEXT,
        fingerprint TEXT NOT NULL,
        size INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        payload BLOB NOT NULL,
        PRIMARY KEY (document_id, idx),
        UNIQUE (document_id, fingerprint)
    );
"#;

/// Request to add a watermarked version to a document's chain.
#[derive(Clone, Copy)]
pub struct AppendVersion<'a> {
    pub document_id: DocumentId,
    pub parent: VersionIndex,
    pub method: &'a str,
    pub secret_ref: &'a str,
    pub intended_for: Option<&'a str>,
    pub bytes: &'a [u8],
}

/// Versioned document storage.
///
/// All methods are synchronous because `rusqlite` is. In an async context,
/// wrap calls in `tokio::task::spawn_blocking`.
///
/// Locking: the map lock is only held long enough to clone a chain handle.
/// Each chain's mutex serializes appends to that document, and the database
/// write for an append happens while that mutex is held.
pub struct VersionStore {
    conn: Mutex<Connection>,
    chains: RwLock<HashMap<DocumentId, Arc<Mutex<Chain>>>>,
    max_document_bytes: u64,
}

impl VersionStore {
    /// Open (or create) the store at `path` and reload every chain.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| TatouError::Database(format!("open: {e}")))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| TatouError::Database(format!("WAL pragma: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| TatouError::Database(format!("create tables: {e}")))?;

        let chains = load_chains(&conn)?;
        info!(documents = chains.len(), "version store opened");
        Ok(Self::from_parts(conn, chains))
    }

    /// Open an in-memory store (useful for tests).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TatouError::Database(format!("open in-memory: {e}")))?;

        conn.execute_batch(CREATE_TABLES_SQL)
            .map_err(|e| TatouError::Database(format!("create tables: {e}")))?;

        debug!("in-memory version store opened");
        Ok(Self::from_parts(conn, HashMap::new()))
    }

    fn from_parts(conn: Connection, chains: HashMap<DocumentId, Arc<Mutex<Chain>>>) -> Self {
        Self {
            conn: Mutex::new(conn),
            chains: RwLock::new(chains),
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
        }
    }

    /// Replace the per-payload size limit.
    pub fn with_max_document_bytes(mut self, limit: u64) -> Self {
        self.max_document_bytes = limit;
        self
    }

    pub fn max_document_bytes(&self) -> u64 {
        self.max_document_bytes
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TatouError::poisoned("store connection"))
    }

    fn handle(&self, id: DocumentId) -> Result<Arc<Mutex<Chain>>> {
        let chains = self
            .chains
            .read()
            .map_err(|_| TatouError::poisoned("document map"))?;
        chains
            .get(&id)
            .cloned()
            .ok_or(TatouError::DocumentNotFound(id))
    }

    fn check_payload(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Err(TatouError::EmptyPayload);
        }
        let size = bytes.len() as u64;
        if size > self.max_document_bytes {
            return Err(TatouError::PayloadTooLarge {
                size,
                limit: self.max_document_bytes,
            });
        }
        Ok(())
    }

    /// Store a new document as version 0 under the default name and owner.
    pub fn create_document(&self, bytes: &[u8]) -> Result<DocumentId> {
        self.create_named_document(DEFAULT_NAME, DEFAULT_OWNER, bytes)
    }

    /// Store a new document as version 0.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn create_named_document(&self, name: &str, owner: &str, bytes: &[u8]) -> Result<DocumentId> {
        self.check_payload(bytes)?;
        let created_at = Utc::now();

        let meta = {
            let mut conn = self.conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| TatouError::Database(format!("begin: {e}")))?;
            tx.execute(
                "INSERT INTO documents (name, owner, created_at) VALUES (?1, ?2, ?3)",
                params![name, owner, created_at.to_rfc3339()],
            )
            .map_err(|e| TatouError::Database(format!("insert document: {e}")))?;

            let meta = VersionMeta {
                document_id: DocumentId(tx.last_insert_rowid() as u64),
                index: VersionIndex::ORIGINAL,
                parent: None,
                method: None,
                secret_ref: None,
                intended_for: None,
                fingerprint: fingerprint(bytes),
                size: bytes.len() as u64,
                created_at,
            };
            insert_version_row(&tx, &meta, bytes)?;
            tx.commit()
                .map_err(|e| TatouError::Database(format!("commit: {e}")))?;
            meta
        };

        let id = meta.document_id;
        info!(document_id = %id, fingerprint = %meta.fingerprint, "document created");

        let mut chain = Chain::new(id, name.to_owned(), owner.to_owned(), created_at);
        chain.push(meta);
        self.chains
            .write()
            .map_err(|_| TatouError::poisoned("document map"))?
            .insert(id, Arc::new(Mutex::new(chain)));
        Ok(id)
    }

    /// Append a derived version whose parent is `req.parent`.
    ///
    /// The new index is the chain length at the moment the chain lock is
    /// taken, so concurrent appends to one document get contiguous indices.
    #[instrument(skip_all, fields(document_id = %req.document_id, parent = %req.parent, method = req.method))]
    pub fn append_version(&self, req: AppendVersion<'_>) -> Result<VersionIndex> {
        self.check_payload(req.bytes)?;
        let handle = self.handle(req.document_id)?;
        let mut chain = lock(&handle)?;
        chain.live()?;
        chain.get(req.parent)?;

        let fingerprint = fingerprint(req.bytes);
        chain.check_unique(&fingerprint)?;

        let meta = VersionMeta {
            document_id: req.document_id,
            index: chain.next_index(),
            parent: Some(req.parent),
            method: Some(req.method.to_owned()),
            secret_ref: Some(req.secret_ref.to_owned()),
            intended_for: req.intended_for.map(str::to_owned),
            fingerprint,
            size: req.bytes.len() as u64,
            created_at: Utc::now(),
        };
        {
            let conn = self.conn()?;
            insert_version_row(&conn, &meta, req.bytes)?;
        }

        let index = meta.index;
        chain.push(meta);
        info!(index = %index, "version appended");
        Ok(index)
    }

    /// Bytes and metadata of one version.
    ///
    /// The payload is checked against its recorded fingerprint before it is
    /// returned.
    #[instrument(skip(self))]
    pub fn get_version(&self, document_id: DocumentId, index: VersionIndex) -> Result<(Vec<u8>, VersionMeta)> {
        let meta = self.version_meta(document_id, index)?;
        let bytes: Vec<u8> = self
            .conn()?
            .query_row(
                "SELECT payload FROM versions WHERE document_id = ?1 AND idx = ?2",
                params![document_id.0 as i64, index.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TatouError::Database(format!("read payload: {e}")))?
            // Deleted between the metadata read and the payload read.
            .ok_or(TatouError::DocumentNotFound(document_id))?;

        verify_fingerprint(&bytes, &meta.fingerprint)?;
        debug!(size = bytes.len(), "version read");
        Ok((bytes, meta))
    }

    /// Metadata of one version, without the payload.
    pub fn version_meta(&self, document_id: DocumentId, index: VersionIndex) -> Result<VersionMeta> {
        let handle = self.handle(document_id)?;
        let chain = lock(&handle)?;
        Ok(chain.live()?.get(index)?.clone())
    }

    /// Metadata of the highest-indexed version.
    pub fn latest_version(&self, document_id: DocumentId) -> Result<VersionMeta> {
        let handle = self.handle(document_id)?;
        let chain = lock(&handle)?;
        Ok(chain.live()?.latest()?.clone())
    }

    /// Every version of a document, ordered by index.
    pub fn list_versions(&self, document_id: DocumentId) -> Result<Vec<VersionMeta>> {
        let handle = self.handle(document_id)?;
        let chain = lock(&handle)?;
        Ok(chain.live()?.versions().to_vec())
    }

    /// Summaries of every stored document, ordered by id.
    pub fn list_all_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.summaries(|_| true)
    }

    /// Summaries of the documents uploaded by `owner`, ordered by id.
    pub fn list_documents_for(&self, owner: &str) -> Result<Vec<DocumentSummary>> {
        self.summaries(|chain| chain.owner == owner)
    }

    fn summaries(&self, keep: impl Fn(&Chain) -> bool) -> Result<Vec<DocumentSummary>> {
        let mut handles: Vec<(DocumentId, Arc<Mutex<Chain>>)> = self
            .chains
            .read()
            .map_err(|_| TatouError::poisoned("document map"))?
            .iter()
            .map(|(id, chain)| (*id, Arc::clone(chain)))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        let mut summaries = Vec::with_capacity(handles.len());
        for (_, handle) in handles {
            let chain = lock(&handle)?;
            if !chain.deleted && keep(&chain) {
                summaries.push(chain.summary()?);
            }
        }
        Ok(summaries)
    }

    /// Remove a document and its whole chain.
    #[instrument(skip(self))]
    pub fn delete_document(&self, document_id: DocumentId) -> Result<()> {
        let handle = self.handle(document_id)?;
        let mut chain = lock(&handle)?;
        chain.live()?;

        {
            let mut conn = self.conn()?;
            let tx = conn
                .transaction()
                .map_err(|e| TatouError::Database(format!("begin: {e}")))?;
            tx.execute(
                "DELETE FROM versions WHERE document_id = ?1",
                params![document_id.0 as i64],
            )
            .map_err(|e| TatouError::Database(format!("delete versions: {e}")))?;
            tx.execute(
                "DELETE FROM documents WHERE id = ?1",
                params![document_id.0 as i64],
            )
            .map_err(|e| TatouError::Database(format!("delete document: {e}")))?;
            tx.commit()
                .map_err(|e| TatouError::Database(format!("commit: {e}")))?;
        }

        chain.deleted = true;
        self.chains
            .write()
            .map_err(|_| TatouError::poisoned("document map"))?
            .remove(&document_id);
        info!(versions = chain.versions().len(), "document deleted");
        Ok(())
    }

    /// Number of live documents.
    pub fn document_count(&self) -> Result<usize> {
        Ok(self
            .chains
            .read()
            .map_err(|_| TatouError::poisoned("document map"))?
            .len())
    }
}

fn lock(chain: &Mutex<Chain>) -> Result<MutexGuard<'_, Chain>> {
    chain
        .lock()
        .map_err(|_| TatouError::poisoned("version chain"))
}

fn insert_version_row(conn: &Connection, meta: &VersionMeta, bytes: &[u8]) -> Result<()> {
    conn.execute(
        "INSERT INTO versions (document_id, idx, parent, method, secret_ref, intended_for,
         fingerprint, size, created_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            meta.document_id.0 as i64,
            meta.index.0,
            meta.parent.map(|p| p.0),
            meta.method,
            meta.secret_ref,
            meta.intended_for,
            meta.fingerprint.as_str(),
            meta.size as i64,
            meta.created_at.to_rfc3339(),
            bytes,
        ],
    )
    .map_err(|e| TatouError::Database(format!("insert version: {e}")))?;
    Ok(())
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TatouError::Database(format!("bad timestamp {raw:?}: {e}")))
}

/// A `versions` row as read back from SQLite, before timestamp parsing.
struct VersionRow {
    document_id: i64,
    idx: u32,
    parent: Option<u32>,
    method: Option<String>,
    secret_ref: Option<String>,
    intended_for: Option<String>,
    fingerprint: String,
    size: i64,
    created_at: String,
}

impl VersionRow {
    fn into_meta(self) -> Result<VersionMeta> {
        Ok(VersionMeta {
            document_id: DocumentId(self.document_id as u64),
            index: VersionIndex(self.idx),
            parent: self.parent.map(VersionIndex),
            method: self.method,
            secret_ref: self.secret_ref,
            intended_for: self.intended_for,
            fingerprint: tatou_core::types::Fingerprint(self.fingerprint),
            size: self.size as u64,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

/// Rebuild every chain from the database, checking that indices are
/// contiguous.
fn load_chains(conn: &Connection) -> Result<HashMap<DocumentId, Arc<Mutex<Chain>>>> {
    let mut chains: HashMap<DocumentId, Chain> = HashMap::new();

    let mut stmt = conn
        .prepare("SELECT id, name, owner, created_at FROM documents")
        .map_err(|e| TatouError::Database(format!("prepare documents: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|e| TatouError::Database(format!("query documents: {e}")))?;
    for row in rows {
        let (id, name, owner, created_at) =
            row.map_err(|e| TatouError::Database(format!("row parse: {e}")))?;
        let id = DocumentId(id as u64);
        chains.insert(id, Chain::new(id, name, owner, parse_time(&created_at)?));
    }

    let mut stmt = conn
        .prepare(
            "SELECT document_id, idx, parent, method, secret_ref, intended_for,
                    fingerprint, size, created_at
             FROM versions ORDER BY document_id, idx",
        )
        .map_err(|e| TatouError::Database(format!("prepare versions: {e}")))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(VersionRow {
                document_id: row.get(0)?,
                idx: row.get(1)?,
                parent: row.get(2)?,
                method: row.get(3)?,
                secret_ref: row.get(4)?,
                intended_for: row.get(5)?,
                fingerprint: row.get(6)?,
                size: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .map_err(|e| TatouError::Database(format!("query versions: {e}")))?;
    for row in rows {
        let meta = row
            .map_err(|e| TatouError::Database(format!("row parse: {e}")))?
            .into_meta()?;
        let chain = chains.get_mut(&meta.document_id).ok_or_else(|| {
            TatouError::Database(format!("version row for missing document {}", meta.document_id))
        })?;
        if meta.index != chain.next_index() {
            return Err(TatouError::Database(format!(
                "version chain of document {} has a gap at index {}",
                meta.document_id,
                chain.next_index()
            )));
        }
        chain.push(meta);
    }

    debug!(documents = chains.len(), "chains reloaded");
    Ok(chains
        .into_iter()
        .map(|(id, chain)| (id, Arc::new(Mutex::new(chain))))
        .collect())
}
