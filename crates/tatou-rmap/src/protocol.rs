// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RMAP protocol engine: the server side of the two-message handshake that
// ends in a signed, single-use link token.
//
// Message 1, `initiate(identity, Nc)`: the server draws Ns, answers with a
// commitment proving it holds K_identity, and parks the session as
// `Challenged`.
//
// Message 2, `get_link(session, proof, document, version)`: the session is
// taken out of the table under the lock, so of any number of racing callers
// exactly one holds it afterwards. Verification then runs without the lock.
// Whatever the outcome, a taken session never goes back.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tatou_core::clock::{Clock, SystemClock};
use tatou_core::config::TatouConfig;
use tatou_core::error::{Result, TatouError};
use tatou_core::types::{DocumentId, SessionId, VersionIndex};
use tatou_security::{
    AuditAction, AuditLog, AuditRecord, Keyring, LinkSigningKey, LinkVerifyingKey, random_bytes,
};
use tatou_store::VersionStore;
use tracing::{debug, info, instrument, warn};

use crate::proof::{REQUESTER_NONCE_LEN, SERVER_NONCE_LEN, server_commitment, verify_requester_proof};
use crate::session::{Session, SessionState, SessionTable, SweepReport};
use crate::token::{self, LinkClaims};

/// Random bytes in each token nonce.
pub const TOKEN_NONCE_LEN: usize = 16;

/// Server reply to `initiate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub session_id: SessionId,
    pub server_nonce: Vec<u8>,
    pub server_commitment: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

/// A freshly minted link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedLink {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct RmapEngine {
    server_id: String,
    session_ttl: Duration,
    link_ttl: Duration,
    keyring: Keyring,
    store: Arc<VersionStore>,
    signer: LinkSigningKey,
    sessions: Mutex<SessionTable>,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<AuditLog>>,
}

impl RmapEngine {
    pub fn new(
        config: &TatouConfig,
        keyring: Keyring,
        store: Arc<VersionStore>,
        signer: LinkSigningKey,
    ) -> Result<Self> {
        Ok(Self {
            server_id: config.server_id.clone(),
            session_ttl: config.session_ttl()?,
            link_ttl: config.link_ttl()?,
            keyring,
            store,
            signer,
            sessions: Mutex::new(SessionTable::new()),
            clock: Arc::new(SystemClock),
            audit: None,
        })
    }

    /// Replace the time source for every deadline decision.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Record link issuance in `audit`.
    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Public half of the token signing key, for the link validator.
    pub fn verifying_key(&self) -> LinkVerifyingKey {
        self.signer.verifying_key()
    }

    fn sessions(&self) -> Result<MutexGuard<'_, SessionTable>> {
        self.sessions
            .lock()
            .map_err(|_| TatouError::poisoned("session table"))
    }

    /// Open a handshake for `identity`.
    ///
    /// An unknown identity and a malformed nonce are both reported as
    /// `UnknownIdentity`, and neither creates a session.
    #[instrument(skip_all, fields(identity = identity))]
    pub fn initiate(&self, identity: &str, requester_nonce: &[u8]) -> Result<Challenge> {
        let Some(key) = self.keyring.get(identity) else {
            warn!("initiate from unknown identity");
            return Err(TatouError::UnknownIdentity);
        };
        if !REQUESTER_NONCE_LEN.contains(&requester_nonce.len()) {
            warn!(nonce_len = requester_nonce.len(), "initiate with malformed nonce");
            return Err(TatouError::UnknownIdentity);
        }

        let now = self.clock.now();
        loop {
            let server_nonce = random_bytes(SERVER_NONCE_LEN)?;
            let commitment =
                server_commitment(key, &self.server_id, identity, requester_nonce, &server_nonce);
            let mut session = Session::new(identity, requester_nonce, server_nonce, now, self.session_ttl)?;
            session.state = SessionState::Challenged;
            let challenge = Challenge {
                session_id: session.id,
                server_nonce: session.server_nonce.clone(),
                server_commitment: commitment,
                expires_at: session.expires_at,
            };

            let mut sessions = self.sessions()?;
            if sessions.nonce_in_use(&challenge.server_nonce) {
                drop(sessions);
                warn!("server nonce collision, drawing again");
                continue;
            }
            sessions.insert(session);
            drop(sessions);

            info!(session_id = %challenge.session_id, "handshake challenged");
            return Ok(challenge);
        }
    }

    /// Finish a handshake and mint a link to one version.
    ///
    /// Every outcome consumes the session: a second call with the same id
    /// gets `SessionNotFound`.
    #[instrument(skip(self, requester_proof), fields(session_id = %session_id, document_id = %document_id, index = %index))]
    pub fn get_link(
        &self,
        session_id: SessionId,
        requester_proof: &[u8],
        document_id: DocumentId,
        index: VersionIndex,
    ) -> Result<IssuedLink> {
        let now = self.clock.now();
        let session = self
            .sessions()?
            .take(session_id)
            .ok_or(TatouError::SessionNotFound)?;

        if session.is_overdue(now) {
            close(session, SessionState::Expired);
            return Err(TatouError::SessionExpired);
        }

        let proven = self.keyring.get(&session.identity).is_some_and(|key| {
            verify_requester_proof(
                key,
                &session.identity,
                &session.requester_nonce,
                &session.server_nonce,
                requester_proof,
            )
        });
        if !proven {
            warn!(identity = %session.identity, "requester proof rejected");
            let details = format!("identity={} error=authentication_failed", session.identity);
            self.audit(
                AuditRecord::failure(AuditAction::IssueLink)
                    .document(document_id)
                    .details(&details),
            );
            close(session, SessionState::Aborted);
            return Err(TatouError::AuthenticationFailed);
        }

        let meta = match self.store.version_meta(document_id, index) {
            Ok(meta) => meta,
            Err(TatouError::DocumentNotFound(_) | TatouError::VersionNotFound { .. }) => {
                debug!("requested version is not available");
                close(session, SessionState::Aborted);
                return Err(TatouError::VersionNotFound { document_id, index });
            }
            Err(other) => {
                close(session, SessionState::Aborted);
                return Err(other);
            }
        };

        let Some(expires_at) = now.checked_add_signed(self.link_ttl) else {
            close(session, SessionState::Aborted);
            return Err(TatouError::Internal("link expiry out of range".into()));
        };
        let claims = LinkClaims {
            document_id,
            version_index: index,
            issued_at: now,
            expires_at,
            nonce: hex::encode(random_bytes(TOKEN_NONCE_LEN)?),
            intended_for: session.identity.clone(),
        };
        let token = token::encode(&claims, &self.signer)?;

        info!(identity = %session.identity, expires_at = %claims.expires_at, "link issued");
        let details = format!("identity={} version={index}", session.identity);
        self.audit(
            AuditRecord::success(AuditAction::IssueLink)
                .document(document_id)
                .fingerprint(meta.fingerprint.as_str())
                .details(&details),
        );
        close(session, SessionState::Completed);

        Ok(IssuedLink {
            token,
            expires_at: claims.expires_at,
        })
    }

    /// Turn overdue sessions into tombstones and drop tombstones that have
    /// outlived a further session TTL.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut sessions = self.sessions()?;
        let report = sessions.sweep(now, self.session_ttl);
        let remaining = sessions.len();
        drop(sessions);
        if report != SweepReport::default() {
            debug!(expired = report.expired, dropped = report.dropped, remaining, "sessions swept");
        }
        Ok(report)
    }

    /// Sweep against this engine's own clock.
    pub fn sweep_now(&self) -> Result<SweepReport> {
        self.sweep_expired(self.clock.now())
    }

    /// Sessions still waiting for a proof.
    pub fn active_sessions(&self) -> Result<usize> {
        Ok(self.sessions()?.active())
    }

    fn audit(&self, record: AuditRecord<'_>) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.record(record) {
                warn!(error = %e, "failed to write audit entry");
            }
        }
    }
}

/// Final transition of a session taken out of the table.
fn close(mut session: Session, state: SessionState) {
    session.state = state;
    debug!(
        session_id = %session.id,
        state = ?session.state,
        created_at = %session.created_at,
        "session closed"
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use tatou_core::clock::ManualClock;
    use tatou_security::SecretKey;

    use super::*;
    use crate::client::RmapClient;
    use crate::proof::requester_proof;

    struct Fixture {
        engine: Arc<RmapEngine>,
        clock: Arc<ManualClock>,
        store: Arc<VersionStore>,
        alice: SecretKey,
        doc: DocumentId,
    }

    fn fixture() -> Fixture {
        let mut keyring = Keyring::new();
        let alice = keyring.generate("alice").unwrap();
        let store = Arc::new(VersionStore::open_in_memory().unwrap());
        let doc = store.create_document(b"0123456789").unwrap();
        let clock = Arc::new(ManualClock::starting_now());
        let engine = RmapEngine::new(
            &TatouConfig::default(),
            keyring,
            store.clone(),
            LinkSigningKey::generate().unwrap(),
        )
        .unwrap()
        .with_clock(clock.clone());
        Fixture {
            engine: Arc::new(engine),
            clock,
            store,
            alice,
            doc,
        }
    }

    const NC: &[u8] = b"alice-nonce-0001";

    fn prove(f: &Fixture, challenge: &Challenge) -> Vec<u8> {
        requester_proof(&f.alice, "alice", NC, &challenge.server_nonce)
    }

    #[test]
    fn link_is_single_use_per_session() {
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);

        let link = f
            .engine
            .get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL)
            .unwrap();
        let claims = token::decode(&link.token, &f.engine.verifying_key()).unwrap();
        assert_eq!(claims.document_id, f.doc);
        assert_eq!(claims.intended_for, "alice");
        assert_eq!(claims.expires_at - claims.issued_at, Duration::seconds(600));

        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionNotFound)
        ));
        assert_eq!(f.engine.active_sessions().unwrap(), 0);
    }

    #[test]
    fn unknown_identity_creates_nothing() {
        let f = fixture();
        assert!(matches!(f.engine.initiate("mallory", NC), Err(TatouError::UnknownIdentity)));
        assert!(matches!(f.engine.initiate("alice", b"short"), Err(TatouError::UnknownIdentity)));
        assert!(matches!(
            f.engine.initiate("alice", &[0u8; 65]),
            Err(TatouError::UnknownIdentity)
        ));
        assert_eq!(f.engine.active_sessions().unwrap(), 0);
    }

    #[test]
    fn server_nonces_differ() {
        let f = fixture();
        let a = f.engine.initiate("alice", NC).unwrap();
        let b = f.engine.initiate("alice", NC).unwrap();
        assert_ne!(a.server_nonce, b.server_nonce);
        assert_ne!(a.session_id, b.session_id);
        assert_eq!(a.server_nonce.len(), SERVER_NONCE_LEN);
    }

    #[test]
    fn concurrent_initiates_get_distinct_nonces() {
        const THREADS: usize = 8;
        let f = fixture();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = f.engine.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.initiate("alice", NC).unwrap()
                })
            })
            .collect();

        let nonces: std::collections::HashSet<Vec<u8>> = handles
            .into_iter()
            .map(|h| h.join().unwrap().server_nonce)
            .collect();
        assert_eq!(nonces.len(), THREADS);
        assert_eq!(f.engine.active_sessions().unwrap(), THREADS);
    }

    #[test]
    fn out_of_range_ttls_refused() {
        let bad = [
            TatouConfig {
                link_ttl_secs: 9_000_000_000_000,
                ..TatouConfig::default()
            },
            TatouConfig {
                session_ttl_secs: -5,
                ..TatouConfig::default()
            },
        ];
        for config in &bad {
            let store = Arc::new(VersionStore::open_in_memory().unwrap());
            let built = RmapEngine::new(config, Keyring::new(), store, LinkSigningKey::generate().unwrap());
            assert!(matches!(built, Err(TatouError::Config(_))));
        }
    }

    #[test]
    fn deadlines_near_calendar_end_do_not_panic() {
        let f = fixture();
        f.clock.set(DateTime::<Utc>::MAX_UTC - Duration::seconds(120));

        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);
        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::Internal(_))
        ));
        assert_eq!(f.engine.active_sessions().unwrap(), 0);

        f.clock.advance(Duration::seconds(90));
        assert!(matches!(f.engine.initiate("alice", NC), Err(TatouError::Internal(_))));
        assert_eq!(f.engine.active_sessions().unwrap(), 0);
    }

    #[test]
    fn bad_proof_aborts_session() {
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();

        assert!(matches!(
            f.engine.get_link(challenge.session_id, b"forged", f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::AuthenticationFailed)
        ));
        // The correct proof comes too late.
        let proof = prove(&f, &challenge);
        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionNotFound)
        ));
    }

    #[test]
    fn proof_for_another_session_fails() {
        let f = fixture();
        let first = f.engine.initiate("alice", NC).unwrap();
        let second = f.engine.initiate("alice", NC).unwrap();
        let replayed = prove(&f, &first);
        assert!(matches!(
            f.engine.get_link(second.session_id, &replayed, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::AuthenticationFailed)
        ));
    }

    #[test]
    fn missing_version_collapses() {
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);
        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, DocumentId(999), VersionIndex(3)),
            Err(TatouError::VersionNotFound { document_id: DocumentId(999), index: VersionIndex(3) })
        ));

        f.store.delete_document(f.doc).unwrap();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);
        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::VersionNotFound { .. })
        ));
    }

    #[test]
    fn lazy_expiry_without_sweep() {
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);
        f.clock.advance(Duration::seconds(61));

        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionExpired)
        ));
        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionNotFound)
        ));
    }

    #[test]
    fn swept_session_reports_expired_once() {
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);
        f.clock.advance(Duration::seconds(60));

        let report = f.engine.sweep_now().unwrap();
        assert_eq!(report.expired, 1);
        assert_eq!(f.engine.active_sessions().unwrap(), 0);

        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionExpired)
        ));
        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionNotFound)
        ));
    }

    #[test]
    fn stale_tombstone_reads_as_not_found() {
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);

        f.clock.advance(Duration::seconds(60));
        f.engine.sweep_now().unwrap();
        f.clock.advance(Duration::seconds(60));
        assert_eq!(f.engine.sweep_now().unwrap().dropped, 1);

        assert!(matches!(
            f.engine.get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL),
            Err(TatouError::SessionNotFound)
        ));
    }

    #[test]
    fn racing_get_link_has_one_winner() {
        const THREADS: usize = 8;
        let f = fixture();
        let challenge = f.engine.initiate("alice", NC).unwrap();
        let proof = prove(&f, &challenge);
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let engine = f.engine.clone();
                let barrier = barrier.clone();
                let proof = proof.clone();
                let (doc, sid) = (f.doc, challenge.session_id);
                thread::spawn(move || {
                    barrier.wait();
                    engine.get_link(sid, &proof, doc, VersionIndex::ORIGINAL)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, TatouError::SessionNotFound)));
    }

    #[test]
    fn client_checks_server_commitment() {
        let f = fixture();
        let mut client = RmapClient::new("alice", f.alice.clone());
        let nonce = client.begin().unwrap();
        let challenge = f.engine.initiate("alice", &nonce).unwrap();
        assert!(client.verify_challenge(f.engine.server_id(), &challenge).is_ok());

        let proof = client.proof(&challenge).unwrap();
        assert!(f
            .engine
            .get_link(challenge.session_id, &proof, f.doc, VersionIndex::ORIGINAL)
            .is_ok());

        let mut imposter = RmapClient::new("alice", SecretKey::generate().unwrap());
        let nonce = imposter.begin().unwrap();
        let challenge = f.engine.initiate("alice", &nonce).unwrap();
        assert!(matches!(
            imposter.verify_challenge(f.engine.server_id(), &challenge),
            Err(TatouError::AuthenticationFailed)
        ));
    }

    #[test]
    fn issuance_is_audited() {
        let audit = Arc::new(AuditLog::open_in_memory().unwrap());
        let f = fixture();
        let engine = RmapEngine::new(
            &TatouConfig::default(),
            {
                let mut keyring = Keyring::new();
                keyring.insert("alice", f.alice.clone()).unwrap();
                keyring
            },
            f.store.clone(),
            LinkSigningKey::generate().unwrap(),
        )
        .unwrap()
        .with_audit(audit.clone());

        let challenge = engine.initiate("alice", NC).unwrap();
        engine
            .get_link(challenge.session_id, &prove(&f, &challenge), f.doc, VersionIndex::ORIGINAL)
            .unwrap();
        let challenge = engine.initiate("alice", NC).unwrap();
        let _ = engine.get_link(challenge.session_id, b"bad", f.doc, VersionIndex::ORIGINAL);

        let entries = audit.entries_for_document(f.doc).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].success && entries[0].fingerprint.is_some());
        assert!(!entries[1].success);
        assert!(entries.iter().all(|e| e.action == "issue_link"));
    }
}
