// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Handshake sessions and their time-indexed table.
//
// Lifecycle:
//
//   Initiated ──commitment──▶ Challenged ──proof ok──▶ Completed (dropped)
//                                 │  └────proof bad──▶ Aborted   (dropped)
//                                 └──deadline──▶ Expired (tombstone) ──grace──▶ dropped
//
// Only `Challenged` sessions and `Expired` tombstones live in the table.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tatou_core::error::{Result, TatouError};
use tatou_core::types::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initiated,
    Challenged,
    Completed,
    Expired,
    Aborted,
}

/// One in-progress handshake.
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub id: SessionId,
    pub identity: String,
    pub requester_nonce: Vec<u8>,
    pub server_nonce: Vec<u8>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        identity: &str,
        requester_nonce: &[u8],
        server_nonce: Vec<u8>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<Self> {
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| TatouError::Internal("session deadline out of range".into()))?;
        Ok(Self {
            id: SessionId::new(),
            identity: identity.to_owned(),
            requester_nonce: requester_nonce.to_vec(),
            server_nonce,
            state: SessionState::Initiated,
            created_at: now,
            expires_at,
        })
    }

    /// Past its deadline, whether or not a sweep has noticed yet.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Expired || now >= self.expires_at
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Challenged sessions turned into tombstones.
    pub expired: usize,
    /// Tombstones removed for good.
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: HashMap<SessionId, Session>,
    deadlines: BTreeSet<(DateTime<Utc>, SessionId)>,
    server_nonces: HashSet<Vec<u8>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nonce_in_use(&self, server_nonce: &[u8]) -> bool {
        self.server_nonces.contains(server_nonce)
    }

    pub fn insert(&mut self, session: Session) {
        self.deadlines.insert((session.expires_at, session.id));
        self.server_nonces.insert(session.server_nonce.clone());
        self.sessions.insert(session.id, session);
    }

    /// Remove a session from every index. The caller becomes its only owner.
    pub fn take(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        self.deadlines.remove(&(session.expires_at, id));
        self.server_nonces.remove(&session.server_nonce);
        Some(session)
    }

    /// Expire overdue `Challenged` sessions and drop tombstones that are
    /// `grace` past their deadline.
    pub fn sweep(&mut self, now: DateTime<Utc>, grace: Duration) -> SweepReport {
        let overdue: Vec<(DateTime<Utc>, SessionId)> = self
            .deadlines
            .iter()
            .take_while(|(deadline, _)| *deadline <= now)
            .copied()
            .collect();

        let mut report = SweepReport::default();
        for (deadline, id) in overdue {
            let Some(session) = self.sessions.get_mut(&id) else {
                self.deadlines.remove(&(deadline, id));
                continue;
            };
            let state = session.state;
            match state {
                SessionState::Challenged => {
                    session.state = SessionState::Expired;
                    report.expired += 1;
                }
                SessionState::Expired
                    if deadline.checked_add_signed(grace).is_some_and(|end| end <= now) =>
                {
                    self.take(id);
                    report.dropped += 1;
                }
                _ => {}
            }
        }
        report
    }

    /// Sessions still awaiting a proof.
    pub fn active(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.state == SessionState::Challenged)
            .count()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}
