// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Requester side of the RMAP handshake.

use tatou_core::error::{Result, TatouError};
use tatou_security::{SecretKey, random_bytes};
use tracing::{debug, warn};

use crate::proof::{requester_proof, verify_server_commitment};
use crate::protocol::Challenge;

/// Length of the nonce a client sends with `initiate`.
pub const CLIENT_NONCE_LEN: usize = 32;

/// One requester identity with its pre-shared key.
///
/// A client runs one handshake at a time: `begin` draws a nonce, the caller
/// sends it to the server, and the returned challenge is checked and answered
/// against that nonce.
pub struct RmapClient {
    identity: String,
    key: SecretKey,
    nonce: Option<Vec<u8>>,
}

impl RmapClient {
    pub fn new(identity: &str, key: SecretKey) -> Self {
        Self {
            identity: identity.to_owned(),
            key,
            nonce: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Start a handshake. Returns the nonce to send with `initiate`.
    pub fn begin(&mut self) -> Result<Vec<u8>> {
        let nonce = random_bytes(CLIENT_NONCE_LEN)?;
        self.nonce = Some(nonce.clone());
        debug!(identity = %self.identity, "handshake started");
        Ok(nonce)
    }

    fn nonce(&self) -> Result<&[u8]> {
        self.nonce
            .as_deref()
            .ok_or_else(|| TatouError::Internal("no handshake in progress".into()))
    }

    /// Check that the challenge came from a server holding our key.
    pub fn verify_challenge(&self, server_id: &str, challenge: &Challenge) -> Result<()> {
        let nonce = self.nonce()?;
        if verify_server_commitment(
            &self.key,
            server_id,
            &self.identity,
            nonce,
            &challenge.server_nonce,
            &challenge.server_commitment,
        ) {
            Ok(())
        } else {
            warn!(identity = %self.identity, "server commitment rejected");
            Err(TatouError::AuthenticationFailed)
        }
    }

    /// The proof to send with `get_link`.
    pub fn proof(&self, challenge: &Challenge) -> Result<Vec<u8>> {
        Ok(requester_proof(
            &self.key,
            &self.identity,
            self.nonce()?,
            &challenge.server_nonce,
        ))
    }
}

impl std::fmt::Debug for RmapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmapClient")
            .field("identity", &self.identity)
            .field("in_progress", &self.nonce.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use tatou_core::types::SessionId;

    use super::*;
    use crate::proof::server_commitment;

    #[test]
    fn nothing_before_begin() {
        let client = RmapClient::new("alice", SecretKey::from_bytes([1; 32]));
        let challenge = Challenge {
            session_id: SessionId::new(),
            server_nonce: vec![0; 32],
            server_commitment: vec![],
            expires_at: Utc::now(),
        };
        assert!(client.proof(&challenge).is_err());
        assert!(client.verify_challenge("srv", &challenge).is_err());
    }

    #[test]
    fn commitment_bound_to_server_id() {
        let key = SecretKey::from_bytes([1; 32]);
        let mut client = RmapClient::new("alice", key.clone());
        let nonce = client.begin().unwrap();
        let server_nonce = vec![7; 32];
        let challenge = Challenge {
            session_id: SessionId::new(),
            server_commitment: server_commitment(&key, "srv", "alice", &nonce, &server_nonce),
            server_nonce,
            expires_at: Utc::now(),
        };
        assert!(client.verify_challenge("srv", &challenge).is_ok());
        assert!(matches!(
            client.verify_challenge("elsewhere", &challenge),
            Err(TatouError::AuthenticationFailed)
        ));
    }

    #[test]
    fn debug_hides_key() {
        let client = RmapClient::new("alice", SecretKey::from_bytes([0xAB; 32]));
        let shown = format!("{client:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("abab"));
    }
}
