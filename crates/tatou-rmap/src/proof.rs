// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// RMAP handshake transcripts.
//
// Both sides hold the identity's pre-shared key K. The server proves
// possession with
//
//   HMAC(K, "tatou-rmap-v1/server" || lp(server_id) || lp(identity) || Nc || Ns)
//
// and the requester answers with
//
//   HMAC(K, "tatou-rmap-v1/requester" || lp(identity) || Nc || Ns)
//
// where lp(x) is x prefixed by its length as a big-endian u32. Ns has a fixed
// length and comes last, so the concatenation is unambiguous. The two labels
// differ, so a server commitment can never be replayed as a requester proof.

use tatou_security::SecretKey;

const SERVER_LABEL: &[u8] = b"tatou-rmap-v1/server";
const REQUESTER_LABEL: &[u8] = b"tatou-rmap-v1/requester";

/// Length of the server nonce.
pub const SERVER_NONCE_LEN: usize = 32;

/// Accepted requester nonce lengths.
pub const REQUESTER_NONCE_LEN: std::ops::RangeInclusive<usize> = 8..=64;

fn lp(part: &[u8]) -> [u8; 4] {
    (part.len() as u32).to_be_bytes()
}

pub fn server_commitment(
    key: &SecretKey,
    server_id: &str,
    identity: &str,
    requester_nonce: &[u8],
    server_nonce: &[u8],
) -> Vec<u8> {
    key.sign(&[
        SERVER_LABEL,
        &lp(server_id.as_bytes()),
        server_id.as_bytes(),
        &lp(identity.as_bytes()),
        identity.as_bytes(),
        requester_nonce,
        server_nonce,
    ])
}

/// Constant-time check of a server commitment.
pub fn verify_server_commitment(
    key: &SecretKey,
    server_id: &str,
    identity: &str,
    requester_nonce: &[u8],
    server_nonce: &[u8],
    commitment: &[u8],
) -> bool {
    key.verify(
        &[
            SERVER_LABEL,
            &lp(server_id.as_bytes()),
            server_id.as_bytes(),
            &lp(identity.as_bytes()),
            identity.as_bytes(),
            requester_nonce,
            server_nonce,
        ],
        commitment,
    )
}

pub fn requester_proof(
    key: &SecretKey,
    identity: &str,
    requester_nonce: &[u8],
    server_nonce: &[u8],
) -> Vec<u8> {
    key.sign(&[
        REQUESTER_LABEL,
        &lp(identity.as_bytes()),
        identity.as_bytes(),
        requester_nonce,
        server_nonce,
    ])
}

/// Constant-time check of a requester proof.
pub fn verify_requester_proof(
    key: &SecretKey,
    identity: &str,
    requester_nonce: &[u8],
    server_nonce: &[u8],
    proof: &[u8],
) -> bool {
    key.verify(
        &[
            REQUESTER_LABEL,
            &lp(identity.as_bytes()),
            identity.as_bytes(),
            requester_nonce,
            server_nonce,
        ],
        proof,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const NC: &[u8] = b"requester-nonce!";
    const NS: &[u8] = &[0xAA; SERVER_NONCE_LEN];

    #[test]
    fn commitment_and_proof_verify() {
        let key = SecretKey::generate().unwrap();
        let commitment = server_commitment(&key, "srv", "alice", NC, NS);
        assert!(verify_server_commitment(&key, "srv", "alice", NC, NS, &commitment));
        let proof = requester_proof(&key, "alice", NC, NS);
        assert!(verify_requester_proof(&key, "alice", NC, NS, &proof));
    }

    #[test]
    fn roles_are_not_interchangeable() {
        let key = SecretKey::generate().unwrap();
        let commitment = server_commitment(&key, "srv", "alice", NC, NS);
        assert!(!verify_requester_proof(&key, "alice", NC, NS, &commitment));
    }

    #[test]
    fn bound_to_every_input() {
        let key = SecretKey::generate().unwrap();
        let proof = requester_proof(&key, "alice", NC, NS);
        assert!(!verify_requester_proof(&key, "bob", NC, NS, &proof));
        assert!(!verify_requester_proof(&key, "alice", b"other-nonce", NS, &proof));
        assert!(!verify_requester_proof(&key, "alice", NC, &[0xBB; SERVER_NONCE_LEN], &proof));

        let other = SecretKey::generate().unwrap();
        assert!(!verify_requester_proof(&other, "alice", NC, NS, &proof));

        let commitment = server_commitment(&key, "srv", "alice", NC, NS);
        assert!(!verify_server_commitment(&key, "other-srv", "alice", NC, NS, &commitment));
    }

    #[test]
    fn length_prefix_separates_fields() {
        let key = SecretKey::generate().unwrap();
        // "ab" + "c..." vs "a" + "bc...": same concatenation without prefixes.
        let a = server_commitment(&key, "ab", "c", NC, NS);
        let b = server_commitment(&key, "a", "bc", NC, NS);
        assert_ne!(a, b);
    }
}
