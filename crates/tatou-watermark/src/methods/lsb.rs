// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Low-bit substitution over raw carrier bytes.
//
// Each carrier byte holds one nibble of the frame in its low four bits, high
// nibble first. Frame layout:
//
//   [len: u8] [check: u8] [payload: len bytes]
//
// where `check` is the first byte of SHA-256(payload).

use tatou_core::error::{Result, TatouError};
use tatou_security::{SecretKey, check_byte};

use crate::method::WatermarkMethod;

/// Frame bytes before the payload.
const HEADER_LEN: usize = 2;
/// Carrier bytes consumed per frame byte.
const CARRIER_PER_BYTE: usize = 2;
/// The length prefix is a single byte.
const MAX_PAYLOAD: usize = u8::MAX as usize;

pub struct LowBitSubstitution;

impl LowBitSubstitution {
    pub const NAME: &'static str = "lsb";
}

fn write_byte(carrier: &mut [u8], slot: usize, value: u8) {
    let at = slot * CARRIER_PER_BYTE;
    carrier[at] = (carrier[at] & 0xF0) | (value >> 4);
    carrier[at + 1] = (carrier[at + 1] & 0xF0) | (value & 0x0F);
}

fn read_byte(carrier: &[u8], slot: usize) -> u8 {
    let at = slot * CARRIER_PER_BYTE;
    ((carrier[at] & 0x0F) << 4) | (carrier[at + 1] & 0x0F)
}

impl WatermarkMethod for LowBitSubstitution {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn usage(&self) -> &'static str {
        "Hides up to 255 bytes in the low nibble of every carrier byte; works on any file but rewrites its content"
    }

    fn capacity(&self, carrier_len: usize) -> usize {
        (carrier_len / CARRIER_PER_BYTE)
            .saturating_sub(HEADER_LEN)
            .min(MAX_PAYLOAD)
    }

    fn embed(&self, carrier: &[u8], secret: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
        let len = u8::try_from(secret.len())
            .map_err(|_| TatouError::EmbedFailure("secret longer than 255 bytes".into()))?;
        if secret.len() > self.capacity(carrier.len()) {
            return Err(TatouError::EmbedFailure("carrier too small".into()));
        }

        let mut out = carrier.to_vec();
        write_byte(&mut out, 0, len);
        write_byte(&mut out, 1, check_byte(secret));
        for (i, &b) in secret.iter().enumerate() {
            write_byte(&mut out, HEADER_LEN + i, b);
        }
        Ok(out)
    }

    fn extract(&self, carrier: &[u8], _key: &SecretKey) -> Result<Vec<u8>> {
        if carrier.len() < HEADER_LEN * CARRIER_PER_BYTE {
            return Err(TatouError::ExtractFailure("carrier too small".into()));
        }
        let len = read_byte(carrier, 0) as usize;
        if len == 0 || len > self.capacity(carrier.len()) {
            return Err(TatouError::ExtractFailure("no low-bit frame present".into()));
        }

        let check = read_byte(carrier, 1);
        let payload: Vec<u8> = (0..len)
            .map(|i| read_byte(carrier, HEADER_LEN + i))
            .collect();
        if check_byte(&payload) != check {
            return Err(TatouError::ExtractFailure("low-bit frame check failed".into()));
        }
        Ok(payload)
    }
}
