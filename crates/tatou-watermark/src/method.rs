// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The interface every watermarking strategy implements.

use tatou_core::error::Result;
use tatou_security::SecretKey;

/// A named, stateless watermarking strategy.
///
/// Implementations report failures as `TatouError::EmbedFailure` and
/// `TatouError::ExtractFailure`. The engine has already checked
/// [`is_applicable`](WatermarkMethod::is_applicable) and
/// [`capacity`](WatermarkMethod::capacity) before `embed` is called, so a
/// method only fails there for reasons it alone can see.
pub trait WatermarkMethod: Send + Sync {
    /// Registry key, e.g. `"lsb"`.
    fn name(&self) -> &'static str;

    /// One-line description shown to operators.
    fn usage(&self) -> &'static str;

    /// Whether this method can carry a watermark in `carrier` at all.
    fn is_applicable(&self, _carrier: &[u8]) -> bool {
        true
    }

    /// Largest secret, in bytes, this method can embed into a carrier of
    /// `carrier_len` bytes.
    fn capacity(&self, carrier_len: usize) -> usize;

    /// Return a copy of `carrier` carrying `secret`.
    ///
    /// `key` is the engine's watermark key; methods that do not authenticate
    /// their payload ignore it.
    fn embed(&self, carrier: &[u8], secret: &[u8], key: &SecretKey) -> Result<Vec<u8>>;

    /// Recover the secret previously embedded by this method.
    fn extract(&self, carrier: &[u8], key: &SecretKey) -> Result<Vec<u8>>;
}
