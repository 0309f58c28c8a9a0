// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tatou Store: versioned document storage. Each document is an append-only
// chain of immutable versions persisted in SQLite, with a per-document lock
// so unrelated documents never contend.

mod chain;
pub mod store;

pub use store::{AppendVersion, DEFAULT_MAX_DOCUMENT_BYTES, VersionStore};
