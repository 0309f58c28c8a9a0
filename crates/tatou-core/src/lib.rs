// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tatou: Core types and error definitions shared across all crates.

pub mod clock;
pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TatouConfig;
pub use error::{ErrorKind, Result, TatouError};
pub use types::*;
