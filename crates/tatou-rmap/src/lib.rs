// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Tatou RMAP: authenticated handshake, signed link tokens and single-use
// redemption.

pub mod client;
pub mod proof;
pub mod protocol;
pub mod session;
pub mod sweeper;
pub mod token;
pub mod validator;

pub use client::RmapClient;
pub use protocol::{Challenge, IssuedLink, RmapEngine};
pub use session::{SessionState, SweepReport};
pub use sweeper::{SweeperHandle, spawn_session_sweeper};
pub use token::LinkClaims;
pub use validator::LinkValidator;
