// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// tatou-watermark: Pluggable watermark embedding and extraction over
// versioned documents.
//
// Provides the `WatermarkMethod` interface, the built-in methods (low-bit
// substitution, marked trailer, authenticated EOF record, hidden PDF object),
// the method registry, and the engine that ties methods to the version store.

pub mod engine;
pub mod method;
pub mod methods;
pub mod registry;

pub use engine::{EmbedRequest, WatermarkEngine};
pub use method::WatermarkMethod;
pub use registry::MethodRegistry;
