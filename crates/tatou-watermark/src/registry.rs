// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Watermark method registry: name → strategy, in registration order.
//
// The registry is built once at startup and never mutated afterwards, so it
// is shared without locks.

use tatou_core::error::{Result, TatouError};
use tatou_core::types::MethodDescriptor;
use tracing::debug;

use crate::method::WatermarkMethod;
use crate::methods::{EmbeddedFile, EofHmac, LowBitSubstitution, MarkedTrailer, PdfObject};

#[derive(Default)]
pub struct MethodRegistry {
    methods: Vec<Box<dyn WatermarkMethod>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in method.
    pub fn with_builtin_methods() -> Self {
        let mut registry = Self::new();
        let builtins: [Box<dyn WatermarkMethod>; 5] = [
            Box::new(LowBitSubstitution),
            Box::new(MarkedTrailer),
            Box::new(EofHmac),
            Box::new(PdfObject),
            Box::new(EmbeddedFile),
        ];
        for method in builtins {
            // Built-in names are distinct.
            let _ = registry.register(method);
        }
        registry
    }

    /// Add `method`. Fails with `DuplicateMethod` if its name is taken.
    pub fn register(&mut self, method: Box<dyn WatermarkMethod>) -> Result<()> {
        let name = method.name();
        if self.methods.iter().any(|m| m.name() == name) {
            return Err(TatouError::DuplicateMethod(name.to_owned()));
        }
        debug!(method = name, "watermark method registered");
        self.methods.push(method);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&dyn WatermarkMethod> {
        self.methods
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.as_ref())
            .ok_or_else(|| TatouError::UnknownMethod(name.to_owned()))
    }

    /// Method names in registration order.
    pub fn list(&self) -> Vec<&'static str> {
        self.methods.iter().map(|m| m.name()).collect()
    }

    /// Names and usage strings in registration order.
    pub fn describe(&self) -> Vec<MethodDescriptor> {
        self.methods
            .iter()
            .map(|m| MethodDescriptor {
                name: m.name().to_owned(),
                usage: m.usage().to_owned(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}
