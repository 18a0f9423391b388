// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandbox identity and lock tokens.
//!
//! A sandbox id is `namespace/name` — stable, globally unique, and derived
//! from the object rather than generated. Lock tokens are random nanoids
//! written to the lock annotation under the store's CAS.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Stable sandbox identity: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(SmolStr);

impl SandboxId {
    pub fn from_parts(namespace: &str, name: &str) -> Self {
        Self(SmolStr::new(format!("{namespace}/{name}")))
    }

    pub fn from_string(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Namespace half of the id; empty when the id has no separator.
    pub fn namespace(&self) -> &str {
        self.0.split_once('/').map(|(ns, _)| ns).unwrap_or("")
    }

    /// Name half of the id; the whole id when there is no separator.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SandboxId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for SandboxId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for SandboxId {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl std::borrow::Borrow<str> for SandboxId {
    fn borrow(&self) -> &str {
        self.0.as_str()
    }
}

/// Generate a random opaque lock token.
pub fn generate_lock_token() -> String {
    nanoid::nanoid!(21)
}

/// Generate a lowercase-alphanumeric object name suffix, safe for
/// store object names.
pub fn generate_name_suffix() -> String {
    const ALPHABET: [char; 36] = [
        '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h',
        'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z',
    ];
    nanoid::nanoid!(8, &ALPHABET)
}

#[cfg(test)]
#[path = "id_tests.rs"]
mod tests;
