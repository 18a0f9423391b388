// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orchestrator error taxonomy.

use thiserror::Error;

/// Failures surfaced by an [`crate::Orchestrator`] backend.
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Resource-version CAS lost; the caller should re-read and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The object is malformed for the backend.
    #[error("invalid object: {0}")]
    Invalid(String),

    /// Transport or server-side failure.
    #[error("orchestrator api error: {0}")]
    Api(String),
}

impl OrchestratorError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, OrchestratorError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound(_))
    }
}
