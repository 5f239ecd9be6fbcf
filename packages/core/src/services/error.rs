//! Service Layer Error Types
//!
//! This module defines error types for wiki service operations, providing
//! the error taxonomy surfaced to callers.

use crate::db::DatabaseError;
use crate::models::ValidationError;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Wiki service errors
///
/// - `NotFound`: unknown document, space, batch or contribution
/// - `PermissionDenied`: capability check failed for a direct-only operation
/// - `Validation`: rule violations (empty submit, non-owner or non-manager
///   transitions, invalid placement)
/// - `Conflict`: stale base timestamp during a merge; always batch-fatal
#[derive(Error, Debug)]
pub enum WikiError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Permission denied: {actor} cannot {action}")]
    PermissionDenied { actor: String, action: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(
        "Conflict detected: document {document_id} was modified at {actual} after the contribution was based on {expected}"
    )]
    Conflict {
        document_id: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(#[from] ValidationError),

    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),
}

impl WikiError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn document_not_found(id: impl Into<String>) -> Self {
        Self::not_found("Document", id)
    }

    pub fn space_not_found(id: impl Into<String>) -> Self {
        Self::not_found("Space", id)
    }

    pub fn batch_not_found(id: impl Into<String>) -> Self {
        Self::not_found("Contribution batch", id)
    }

    pub fn contribution_not_found(id: impl Into<String>) -> Self {
        Self::not_found("Contribution", id)
    }

    pub fn permission_denied(actor: impl Into<String>, action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            actor: actor.into(),
            action: action.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Base timestamp of a contribution no longer matches its target
    pub fn conflict(
        document_id: impl Into<String>,
        expected: Option<DateTime<Utc>>,
        actual: DateTime<Utc>,
    ) -> Self {
        Self::Conflict {
            document_id: document_id.into(),
            expected: expected.map_or_else(|| "no base timestamp".to_string(), |t| t.to_rfc3339()),
            actual: actual.to_rfc3339(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidRecord(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}
