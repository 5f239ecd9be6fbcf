//! Contribution Batch and Contribution Models
//!
//! Unprivileged writes are staged as `Contribution` records grouped into a
//! `ContributionBatch`. A batch moves through a small state machine:
//!
//! ```text
//! Draft ──submit──▶ Submitted ──approve──▶ Merged
//!   ▲                  │
//!   └────withdraw──────┤
//!                      └──reject───▶ Rejected
//! ```
//!
//! A create contribution is addressable before it merges through its
//! `temp_id`, a batch-local identity carrying the [`TEMP_ID_PREFIX`].

use super::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved prefix for identities of not-yet-merged documents
pub const TEMP_ID_PREFIX: &str = "temp_";

/// Whether `id` names a staged, not-yet-persisted document
pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Fresh batch-local temporary identity
pub fn new_temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4().simple())
}

/// Review state of a contribution batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Draft,
    Submitted,
    Merged,
    Rejected,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Draft => "draft",
            BatchStatus::Submitted => "submitted",
            BatchStatus::Merged => "merged",
            BatchStatus::Rejected => "rejected",
        }
    }

    /// Merged and Rejected batches never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Merged | BatchStatus::Rejected)
    }

    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (BatchStatus::Draft, BatchStatus::Submitted)
                | (BatchStatus::Submitted, BatchStatus::Draft)
                | (BatchStatus::Submitted, BatchStatus::Merged)
                | (BatchStatus::Submitted, BatchStatus::Rejected)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(BatchStatus::Draft),
            "submitted" => Ok(BatchStatus::Submitted),
            "merged" => Ok(BatchStatus::Merged),
            "rejected" => Ok(BatchStatus::Rejected),
            other => Err(ValidationError::InvalidStatus(other.to_string())),
        }
    }
}

/// Kind of staged write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContributionOperation {
    Create,
    Edit,
    Delete,
    Move,
    Reorder,
}

impl ContributionOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContributionOperation::Create => "create",
            ContributionOperation::Edit => "edit",
            ContributionOperation::Delete => "delete",
            ContributionOperation::Move => "move",
            ContributionOperation::Reorder => "reorder",
        }
    }

    /// Every operation except create addresses an existing document
    pub fn requires_target(&self) -> bool {
        !matches!(self, ContributionOperation::Create)
    }

    /// Operations that must be checked against the target's base timestamp
    pub fn is_conflict_checked(&self) -> bool {
        matches!(
            self,
            ContributionOperation::Edit | ContributionOperation::Delete
        )
    }
}

impl fmt::Display for ContributionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContributionOperation {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ContributionOperation::Create),
            "edit" => Ok(ContributionOperation::Edit),
            "delete" => Ok(ContributionOperation::Delete),
            "move" => Ok(ContributionOperation::Move),
            "reorder" => Ok(ContributionOperation::Reorder),
            other => Err(ValidationError::InvalidOperation(other.to_string())),
        }
    }
}

/// Unit of staging, review and atomic merge for one actor in one space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionBatch {
    pub id: String,
    pub space_id: String,
    /// Actor that staged the contributions
    pub owner: String,
    pub title: String,
    pub status: BatchStatus,
    /// Reviewer comment, set on reject
    pub review_comment: Option<String>,
    pub reviewed_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl ContributionBatch {
    pub fn new_draft(
        space_id: impl Into<String>,
        owner: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let now = super::db_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            space_id: space_id.into(),
            owner: owner.into(),
            title: title.into(),
            status: BatchStatus::Draft,
            review_comment: None,
            reviewed_by: None,
            created_at: now,
            modified_at: now,
            submitted_at: None,
            merged_at: None,
        }
    }

    pub fn is_owned_by(&self, actor: &str) -> bool {
        self.owner == actor
    }
}

/// One staged operation inside a batch.
///
/// # Fields
///
/// - `seq`: Position within the batch, the default merge order
/// - `target_document`: Existing document (or temp id) for edit/delete/move/reorder
/// - `temp_id`: Identity of the document a create contribution will produce
/// - `parent_ref`: Target parent for create and move, real or temp
/// - `proposed_*`: Fields a merge will write
/// - `siblings_order`: Sibling identities captured at staging, real or temp
/// - `base_modified_at`: Target's `modified_at` when first staged
/// - `merged_document`: Real id produced by merging a create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub id: String,
    pub batch_id: String,
    pub seq: i64,
    pub operation: ContributionOperation,
    pub target_document: Option<String>,
    pub temp_id: Option<String>,
    pub parent_ref: Option<String>,
    pub proposed_title: Option<String>,
    pub proposed_content: Option<String>,
    pub proposed_is_published: Option<bool>,
    pub proposed_is_group: Option<bool>,
    pub proposed_sort_order: Option<i64>,
    pub siblings_order: Option<Vec<String>>,
    pub base_modified_at: Option<DateTime<Utc>>,
    pub merged_document: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Contribution {
    pub fn new(batch_id: impl Into<String>, operation: ContributionOperation) -> Self {
        let now = super::db_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            seq: 0,
            operation,
            target_document: None,
            temp_id: None,
            parent_ref: None,
            proposed_title: None,
            proposed_content: None,
            proposed_is_published: None,
            proposed_is_group: None,
            proposed_sort_order: None,
            siblings_order: None,
            base_modified_at: None,
            merged_document: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Temp identities this contribution needs resolved before it can apply.
    ///
    /// Sibling lists are excluded: unresolved temps there are skipped.
    pub fn temp_dependencies(&self) -> Vec<&str> {
        let mut deps = Vec::new();
        if self.operation.requires_target() {
            if let Some(target) = self.target_document.as_deref().filter(|t| is_temp_id(t)) {
                deps.push(target);
            }
        }
        if let Some(parent) = self.parent_ref.as_deref().filter(|p| is_temp_id(p)) {
            deps.push(parent);
        }
        deps
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_id.is_empty() {
            return Err(ValidationError::MissingField("batch_id".to_string()));
        }
        if self.operation.requires_target() && self.target_document.is_none() {
            return Err(ValidationError::MissingField("target_document".to_string()));
        }
        match self.operation {
            ContributionOperation::Create => {
                let temp_id = self
                    .temp_id
                    .as_deref()
                    .ok_or_else(|| ValidationError::MissingField("temp_id".to_string()))?;
                if !is_temp_id(temp_id) {
                    return Err(ValidationError::InvalidId(temp_id.to_string()));
                }
                if self.parent_ref.is_none() {
                    return Err(ValidationError::MissingField("parent_ref".to_string()));
                }
                if self
                    .proposed_title
                    .as_deref()
                    .map_or(true, |t| t.trim().is_empty())
                {
                    return Err(ValidationError::MissingField("proposed_title".to_string()));
                }
            }
            ContributionOperation::Move if self.parent_ref.is_none() => {
                return Err(ValidationError::MissingField("parent_ref".to_string()));
            }
            _ => {}
        }
        Ok(())
    }
}
