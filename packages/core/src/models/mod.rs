//! Data Models
//!
//! Core data structures shared by the store and service layers:
//!
//! - `Document` - One node of a space's tree with both ordering representations
//! - `Space` - Top-level scope with a root group
//! - `ContributionBatch` / `Contribution` - Staged writes awaiting review
//! - `TreeNode` / `WikiTree` / `PreviewNode` - Rendered tree views

mod contribution;
mod document;
mod space;
mod tree;

pub use contribution::{
    is_temp_id, new_temp_id, BatchStatus, Contribution, ContributionBatch, ContributionOperation,
    TEMP_ID_PREFIX,
};
pub use document::{db_now, next_modified_at, slugify, Document, DocumentUpdate, ValidationError};
pub use space::Space;
pub use tree::{ChangeKind, PreviewNode, TreeNode, WikiTree};
