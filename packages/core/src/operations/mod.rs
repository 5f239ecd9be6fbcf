//! Write Operation Types
//!
//! Request parameters accepted by the write operations of `WikiService`
//! and the outcome they report.

use crate::models::{Contribution, ContributionBatch, Document};
use serde::{Deserialize, Serialize};

/// Parameters for creating a document
///
/// # Parent References
///
/// `parent_id` names either an existing group document or the `temp_id` of
/// a group staged by an earlier create in the caller's Draft batch. A temp
/// parent always stages the create, even for actors allowed to write
/// directly.
///
/// # Ordering
///
/// With `sort_order: None` the document is appended after its last sibling.
/// An explicit value that collides with an existing sibling inserts the new
/// document before it; later siblings shift by one.
///
/// # Examples
///
/// ```no_run
/// # use wikiflow_core::operations::CreateDocumentParams;
/// let params = CreateDocumentParams::new("space-1", "root-group", "Getting Started")
///     .with_content("# Welcome")
///     .with_sort_order(0)
///     .published();
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDocumentParams {
    pub space_id: String,
    /// Parent group, real id or temp id
    pub parent_id: String,
    pub title: String,
    pub content: String,
    /// Create a group (container) instead of a page
    pub is_group: bool,
    pub is_published: bool,
    /// Position among siblings (None appends to end)
    pub sort_order: Option<i64>,
}

impl CreateDocumentParams {
    pub fn new(
        space_id: impl Into<String>,
        parent_id: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            space_id: space_id.into(),
            parent_id: parent_id.into(),
            title: title.into(),
            content: String::new(),
            is_group: false,
            is_published: false,
            sort_order: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    pub fn group(mut self) -> Self {
        self.is_group = true;
        self
    }

    pub fn published(mut self) -> Self {
        self.is_published = true;
        self
    }
}

/// Move and/or reorder request for one document
///
/// `siblings` is the client's full intended order of the children of
/// `new_parent`, which may interleave temp ids. Each real id receives its
/// positional index as `sort_order`; temp ids keep their slot empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    /// Document being placed, real id or temp id
    pub document_id: String,
    /// Target parent group, real id or temp id
    pub new_parent: String,
    /// Target position, used when `document_id` is absent from `siblings`
    pub new_index: i64,
    pub siblings: Vec<String>,
}

impl ReorderRequest {
    pub fn new(
        document_id: impl Into<String>,
        new_parent: impl Into<String>,
        new_index: i64,
        siblings: Vec<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            new_parent: new_parent.into(),
            new_index,
            siblings,
        }
    }
}

/// Result of a write dispatched by `WikiService`
///
/// Direct writes report `is_contribution = false` with the stored
/// `document`. Staged writes report `is_contribution = true` with the batch
/// and the upserted contribution (`None` when staging discarded a create).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub is_contribution: bool,
    pub document: Option<Document>,
    pub contribution: Option<Contribution>,
    pub batch: Option<ContributionBatch>,
}

impl WriteOutcome {
    pub fn direct(document: Option<Document>) -> Self {
        Self {
            is_contribution: false,
            document,
            contribution: None,
            batch: None,
        }
    }

    pub fn staged(batch: ContributionBatch, contribution: Option<Contribution>) -> Self {
        Self {
            is_contribution: true,
            document: None,
            contribution,
            batch: Some(batch),
        }
    }

    /// Temp id assigned to a staged create
    pub fn temp_id(&self) -> Option<&str> {
        self.contribution.as_ref().and_then(|c| c.temp_id.as_deref())
    }
}
