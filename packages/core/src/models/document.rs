//! Document Node Model
//!
//! A `Document` is one entry in a space's tree. It carries two ordering
//! representations that must always agree:
//!
//! - `sort_order`: per-sibling sequence number (source of truth)
//! - `lft`/`rgt`: nested-set range pair derived from `sort_order` by a
//!   depth-first traversal (see `services::OrderingEngine`)
//!
//! For any two siblings A and B, `A.sort_order < B.sort_order` holds exactly
//! when `A.lft < B.lft`.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Validation errors for wiki records
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Invalid route: {0}")]
    InvalidRoute(String),

    #[error("Invalid batch status: {0}")]
    InvalidStatus(String),

    #[error("Invalid contribution operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// Document node in a wiki space.
///
/// # Fields
///
/// - `id`: Unique identifier (UUID v4)
/// - `space_id`: Owning space
/// - `title`: Display title
/// - `content`: Body reference (opaque to ordering and workflow)
/// - `route`: URL path, unique across all documents
/// - `is_group`: Container node that may hold children
/// - `is_published`: Visible in the public view
/// - `parent_id`: Parent document, `None` only for a space root
/// - `sort_order`: Position among siblings
/// - `lft`/`rgt`: Nested-set range pair
/// - `created_at`/`modified_at`: Timestamps, microsecond precision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub space_id: String,
    pub title: String,
    pub content: String,
    pub route: String,
    pub is_group: bool,
    pub is_published: bool,
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub lft: i64,
    pub rgt: i64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Document {
    /// Create a document under `parent_id` with unset ranges.
    ///
    /// Ranges are assigned by the next rebuild of the space.
    pub fn new(
        space_id: impl Into<String>,
        parent_id: Option<String>,
        title: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        let now = db_now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            space_id: space_id.into(),
            title: title.into(),
            content: String::new(),
            route: route.into(),
            is_group: false,
            is_published: false,
            parent_id,
            sort_order: 0,
            lft: 0,
            rgt: 0,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_group(mut self, is_group: bool) -> Self {
        self.is_group = is_group;
        self
    }

    pub fn with_published(mut self, is_published: bool) -> Self {
        self.is_published = is_published;
        self
    }

    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Whether this document is the root group of its space
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether `other` lies strictly inside this document's range
    pub fn contains(&self, other: &Document) -> bool {
        self.lft < other.lft && other.rgt < self.rgt
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingField("id".to_string()));
        }
        if self.space_id.is_empty() {
            return Err(ValidationError::MissingField("space_id".to_string()));
        }
        if self.title.trim().is_empty() {
            return Err(ValidationError::MissingField("title".to_string()));
        }
        if self.route.is_empty() {
            return Err(ValidationError::InvalidRoute(self.route.clone()));
        }
        if self.parent_id.as_deref() == Some(self.id.as_str()) {
            return Err(ValidationError::InvalidId(format!(
                "document {} cannot be its own parent",
                self.id
            )));
        }
        Ok(())
    }
}

/// Partial document update
///
/// `None` fields are left untouched. Used for direct edits and as the
/// proposed field set of edit contributions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub is_published: Option<bool>,
}

impl DocumentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_published(mut self, is_published: bool) -> Self {
        self.is_published = Some(is_published);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.is_published.is_none()
    }

    /// Whether applying this update to `doc` would change any field
    pub fn changes(&self, doc: &Document) -> bool {
        self.title.as_ref().is_some_and(|t| t != &doc.title)
            || self.content.as_ref().is_some_and(|c| c != &doc.content)
            || self.is_published.is_some_and(|p| p != doc.is_published)
    }

    /// Overlay `newer` on top of this update; fields set in `newer` win.
    pub fn merge(self, newer: DocumentUpdate) -> Self {
        Self {
            title: newer.title.or(self.title),
            content: newer.content.or(self.content),
            is_published: newer.is_published.or(self.is_published),
        }
    }
}

fn slug_cleanup() -> &'static Regex {
    static SLUG: OnceLock<Regex> = OnceLock::new();
    SLUG.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("slug pattern is valid"))
}

/// Lowercase, hyphen-separated slug of a title.
///
/// ```rust
/// # use wikiflow_core::models::slugify;
/// assert_eq!(slugify("Getting Started!"), "getting-started");
/// assert_eq!(slugify("  "), "page");
/// ```
pub fn slugify(title: &str) -> String {
    let lowered = title.to_lowercase();
    let slug = slug_cleanup().replace_all(&lowered, "-");
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "page".to_string()
    } else {
        slug.to_string()
    }
}

/// Current time truncated to the precision stored in the database
pub fn db_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Next `modified_at` value for a record last modified at `previous`.
///
/// Strictly greater than `previous` so every write is observable by
/// optimistic conflict checks, even within one clock tick.
pub fn next_modified_at(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = db_now();
    let floor = previous + Duration::microseconds(1);
    if now > previous {
        now
    } else {
        floor
    }
}
