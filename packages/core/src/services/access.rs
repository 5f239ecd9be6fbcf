//! Access Collaborators
//!
//! Role and permission evaluation lives outside the core. The core consumes
//! it through two seams:
//!
//! - [`AccessPolicy`]: "can actor write directly to this space/document?"
//!   plus the manager capability used for review
//! - [`VisibilityPredicate`]: the publish filter for the public view
//!
//! and one pure decision function, [`decide_write_mode`], that turns the
//! capability answer into Direct or Staged dispatch.

use crate::models::Document;
use async_trait::async_trait;
use std::collections::HashSet;

/// What a write request touches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// Creating under a space (the parent is checked as a document)
    Space { space_id: String },
    Document {
        space_id: String,
        document_id: String,
    },
}

impl WriteTarget {
    pub fn document(space_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self::Document {
            space_id: space_id.into(),
            document_id: document_id.into(),
        }
    }

    pub fn space_id(&self) -> &str {
        match self {
            WriteTarget::Space { space_id } | WriteTarget::Document { space_id, .. } => space_id,
        }
    }
}

/// External capability checks
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// Can `actor` mutate `target` without review?
    async fn can_write(&self, actor: &str, target: &WriteTarget) -> bool;

    /// Does `actor` hold the wiki manager capability?
    async fn is_manager(&self, actor: &str) -> bool;

    /// Can `actor` approve or reject batches for `space_id`?
    async fn can_review(&self, actor: &str, _space_id: &str) -> bool {
        self.is_manager(actor).await
    }

    async fn can_create_space(&self, actor: &str) -> bool {
        self.is_manager(actor).await
    }
}

/// Fixed manager set; managers write everything, everyone else stages
#[derive(Debug, Clone, Default)]
pub struct StaticRoleAccess {
    managers: HashSet<String>,
}

impl StaticRoleAccess {
    pub fn new<I, S>(managers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            managers: managers.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_manager(mut self, actor: impl Into<String>) -> Self {
        self.managers.insert(actor.into());
        self
    }
}

#[async_trait]
impl AccessPolicy for StaticRoleAccess {
    async fn can_write(&self, actor: &str, _target: &WriteTarget) -> bool {
        self.managers.contains(actor)
    }

    async fn is_manager(&self, actor: &str) -> bool {
        self.managers.contains(actor)
    }
}

/// Publish filter for the public view
pub trait VisibilityPredicate: Send + Sync {
    fn is_visible(&self, doc: &Document) -> bool;
}

/// Pages are visible once published. Groups are always candidates; the
/// public view prunes groups left without visible content.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishedOnly;

impl VisibilityPredicate for PublishedOnly {
    fn is_visible(&self, doc: &Document) -> bool {
        doc.is_group || doc.is_published
    }
}

/// How a write request is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Apply to the tree store now
    Direct,
    /// Record a contribution in a Draft batch
    Staged,
}

/// Decide between direct mutation and staging.
///
/// Direct only when the actor may write, no batch was named, and the request
/// does not reference any not-yet-merged (temp) identity.
pub fn decide_write_mode(
    can_write: bool,
    explicit_batch: bool,
    involves_staged: bool,
) -> WriteMode {
    if can_write && !explicit_batch && !involves_staged {
        WriteMode::Direct
    } else {
        WriteMode::Staged
    }
}
