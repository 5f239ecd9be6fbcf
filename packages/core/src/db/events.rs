//! Domain Events
//!
//! Events emitted by `WikiService` after a unit of work commits. They follow
//! the observer pattern: caches and other consumers subscribe to a tokio
//! broadcast channel without coupling to the store.
//!
//! # Event Flow
//!
//! 1. A service operation commits its transaction
//! 2. Domain events are emitted via the broadcast channel
//! 3. All subscribers receive the events asynchronously
//!
//! `TreeInvalidated` is the cache-invalidation signal: it is sent for every
//! committed operation that changes a space's tree, so no reader may keep
//! serving the previous ordering.

use crate::models::BatchStatus;
use serde::{Deserialize, Serialize};

/// Domain events emitted by `WikiService`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    /// A document was inserted directly or by a merge
    DocumentCreated {
        space_id: String,
        document_id: String,
    },
    /// A document's own fields or placement changed
    DocumentUpdated {
        space_id: String,
        document_id: String,
    },
    DocumentDeleted {
        space_id: String,
        document_id: String,
    },
    /// Any ordering or content of the space's tree may have changed
    TreeInvalidated { space_id: String },
    /// A contribution was created, updated or discarded in a Draft batch
    ContributionStaged {
        batch_id: String,
        contribution_id: String,
    },
    BatchStatusChanged {
        batch_id: String,
        space_id: String,
        status: BatchStatus,
    },
}

impl DomainEvent {
    /// Get the event type as a string for logging/debugging
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::DocumentCreated { .. } => "document:created",
            DomainEvent::DocumentUpdated { .. } => "document:updated",
            DomainEvent::DocumentDeleted { .. } => "document:deleted",
            DomainEvent::TreeInvalidated { .. } => "tree:invalidated",
            DomainEvent::ContributionStaged { .. } => "contribution:staged",
            DomainEvent::BatchStatusChanged { .. } => "batch:status",
        }
    }

    /// Space affected by the event, when it names one
    pub fn space_id(&self) -> Option<&str> {
        match self {
            DomainEvent::DocumentCreated { space_id, .. }
            | DomainEvent::DocumentUpdated { space_id, .. }
            | DomainEvent::DocumentDeleted { space_id, .. }
            | DomainEvent::TreeInvalidated { space_id }
            | DomainEvent::BatchStatusChanged { space_id, .. } => Some(space_id),
            DomainEvent::ContributionStaged { .. } => None,
        }
    }
}
