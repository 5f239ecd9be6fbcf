//! Wiki Service
//!
//! Entry point for callers. `WikiService` owns the collaborators and routes
//! every operation through one unit of work:
//!
//! - Reads: spaces, documents, management and public tree views
//! - Maintenance: full rebuild and invariant verification
//! - Writes: create, edit, delete, move/reorder dispatched between direct
//!   mutation and staging (see `dispatch`)
//! - Review: contribution batch state machine and merge (see `review`)
//!
//! # Events
//!
//! Committed changes are published as [`DomainEvent`]s on a tokio broadcast
//! channel. Events are sent only after the transaction commits, so a
//! subscriber reacting to `TreeInvalidated` always reads the new state.

use crate::config::WikiConfig;
use crate::db::{DatabaseService, DomainEvent};
use crate::models::{slugify, Document, Space, TreeNode, WikiTree};
use crate::services::access::{AccessPolicy, PublishedOnly, VisibilityPredicate};
use crate::services::error::WikiError;
use crate::services::ordering::{OrderingEngine, OrderingViolation, RebuildReport};
use crate::services::tree_query::TreeQueryService;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Wiki tree and contribution workflow service
///
/// # Examples
///
/// ```no_run
/// # use wikiflow_core::db::DatabaseService;
/// # use wikiflow_core::services::{StaticRoleAccess, WikiService};
/// # use std::path::PathBuf;
/// # use std::sync::Arc;
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let db = Arc::new(DatabaseService::new(PathBuf::from("./data/wiki.db")).await?);
/// let access = Arc::new(StaticRoleAccess::new(["admin"]));
/// let service = WikiService::new(db, access);
///
/// let space = service.create_space("admin", "Handbook", "handbook").await?;
/// let tree = service.get_tree(&space.id).await?;
/// assert!(tree.children.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct WikiService {
    pub(crate) db: Arc<DatabaseService>,
    pub(crate) access: Arc<dyn AccessPolicy>,
    pub(crate) tree_query: TreeQueryService,
    pub(crate) event_tx: broadcast::Sender<DomainEvent>,
    pub(crate) config: WikiConfig,
}

impl WikiService {
    /// Create a service with the default configuration and the
    /// [`PublishedOnly`] visibility predicate
    pub fn new(db: Arc<DatabaseService>, access: Arc<dyn AccessPolicy>) -> Self {
        let config = WikiConfig {
            database_path: db.db_path.clone(),
            ..WikiConfig::default()
        };
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let visibility: Arc<dyn VisibilityPredicate> = Arc::new(PublishedOnly);
        Self {
            tree_query: TreeQueryService::new(db.clone(), visibility),
            db,
            access,
            event_tx,
            config,
        }
    }

    /// Open the database described by `config` and build a service on it
    pub async fn from_config(
        config: WikiConfig,
        access: Arc<dyn AccessPolicy>,
    ) -> Result<Self, WikiError> {
        let db = Arc::new(DatabaseService::from_config(&config).await?);
        Ok(Self::new(db, access).with_config(config))
    }

    /// Replace the configuration. Existing event subscribers are dropped
    /// when the channel capacity changes.
    pub fn with_config(mut self, config: WikiConfig) -> Self {
        if config.event_channel_capacity != self.config.event_channel_capacity {
            let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
            self.event_tx = event_tx;
        }
        self.config = config;
        self
    }

    /// Replace the publish predicate used by the public view
    pub fn with_visibility(mut self, visibility: Arc<dyn VisibilityPredicate>) -> Self {
        self.tree_query = TreeQueryService::new(self.db.clone(), visibility);
        self
    }

    pub fn db(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    pub fn config(&self) -> &WikiConfig {
        &self.config
    }

    /// Subscribe to domain events
    ///
    /// Receivers that fall more than `event_channel_capacity` events behind
    /// observe `RecvError::Lagged` and should re-read state.
    pub fn subscribe_to_events(&self) -> broadcast::Receiver<DomainEvent> {
        self.event_tx.subscribe()
    }

    /// Publish events for a committed unit of work
    pub(crate) fn emit_events(&self, events: Vec<DomainEvent>) {
        for event in events {
            tracing::debug!("Emitting {} event", event.event_type());
            // No subscribers is not an error
            let _ = self.event_tx.send(event);
        }
    }

    //
    // SPACES AND DOCUMENTS
    //

    /// Create a space together with its root group document.
    ///
    /// `route` is slugified; an empty route is derived from `name`.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` if the actor may not create spaces
    /// - `Validation` if the name is empty or the route is taken
    #[tracing::instrument(skip(self))]
    pub async fn create_space(
        &self,
        actor: &str,
        name: &str,
        route: &str,
    ) -> Result<Space, WikiError> {
        if !self.access.can_create_space(actor).await {
            return Err(WikiError::permission_denied(actor, "create spaces"));
        }
        if name.trim().is_empty() {
            return Err(WikiError::validation("space name cannot be empty"));
        }
        let route = if route.trim().is_empty() {
            slugify(name)
        } else {
            slugify(route)
        };

        let tx = self.db.begin().await?;
        let result = async {
            if tx.space_route_exists(&route).await? || tx.route_exists(&route).await? {
                return Err(WikiError::validation(format!(
                    "route '{}' is already in use",
                    route
                )));
            }
            let space_id = uuid::Uuid::new_v4().to_string();
            let root = Document::new(&space_id, None, name.trim(), route.clone())
                .with_group(true)
                .with_published(true);
            let space = Space {
                id: space_id,
                name: name.trim().to_string(),
                route: route.clone(),
                root_group: root.id.clone(),
                created_at: root.created_at,
            };
            tx.insert_space(&space).await?;
            tx.insert_document(&root).await?;
            OrderingEngine::rebuild_space(&tx, &space.id).await?;
            Ok::<_, WikiError>(space)
        }
        .await;
        let space = tx.finish(result).await?;

        tracing::info!("Created space {} ({})", space.id, space.route);
        self.emit_events(vec![
            DomainEvent::DocumentCreated {
                space_id: space.id.clone(),
                document_id: space.root_group.clone(),
            },
            DomainEvent::TreeInvalidated {
                space_id: space.id.clone(),
            },
        ]);
        Ok(space)
    }

    pub async fn get_space(&self, space_id: &str) -> Result<Space, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = tx.get_space(space_id).await;
        tx.finish(result)
            .await?
            .ok_or_else(|| WikiError::space_not_found(space_id))
    }

    pub async fn list_spaces(&self) -> Result<Vec<Space>, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = tx.list_spaces().await;
        Ok(tx.finish(result).await?)
    }

    pub async fn get_document(&self, document_id: &str) -> Result<Document, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = tx.get_document(document_id).await;
        tx.finish(result)
            .await?
            .ok_or_else(|| WikiError::document_not_found(document_id))
    }

    //
    // TREE VIEWS
    //

    /// Management view: every document, nested by parent, by `sort_order`
    pub async fn get_tree(&self, space_id: &str) -> Result<WikiTree, WikiError> {
        self.tree_query.get_tree(space_id).await
    }

    /// Public view: visible descendants of the root, by range containment
    pub async fn get_public_tree(&self, space_id: &str) -> Result<Vec<TreeNode>, WikiError> {
        self.tree_query.get_public_tree(space_id).await
    }

    //
    // MAINTENANCE
    //

    /// Re-derive every range of a space from `sort_order`
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_tree(&self, space_id: &str) -> Result<RebuildReport, WikiError> {
        let tx = self.db.begin().await?;
        let result = OrderingEngine::rebuild_space(&tx, space_id).await;
        let report = tx.finish(result).await?;

        tracing::info!(
            "Rebuilt space {}: {} of {} documents updated",
            space_id,
            report.updated,
            report.documents
        );
        self.emit_events(vec![DomainEvent::TreeInvalidated {
            space_id: space_id.to_string(),
        }]);
        Ok(report)
    }

    /// Check the ordering invariants of a space without changing it
    pub async fn verify_tree(&self, space_id: &str) -> Result<Vec<OrderingViolation>, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = async {
            let space = tx
                .get_space(space_id)
                .await?
                .ok_or_else(|| WikiError::space_not_found(space_id))?;
            let documents = tx.space_documents(space_id).await?;
            Ok::<_, WikiError>((space, documents))
        }
        .await;
        let (space, documents) = tx.finish(result).await?;
        Ok(OrderingEngine::verify(&space.root_group, &documents))
    }
}
