//! Write Dispatch
//!
//! Every write request resolves to one of two paths (see
//! [`decide_write_mode`]):
//!
//! - **Direct**: applied to the tree store, followed by a full range rebuild
//!   in the same transaction
//! - **Staged**: upserted as a contribution in the actor's Draft batch (or
//!   an explicitly named one)
//!
//! Requests that reference a temp id always stage. A temp id is only ever
//! resolved inside the batch that staged its create.

use crate::db::{DomainEvent, StoreTransaction};
use crate::models::{
    db_now, is_temp_id, new_temp_id, slugify, BatchStatus, Contribution, ContributionBatch,
    ContributionOperation, Document, DocumentUpdate,
};
use crate::operations::{CreateDocumentParams, ReorderRequest, WriteOutcome};
use crate::services::access::{decide_write_mode, WriteMode, WriteTarget};
use crate::services::error::WikiError;
use crate::services::ordering::OrderingEngine;
use crate::services::wiki_service::WikiService;
use std::collections::HashSet;

fn check_update(update: &DocumentUpdate) -> Result<(), WikiError> {
    if update.is_empty() {
        return Err(WikiError::validation("update does not change any field"));
    }
    if update.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(WikiError::validation("title cannot be empty"));
    }
    Ok(())
}

fn staged_update(c: &Contribution) -> DocumentUpdate {
    DocumentUpdate {
        title: c.proposed_title.clone(),
        content: c.proposed_content.clone(),
        is_published: c.proposed_is_published,
    }
}

fn apply_staged_update(c: &mut Contribution, update: DocumentUpdate) {
    let merged = staged_update(c).merge(update);
    c.proposed_title = merged.title;
    c.proposed_content = merged.content;
    c.proposed_is_published = merged.is_published;
}

fn staged_event(batch: &ContributionBatch, contribution_id: &str) -> DomainEvent {
    DomainEvent::ContributionStaged {
        batch_id: batch.id.clone(),
        contribution_id: contribution_id.to_string(),
    }
}

impl WikiService {
    //
    // STAGING HELPERS
    //

    /// The actor's Draft batch for `space_id`, created on first use
    pub(crate) async fn draft_batch_in(
        &self,
        tx: &StoreTransaction,
        actor: &str,
        space_id: &str,
    ) -> Result<ContributionBatch, WikiError> {
        if let Some(batch) = tx.find_draft_batch(actor, space_id).await? {
            return Ok(batch);
        }
        let batch =
            ContributionBatch::new_draft(space_id, actor, self.config.default_batch_title.clone());
        tx.insert_batch(&batch).await?;
        tracing::debug!("Opened draft batch {} for {} in {}", batch.id, actor, space_id);
        Ok(batch)
    }

    pub(crate) fn ensure_stageable(
        batch: &ContributionBatch,
        actor: &str,
        space_id: &str,
    ) -> Result<(), WikiError> {
        if !batch.is_owned_by(actor) {
            return Err(WikiError::validation(format!(
                "batch {} is not owned by {}",
                batch.id, actor
            )));
        }
        if batch.status != BatchStatus::Draft {
            return Err(WikiError::validation(format!(
                "batch {} is {}, only draft batches accept contributions",
                batch.id, batch.status
            )));
        }
        if batch.space_id != space_id {
            return Err(WikiError::validation(format!(
                "batch {} belongs to another space",
                batch.id
            )));
        }
        Ok(())
    }

    /// Batch a staged write for real documents lands in
    async fn staging_batch(
        &self,
        tx: &StoreTransaction,
        actor: &str,
        space_id: &str,
        explicit: Option<&str>,
    ) -> Result<ContributionBatch, WikiError> {
        match explicit {
            Some(batch_id) => {
                let batch = tx
                    .get_batch(batch_id)
                    .await?
                    .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
                Self::ensure_stageable(&batch, actor, space_id)?;
                Ok(batch)
            }
            None => self.draft_batch_in(tx, actor, space_id).await,
        }
    }

    /// The create that defined `temp_id` and the batch holding it.
    ///
    /// The batch must be a Draft owned by `actor`, and match `explicit` when
    /// one was named.
    async fn staged_create(
        tx: &StoreTransaction,
        actor: &str,
        temp_id: &str,
        explicit: Option<&str>,
    ) -> Result<(ContributionBatch, Contribution), WikiError> {
        let create = tx
            .find_contribution_by_temp_id(temp_id)
            .await?
            .ok_or_else(|| WikiError::not_found("Staged document", temp_id))?;
        let batch = tx
            .get_batch(&create.batch_id)
            .await?
            .ok_or_else(|| WikiError::batch_not_found(&create.batch_id))?;
        Self::ensure_stageable(&batch, actor, &batch.space_id)?;
        if explicit.is_some_and(|id| id != batch.id) {
            return Err(WikiError::validation(format!(
                "{} was staged in batch {}",
                temp_id, batch.id
            )));
        }
        Ok((batch, create))
    }

    /// A staged group usable as parent inside `batch`
    async fn staged_group(
        tx: &StoreTransaction,
        batch: &ContributionBatch,
        temp_id: &str,
    ) -> Result<Contribution, WikiError> {
        let create = tx
            .find_contribution_by_temp_id(temp_id)
            .await?
            .ok_or_else(|| WikiError::not_found("Staged document", temp_id))?;
        if create.batch_id != batch.id {
            return Err(WikiError::validation(format!(
                "{} was staged in another batch",
                temp_id
            )));
        }
        if create.proposed_is_group != Some(true) {
            return Err(WikiError::validation(format!("{} is not a group", temp_id)));
        }
        Ok(create)
    }

    /// An existing group of `space_id`
    async fn real_parent(
        tx: &StoreTransaction,
        space_id: &str,
        parent_id: &str,
    ) -> Result<Document, WikiError> {
        let parent = tx
            .get_document(parent_id)
            .await?
            .ok_or_else(|| WikiError::document_not_found(parent_id))?;
        if parent.space_id != space_id {
            return Err(WikiError::validation(format!(
                "parent {} belongs to another space",
                parent_id
            )));
        }
        if !parent.is_group {
            return Err(WikiError::validation(format!(
                "parent {} is not a group",
                parent_id
            )));
        }
        Ok(parent)
    }

    /// Check the parent a staged placement names, real or temp
    async fn staged_parent(
        tx: &StoreTransaction,
        batch: &ContributionBatch,
        parent_ref: &str,
    ) -> Result<(), WikiError> {
        if is_temp_id(parent_ref) {
            Self::staged_group(tx, batch, parent_ref).await?;
        } else {
            Self::real_parent(tx, &batch.space_id, parent_ref).await?;
        }
        Ok(())
    }

    async fn touch_batch(
        tx: &StoreTransaction,
        mut batch: ContributionBatch,
    ) -> Result<ContributionBatch, WikiError> {
        batch.modified_at = db_now();
        tx.update_batch(&batch).await?;
        Ok(batch)
    }

    async fn load_document(&self, document_id: &str) -> Result<Document, WikiError> {
        self.get_document(document_id).await
    }

    //
    // CREATE
    //

    /// Create a document under a group.
    ///
    /// Dispatches Direct when the actor may write to the parent, no batch is
    /// named, and the parent is a real document. Otherwise stages a create
    /// contribution whose `temp_id` later requests can reference.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown space, parent or batch
    /// - `Validation` for an empty title, a non-group parent, a negative
    ///   sort order, or a batch the actor cannot stage into
    #[tracing::instrument(skip(self, params), fields(space_id = %params.space_id))]
    pub async fn create_document(
        &self,
        actor: &str,
        params: CreateDocumentParams,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        if params.title.trim().is_empty() {
            return Err(WikiError::validation("title cannot be empty"));
        }
        if params.sort_order.is_some_and(|order| order < 0) {
            return Err(WikiError::validation("sort_order must be non-negative"));
        }

        let involves_staged = is_temp_id(&params.parent_id);
        let target = WriteTarget::document(&params.space_id, &params.parent_id);
        let can_write = self.access.can_write(actor, &target).await;
        match decide_write_mode(can_write, batch_id.is_some(), involves_staged) {
            WriteMode::Direct => self.create_direct(params).await,
            WriteMode::Staged => self.stage_create(actor, params, batch_id).await,
        }
    }

    async fn create_direct(&self, params: CreateDocumentParams) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            tx.get_space(&params.space_id)
                .await?
                .ok_or_else(|| WikiError::space_not_found(&params.space_id))?;
            let parent = Self::real_parent(&tx, &params.space_id, &params.parent_id).await?;

            let sort_order = match params.sort_order {
                Some(order) => order,
                None => tx
                    .max_child_sort_order(&parent.id)
                    .await?
                    .map_or(0, |max| max + 1),
            };
            let title = params.title.trim().to_string();
            let route = tx
                .unique_route(&format!("{}/{}", parent.route, slugify(&title)))
                .await?;
            let doc = Document::new(&params.space_id, Some(parent.id.clone()), title, route)
                .with_content(params.content.clone())
                .with_group(params.is_group)
                .with_published(params.is_published)
                .with_sort_order(sort_order);
            doc.validate()?;
            tx.insert_document(&doc).await?;

            OrderingEngine::rebuild_space(&tx, &params.space_id).await?;
            tx.get_document(&doc.id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(&doc.id))
        }
        .await;
        let doc = tx.finish(result).await?;

        tracing::info!("Created document {} in space {}", doc.id, doc.space_id);
        self.emit_events(vec![
            DomainEvent::DocumentCreated {
                space_id: doc.space_id.clone(),
                document_id: doc.id.clone(),
            },
            DomainEvent::TreeInvalidated {
                space_id: doc.space_id.clone(),
            },
        ]);
        Ok(WriteOutcome::direct(Some(doc)))
    }

    async fn stage_create(
        &self,
        actor: &str,
        params: CreateDocumentParams,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let batch = if is_temp_id(&params.parent_id) {
                let (batch, _) = Self::staged_create(&tx, actor, &params.parent_id, batch_id).await?;
                if batch.space_id != params.space_id {
                    return Err(WikiError::validation(format!(
                        "{} belongs to another space",
                        params.parent_id
                    )));
                }
                Self::staged_group(&tx, &batch, &params.parent_id).await?;
                batch
            } else {
                tx.get_space(&params.space_id)
                    .await?
                    .ok_or_else(|| WikiError::space_not_found(&params.space_id))?;
                let batch = self
                    .staging_batch(&tx, actor, &params.space_id, batch_id)
                    .await?;
                Self::real_parent(&tx, &params.space_id, &params.parent_id).await?;
                batch
            };

            let mut c = Contribution::new(&batch.id, ContributionOperation::Create);
            c.seq = tx.next_contribution_seq(&batch.id).await?;
            c.temp_id = Some(new_temp_id());
            c.parent_ref = Some(params.parent_id.clone());
            c.proposed_title = Some(params.title.trim().to_string());
            c.proposed_content = Some(params.content.clone());
            c.proposed_is_group = Some(params.is_group);
            c.proposed_is_published = Some(params.is_published);
            c.proposed_sort_order = params.sort_order;
            c.validate()?;
            tx.insert_contribution(&c).await?;

            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, c))
        }
        .await;
        let (batch, c) = tx.finish(result).await?;

        tracing::debug!(
            "Staged create {} in batch {}",
            c.temp_id.as_deref().unwrap_or_default(),
            batch.id
        );
        self.emit_events(vec![staged_event(&batch, &c.id)]);
        Ok(WriteOutcome::staged(batch, Some(c)))
    }

    //
    // EDIT
    //

    /// Update a document's title, content or publish flag.
    ///
    /// A temp id edits the staged create in place. Staged edits of a real
    /// document fold into one contribution per batch, keeping the base
    /// timestamp captured the first time.
    #[tracing::instrument(skip(self, update))]
    pub async fn edit_document(
        &self,
        actor: &str,
        document_id: &str,
        update: DocumentUpdate,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        check_update(&update)?;

        if is_temp_id(document_id) {
            return self
                .edit_staged_create(actor, document_id, update, batch_id)
                .await;
        }

        let doc = self.load_document(document_id).await?;
        let target = WriteTarget::document(&doc.space_id, &doc.id);
        let can_write = self.access.can_write(actor, &target).await;
        match decide_write_mode(can_write, batch_id.is_some(), false) {
            WriteMode::Direct => self.edit_direct(document_id, update).await,
            WriteMode::Staged => self.stage_edit(actor, document_id, update, batch_id).await,
        }
    }

    async fn edit_direct(
        &self,
        document_id: &str,
        update: DocumentUpdate,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let doc = tx
                .get_document(document_id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(document_id))?;
            let changed = update.changes(&doc);
            let stored = tx.update_document(&doc, &update).await?;
            Ok::<_, WikiError>((stored, changed))
        }
        .await;
        let (doc, changed) = tx.finish(result).await?;

        if changed {
            self.emit_events(vec![
                DomainEvent::DocumentUpdated {
                    space_id: doc.space_id.clone(),
                    document_id: doc.id.clone(),
                },
                DomainEvent::TreeInvalidated {
                    space_id: doc.space_id.clone(),
                },
            ]);
        }
        Ok(WriteOutcome::direct(Some(doc)))
    }

    async fn edit_staged_create(
        &self,
        actor: &str,
        temp_id: &str,
        update: DocumentUpdate,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let (batch, mut create) = Self::staged_create(&tx, actor, temp_id, batch_id).await?;
            apply_staged_update(&mut create, update);
            create.modified_at = db_now();
            create.validate()?;
            tx.update_contribution(&create).await?;
            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, create))
        }
        .await;
        let (batch, create) = tx.finish(result).await?;

        self.emit_events(vec![staged_event(&batch, &create.id)]);
        Ok(WriteOutcome::staged(batch, Some(create)))
    }

    async fn stage_edit(
        &self,
        actor: &str,
        document_id: &str,
        update: DocumentUpdate,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let doc = tx
                .get_document(document_id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(document_id))?;
            let batch = self
                .staging_batch(&tx, actor, &doc.space_id, batch_id)
                .await?;

            let existing = tx
                .find_staged(&batch.id, &[ContributionOperation::Edit], &doc.id)
                .await?;
            let c = match existing {
                Some(mut c) => {
                    apply_staged_update(&mut c, update);
                    c.modified_at = db_now();
                    tx.update_contribution(&c).await?;
                    c
                }
                None => {
                    let mut c = Contribution::new(&batch.id, ContributionOperation::Edit);
                    c.seq = tx.next_contribution_seq(&batch.id).await?;
                    c.target_document = Some(doc.id.clone());
                    c.base_modified_at = Some(doc.modified_at);
                    apply_staged_update(&mut c, update);
                    c.validate()?;
                    tx.insert_contribution(&c).await?;
                    c
                }
            };
            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, c))
        }
        .await;
        let (batch, c) = tx.finish(result).await?;

        self.emit_events(vec![staged_event(&batch, &c.id)]);
        Ok(WriteOutcome::staged(batch, Some(c)))
    }

    //
    // DELETE
    //

    /// Delete a document, or discard a staged create when given a temp id.
    ///
    /// Only leaf documents can be deleted; the root never can.
    #[tracing::instrument(skip(self))]
    pub async fn delete_document(
        &self,
        actor: &str,
        document_id: &str,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        if is_temp_id(document_id) {
            return self.discard_staged_create(actor, document_id, batch_id).await;
        }

        let doc = self.load_document(document_id).await?;
        if doc.is_root() {
            return Err(WikiError::validation("the space root cannot be deleted"));
        }
        let target = WriteTarget::document(&doc.space_id, &doc.id);
        let can_write = self.access.can_write(actor, &target).await;
        match decide_write_mode(can_write, batch_id.is_some(), false) {
            WriteMode::Direct => self.delete_direct(document_id).await,
            WriteMode::Staged => self.stage_delete(actor, document_id, batch_id).await,
        }
    }

    async fn delete_direct(&self, document_id: &str) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let doc = tx
                .get_document(document_id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(document_id))?;
            if doc.is_root() {
                return Err(WikiError::validation("the space root cannot be deleted"));
            }
            if tx.count_children(&doc.id).await? > 0 {
                return Err(WikiError::validation(format!(
                    "document {} still has children",
                    doc.id
                )));
            }
            tx.delete_document(&doc.id).await?;
            OrderingEngine::rebuild_space(&tx, &doc.space_id).await?;
            Ok::<_, WikiError>(doc)
        }
        .await;
        let doc = tx.finish(result).await?;

        tracing::info!("Deleted document {} from space {}", doc.id, doc.space_id);
        self.emit_events(vec![
            DomainEvent::DocumentDeleted {
                space_id: doc.space_id.clone(),
                document_id: doc.id.clone(),
            },
            DomainEvent::TreeInvalidated {
                space_id: doc.space_id.clone(),
            },
        ]);
        Ok(WriteOutcome::direct(Some(doc)))
    }

    async fn stage_delete(
        &self,
        actor: &str,
        document_id: &str,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let doc = tx
                .get_document(document_id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(document_id))?;
            let batch = self
                .staging_batch(&tx, actor, &doc.space_id, batch_id)
                .await?;

            let existing = tx
                .find_staged(&batch.id, &[ContributionOperation::Delete], &doc.id)
                .await?;
            let c = match existing {
                Some(c) => c,
                None => {
                    let mut c = Contribution::new(&batch.id, ContributionOperation::Delete);
                    c.seq = tx.next_contribution_seq(&batch.id).await?;
                    c.target_document = Some(doc.id.clone());
                    c.base_modified_at = Some(doc.modified_at);
                    tx.insert_contribution(&c).await?;
                    c
                }
            };
            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, c))
        }
        .await;
        let (batch, c) = tx.finish(result).await?;

        self.emit_events(vec![staged_event(&batch, &c.id)]);
        Ok(WriteOutcome::staged(batch, Some(c)))
    }

    async fn discard_staged_create(
        &self,
        actor: &str,
        temp_id: &str,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let (batch, create) = Self::staged_create(&tx, actor, temp_id, batch_id).await?;
            Self::discard_create_in(&tx, &batch, &create).await?;
            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, create))
        }
        .await;
        let (batch, create) = tx.finish(result).await?;

        tracing::debug!("Discarded staged create {} from batch {}", temp_id, batch.id);
        self.emit_events(vec![staged_event(&batch, &create.id)]);
        Ok(WriteOutcome::staged(batch, None))
    }

    /// Remove a create and the contributions that only exist to touch it.
    ///
    /// Fails while other staged documents still sit under it.
    pub(crate) async fn discard_create_in(
        tx: &StoreTransaction,
        batch: &ContributionBatch,
        create: &Contribution,
    ) -> Result<(), WikiError> {
        let Some(temp_id) = create.temp_id.as_deref() else {
            return Err(WikiError::validation("create contribution without temp id"));
        };
        let dependents = tx.contributions_with_parent(&batch.id, temp_id).await?;
        if !dependents.is_empty() {
            return Err(WikiError::validation(format!(
                "{} still has {} staged children",
                temp_id,
                dependents.len()
            )));
        }
        for op in [
            ContributionOperation::Edit,
            ContributionOperation::Delete,
            ContributionOperation::Move,
            ContributionOperation::Reorder,
        ] {
            if let Some(c) = tx.find_staged(&batch.id, &[op], temp_id).await? {
                tx.delete_contribution(&c.id).await?;
            }
        }
        tx.delete_contribution(&create.id).await?;
        Ok(())
    }

    //
    // MOVE / REORDER
    //

    /// Place a document under `new_parent` following the client's sibling
    /// order.
    ///
    /// # Direct
    ///
    /// The document's parent becomes `new_parent`, every real id in
    /// `siblings` receives its positional index as `sort_order` (temp ids are
    /// skipped without compaction), and ranges are rebuilt before commit.
    ///
    /// # Staged
    ///
    /// A temp `document_id` updates the staged create in place. A real one
    /// upserts a single placement contribution per batch: `move` when the
    /// final parent differs from the current one, `reorder` otherwise.
    ///
    /// # Errors
    ///
    /// - `NotFound` for unknown documents, parents or batch
    /// - `Validation` for a negative index, moving the root, a non-group
    ///   parent, or a parent inside the document's own subtree
    #[tracing::instrument(skip(self, request), fields(document_id = %request.document_id))]
    pub async fn reorder_or_move(
        &self,
        actor: &str,
        request: ReorderRequest,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        if request.new_index < 0 {
            return Err(WikiError::validation(format!(
                "new_index must be non-negative, got {}",
                request.new_index
            )));
        }
        if request.document_id == request.new_parent {
            return Err(WikiError::validation("a document cannot be its own parent"));
        }

        if is_temp_id(&request.document_id) {
            return self.place_staged_create(actor, request, batch_id).await;
        }

        let doc = self.load_document(&request.document_id).await?;
        if doc.is_root() {
            return Err(WikiError::validation("the space root cannot be moved"));
        }
        let involves_staged = is_temp_id(&request.new_parent);
        let target = WriteTarget::document(&doc.space_id, &doc.id);
        let can_write = self.access.can_write(actor, &target).await;
        match decide_write_mode(can_write, batch_id.is_some(), involves_staged) {
            WriteMode::Direct => self.place_direct(request).await,
            WriteMode::Staged => self.stage_placement(actor, request, batch_id).await,
        }
    }

    async fn place_direct(&self, request: ReorderRequest) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let doc = tx
                .get_document(&request.document_id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(&request.document_id))?;
            OrderingEngine::apply_placement(
                &tx,
                &doc,
                &request.new_parent,
                request.new_index,
                &request.siblings,
            )
            .await?;
            OrderingEngine::rebuild_space(&tx, &doc.space_id).await?;
            tx.get_document(&doc.id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(&doc.id))
        }
        .await;
        let doc = tx.finish(result).await?;

        tracing::info!(
            "Placed document {} under {} at {}",
            doc.id,
            request.new_parent,
            doc.sort_order
        );
        self.emit_events(vec![
            DomainEvent::DocumentUpdated {
                space_id: doc.space_id.clone(),
                document_id: doc.id.clone(),
            },
            DomainEvent::TreeInvalidated {
                space_id: doc.space_id.clone(),
            },
        ]);
        Ok(WriteOutcome::direct(Some(doc)))
    }

    async fn place_staged_create(
        &self,
        actor: &str,
        request: ReorderRequest,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let (batch, mut create) =
                Self::staged_create(&tx, actor, &request.document_id, batch_id).await?;
            Self::staged_parent(&tx, &batch, &request.new_parent).await?;

            // Walk staged parents: a temp cannot end up under itself
            let mut seen = HashSet::new();
            let mut cursor = Some(request.new_parent.clone());
            while let Some(current) = cursor {
                if current == request.document_id {
                    return Err(WikiError::validation(format!(
                        "cannot move {} into its own subtree",
                        request.document_id
                    )));
                }
                if !is_temp_id(&current) || !seen.insert(current.clone()) {
                    break;
                }
                cursor = tx
                    .find_contribution_by_temp_id(&current)
                    .await?
                    .and_then(|c| c.parent_ref);
            }

            create.parent_ref = Some(request.new_parent.clone());
            create.proposed_sort_order = Some(request.new_index);
            create.siblings_order = Some(request.siblings.clone());
            create.modified_at = db_now();
            tx.update_contribution(&create).await?;
            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, create))
        }
        .await;
        let (batch, create) = tx.finish(result).await?;

        self.emit_events(vec![staged_event(&batch, &create.id)]);
        Ok(WriteOutcome::staged(batch, Some(create)))
    }

    async fn stage_placement(
        &self,
        actor: &str,
        request: ReorderRequest,
        batch_id: Option<&str>,
    ) -> Result<WriteOutcome, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let doc = tx
                .get_document(&request.document_id)
                .await?
                .ok_or_else(|| WikiError::document_not_found(&request.document_id))?;
            let batch = self
                .staging_batch(&tx, actor, &doc.space_id, batch_id)
                .await?;
            if is_temp_id(&request.new_parent) {
                Self::staged_group(&tx, &batch, &request.new_parent).await?;
            } else {
                OrderingEngine::validate_parent(&tx, &doc, &request.new_parent).await?;
            }

            let operation = if doc.parent_id.as_deref() == Some(request.new_parent.as_str()) {
                ContributionOperation::Reorder
            } else {
                ContributionOperation::Move
            };
            let existing = tx
                .find_staged(
                    &batch.id,
                    &[ContributionOperation::Move, ContributionOperation::Reorder],
                    &doc.id,
                )
                .await?;
            let c = match existing {
                Some(mut c) => {
                    c.operation = operation;
                    c.parent_ref = Some(request.new_parent.clone());
                    c.proposed_sort_order = Some(request.new_index);
                    c.siblings_order = Some(request.siblings.clone());
                    c.modified_at = db_now();
                    tx.update_contribution(&c).await?;
                    c
                }
                None => {
                    let mut c = Contribution::new(&batch.id, operation);
                    c.seq = tx.next_contribution_seq(&batch.id).await?;
                    c.target_document = Some(doc.id.clone());
                    c.parent_ref = Some(request.new_parent.clone());
                    c.proposed_sort_order = Some(request.new_index);
                    c.siblings_order = Some(request.siblings.clone());
                    c.base_modified_at = Some(doc.modified_at);
                    c.validate()?;
                    tx.insert_contribution(&c).await?;
                    c
                }
            };
            let batch = Self::touch_batch(&tx, batch).await?;
            Ok::<_, WikiError>((batch, c))
        }
        .await;
        let (batch, c) = tx.finish(result).await?;

        tracing::debug!("Staged {} of {} in batch {}", c.operation, request.document_id, batch.id);
        self.emit_events(vec![staged_event(&batch, &c.id)]);
        Ok(WriteOutcome::staged(batch, Some(c)))
    }
}
