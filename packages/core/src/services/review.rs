//! Contribution Review
//!
//! Batch state machine:
//!
//! ```text
//! Draft --submit--> Submitted --approve--> Merged
//!   ^                  |   \
//!   +----withdraw------+    +--reject--> Rejected
//! ```
//!
//! Owners submit and withdraw; managers approve and reject. Approving runs
//! the [`MergeEngine`] in the same transaction as the status change, so a
//! failed merge leaves both the tree and the batch untouched.

use crate::db::DomainEvent;
use crate::models::{
    db_now, BatchStatus, Contribution, ContributionBatch, ContributionOperation, PreviewNode,
};
use crate::services::error::WikiError;
use crate::services::merge::{MergeEngine, MergeReport};
use crate::services::preview::preview_batch;
use crate::services::wiki_service::WikiService;

fn status_event(batch: &ContributionBatch) -> DomainEvent {
    DomainEvent::BatchStatusChanged {
        batch_id: batch.id.clone(),
        space_id: batch.space_id.clone(),
        status: batch.status,
    }
}

fn ensure_transition(batch: &ContributionBatch, next: BatchStatus) -> Result<(), WikiError> {
    if !batch.status.can_transition_to(next) {
        return Err(WikiError::validation(format!(
            "batch {} is {} and cannot become {}",
            batch.id, batch.status, next
        )));
    }
    Ok(())
}

impl WikiService {
    //
    // BATCHES
    //

    /// The actor's Draft batch for a space, created when missing
    #[tracing::instrument(skip(self))]
    pub async fn get_or_create_draft_batch(
        &self,
        actor: &str,
        space_id: &str,
    ) -> Result<ContributionBatch, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            tx.get_space(space_id)
                .await?
                .ok_or_else(|| WikiError::space_not_found(space_id))?;
            self.draft_batch_in(&tx, actor, space_id).await
        }
        .await;
        tx.finish(result).await
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<ContributionBatch, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = tx.get_batch(batch_id).await;
        tx.finish(result)
            .await?
            .ok_or_else(|| WikiError::batch_not_found(batch_id))
    }

    /// Contributions of a batch in staging order
    pub async fn get_batch_contributions(
        &self,
        batch_id: &str,
    ) -> Result<Vec<Contribution>, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = async {
            tx.get_batch(batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
            Ok::<_, WikiError>(tx.contributions_for_batch(batch_id).await?)
        }
        .await;
        tx.finish(result).await
    }

    /// Every batch the actor owns, newest first
    pub async fn list_my_batches(&self, actor: &str) -> Result<Vec<ContributionBatch>, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = tx.batches_for_owner(actor).await;
        Ok(tx.finish(result).await?)
    }

    /// Submitted batches awaiting review. Managers only.
    pub async fn list_pending_reviews(
        &self,
        actor: &str,
    ) -> Result<Vec<ContributionBatch>, WikiError> {
        if !self.access.is_manager(actor).await {
            return Err(WikiError::validation(format!(
                "{} cannot review change requests",
                actor
            )));
        }
        let tx = self.db.begin_read().await?;
        let result = tx.batches_with_status(BatchStatus::Submitted).await;
        Ok(tx.finish(result).await?)
    }

    /// Management view of the batch's space as it would look once merged
    pub async fn get_batch_tree(&self, batch_id: &str) -> Result<Vec<PreviewNode>, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = async {
            let batch = tx
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
            let space = tx
                .get_space(&batch.space_id)
                .await?
                .ok_or_else(|| WikiError::space_not_found(&batch.space_id))?;
            let documents = tx.space_documents(&space.id).await?;
            let contributions = tx.contributions_for_batch(&batch.id).await?;
            Ok::<_, WikiError>((space, documents, contributions))
        }
        .await;
        let (space, documents, contributions) = tx.finish(result).await?;
        preview_batch(&space.root_group, &documents, &contributions)
    }

    /// Drop one contribution from the actor's Draft batch.
    ///
    /// Discarding a create also drops the staged edits of its temp id, and
    /// fails while other staged documents sit under it.
    #[tracing::instrument(skip(self))]
    pub async fn discard_contribution(
        &self,
        actor: &str,
        contribution_id: &str,
    ) -> Result<ContributionBatch, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let c = tx
                .get_contribution(contribution_id)
                .await?
                .ok_or_else(|| WikiError::contribution_not_found(contribution_id))?;
            let mut batch = tx
                .get_batch(&c.batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(&c.batch_id))?;
            Self::ensure_stageable(&batch, actor, &batch.space_id)?;

            if c.operation == ContributionOperation::Create {
                Self::discard_create_in(&tx, &batch, &c).await?;
            } else {
                tx.delete_contribution(&c.id).await?;
            }
            batch.modified_at = db_now();
            tx.update_batch(&batch).await?;
            Ok::<_, WikiError>(batch)
        }
        .await;
        let batch = tx.finish(result).await?;

        self.emit_events(vec![DomainEvent::ContributionStaged {
            batch_id: batch.id.clone(),
            contribution_id: contribution_id.to_string(),
        }]);
        Ok(batch)
    }

    //
    // TRANSITIONS
    //

    /// Draft -> Submitted. Owner only; the batch must not be empty.
    #[tracing::instrument(skip(self))]
    pub async fn submit_batch(
        &self,
        actor: &str,
        batch_id: &str,
    ) -> Result<ContributionBatch, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let mut batch = tx
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
            if !batch.is_owned_by(actor) {
                return Err(WikiError::validation(format!(
                    "only the owner can submit batch {}",
                    batch.id
                )));
            }
            ensure_transition(&batch, BatchStatus::Submitted)?;
            if tx.count_contributions(&batch.id).await? == 0 {
                return Err(WikiError::validation(format!(
                    "batch {} has no contributions",
                    batch.id
                )));
            }
            let now = db_now();
            batch.status = BatchStatus::Submitted;
            batch.submitted_at = Some(now);
            batch.modified_at = now;
            tx.update_batch(&batch).await?;
            Ok::<_, WikiError>(batch)
        }
        .await;
        let batch = tx.finish(result).await?;

        tracing::info!("Batch {} submitted by {}", batch.id, actor);
        self.emit_events(vec![status_event(&batch)]);
        Ok(batch)
    }

    /// Submitted -> Draft. Owner only, and only while the owner has no other
    /// Draft batch in the space.
    #[tracing::instrument(skip(self))]
    pub async fn withdraw_batch(
        &self,
        actor: &str,
        batch_id: &str,
    ) -> Result<ContributionBatch, WikiError> {
        let tx = self.db.begin().await?;
        let result = async {
            let mut batch = tx
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
            if !batch.is_owned_by(actor) {
                return Err(WikiError::validation(format!(
                    "only the owner can withdraw batch {}",
                    batch.id
                )));
            }
            ensure_transition(&batch, BatchStatus::Draft)?;
            if let Some(draft) = tx.find_draft_batch(actor, &batch.space_id).await? {
                return Err(WikiError::validation(format!(
                    "draft batch {} is already open in this space",
                    draft.id
                )));
            }
            batch.status = BatchStatus::Draft;
            batch.submitted_at = None;
            batch.modified_at = db_now();
            tx.update_batch(&batch).await?;
            Ok::<_, WikiError>(batch)
        }
        .await;
        let batch = tx.finish(result).await?;

        tracing::info!("Batch {} withdrawn by {}", batch.id, actor);
        self.emit_events(vec![status_event(&batch)]);
        Ok(batch)
    }

    /// Submitted -> Merged: apply every contribution to the tree.
    ///
    /// The merge and the status change commit together. On any failure,
    /// including a `Conflict` on a stale edit or delete, nothing is written
    /// and the batch stays Submitted.
    ///
    /// # Errors
    ///
    /// - `Validation` if the actor cannot review the space or the batch is
    ///   not Submitted
    /// - `Conflict` if a target changed since it was staged
    #[tracing::instrument(skip(self))]
    pub async fn approve_batch(
        &self,
        actor: &str,
        batch_id: &str,
    ) -> Result<MergeReport, WikiError> {
        let batch = self.get_batch(batch_id).await?;
        if !self.access.can_review(actor, &batch.space_id).await {
            return Err(WikiError::validation(format!(
                "{} cannot approve change requests",
                actor
            )));
        }

        let tx = self.db.begin().await?;
        let result = async {
            let batch = tx
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
            MergeEngine::merge(&tx, &batch, actor).await
        }
        .await;
        let report = match tx.finish(result).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!("Merge of batch {} failed: {}", batch_id, e);
                return Err(e);
            }
        };

        let space_id = report.batch.space_id.clone();
        let mut events = Vec::new();
        events.extend(report.created.values().map(|id| DomainEvent::DocumentCreated {
            space_id: space_id.clone(),
            document_id: id.clone(),
        }));
        events.extend(report.updated.iter().map(|id| DomainEvent::DocumentUpdated {
            space_id: space_id.clone(),
            document_id: id.clone(),
        }));
        events.extend(report.deleted.iter().map(|id| DomainEvent::DocumentDeleted {
            space_id: space_id.clone(),
            document_id: id.clone(),
        }));
        events.push(DomainEvent::TreeInvalidated {
            space_id: space_id.clone(),
        });
        events.push(status_event(&report.batch));
        self.emit_events(events);
        Ok(report)
    }

    /// Submitted -> Rejected, recording the reviewer's comment
    #[tracing::instrument(skip(self, comment))]
    pub async fn reject_batch(
        &self,
        actor: &str,
        batch_id: &str,
        comment: Option<&str>,
    ) -> Result<ContributionBatch, WikiError> {
        let batch = self.get_batch(batch_id).await?;
        if !self.access.can_review(actor, &batch.space_id).await {
            return Err(WikiError::validation(format!(
                "{} cannot reject change requests",
                actor
            )));
        }

        let tx = self.db.begin().await?;
        let result = async {
            let mut batch = tx
                .get_batch(batch_id)
                .await?
                .ok_or_else(|| WikiError::batch_not_found(batch_id))?;
            ensure_transition(&batch, BatchStatus::Rejected)?;
            batch.status = BatchStatus::Rejected;
            batch.review_comment = comment.map(str::to_string);
            batch.reviewed_by = Some(actor.to_string());
            batch.modified_at = db_now();
            tx.update_batch(&batch).await?;
            Ok::<_, WikiError>(batch)
        }
        .await;
        let batch = tx.finish(result).await?;

        tracing::info!("Batch {} rejected by {}", batch.id, actor);
        self.emit_events(vec![status_event(&batch)]);
        Ok(batch)
    }
}
