//! Merge Engine
//!
//! Replays a Submitted batch against the tree store inside the caller's
//! transaction. Creates run before anything that references their temp id;
//! otherwise contributions apply in staging order. Any failure aborts the
//! whole merge and the caller rolls back, leaving the batch Submitted.
//!
//! # Conflict Detection
//!
//! Edit and delete contributions carry the target's `modified_at` as it was
//! when first staged. The merge compares it with the target's `modified_at`
//! as it was when the merge began, so a batch's own earlier operations never
//! make its later ones conflict.

use crate::db::StoreTransaction;
use crate::models::{
    db_now, is_temp_id, slugify, BatchStatus, Contribution, ContributionBatch,
    ContributionOperation, Document, DocumentUpdate,
};
use crate::services::error::WikiError;
use crate::services::ordering::{OrderingEngine, RebuildReport};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// What a successful merge changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub batch: ContributionBatch,
    /// Temp id to real id for every merged create
    pub created: BTreeMap<String, String>,
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub rebuild: RebuildReport,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Pending,
    Visiting,
    Done,
}

fn visit<'a>(
    index: usize,
    sorted: &[&'a Contribution],
    creators: &HashMap<&str, usize>,
    marks: &mut [Mark],
    order: &mut Vec<&'a Contribution>,
) -> Result<(), WikiError> {
    match marks[index] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            return Err(WikiError::validation(format!(
                "contribution {} is part of a temp id reference cycle",
                sorted[index].id
            )))
        }
        Mark::Pending => {}
    }
    marks[index] = Mark::Visiting;
    for dep in sorted[index].temp_dependencies() {
        match creators.get(dep) {
            Some(&creator) if creator != index => visit(creator, sorted, creators, marks, order)?,
            Some(_) => {}
            None => {
                return Err(WikiError::validation(format!(
                    "contribution {} references unknown temp id {}",
                    sorted[index].id, dep
                )))
            }
        }
    }
    marks[index] = Mark::Done;
    order.push(sorted[index]);
    Ok(())
}

/// Order contributions for replay.
///
/// Staging (`seq`) order, except that a contribution referencing a temp id
/// as target or parent is preceded by the create that defines it.
///
/// # Errors
///
/// `Validation` for references to temp ids no create in the batch defines,
/// and for reference cycles between creates.
pub fn plan_merge_order(contributions: &[Contribution]) -> Result<Vec<&Contribution>, WikiError> {
    let mut sorted: Vec<&Contribution> = contributions.iter().collect();
    sorted.sort_by_key(|c| c.seq);

    let creators: HashMap<&str, usize> = sorted
        .iter()
        .enumerate()
        .filter(|(_, c)| c.operation == ContributionOperation::Create)
        .filter_map(|(i, c)| c.temp_id.as_deref().map(|t| (t, i)))
        .collect();

    let mut marks = vec![Mark::Pending; sorted.len()];
    let mut order = Vec::with_capacity(sorted.len());
    for index in 0..sorted.len() {
        visit(index, &sorted, &creators, &mut marks, &mut order)?;
    }
    Ok(order)
}

struct MergePass<'a> {
    tx: &'a StoreTransaction,
    batch: &'a ContributionBatch,
    baseline: HashMap<String, DateTime<Utc>>,
    created: BTreeMap<String, String>,
    updated: Vec<String>,
    deleted: Vec<String>,
}

impl<'a> MergePass<'a> {
    fn resolve(&self, id: &str) -> Result<String, WikiError> {
        if !is_temp_id(id) {
            return Ok(id.to_string());
        }
        self.created
            .get(id)
            .cloned()
            .ok_or_else(|| WikiError::validation(format!("temp id {} was not created", id)))
    }

    /// Replace merged temp ids; unmerged ones stay and are skipped later
    fn resolve_siblings(&self, siblings: &[String]) -> Vec<String> {
        siblings
            .iter()
            .map(|id| self.created.get(id).cloned().unwrap_or_else(|| id.clone()))
            .collect()
    }

    async fn target(&self, c: &Contribution) -> Result<Document, WikiError> {
        let raw = c
            .target_document
            .as_deref()
            .ok_or_else(|| WikiError::validation(format!("contribution {} has no target", c.id)))?;
        let id = self.resolve(raw)?;
        let doc = self
            .tx
            .get_document(&id)
            .await?
            .ok_or_else(|| WikiError::document_not_found(&id))?;
        if doc.space_id != self.batch.space_id {
            return Err(WikiError::validation(format!(
                "document {} is outside the batch's space",
                id
            )));
        }
        Ok(doc)
    }

    fn check_conflict(&self, c: &Contribution, doc: &Document) -> Result<(), WikiError> {
        let current = self
            .baseline
            .get(&doc.id)
            .copied()
            .unwrap_or(doc.modified_at);
        if c.base_modified_at != Some(current) {
            return Err(WikiError::conflict(&doc.id, c.base_modified_at, current));
        }
        Ok(())
    }

    async fn apply(&mut self, c: &Contribution) -> Result<(), WikiError> {
        c.validate()?;
        match c.operation {
            ContributionOperation::Create => self.apply_create(c).await,
            ContributionOperation::Edit => {
                let doc = self.target(c).await?;
                self.check_conflict(c, &doc)?;
                let update = DocumentUpdate {
                    title: c.proposed_title.clone(),
                    content: c.proposed_content.clone(),
                    is_published: c.proposed_is_published,
                };
                self.tx.update_document(&doc, &update).await?;
                self.updated.push(doc.id);
                Ok(())
            }
            ContributionOperation::Delete => {
                let doc = self.target(c).await?;
                self.check_conflict(c, &doc)?;
                if doc.is_root() {
                    return Err(WikiError::validation("the space root cannot be deleted"));
                }
                if self.tx.count_children(&doc.id).await? > 0 {
                    return Err(WikiError::validation(format!(
                        "document {} still has children",
                        doc.id
                    )));
                }
                self.tx.delete_document(&doc.id).await?;
                self.deleted.push(doc.id);
                Ok(())
            }
            ContributionOperation::Move | ContributionOperation::Reorder => {
                let doc = self.target(c).await?;
                let parent_id = match c.parent_ref.as_deref() {
                    Some(parent) => self.resolve(parent)?,
                    None => doc.parent_id.clone().ok_or_else(|| {
                        WikiError::validation("the space root cannot be moved")
                    })?,
                };
                let new_index = match c.proposed_sort_order {
                    Some(index) => index,
                    None => self
                        .tx
                        .max_child_sort_order(&parent_id)
                        .await?
                        .map_or(0, |max| max + 1),
                };
                let siblings = self.resolve_siblings(c.siblings_order.as_deref().unwrap_or(&[]));
                OrderingEngine::apply_placement(self.tx, &doc, &parent_id, new_index, &siblings)
                    .await?;
                self.updated.push(doc.id);
                Ok(())
            }
        }
    }

    async fn apply_create(&mut self, c: &Contribution) -> Result<(), WikiError> {
        let temp_id = c
            .temp_id
            .clone()
            .ok_or_else(|| WikiError::validation("create contribution without temp id"))?;
        let parent_id = self.resolve(c.parent_ref.as_deref().unwrap_or_default())?;
        let parent = self
            .tx
            .get_document(&parent_id)
            .await?
            .ok_or_else(|| WikiError::document_not_found(&parent_id))?;
        if parent.space_id != self.batch.space_id || !parent.is_group {
            return Err(WikiError::validation(format!(
                "parent {} is not a group of the batch's space",
                parent_id
            )));
        }

        let sort_order = match c.proposed_sort_order {
            Some(order) => order,
            None => self
                .tx
                .max_child_sort_order(&parent_id)
                .await?
                .map_or(0, |max| max + 1),
        };
        let title = c.proposed_title.clone().unwrap_or_default();
        let route = self
            .tx
            .unique_route(&format!("{}/{}", parent.route, slugify(&title)))
            .await?;
        let doc = Document::new(&self.batch.space_id, Some(parent_id.clone()), title, route)
            .with_content(c.proposed_content.clone().unwrap_or_default())
            .with_group(c.proposed_is_group.unwrap_or(false))
            .with_published(c.proposed_is_published.unwrap_or(false))
            .with_sort_order(sort_order);
        doc.validate()?;
        self.tx.insert_document(&doc).await?;
        self.created.insert(temp_id, doc.id.clone());

        if let Some(siblings) = c.siblings_order.as_deref() {
            let resolved = self.resolve_siblings(siblings);
            OrderingEngine::apply_sibling_order(self.tx, &parent_id, &resolved).await?;
        }

        let mut merged = c.clone();
        merged.merged_document = Some(doc.id.clone());
        merged.modified_at = db_now();
        self.tx.update_contribution(&merged).await?;
        Ok(())
    }
}

/// Applies Submitted batches
pub struct MergeEngine;

impl MergeEngine {
    /// Merge `batch` inside `tx` and mark it Merged.
    ///
    /// The caller commits on `Ok` and rolls back on `Err`.
    pub async fn merge(
        tx: &StoreTransaction,
        batch: &ContributionBatch,
        reviewer: &str,
    ) -> Result<MergeReport, WikiError> {
        if batch.status != BatchStatus::Submitted {
            return Err(WikiError::validation(format!(
                "batch {} is {}, only submitted batches can be merged",
                batch.id, batch.status
            )));
        }

        let contributions = tx.contributions_for_batch(&batch.id).await?;
        let order = plan_merge_order(&contributions)?;

        let mut baseline = HashMap::new();
        for c in order.iter().filter(|c| c.operation.is_conflict_checked()) {
            let Some(target) = c.target_document.as_deref() else {
                continue;
            };
            if is_temp_id(target) || baseline.contains_key(target) {
                continue;
            }
            if let Some(doc) = tx.get_document(target).await? {
                baseline.insert(doc.id, doc.modified_at);
            }
        }

        let mut pass = MergePass {
            tx,
            batch,
            baseline,
            created: BTreeMap::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        };
        for c in order {
            tracing::debug!(
                "Merging contribution {} ({}) of batch {}",
                c.id,
                c.operation,
                batch.id
            );
            pass.apply(c).await?;
        }

        let rebuild = OrderingEngine::rebuild_space(tx, &batch.space_id).await?;

        let now = db_now();
        let mut merged = batch.clone();
        merged.status = BatchStatus::Merged;
        merged.reviewed_by = Some(reviewer.to_string());
        merged.merged_at = Some(now);
        merged.modified_at = now;
        tx.update_batch(&merged).await?;

        tracing::info!(
            "Merged batch {} into space {}: {} created, {} updated, {} deleted",
            batch.id,
            batch.space_id,
            pass.created.len(),
            pass.updated.len(),
            pass.deleted.len()
        );

        Ok(MergeReport {
            batch: merged,
            created: pass.created,
            updated: pass.updated,
            deleted: pass.deleted,
            rebuild,
        })
    }
}
