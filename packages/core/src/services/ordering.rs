//! Ordering Engine
//!
//! Keeps the two ordering representations of a space consistent:
//!
//! - `sort_order` is the source of truth among siblings
//! - `lft`/`rgt` is derived by one depth-first traversal with a single
//!   counter (`lft` on pre-visit, `rgt` on post-visit)
//!
//! Every write that changes `sort_order` or `parent` is followed by
//! [`OrderingEngine::rebuild_space`] inside the same transaction, so the
//! invariant `A.sort_order < B.sort_order ⇔ A.lft < B.lft` holds for all
//! siblings whenever a transaction commits.

use crate::db::StoreTransaction;
use crate::models::{is_temp_id, Document};
use crate::services::error::WikiError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Derived ordering fields for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeAssignment {
    pub id: String,
    pub lft: i64,
    pub rgt: i64,
    /// `sort_order` after tie repair
    pub sort_order: i64,
}

/// Output of a full-space range computation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangePlan {
    pub assignments: Vec<RangeAssignment>,
    /// Documents not reachable from the root by parent links
    pub orphans: Vec<String>,
}

impl RangePlan {
    pub fn get(&self, id: &str) -> Option<&RangeAssignment> {
        self.assignments.iter().find(|a| a.id == id)
    }
}

/// Summary of a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebuildReport {
    pub space_id: String,
    pub documents: usize,
    /// Rows whose `lft`, `rgt` or repaired `sort_order` changed
    pub updated: usize,
    pub orphans: Vec<String>,
}

/// Inconsistency found by [`OrderingEngine::verify`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum OrderingViolation {
    /// `first` precedes `second` by range but not by `sort_order`
    SiblingOrderMismatch { first: String, second: String },
    /// `lft >= rgt`
    InvalidRange { id: String },
    /// Range not strictly inside the parent's range
    NotNested { id: String, parent_id: String },
    /// A range bound used more than once in the space
    DuplicateBound { value: i64 },
    /// Not reachable from the space root
    Orphaned { id: String },
}

impl fmt::Display for OrderingViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingViolation::SiblingOrderMismatch { first, second } => write!(
                f,
                "{} precedes {} by range but not by sort_order",
                first, second
            ),
            OrderingViolation::InvalidRange { id } => write!(f, "{} has lft >= rgt", id),
            OrderingViolation::NotNested { id, parent_id } => {
                write!(f, "{} lies outside the range of parent {}", id, parent_id)
            }
            OrderingViolation::DuplicateBound { value } => {
                write!(f, "range bound {} is used more than once", value)
            }
            OrderingViolation::Orphaned { id } => write!(f, "{} is unreachable from root", id),
        }
    }
}

/// Sibling sort key: `sort_order`, then prior range position as tie-break
fn sibling_key(doc: &Document) -> (i64, i64, chrono::DateTime<chrono::Utc>, &str) {
    (doc.sort_order, doc.lft, doc.created_at, doc.id.as_str())
}

struct RangeWalk<'a> {
    children: HashMap<&'a str, Vec<&'a Document>>,
    visited: HashSet<&'a str>,
    counter: i64,
    assignments: Vec<RangeAssignment>,
}

impl<'a> RangeWalk<'a> {
    fn visit(&mut self, id: &'a str, sort_order: i64) {
        if !self.visited.insert(id) {
            return;
        }
        self.counter += 1;
        let lft = self.counter;

        let kids = self.children.get(id).cloned().unwrap_or_default();
        let mut previous: Option<i64> = None;
        for kid in kids {
            if self.visited.contains(kid.id.as_str()) {
                continue;
            }
            let repaired = match previous {
                Some(prev) if kid.sort_order <= prev => prev + 1,
                _ => kid.sort_order,
            };
            previous = Some(repaired);
            self.visit(kid.id.as_str(), repaired);
        }

        self.counter += 1;
        self.assignments.push(RangeAssignment {
            id: id.to_string(),
            lft,
            rgt: self.counter,
            sort_order,
        });
    }
}

/// Stateless ordering operations over a space's documents
pub struct OrderingEngine;

impl OrderingEngine {
    /// Translate a sibling list into `sort_order` assignments.
    ///
    /// Each real identity gets its positional index. Temp identities are
    /// skipped without compacting, so `[A, temp_X, B]` gives `A = 0, B = 2`.
    /// A repeated identity keeps its first position.
    ///
    /// ```rust
    /// # use wikiflow_core::services::OrderingEngine;
    /// let ids = vec!["a".to_string(), "temp_x".to_string(), "b".to_string()];
    /// assert_eq!(
    ///     OrderingEngine::resolve_reorder(&ids),
    ///     vec![("a".to_string(), 0), ("b".to_string(), 2)]
    /// );
    /// ```
    pub fn resolve_reorder(siblings: &[String]) -> Vec<(String, i64)> {
        let mut seen = HashSet::new();
        siblings
            .iter()
            .enumerate()
            .filter(|(_, id)| !id.is_empty() && !is_temp_id(id))
            .filter(|(_, id)| seen.insert(id.as_str()))
            .map(|(index, id)| (id.clone(), index as i64))
            .collect()
    }

    /// Compute ranges for every document of a space.
    ///
    /// Sibling groups are visited by ascending `sort_order` (ties broken by
    /// previous `lft`, then `created_at`, then id). Within a group, a
    /// `sort_order` not greater than its predecessor's is repaired to
    /// `predecessor + 1`, which keeps the sibling invariant satisfiable.
    /// Unreachable documents are reported as orphans and numbered after the
    /// root's range so bounds stay unique.
    ///
    /// # Errors
    ///
    /// `NotFound` when `root_id` is not among `documents`.
    pub fn compute_ranges(root_id: &str, documents: &[Document]) -> Result<RangePlan, WikiError> {
        let root = documents
            .iter()
            .find(|d| d.id == root_id)
            .ok_or_else(|| WikiError::document_not_found(root_id))?;

        let mut children: HashMap<&str, Vec<&Document>> = HashMap::new();
        for doc in documents {
            if let Some(parent) = doc.parent_id.as_deref() {
                if doc.id != root_id {
                    children.entry(parent).or_default().push(doc);
                }
            }
        }
        for group in children.values_mut() {
            group.sort_by(|a, b| sibling_key(a).cmp(&sibling_key(b)));
        }

        let mut walk = RangeWalk {
            children,
            visited: HashSet::with_capacity(documents.len()),
            counter: 0,
            assignments: Vec::with_capacity(documents.len()),
        };
        walk.visit(root.id.as_str(), root.sort_order);

        let mut unreachable: Vec<&Document> = documents
            .iter()
            .filter(|d| !walk.visited.contains(d.id.as_str()))
            .collect();
        unreachable.sort_by(|a, b| sibling_key(a).cmp(&sibling_key(b)));
        let orphans: Vec<String> = unreachable.iter().map(|d| d.id.clone()).collect();
        for doc in unreachable {
            walk.visit(doc.id.as_str(), doc.sort_order);
        }

        Ok(RangePlan {
            assignments: walk.assignments,
            orphans,
        })
    }

    /// Check every ordering invariant of a space's documents
    pub fn verify(root_id: &str, documents: &[Document]) -> Vec<OrderingViolation> {
        let mut violations = Vec::new();
        let by_id: HashMap<&str, &Document> =
            documents.iter().map(|d| (d.id.as_str(), d)).collect();

        let mut bounds = HashSet::new();
        let mut reported = HashSet::new();
        let mut siblings: HashMap<&str, Vec<&Document>> = HashMap::new();
        for doc in documents {
            if doc.lft >= doc.rgt {
                violations.push(OrderingViolation::InvalidRange { id: doc.id.clone() });
            }
            for bound in [doc.lft, doc.rgt] {
                if !bounds.insert(bound) && reported.insert(bound) {
                    violations.push(OrderingViolation::DuplicateBound { value: bound });
                }
            }
            match doc.parent_id.as_deref() {
                Some(parent_id) => match by_id.get(parent_id) {
                    Some(parent) => {
                        if !parent.contains(doc) {
                            violations.push(OrderingViolation::NotNested {
                                id: doc.id.clone(),
                                parent_id: parent_id.to_string(),
                            });
                        }
                        siblings.entry(parent_id).or_default().push(doc);
                    }
                    None => violations.push(OrderingViolation::Orphaned { id: doc.id.clone() }),
                },
                None if doc.id != root_id => {
                    violations.push(OrderingViolation::Orphaned { id: doc.id.clone() })
                }
                None => {}
            }
        }

        let mut parents: Vec<&str> = siblings.keys().copied().collect();
        parents.sort_unstable();
        for parent in parents {
            let mut group = siblings.remove(parent).unwrap_or_default();
            group.sort_by_key(|d| d.lft);
            for pair in group.windows(2) {
                if pair[0].sort_order >= pair[1].sort_order {
                    violations.push(OrderingViolation::SiblingOrderMismatch {
                        first: pair[0].id.clone(),
                        second: pair[1].id.clone(),
                    });
                }
            }
        }

        violations
    }

    /// Full rebuild of a space's ranges.
    ///
    /// Writes only rows whose derived fields change; running it twice in a
    /// row leaves the second run with nothing to update.
    pub async fn rebuild_space(
        tx: &StoreTransaction,
        space_id: &str,
    ) -> Result<RebuildReport, WikiError> {
        let space = tx
            .get_space(space_id)
            .await?
            .ok_or_else(|| WikiError::space_not_found(space_id))?;
        let documents = tx.space_documents(space_id).await?;
        let plan = Self::compute_ranges(&space.root_group, &documents)?;

        let current: HashMap<&str, &Document> =
            documents.iter().map(|d| (d.id.as_str(), d)).collect();
        let mut updated = 0;
        for assignment in &plan.assignments {
            let Some(doc) = current.get(assignment.id.as_str()) else {
                continue;
            };
            if doc.lft != assignment.lft
                || doc.rgt != assignment.rgt
                || doc.sort_order != assignment.sort_order
            {
                tx.set_ranges(
                    &assignment.id,
                    assignment.lft,
                    assignment.rgt,
                    assignment.sort_order,
                )
                .await?;
                updated += 1;
            }
        }

        if !plan.orphans.is_empty() {
            tracing::warn!(
                space_id,
                orphans = ?plan.orphans,
                "documents unreachable from space root"
            );
        }
        tracing::debug!(space_id, documents = documents.len(), updated, "ranges rebuilt");

        Ok(RebuildReport {
            space_id: space_id.to_string(),
            documents: documents.len(),
            updated,
            orphans: plan.orphans,
        })
    }

    /// Load and check a placement target for `doc`.
    ///
    /// The parent must exist in the same space, be a group, and not be
    /// `doc` or one of its descendants.
    pub async fn validate_parent(
        tx: &StoreTransaction,
        doc: &Document,
        parent_id: &str,
    ) -> Result<Document, WikiError> {
        let parent = tx
            .get_document(parent_id)
            .await?
            .ok_or_else(|| WikiError::document_not_found(parent_id))?;
        if parent.space_id != doc.space_id {
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

        // Parent links, not ranges: ranges may be stale mid-merge
        let mut seen = HashSet::new();
        let mut cursor = Some(parent.clone());
        while let Some(node) = cursor {
            if node.id == doc.id {
                return Err(WikiError::validation(format!(
                    "cannot move {} into its own subtree",
                    doc.id
                )));
            }
            if !seen.insert(node.id.clone()) {
                break;
            }
            cursor = match node.parent_id.as_deref() {
                Some(next) => tx.get_document(next).await?,
                None => None,
            };
        }

        Ok(parent)
    }

    /// Write positional `sort_order` values for the children of `parent_id`.
    ///
    /// Real identities in `siblings` that are children of `parent_id` receive
    /// their index; temp identities and non-children are skipped. Children
    /// missing from the list are renumbered after the highest listed index,
    /// keeping their previous relative order, so the listed values never tie
    /// with them. Returns the listed children as stored afterwards.
    pub async fn apply_sibling_order(
        tx: &StoreTransaction,
        parent_id: &str,
        siblings: &[String],
    ) -> Result<Vec<Document>, WikiError> {
        let mut children: HashMap<String, Document> = tx
            .children_of(parent_id)
            .await?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let mut updated = Vec::new();
        let mut highest: Option<i64> = None;
        for (id, sort_order) in Self::resolve_reorder(siblings) {
            match children.remove(&id) {
                Some(child) => {
                    highest = Some(highest.map_or(sort_order, |h| h.max(sort_order)));
                    updated.push(tx.set_sort_order(&child, sort_order).await?);
                }
                None => tracing::warn!(
                    "Skipping sibling {} that is not a child of {}",
                    id,
                    parent_id
                ),
            }
        }

        if let Some(highest) = highest {
            let mut unlisted: Vec<&Document> = children.values().collect();
            unlisted.sort_by(|a, b| sibling_key(a).cmp(&sibling_key(b)));
            for (offset, child) in unlisted.into_iter().enumerate() {
                tx.set_sort_order(child, highest + 1 + offset as i64).await?;
            }
        }
        Ok(updated)
    }

    /// Move `doc` under `new_parent_id` and apply a sibling order.
    ///
    /// When `doc` itself is not listed in `siblings` it takes `new_index`.
    /// Ranges are not touched: callers finish with
    /// [`rebuild_space`](Self::rebuild_space).
    pub async fn apply_placement(
        tx: &StoreTransaction,
        doc: &Document,
        new_parent_id: &str,
        new_index: i64,
        siblings: &[String],
    ) -> Result<Document, WikiError> {
        if doc.is_root() {
            return Err(WikiError::validation("the space root cannot be moved"));
        }
        if new_index < 0 {
            return Err(WikiError::validation(format!(
                "new_index must be non-negative, got {}",
                new_index
            )));
        }
        let parent = Self::validate_parent(tx, doc, new_parent_id).await?;
        let moved = tx.set_parent(doc, &parent.id).await?;

        let listed = Self::apply_sibling_order(tx, &parent.id, siblings).await?;
        match listed.into_iter().find(|d| d.id == moved.id) {
            Some(placed) => Ok(placed),
            None => {
                let current = tx.get_document(&moved.id).await?.unwrap_or(moved);
                Ok(tx.set_sort_order(&current, new_index).await?)
            }
        }
    }
}
