//! Tree Query Service
//!
//! Two read paths over a space:
//!
//! - **Management view** ([`TreeQueryService::get_tree`]): every document
//!   under the root, nested by `parent`, ordered by `sort_order`
//! - **Public view** ([`TreeQueryService::get_public_tree`]): descendants of
//!   the root by range containment that pass the [`VisibilityPredicate`],
//!   ordered by `lft`
//!
//! Both read committed rows directly, and the ordering engine keeps the two
//! keys in agreement, so the views always show the same sibling order.

use crate::db::DatabaseService;
use crate::models::{Document, Space, TreeNode, WikiTree};
use crate::services::access::VisibilityPredicate;
use crate::services::error::WikiError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone)]
pub struct TreeQueryService {
    db: Arc<DatabaseService>,
    visibility: Arc<dyn VisibilityPredicate>,
}

impl TreeQueryService {
    pub fn new(db: Arc<DatabaseService>, visibility: Arc<dyn VisibilityPredicate>) -> Self {
        Self { db, visibility }
    }

    /// Management view of a space
    ///
    /// # Errors
    ///
    /// `NotFound` if the space does not exist.
    pub async fn get_tree(&self, space_id: &str) -> Result<WikiTree, WikiError> {
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
        build_management_tree(&space, &documents)
    }

    /// Public view of a space: published content only
    pub async fn get_public_tree(&self, space_id: &str) -> Result<Vec<TreeNode>, WikiError> {
        let tx = self.db.begin_read().await?;
        let result = async {
            let space = tx
                .get_space(space_id)
                .await?
                .ok_or_else(|| WikiError::space_not_found(space_id))?;
            let root = tx
                .get_document(&space.root_group)
                .await?
                .ok_or_else(|| WikiError::document_not_found(&space.root_group))?;
            let descendants = tx.descendants_of(&root).await?;
            Ok::<_, WikiError>((root, descendants))
        }
        .await;
        let (root, descendants) = tx.finish(result).await?;
        Ok(build_public_tree(
            &root,
            &descendants,
            self.visibility.as_ref(),
        ))
    }
}

fn build_children(
    parent_id: &str,
    children: &HashMap<&str, Vec<&Document>>,
    visited: &mut HashSet<String>,
) -> Vec<TreeNode> {
    let mut nodes = Vec::new();
    for doc in children.get(parent_id).into_iter().flatten() {
        if !visited.insert(doc.id.clone()) {
            continue;
        }
        let mut node = TreeNode::from_document(doc);
        node.children = build_children(&doc.id, children, visited);
        nodes.push(node);
    }
    nodes
}

/// Nest all documents of a space under its root, each level by `sort_order`
pub fn build_management_tree(space: &Space, documents: &[Document]) -> Result<WikiTree, WikiError> {
    if !documents.iter().any(|d| d.id == space.root_group) {
        return Err(WikiError::document_not_found(&space.root_group));
    }

    let mut children: HashMap<&str, Vec<&Document>> = HashMap::new();
    for doc in documents {
        if let Some(parent) = doc.parent_id.as_deref() {
            children.entry(parent).or_default().push(doc);
        }
    }
    for group in children.values_mut() {
        group.sort_by(|a, b| {
            (a.sort_order, a.lft, a.id.as_str()).cmp(&(b.sort_order, b.lft, b.id.as_str()))
        });
    }

    let mut visited = HashSet::from([space.root_group.clone()]);
    Ok(WikiTree {
        space_id: space.id.clone(),
        root_group: space.root_group.clone(),
        children: build_children(&space.root_group, &children, &mut visited),
    })
}

/// Drop groups that end up without any visible descendant
fn prune_empty_groups(nodes: Vec<TreeNode>) -> Vec<TreeNode> {
    nodes
        .into_iter()
        .filter_map(|mut node| {
            node.children = prune_empty_groups(std::mem::take(&mut node.children));
            if node.is_group && node.children.is_empty() {
                None
            } else {
                Some(node)
            }
        })
        .collect()
}

/// Nest the visible descendants of `root`, each level by `lft`.
///
/// A document is shown only when it passes `visibility` and its parent is
/// shown.
pub fn build_public_tree(
    root: &Document,
    descendants: &[Document],
    visibility: &dyn VisibilityPredicate,
) -> Vec<TreeNode> {
    let mut ordered: Vec<&Document> = descendants
        .iter()
        .filter(|d| root.contains(d))
        .collect();
    ordered.sort_by_key(|d| d.lft);

    let mut shown: HashSet<&str> = HashSet::from([root.id.as_str()]);
    let mut children: HashMap<&str, Vec<&Document>> = HashMap::new();
    for doc in ordered {
        let Some(parent) = doc.parent_id.as_deref() else {
            continue;
        };
        if shown.contains(parent) && visibility.is_visible(doc) {
            shown.insert(doc.id.as_str());
            children.entry(parent).or_default().push(doc);
        }
    }

    let mut visited = HashSet::from([root.id.clone()]);
    prune_empty_groups(build_children(&root.id, &children, &mut visited))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::db_now;
    use crate::services::access::PublishedOnly;
    use crate::services::OrderingEngine;

    fn space_with(docs: &mut Vec<Document>) -> Space {
        let plan = OrderingEngine::compute_ranges("root", docs).unwrap();
        for d in docs.iter_mut() {
            let a = plan.get(&d.id).unwrap();
            d.lft = a.lft;
            d.rgt = a.rgt;
        }
        Space {
            id: "space".into(),
            name: "Docs".into(),
            route: "docs".into(),
            root_group: "root".into(),
            created_at: db_now(),
        }
    }

    fn doc(id: &str, parent: Option<&str>, order: i64, group: bool, published: bool) -> Document {
        let mut d = Document::new("space", parent.map(String::from), id, format!("docs/{}", id))
            .with_sort_order(order)
            .with_group(group)
            .with_published(published);
        d.id = id.to_string();
        d
    }

    #[test]
    fn test_management_tree_orders_by_sort_order() {
        let mut docs = vec![
            doc("root", None, 0, true, true),
            doc("guide", Some("root"), 1, true, false),
            doc("intro", Some("root"), 0, false, false),
            doc("step2", Some("guide"), 1, false, true),
            doc("step1", Some("guide"), 0, false, true),
        ];
        let space = space_with(&mut docs);
        let tree = build_management_tree(&space, &docs).unwrap();

        assert_eq!(tree.child_titles(), vec!["intro", "guide"]);
        let guide = tree.find("guide").unwrap();
        let steps: Vec<&str> = guide.children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(steps, vec!["step1", "step2"]);
    }

    #[test]
    fn test_public_tree_filters_and_prunes() {
        let mut docs = vec![
            doc("root", None, 0, true, true),
            doc("drafts", Some("root"), 0, true, true),
            doc("wip", Some("drafts"), 0, false, false),
            doc("guide", Some("root"), 1, true, true),
            doc("hidden", Some("guide"), 0, false, false),
            doc("shown", Some("guide"), 1, false, true),
            doc("faq", Some("root"), 2, false, true),
        ];
        let space = space_with(&mut docs);
        let root = docs[0].clone();
        let descendants: Vec<Document> = docs[1..].to_vec();

        let public = build_public_tree(&root, &descendants, &PublishedOnly);
        let top: Vec<&str> = public.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(top, vec!["guide", "faq"]);
        assert_eq!(public[0].descendant_ids(), vec!["shown".to_string()]);

        let admin = build_management_tree(&space, &docs).unwrap();
        assert_eq!(admin.child_titles(), vec!["drafts", "guide", "faq"]);
    }

    #[test]
    fn test_unpublished_parent_hides_children() {
        let mut docs = vec![
            doc("root", None, 0, true, true),
            doc("page", Some("root"), 0, false, false),
            doc("sub", Some("page"), 0, false, true),
        ];
        space_with(&mut docs);
        let public = build_public_tree(&docs[0], &docs[1..], &PublishedOnly);
        assert!(public.is_empty());
    }
}
