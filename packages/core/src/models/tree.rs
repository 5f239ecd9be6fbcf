//! Tree view models returned by the query and preview services.

use super::Document;
use serde::{Deserialize, Serialize};

/// One node of a rendered tree view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    pub route: String,
    pub is_group: bool,
    pub is_published: bool,
    pub parent_id: Option<String>,
    pub sort_order: i64,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            route: doc.route.clone(),
            is_group: doc.is_group,
            is_published: doc.is_published,
            parent_id: doc.parent_id.clone(),
            sort_order: doc.sort_order,
            children: Vec::new(),
        }
    }

    /// Pre-order list of ids in this subtree, excluding the node itself
    pub fn descendant_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for child in &self.children {
            ids.push(child.id.clone());
            ids.extend(child.descendant_ids());
        }
        ids
    }
}

/// Management view of a space: every document under the root group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiTree {
    pub space_id: String,
    pub root_group: String,
    pub children: Vec<TreeNode>,
}

impl WikiTree {
    /// Titles of the root group's direct children, in order
    pub fn child_titles(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.title.as_str()).collect()
    }

    /// Find a node anywhere in the tree
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        fn walk<'a>(nodes: &'a [TreeNode], id: &str) -> Option<&'a TreeNode> {
            nodes
                .iter()
                .find_map(|n| if n.id == id { Some(n) } else { walk(&n.children, id) })
        }
        walk(&self.children, id)
    }
}

/// How a batch would change a node if merged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Edited,
    Moved,
    Reordered,
    Deleted,
}

/// Node of a batch preview tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewNode {
    /// Real id, or temp id for staged creates
    pub id: String,
    pub title: String,
    pub is_group: bool,
    pub is_published: bool,
    pub sort_order: i64,
    pub change: Option<ChangeKind>,
    pub children: Vec<PreviewNode>,
}
