//! Batch preview: the management view as it would look after a merge.
//!
//! Staged operations are overlaid on an in-memory copy of the space's
//! documents. Nothing is written; temp ids appear as node ids and every
//! touched node carries a [`ChangeKind`] label.

use crate::models::{ChangeKind, Contribution, ContributionOperation, Document, PreviewNode};
use crate::services::error::WikiError;
use crate::services::merge::plan_merge_order;
use std::collections::{HashMap, HashSet};

struct Draft {
    title: String,
    is_group: bool,
    is_published: bool,
    parent: Option<String>,
    sort_order: i64,
    /// Tie-break among equal sort orders: prior `lft`, then staging order for new nodes
    position: i64,
    change: Option<ChangeKind>,
}

fn rank(kind: ChangeKind) -> u8 {
    match kind {
        ChangeKind::Added => 4,
        ChangeKind::Deleted => 3,
        ChangeKind::Moved => 2,
        ChangeKind::Reordered => 1,
        ChangeKind::Edited => 0,
    }
}

fn mark(draft: &mut Draft, kind: ChangeKind) {
    if draft.change.map_or(true, |current| rank(kind) > rank(current)) {
        draft.change = Some(kind);
    }
}

fn place_siblings(drafts: &mut HashMap<String, Draft>, parent: &str, siblings: &[String]) {
    let mut seen = HashSet::new();
    for (index, id) in siblings.iter().enumerate() {
        if !seen.insert(id.as_str()) {
            continue;
        }
        if let Some(draft) = drafts.get_mut(id) {
            if draft.parent.as_deref() == Some(parent) {
                draft.sort_order = index as i64;
            }
        }
    }
}

fn end_of_siblings(drafts: &HashMap<String, Draft>, parent: &str) -> i64 {
    drafts
        .values()
        .filter(|d| d.parent.as_deref() == Some(parent))
        .map(|d| d.sort_order + 1)
        .max()
        .unwrap_or(0)
}

/// Overlay `contributions` on `documents` and nest the result under `root_id`
pub fn preview_batch(
    root_id: &str,
    documents: &[Document],
    contributions: &[Contribution],
) -> Result<Vec<PreviewNode>, WikiError> {
    let mut drafts: HashMap<String, Draft> = documents
        .iter()
        .map(|d| {
            (
                d.id.clone(),
                Draft {
                    title: d.title.clone(),
                    is_group: d.is_group,
                    is_published: d.is_published,
                    parent: d.parent_id.clone(),
                    sort_order: d.sort_order,
                    position: d.lft,
                    change: None,
                },
            )
        })
        .collect();
    let mut next_position = documents.iter().map(|d| d.rgt).max().unwrap_or(0) + 1;

    for c in plan_merge_order(contributions)? {
        let target = c.target_document.clone().unwrap_or_default();
        match c.operation {
            ContributionOperation::Create => {
                let (Some(temp_id), Some(parent)) = (c.temp_id.clone(), c.parent_ref.clone())
                else {
                    continue;
                };
                let sort_order = c
                    .proposed_sort_order
                    .unwrap_or_else(|| end_of_siblings(&drafts, &parent));
                drafts.insert(
                    temp_id,
                    Draft {
                        title: c.proposed_title.clone().unwrap_or_default(),
                        is_group: c.proposed_is_group.unwrap_or(false),
                        is_published: c.proposed_is_published.unwrap_or(false),
                        parent: Some(parent.clone()),
                        sort_order,
                        position: next_position,
                        change: Some(ChangeKind::Added),
                    },
                );
                next_position += 1;
                if let Some(siblings) = c.siblings_order.as_deref() {
                    place_siblings(&mut drafts, &parent, siblings);
                }
            }
            ContributionOperation::Edit => {
                if let Some(draft) = drafts.get_mut(&target) {
                    if let Some(title) = &c.proposed_title {
                        draft.title = title.clone();
                    }
                    if let Some(published) = c.proposed_is_published {
                        draft.is_published = published;
                    }
                    mark(draft, ChangeKind::Edited);
                }
            }
            ContributionOperation::Delete => {
                if let Some(draft) = drafts.get_mut(&target) {
                    mark(draft, ChangeKind::Deleted);
                }
            }
            ContributionOperation::Move | ContributionOperation::Reorder => {
                let Some(draft) = drafts.get_mut(&target) else {
                    continue;
                };
                let parent = c.parent_ref.clone().or_else(|| draft.parent.clone());
                let kind = if parent != draft.parent {
                    ChangeKind::Moved
                } else {
                    ChangeKind::Reordered
                };
                draft.parent = parent.clone();
                if let Some(order) = c.proposed_sort_order {
                    draft.sort_order = order;
                }
                mark(draft, kind);
                if let (Some(parent), Some(siblings)) = (parent, c.siblings_order.as_deref()) {
                    place_siblings(&mut drafts, &parent, siblings);
                }
            }
        }
    }

    let mut children: HashMap<&str, Vec<(&str, &Draft)>> = HashMap::new();
    for (id, draft) in &drafts {
        if let Some(parent) = draft.parent.as_deref() {
            children.entry(parent).or_default().push((id.as_str(), draft));
        }
    }
    for group in children.values_mut() {
        group.sort_by(|(a_id, a), (b_id, b)| {
            (a.sort_order, a.position, *a_id).cmp(&(b.sort_order, b.position, *b_id))
        });
    }

    fn build(
        parent: &str,
        children: &HashMap<&str, Vec<(&str, &Draft)>>,
        visited: &mut HashSet<String>,
    ) -> Vec<PreviewNode> {
        let mut nodes = Vec::new();
        for (id, draft) in children.get(parent).into_iter().flatten() {
            if !visited.insert(id.to_string()) {
                continue;
            }
            nodes.push(PreviewNode {
                id: id.to_string(),
                title: draft.title.clone(),
                is_group: draft.is_group,
                is_published: draft.is_published,
                sort_order: draft.sort_order,
                change: draft.change,
                children: build(id, children, visited),
            });
        }
        nodes
    }

    let mut visited = HashSet::from([root_id.to_string()]);
    Ok(build(root_id, &children, &mut visited))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, parent: Option<&str>, order: i64, lft: i64) -> Document {
        let mut d = Document::new("space", parent.map(String::from), id, format!("s/{}", id))
            .with_sort_order(order)
            .with_group(parent.is_none());
        d.id = id.to_string();
        d.lft = lft;
        d.rgt = lft + 1;
        d
    }

    #[test]
    fn test_preview_overlays_staged_changes() {
        let docs = vec![
            doc("root", None, 0, 1),
            doc("a", Some("root"), 0, 2),
            doc("b", Some("root"), 1, 4),
        ];

        let mut create = Contribution::new("batch", ContributionOperation::Create);
        create.seq = 0;
        create.temp_id = Some("temp_new".into());
        create.parent_ref = Some("root".into());
        create.proposed_title = Some("New".into());

        let mut reorder = Contribution::new("batch", ContributionOperation::Reorder);
        reorder.seq = 1;
        reorder.target_document = Some("b".into());
        reorder.parent_ref = Some("root".into());
        reorder.proposed_sort_order = Some(0);
        reorder.siblings_order =
            Some(vec!["b".into(), "temp_new".into(), "a".into()]);

        let mut edit = Contribution::new("batch", ContributionOperation::Edit);
        edit.seq = 2;
        edit.target_document = Some("a".into());
        edit.proposed_title = Some("A (renamed)".into());

        let preview = preview_batch("root", &docs, &[create, reorder, edit]).unwrap();
        let summary: Vec<(&str, Option<ChangeKind>)> =
            preview.iter().map(|n| (n.title.as_str(), n.change)).collect();
        assert_eq!(
            summary,
            vec![
                ("b", Some(ChangeKind::Reordered)),
                ("New", Some(ChangeKind::Added)),
                ("A (renamed)", Some(ChangeKind::Edited)),
            ]
        );
        assert_eq!(preview[1].id, "temp_new");
    }

    #[test]
    fn test_preview_marks_deleted_and_moved() {
        let docs = vec![
            doc("root", None, 0, 1),
            doc("group", Some("root"), 0, 2),
            doc("page", Some("root"), 1, 4),
            doc("old", Some("root"), 2, 6),
        ];
        let mut docs = docs;
        docs[1].is_group = true;

        let mut mv = Contribution::new("batch", ContributionOperation::Move);
        mv.seq = 0;
        mv.target_document = Some("page".into());
        mv.parent_ref = Some("group".into());
        mv.proposed_sort_order = Some(0);

        let mut delete = Contribution::new("batch", ContributionOperation::Delete);
        delete.seq = 1;
        delete.target_document = Some("old".into());

        let preview = preview_batch("root", &docs, &[mv, delete]).unwrap();
        assert_eq!(preview.len(), 2);
        assert_eq!(preview[0].children[0].id, "page");
        assert_eq!(preview[0].children[0].change, Some(ChangeKind::Moved));
        assert_eq!(preview[1].change, Some(ChangeKind::Deleted));
    }
}
