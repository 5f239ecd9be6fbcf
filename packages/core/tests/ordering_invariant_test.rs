//! Ordering Invariant Tests
//!
//! Verifies that `sort_order` and the nested-set ranges agree after every
//! direct write, rebuild and fresh read, and that the management and public
//! views always present the same sibling order.

#[cfg(test)]
mod ordering_invariant_tests {
    use anyhow::Result;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wikiflow_core::db::DatabaseService;
    use wikiflow_core::models::{is_temp_id, Document, Space};
    use wikiflow_core::operations::{CreateDocumentParams, ReorderRequest};
    use wikiflow_core::services::{StaticRoleAccess, WikiService};

    /// Helper to create a service where "admin" is the only manager
    async fn create_test_service() -> Result<(WikiService, Space, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(DatabaseService::new(db_path).await?);
        let service = WikiService::new(db, Arc::new(StaticRoleAccess::new(["admin"])));
        let space = service.create_space("admin", "Handbook", "handbook").await?;
        Ok((service, space, temp_dir))
    }

    /// A service on the same database file with nothing carried over
    async fn reopen(temp_dir: &TempDir) -> Result<WikiService> {
        let db = Arc::new(DatabaseService::new(temp_dir.path().join("test.db")).await?);
        Ok(WikiService::new(db, Arc::new(StaticRoleAccess::new(["admin"]))))
    }

    async fn add_page(
        service: &WikiService,
        space: &Space,
        parent: &str,
        title: &str,
        sort_order: Option<i64>,
    ) -> Result<Document> {
        let mut params = CreateDocumentParams::new(&space.id, parent, title).published();
        params.sort_order = sort_order;
        let outcome = service.create_document("admin", params, None).await?;
        assert!(!outcome.is_contribution);
        Ok(outcome.document.expect("direct create returns the document"))
    }

    async fn assert_invariant(service: &WikiService, space: &Space) -> Result<()> {
        let violations = service.verify_tree(&space.id).await?;
        assert!(violations.is_empty(), "ordering violations: {:?}", violations);
        Ok(())
    }

    async fn root_titles(service: &WikiService, space: &Space) -> Result<Vec<String>> {
        let tree = service.get_tree(&space.id).await?;
        Ok(tree.child_titles().into_iter().map(String::from).collect())
    }

    #[tokio::test]
    async fn test_explicit_then_appended_sort_order() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;

        for (i, title) in ["Q1", "Q2", "Q3", "Q4", "Q5"].iter().enumerate() {
            add_page(&service, &space, &space.root_group, title, Some(i as i64)).await?;
            assert_invariant(&service, &space).await?;
        }
        assert_eq!(
            root_titles(&service, &space).await?,
            vec!["Q1", "Q2", "Q3", "Q4", "Q5"]
        );

        let q6 = add_page(&service, &space, &space.root_group, "Q6", None).await?;
        assert_eq!(q6.sort_order, 5);
        assert_eq!(
            root_titles(&service, &space).await?,
            vec!["Q1", "Q2", "Q3", "Q4", "Q5", "Q6"]
        );
        assert_invariant(&service, &space).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_direct_reorder_survives_fresh_read() -> Result<()> {
        let (service, space, temp_dir) = create_test_service().await?;
        let q1 = add_page(&service, &space, &space.root_group, "Q1", Some(0)).await?;
        let q2 = add_page(&service, &space, &space.root_group, "Q2", Some(1)).await?;
        let q3 = add_page(&service, &space, &space.root_group, "Q3", Some(2)).await?;

        let request = ReorderRequest::new(
            &q3.id,
            &space.root_group,
            0,
            vec![q3.id.clone(), q1.id.clone(), q2.id.clone()],
        );
        let outcome = service.reorder_or_move("admin", request, None).await?;
        assert!(!outcome.is_contribution);
        assert!(outcome.contribution.is_none());

        assert_eq!(service.get_document(&q3.id).await?.sort_order, 0);
        assert_eq!(service.get_document(&q1.id).await?.sort_order, 1);
        assert_eq!(service.get_document(&q2.id).await?.sort_order, 2);
        assert_eq!(root_titles(&service, &space).await?, vec!["Q3", "Q1", "Q2"]);
        assert_invariant(&service, &space).await?;

        let fresh = reopen(&temp_dir).await?;
        assert_eq!(root_titles(&fresh, &space).await?, vec!["Q3", "Q1", "Q2"]);
        let public: Vec<String> = fresh
            .get_public_tree(&space.id)
            .await?
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(public, vec!["Q3", "Q1", "Q2"]);
        assert_invariant(&fresh, &space).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_temp_ids_leave_gaps_in_sibling_order() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let a = add_page(&service, &space, &space.root_group, "A", None).await?;
        let b = add_page(&service, &space, &space.root_group, "B", None).await?;

        // A staged create that has not been merged yet
        let params = CreateDocumentParams::new(&space.id, &space.root_group, "X");
        let staged = service.create_document("bob", params, None).await?;
        let temp_x = staged.temp_id().expect("staged create has a temp id").to_string();
        assert!(is_temp_id(&temp_x));

        let request = ReorderRequest::new(
            &a.id,
            &space.root_group,
            0,
            vec![a.id.clone(), temp_x.clone(), b.id.clone()],
        );
        service.reorder_or_move("admin", request, None).await?;

        assert_eq!(service.get_document(&a.id).await?.sort_order, 0);
        assert_eq!(service.get_document(&b.id).await?.sort_order, 2);
        assert!(service.get_tree(&space.id).await?.find(&temp_x).is_none());
        assert_invariant(&service, &space).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unlisted_sibling_moves_after_listed_positions() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let c = add_page(&service, &space, &space.root_group, "C", Some(0)).await?;
        let a = add_page(&service, &space, &space.root_group, "A", Some(1)).await?;
        let b = add_page(&service, &space, &space.root_group, "B", Some(2)).await?;

        let params = CreateDocumentParams::new(&space.id, &space.root_group, "X");
        let staged = service.create_document("bob", params, None).await?;
        let temp_x = staged.temp_id().expect("staged create has a temp id").to_string();

        // C is left out of the list and used to hold position 0
        let request = ReorderRequest::new(
            &a.id,
            &space.root_group,
            0,
            vec![a.id.clone(), temp_x, b.id.clone()],
        );
        service.reorder_or_move("admin", request, None).await?;

        let a = service.get_document(&a.id).await?;
        let b = service.get_document(&b.id).await?;
        let c = service.get_document(&c.id).await?;
        assert_eq!((a.sort_order, b.sort_order), (0, 2));
        assert_eq!(c.sort_order, 3);
        assert_eq!(root_titles(&service, &space).await?, vec!["A", "B", "C"]);
        assert_invariant(&service, &space).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_sibling_keeps_first_position() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let a = add_page(&service, &space, &space.root_group, "A", None).await?;
        let b = add_page(&service, &space, &space.root_group, "B", None).await?;

        let request = ReorderRequest::new(
            &b.id,
            &space.root_group,
            0,
            vec![b.id.clone(), a.id.clone(), b.id.clone()],
        );
        service.reorder_or_move("admin", request, None).await?;

        assert_eq!(service.get_document(&b.id).await?.sort_order, 0);
        assert_eq!(service.get_document(&a.id).await?.sort_order, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_sort_order_collision_inserts_before() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        add_page(&service, &space, &space.root_group, "A", Some(0)).await?;
        add_page(&service, &space, &space.root_group, "B", Some(1)).await?;
        add_page(&service, &space, &space.root_group, "C", Some(2)).await?;

        add_page(&service, &space, &space.root_group, "X", Some(1)).await?;

        assert_eq!(root_titles(&service, &space).await?, vec!["A", "X", "B", "C"]);
        assert_invariant(&service, &space).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_move_between_groups_keeps_ranges_nested() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let guides = service
            .create_document(
                "admin",
                CreateDocumentParams::new(&space.id, &space.root_group, "Guides").group(),
                None,
            )
            .await?
            .document
            .expect("direct create returns the document");
        let page = add_page(&service, &space, &space.root_group, "Setup", None).await?;
        let other = add_page(&service, &space, &guides.id, "Other", None).await?;

        let request =
            ReorderRequest::new(&page.id, &guides.id, 0, vec![page.id.clone(), other.id.clone()]);
        let outcome = service.reorder_or_move("admin", request, None).await?;
        let moved = outcome.document.expect("direct move returns the document");
        assert_eq!(moved.parent_id.as_deref(), Some(guides.id.as_str()));

        let guides = service.get_document(&guides.id).await?;
        assert!(guides.contains(&moved));
        let tree = service.get_tree(&space.id).await?;
        assert_eq!(tree.child_titles(), vec!["Guides"]);
        assert_eq!(
            tree.find(&guides.id).map(|g| g.descendant_ids()),
            Some(vec![page.id.clone(), other.id.clone()])
        );
        assert_invariant(&service, &space).await?;

        // Into its own subtree is rejected
        let request = ReorderRequest::new(&guides.id, &guides.id, 0, Vec::new());
        assert!(service
            .reorder_or_move("admin", request, None)
            .await
            .unwrap_err()
            .is_validation());
        Ok(())
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() -> Result<()> {
        let (service, space, temp_dir) = create_test_service().await?;
        let group = service
            .create_document(
                "admin",
                CreateDocumentParams::new(&space.id, &space.root_group, "Group").group(),
                None,
            )
            .await?
            .document
            .expect("direct create returns the document");
        for title in ["One", "Two", "Three"] {
            add_page(&service, &space, &group.id, title, None).await?;
        }
        add_page(&service, &space, &space.root_group, "Tail", None).await?;

        let snapshot = |docs: Vec<Document>| {
            let mut ranges: Vec<(String, i64, i64, i64)> = docs
                .into_iter()
                .map(|d| (d.id, d.lft, d.rgt, d.sort_order))
                .collect();
            ranges.sort();
            ranges
        };
        let read = || async {
            let tx = service.db().begin_read().await?;
            let docs = tx.space_documents(&space.id).await;
            tx.finish(docs).await
        };

        let first = service.rebuild_tree(&space.id).await?;
        let after_first = snapshot(read().await?);
        let second = service.rebuild_tree(&space.id).await?;
        let after_second = snapshot(read().await?);

        assert_eq!(after_first, after_second);
        assert_eq!(second.updated, 0);
        assert_eq!(first.documents, 6);
        assert!(second.orphans.is_empty());

        let fresh = reopen(&temp_dir).await?;
        fresh.rebuild_tree(&space.id).await?;
        let tx = fresh.db().begin_read().await?;
        let docs = tx.space_documents(&space.id).await;
        assert_eq!(snapshot(tx.finish(docs).await?), after_first);
        Ok(())
    }

    #[tokio::test]
    async fn test_management_and_public_views_agree() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let group = service
            .create_document(
                "admin",
                CreateDocumentParams::new(&space.id, &space.root_group, "Guides")
                    .group()
                    .published(),
                None,
            )
            .await?
            .document
            .expect("direct create returns the document");
        let g1 = add_page(&service, &space, &group.id, "Install", None).await?;
        let g2 = add_page(&service, &space, &group.id, "Configure", None).await?;
        let faq = add_page(&service, &space, &space.root_group, "FAQ", None).await?;

        let views = |service: WikiService| {
            let space_id = space.id.clone();
            async move {
                let admin = service.get_tree(&space_id).await?;
                let admin_ids: Vec<Vec<String>> = admin
                    .children
                    .iter()
                    .map(|n| {
                        std::iter::once(n.id.clone())
                            .chain(n.descendant_ids())
                            .collect()
                    })
                    .collect();
                let public = service.get_public_tree(&space_id).await?;
                let public_ids: Vec<Vec<String>> = public
                    .iter()
                    .map(|n| {
                        std::iter::once(n.id.clone())
                            .chain(n.descendant_ids())
                            .collect()
                    })
                    .collect();
                Ok::<_, anyhow::Error>((admin_ids, public_ids))
            }
        };

        let (admin, public) = views(service.clone()).await?;
        assert_eq!(admin, public);
        assert_eq!(admin[0], vec![group.id.clone(), g1.id.clone(), g2.id.clone()]);

        service
            .reorder_or_move(
                "admin",
                ReorderRequest::new(&faq.id, &space.root_group, 0, vec![faq.id.clone(), group.id.clone()]),
                None,
            )
            .await?;
        service
            .reorder_or_move(
                "admin",
                ReorderRequest::new(&g2.id, &group.id, 0, vec![g2.id.clone(), g1.id.clone()]),
                None,
            )
            .await?;

        let (admin, public) = views(service.clone()).await?;
        assert_eq!(admin, public);
        assert_eq!(admin[0], vec![faq.id.clone()]);
        assert_eq!(admin[1], vec![group.id.clone(), g2.id.clone(), g1.id.clone()]);
        assert_invariant(&service, &space).await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_unpublished_pages_stay_out_of_public_view() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let params = CreateDocumentParams::new(&space.id, &space.root_group, "Draft page");
        let draft = service
            .create_document("admin", params, None)
            .await?
            .document
            .expect("direct create returns the document");
        let shown = add_page(&service, &space, &space.root_group, "Shown", None).await?;

        let admin = service.get_tree(&space.id).await?;
        assert!(admin.find(&draft.id).is_some());
        let public = service.get_public_tree(&space.id).await?;
        let ids: Vec<&str> = public.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![shown.id.as_str()]);
        Ok(())
    }
}
