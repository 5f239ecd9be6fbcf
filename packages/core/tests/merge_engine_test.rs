//! Merge Engine Tests
//!
//! Approving a batch applies all of its contributions in one transaction.
//! Covers temp id resolution, sibling order replay, optimistic conflict
//! detection and all-or-nothing rollback.

#[cfg(test)]
mod merge_engine_tests {
    use anyhow::Result;
    use std::sync::Arc;
    use tempfile::TempDir;
    use wikiflow_core::db::DatabaseService;
    use wikiflow_core::models::{BatchStatus, ChangeKind, Document, DocumentUpdate, Space};
    use wikiflow_core::operations::{CreateDocumentParams, ReorderRequest};
    use wikiflow_core::services::{StaticRoleAccess, WikiService};

    async fn create_test_service() -> Result<(WikiService, Space, TempDir)> {
        let temp_dir = TempDir::new()?;
        let db = Arc::new(DatabaseService::new(temp_dir.path().join("test.db")).await?);
        let service = WikiService::new(db, Arc::new(StaticRoleAccess::new(["admin"])));
        let space = service.create_space("admin", "Engineering", "eng").await?;
        Ok((service, space, temp_dir))
    }

    async fn admin_page(service: &WikiService, space: &Space, title: &str) -> Result<Document> {
        let params = CreateDocumentParams::new(&space.id, &space.root_group, title).published();
        Ok(service
            .create_document("admin", params, None)
            .await?
            .document
            .expect("direct create returns the document"))
    }

    async fn document_count(service: &WikiService, space: &Space) -> Result<usize> {
        let tx = service.db().begin_read().await?;
        let docs = tx.space_documents(&space.id).await;
        Ok(tx.finish(docs).await?.len())
    }

    #[tokio::test]
    async fn test_merge_creates_nested_documents_and_deletes() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let keep = admin_page(&service, &space, "Keep").await?;
        let obsolete = admin_page(&service, &space, "Obsolete").await?;

        let group = service
            .create_document(
                "bob",
                CreateDocumentParams::new(&space.id, &space.root_group, "Runbooks").group(),
                None,
            )
            .await?;
        let group_temp = group.temp_id().expect("staged create has a temp id").to_string();
        let page = service
            .create_document(
                "bob",
                CreateDocumentParams::new(&space.id, &group_temp, "On-call")
                    .with_content("Page the secondary")
                    .published(),
                None,
            )
            .await?;
        let page_temp = page.temp_id().expect("staged create has a temp id").to_string();
        let staged_delete = service.delete_document("bob", &obsolete.id, None).await?;
        let batch = staged_delete.batch.expect("staged write returns the batch");

        service.submit_batch("bob", &batch.id).await?;
        let report = service.approve_batch("admin", &batch.id).await?;

        assert_eq!(report.batch.status, BatchStatus::Merged);
        assert_eq!(report.batch.reviewed_by.as_deref(), Some("admin"));
        assert!(report.batch.merged_at.is_some());
        assert_eq!(report.created.len(), 2);
        assert_eq!(report.deleted, vec![obsolete.id.clone()]);

        let group_id = report.created[&group_temp].clone();
        let page_id = report.created[&page_temp].clone();
        let merged_page = service.get_document(&page_id).await?;
        assert_eq!(merged_page.parent_id.as_deref(), Some(group_id.as_str()));
        assert_eq!(merged_page.content, "Page the secondary");
        assert_eq!(merged_page.route, "eng/runbooks/on-call");
        assert!(service.get_document(&obsolete.id).await.unwrap_err().is_not_found());

        let tree = service.get_tree(&space.id).await?;
        assert_eq!(tree.child_titles(), vec!["Keep", "Runbooks"]);
        assert_eq!(
            tree.find(&group_id).map(|g| g.descendant_ids()),
            Some(vec![page_id.clone()])
        );
        assert!(tree.find(&keep.id).is_some());

        let contributions = service.get_batch_contributions(&batch.id).await?;
        let recorded: Vec<Option<String>> = contributions
            .iter()
            .filter(|c| c.temp_id.is_some())
            .map(|c| c.merged_document.clone())
            .collect();
        assert_eq!(recorded, vec![Some(group_id), Some(page_id)]);

        assert!(service.verify_tree(&space.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_replays_sibling_order_with_created_documents() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let a = admin_page(&service, &space, "A").await?;
        let b = admin_page(&service, &space, "B").await?;

        let created = service
            .create_document(
                "bob",
                CreateDocumentParams::new(&space.id, &space.root_group, "X"),
                None,
            )
            .await?;
        let temp = created.temp_id().expect("staged create has a temp id").to_string();
        let placed = service
            .reorder_or_move(
                "bob",
                ReorderRequest::new(&temp, &space.root_group, 1, vec![a.id.clone(), temp.clone(), b.id.clone()]),
                None,
            )
            .await?;
        let batch = placed.batch.expect("staged write returns the batch");

        service.submit_batch("bob", &batch.id).await?;
        let report = service.approve_batch("admin", &batch.id).await?;
        let x = service.get_document(&report.created[&temp]).await?;

        assert_eq!(x.sort_order, 1);
        assert_eq!(service.get_document(&a.id).await?.sort_order, 0);
        assert_eq!(service.get_document(&b.id).await?.sort_order, 2);
        assert_eq!(
            service.get_tree(&space.id).await?.child_titles(),
            vec!["A", "X", "B"]
        );
        assert!(service.verify_tree(&space.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_merge_applies_staged_reorder_like_direct_reorder() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let q1 = admin_page(&service, &space, "Q1").await?;
        let q2 = admin_page(&service, &space, "Q2").await?;
        let q3 = admin_page(&service, &space, "Q3").await?;

        let outcome = service
            .reorder_or_move(
                "bob",
                ReorderRequest::new(&q3.id, &space.root_group, 0, vec![q3.id.clone(), q1.id.clone(), q2.id.clone()]),
                None,
            )
            .await?;
        let batch = outcome.batch.expect("staged write returns the batch");
        service.submit_batch("bob", &batch.id).await?;
        service.approve_batch("admin", &batch.id).await?;

        assert_eq!(
            service.get_tree(&space.id).await?.child_titles(),
            vec!["Q3", "Q1", "Q2"]
        );
        let public: Vec<String> = service
            .get_public_tree(&space.id)
            .await?
            .into_iter()
            .map(|n| n.title)
            .collect();
        assert_eq!(public, vec!["Q3", "Q1", "Q2"]);
        assert!(service.verify_tree(&space.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_direct_edit_after_staging_conflicts() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let page = admin_page(&service, &space, "Release notes").await?;

        let staged = service
            .edit_document("bob", &page.id, DocumentUpdate::new().with_content("bob"), None)
            .await?;
        let batch = staged.batch.expect("staged write returns the batch");
        service
            .edit_document("admin", &page.id, DocumentUpdate::new().with_content("admin"), None)
            .await?;
        service.submit_batch("bob", &batch.id).await?;

        let err = service.approve_batch("admin", &batch.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(err.to_string().contains("Conflict detected"));

        assert_eq!(service.get_batch(&batch.id).await?.status, BatchStatus::Submitted);
        assert_eq!(service.get_document(&page.id).await?.content, "admin");
        Ok(())
    }

    #[tokio::test]
    async fn test_second_batch_on_same_base_conflicts() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let page = admin_page(&service, &space, "P").await?;

        let first = service
            .edit_document("bob", &page.id, DocumentUpdate::new().with_content("first"), None)
            .await?
            .batch
            .expect("staged write returns the batch");
        let second = service
            .edit_document("carol", &page.id, DocumentUpdate::new().with_content("second"), None)
            .await?
            .batch
            .expect("staged write returns the batch");
        service.submit_batch("bob", &first.id).await?;
        service.submit_batch("carol", &second.id).await?;

        service.approve_batch("admin", &first.id).await?;
        assert_eq!(service.get_document(&page.id).await?.content, "first");

        let err = service.approve_batch("admin", &second.id).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(service.get_document(&page.id).await?.content, "first");
        assert_eq!(service.get_batch(&second.id).await?.status, BatchStatus::Submitted);

        // The loser can still be rejected
        let rejected = service
            .reject_batch("admin", &second.id, Some("superseded"))
            .await?;
        assert_eq!(rejected.status, BatchStatus::Rejected);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_merge_rolls_back_everything() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let page = admin_page(&service, &space, "Stale").await?;
        let before = document_count(&service, &space).await?;

        service
            .create_document(
                "bob",
                CreateDocumentParams::new(&space.id, &space.root_group, "Brand new"),
                None,
            )
            .await?;
        let batch = service
            .delete_document("bob", &page.id, None)
            .await?
            .batch
            .expect("staged write returns the batch");
        service
            .edit_document("admin", &page.id, DocumentUpdate::new().with_title("Fresh"), None)
            .await?;
        service.submit_batch("bob", &batch.id).await?;

        let err = service.approve_batch("admin", &batch.id).await.unwrap_err();
        assert!(err.is_conflict());

        assert_eq!(document_count(&service, &space).await?, before);
        assert_eq!(service.get_document(&page.id).await?.title, "Fresh");
        let contributions = service.get_batch_contributions(&batch.id).await?;
        assert!(contributions.iter().all(|c| c.merged_document.is_none()));
        assert!(service.verify_tree(&space.id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_own_placement_does_not_conflict_with_own_edit() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let a = admin_page(&service, &space, "A").await?;
        let b = admin_page(&service, &space, "B").await?;

        service
            .reorder_or_move(
                "bob",
                ReorderRequest::new(&b.id, &space.root_group, 0, vec![b.id.clone(), a.id.clone()]),
                None,
            )
            .await?;
        let batch = service
            .edit_document("bob", &b.id, DocumentUpdate::new().with_title("B first"), None)
            .await?
            .batch
            .expect("staged write returns the batch");
        service.submit_batch("bob", &batch.id).await?;

        service.approve_batch("admin", &batch.id).await?;
        assert_eq!(
            service.get_tree(&space.id).await?.child_titles(),
            vec!["B first", "A"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_batch_preview_shows_pending_changes() -> Result<()> {
        let (service, space, _temp_dir) = create_test_service().await?;
        let a = admin_page(&service, &space, "A").await?;
        let b = admin_page(&service, &space, "B").await?;

        service
            .edit_document("bob", &a.id, DocumentUpdate::new().with_title("A2"), None)
            .await?;
        service.delete_document("bob", &b.id, None).await?;
        let created = service
            .create_document(
                "bob",
                CreateDocumentParams::new(&space.id, &space.root_group, "C"),
                None,
            )
            .await?;
        let batch = created.batch.expect("staged write returns the batch");

        let preview = service.get_batch_tree(&batch.id).await?;
        let summary: Vec<(&str, Option<ChangeKind>)> = preview
            .iter()
            .map(|n| (n.title.as_str(), n.change))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("A2", Some(ChangeKind::Edited)),
                ("B", Some(ChangeKind::Deleted)),
                ("C", Some(ChangeKind::Added)),
            ]
        );

        // Preview writes nothing
        assert_eq!(
            service.get_tree(&space.id).await?.child_titles(),
            vec!["A", "B"]
        );
        Ok(())
    }
}
