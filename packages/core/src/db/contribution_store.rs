//! Contribution Store
//!
//! Record operations on contribution batches and their staged operations,
//! scoped to a [`StoreTransaction`].

use crate::db::error::DatabaseError;
use crate::db::rows::{
    get_int, get_opt_flag, get_opt_int, get_opt_text, get_opt_timestamp, get_text,
    get_timestamp, int, opt_flag, opt_int, opt_text, opt_timestamp, text, timestamp,
};
use crate::db::transaction::StoreTransaction;
use crate::models::{BatchStatus, Contribution, ContributionBatch, ContributionOperation};
use libsql::Row;

const BATCH_COLUMNS: &str = "id, space_id, owner, title, status, review_comment, reviewed_by, \
     created_at, modified_at, submitted_at, merged_at";

const CONTRIBUTION_COLUMNS: &str = "id, batch_id, seq, operation, target_document, temp_id, \
     parent_ref, proposed_title, proposed_content, proposed_is_published, proposed_is_group, \
     proposed_sort_order, siblings_order, base_modified_at, merged_document, created_at, modified_at";

fn row_to_batch(row: &Row) -> Result<ContributionBatch, DatabaseError> {
    let status = get_text(row, 4, "status")?;
    Ok(ContributionBatch {
        id: get_text(row, 0, "id")?,
        space_id: get_text(row, 1, "space_id")?,
        owner: get_text(row, 2, "owner")?,
        title: get_text(row, 3, "title")?,
        status: status
            .parse::<BatchStatus>()
            .map_err(|e| DatabaseError::corrupt_record(e.to_string()))?,
        review_comment: get_opt_text(row, 5, "review_comment")?,
        reviewed_by: get_opt_text(row, 6, "reviewed_by")?,
        created_at: get_timestamp(row, 7, "created_at")?,
        modified_at: get_timestamp(row, 8, "modified_at")?,
        submitted_at: get_opt_timestamp(row, 9, "submitted_at")?,
        merged_at: get_opt_timestamp(row, 10, "merged_at")?,
    })
}

fn row_to_contribution(row: &Row) -> Result<Contribution, DatabaseError> {
    let operation = get_text(row, 3, "operation")?
        .parse::<ContributionOperation>()
        .map_err(|e| DatabaseError::corrupt_record(e.to_string()))?;
    let siblings_order = get_opt_text(row, 12, "siblings_order")?
        .map(|raw| {
            serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|e| DatabaseError::corrupt_record(format!("siblings_order: {}", e)))
        })
        .transpose()?;

    Ok(Contribution {
        id: get_text(row, 0, "id")?,
        batch_id: get_text(row, 1, "batch_id")?,
        seq: get_int(row, 2, "seq")?,
        operation,
        target_document: get_opt_text(row, 4, "target_document")?,
        temp_id: get_opt_text(row, 5, "temp_id")?,
        parent_ref: get_opt_text(row, 6, "parent_ref")?,
        proposed_title: get_opt_text(row, 7, "proposed_title")?,
        proposed_content: get_opt_text(row, 8, "proposed_content")?,
        proposed_is_published: get_opt_flag(row, 9, "proposed_is_published")?,
        proposed_is_group: get_opt_flag(row, 10, "proposed_is_group")?,
        proposed_sort_order: get_opt_int(row, 11, "proposed_sort_order")?,
        siblings_order,
        base_modified_at: get_opt_timestamp(row, 13, "base_modified_at")?,
        merged_document: get_opt_text(row, 14, "merged_document")?,
        created_at: get_timestamp(row, 15, "created_at")?,
        modified_at: get_timestamp(row, 16, "modified_at")?,
    })
}

fn encode_siblings(siblings: Option<&Vec<String>>) -> Result<libsql::Value, DatabaseError> {
    match siblings {
        Some(list) => serde_json::to_string(list)
            .map(libsql::Value::Text)
            .map_err(|e| DatabaseError::sql_execution(format!("encode siblings_order: {}", e))),
        None => Ok(libsql::Value::Null),
    }
}

impl StoreTransaction {
    //
    // BATCHES
    //

    pub async fn insert_batch(&self, batch: &ContributionBatch) -> Result<(), DatabaseError> {
        self.execute(
            &format!(
                "INSERT INTO contribution_batches ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                BATCH_COLUMNS
            ),
            vec![
                text(&batch.id),
                text(&batch.space_id),
                text(&batch.owner),
                text(&batch.title),
                text(batch.status.as_str()),
                opt_text(batch.review_comment.as_deref()),
                opt_text(batch.reviewed_by.as_deref()),
                timestamp(&batch.created_at),
                timestamp(&batch.modified_at),
                opt_timestamp(batch.submitted_at.as_ref()),
                opt_timestamp(batch.merged_at.as_ref()),
            ],
            "insert contribution batch",
        )
        .await?;
        Ok(())
    }

    /// Persist every mutable batch field
    pub async fn update_batch(&self, batch: &ContributionBatch) -> Result<(), DatabaseError> {
        self.execute(
            "UPDATE contribution_batches
             SET title = ?, status = ?, review_comment = ?, reviewed_by = ?, modified_at = ?,
                 submitted_at = ?, merged_at = ?
             WHERE id = ?",
            vec![
                text(&batch.title),
                text(batch.status.as_str()),
                opt_text(batch.review_comment.as_deref()),
                opt_text(batch.reviewed_by.as_deref()),
                timestamp(&batch.modified_at),
                opt_timestamp(batch.submitted_at.as_ref()),
                opt_timestamp(batch.merged_at.as_ref()),
                text(&batch.id),
            ],
            "update contribution batch",
        )
        .await?;
        Ok(())
    }

    pub async fn get_batch(&self, id: &str) -> Result<Option<ContributionBatch>, DatabaseError> {
        let mut rows = self
            .query(
                &format!(
                    "SELECT {} FROM contribution_batches WHERE id = ?",
                    BATCH_COLUMNS
                ),
                [id],
                "get contribution batch",
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_batch(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn find_draft_batch(
        &self,
        owner: &str,
        space_id: &str,
    ) -> Result<Option<ContributionBatch>, DatabaseError> {
        let mut rows = self
            .query(
                &format!(
                    "SELECT {} FROM contribution_batches
                     WHERE owner = ? AND space_id = ? AND status = 'draft'",
                    BATCH_COLUMNS
                ),
                [owner, space_id],
                "find draft batch",
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_batch(&row)?)),
            None => Ok(None),
        }
    }

    async fn collect_batches(
        &self,
        sql: &str,
        param: &str,
        context: &str,
    ) -> Result<Vec<ContributionBatch>, DatabaseError> {
        let mut rows = self.query(sql, [param], context).await?;
        let mut batches = Vec::new();
        while let Some(row) = rows.next().await? {
            batches.push(row_to_batch(&row)?);
        }
        Ok(batches)
    }

    /// Batches owned by `owner`, newest first
    pub async fn batches_for_owner(
        &self,
        owner: &str,
    ) -> Result<Vec<ContributionBatch>, DatabaseError> {
        self.collect_batches(
            &format!(
                "SELECT {} FROM contribution_batches WHERE owner = ?
                 ORDER BY created_at DESC, id",
                BATCH_COLUMNS
            ),
            owner,
            "list batches for owner",
        )
        .await
    }

    /// Batches in `status`, oldest submission first
    pub async fn batches_with_status(
        &self,
        status: BatchStatus,
    ) -> Result<Vec<ContributionBatch>, DatabaseError> {
        self.collect_batches(
            &format!(
                "SELECT {} FROM contribution_batches WHERE status = ?
                 ORDER BY submitted_at, created_at, id",
                BATCH_COLUMNS
            ),
            status.as_str(),
            "list batches by status",
        )
        .await
    }

    //
    // CONTRIBUTIONS
    //

    pub async fn insert_contribution(&self, c: &Contribution) -> Result<(), DatabaseError> {
        self.execute(
            &format!(
                "INSERT INTO contributions ({})
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                CONTRIBUTION_COLUMNS
            ),
            vec![
                text(&c.id),
                text(&c.batch_id),
                int(c.seq),
                text(c.operation.as_str()),
                opt_text(c.target_document.as_deref()),
                opt_text(c.temp_id.as_deref()),
                opt_text(c.parent_ref.as_deref()),
                opt_text(c.proposed_title.as_deref()),
                opt_text(c.proposed_content.as_deref()),
                opt_flag(c.proposed_is_published),
                opt_flag(c.proposed_is_group),
                opt_int(c.proposed_sort_order),
                encode_siblings(c.siblings_order.as_ref())?,
                opt_timestamp(c.base_modified_at.as_ref()),
                opt_text(c.merged_document.as_deref()),
                timestamp(&c.created_at),
                timestamp(&c.modified_at),
            ],
            "insert contribution",
        )
        .await?;
        Ok(())
    }

    /// Persist every mutable contribution field
    pub async fn update_contribution(&self, c: &Contribution) -> Result<(), DatabaseError> {
        self.execute(
            "UPDATE contributions
             SET operation = ?, parent_ref = ?, proposed_title = ?, proposed_content = ?,
                 proposed_is_published = ?, proposed_is_group = ?, proposed_sort_order = ?,
                 siblings_order = ?, merged_document = ?, modified_at = ?
             WHERE id = ?",
            vec![
                text(c.operation.as_str()),
                opt_text(c.parent_ref.as_deref()),
                opt_text(c.proposed_title.as_deref()),
                opt_text(c.proposed_content.as_deref()),
                opt_flag(c.proposed_is_published),
                opt_flag(c.proposed_is_group),
                opt_int(c.proposed_sort_order),
                encode_siblings(c.siblings_order.as_ref())?,
                opt_text(c.merged_document.as_deref()),
                timestamp(&c.modified_at),
                text(&c.id),
            ],
            "update contribution",
        )
        .await?;
        Ok(())
    }

    pub async fn delete_contribution(&self, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .execute(
                "DELETE FROM contributions WHERE id = ?",
                [id],
                "delete contribution",
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn get_contribution(&self, id: &str) -> Result<Option<Contribution>, DatabaseError> {
        self.first_contribution("WHERE id = ?", vec![text(id)], "get contribution")
            .await
    }

    async fn first_contribution(
        &self,
        filter: &str,
        params: Vec<libsql::Value>,
        context: &str,
    ) -> Result<Option<Contribution>, DatabaseError> {
        let mut rows = self
            .query(
                &format!(
                    "SELECT {} FROM contributions {} ORDER BY seq LIMIT 1",
                    CONTRIBUTION_COLUMNS, filter
                ),
                params,
                context,
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_contribution(&row)?)),
            None => Ok(None),
        }
    }

    /// Contributions of a batch in staging order
    pub async fn contributions_for_batch(
        &self,
        batch_id: &str,
    ) -> Result<Vec<Contribution>, DatabaseError> {
        let mut rows = self
            .query(
                &format!(
                    "SELECT {} FROM contributions WHERE batch_id = ? ORDER BY seq",
                    CONTRIBUTION_COLUMNS
                ),
                [batch_id],
                "list batch contributions",
            )
            .await?;
        let mut contributions = Vec::new();
        while let Some(row) = rows.next().await? {
            contributions.push(row_to_contribution(&row)?);
        }
        Ok(contributions)
    }

    /// The create contribution that introduced `temp_id`
    pub async fn find_contribution_by_temp_id(
        &self,
        temp_id: &str,
    ) -> Result<Option<Contribution>, DatabaseError> {
        self.first_contribution(
            "WHERE temp_id = ?",
            vec![text(temp_id)],
            "find contribution by temp id",
        )
        .await
    }

    /// Existing contribution in `batch_id` for `target` with one of `operations`
    pub async fn find_staged(
        &self,
        batch_id: &str,
        operations: &[ContributionOperation],
        target: &str,
    ) -> Result<Option<Contribution>, DatabaseError> {
        if operations.is_empty() {
            return Ok(None);
        }
        let placeholders = vec!["?"; operations.len()].join(", ");
        let mut params = vec![text(batch_id), text(target)];
        params.extend(operations.iter().map(|op| text(op.as_str())));
        self.first_contribution(
            &format!(
                "WHERE batch_id = ? AND target_document = ? AND operation IN ({})",
                placeholders
            ),
            params,
            "find staged contribution",
        )
        .await
    }

    /// Contributions in `batch_id` staged under parent `parent_ref`
    pub async fn contributions_with_parent(
        &self,
        batch_id: &str,
        parent_ref: &str,
    ) -> Result<Vec<Contribution>, DatabaseError> {
        let mut rows = self
            .query(
                &format!(
                    "SELECT {} FROM contributions WHERE batch_id = ? AND parent_ref = ? ORDER BY seq",
                    CONTRIBUTION_COLUMNS
                ),
                [batch_id, parent_ref],
                "list contributions by parent",
            )
            .await?;
        let mut contributions = Vec::new();
        while let Some(row) = rows.next().await? {
            contributions.push(row_to_contribution(&row)?);
        }
        Ok(contributions)
    }

    pub async fn count_contributions(&self, batch_id: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT COUNT(*) FROM contributions WHERE batch_id = ?",
                [batch_id],
                "count contributions",
            )
            .await?;
        match rows.next().await? {
            Some(row) => get_int(&row, 0, "count"),
            None => Ok(0),
        }
    }

    /// Next `seq` value for a batch
    pub async fn next_contribution_seq(&self, batch_id: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM contributions WHERE batch_id = ?",
                [batch_id],
                "compute next contribution seq",
            )
            .await?;
        match rows.next().await? {
            Some(row) => get_int(&row, 0, "seq"),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::DatabaseService;
    use crate::models::{
        db_now, new_temp_id, BatchStatus, Contribution, ContributionBatch, ContributionOperation,
        Space,
    };
    use tempfile::TempDir;

    async fn setup() -> (DatabaseService, Space, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        let space = Space {
            id: "space-1".into(),
            name: "Docs".into(),
            route: "docs".into(),
            root_group: "root".into(),
            created_at: db_now(),
        };
        let tx = db.begin().await.unwrap();
        tx.insert_space(&space).await.unwrap();
        tx.commit().await.unwrap();
        (db, space, temp_dir)
    }

    #[tokio::test]
    async fn test_batch_lookup_and_status_update() {
        let (db, space, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();

        let mut batch = ContributionBatch::new_draft(&space.id, "alice", "Fix typos");
        tx.insert_batch(&batch).await.unwrap();

        let found = tx.find_draft_batch("alice", &space.id).await.unwrap();
        assert_eq!(found.as_ref().map(|b| b.id.as_str()), Some(batch.id.as_str()));
        assert!(tx.find_draft_batch("bob", &space.id).await.unwrap().is_none());

        batch.status = BatchStatus::Submitted;
        batch.submitted_at = Some(db_now());
        tx.update_batch(&batch).await.unwrap();

        assert!(tx.find_draft_batch("alice", &space.id).await.unwrap().is_none());
        let submitted = tx.batches_with_status(BatchStatus::Submitted).await.unwrap();
        assert_eq!(submitted, vec![batch]);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_draft_for_same_owner_is_rejected() {
        let (db, space, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();

        tx.insert_batch(&ContributionBatch::new_draft(&space.id, "alice", "One"))
            .await
            .unwrap();
        let duplicate = tx
            .insert_batch(&ContributionBatch::new_draft(&space.id, "alice", "Two"))
            .await;
        assert!(duplicate.is_err());

        tx.insert_batch(&ContributionBatch::new_draft(&space.id, "bob", "Three"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_contribution_persistence_and_lookup() {
        let (db, space, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();
        let batch = ContributionBatch::new_draft(&space.id, "alice", "Restructure");
        tx.insert_batch(&batch).await.unwrap();

        let temp_id = new_temp_id();
        let mut create = Contribution::new(&batch.id, ContributionOperation::Create);
        create.temp_id = Some(temp_id.clone());
        create.parent_ref = Some("root".into());
        create.proposed_title = Some("New page".into());
        create.proposed_is_group = Some(false);
        create.siblings_order = Some(vec!["a".into(), temp_id.clone(), "b".into()]);
        create.seq = tx.next_contribution_seq(&batch.id).await.unwrap();
        tx.insert_contribution(&create).await.unwrap();

        let mut reorder = Contribution::new(&batch.id, ContributionOperation::Reorder);
        reorder.target_document = Some("a".into());
        reorder.proposed_sort_order = Some(4);
        reorder.base_modified_at = Some(db_now());
        reorder.seq = tx.next_contribution_seq(&batch.id).await.unwrap();
        tx.insert_contribution(&reorder).await.unwrap();

        assert_eq!((create.seq, reorder.seq), (0, 1));
        assert_eq!(
            tx.find_contribution_by_temp_id(&temp_id).await.unwrap(),
            Some(create.clone())
        );
        let staged = tx
            .find_staged(
                &batch.id,
                &[ContributionOperation::Move, ContributionOperation::Reorder],
                "a",
            )
            .await
            .unwrap();
        assert_eq!(staged, Some(reorder.clone()));
        assert!(tx
            .find_staged(&batch.id, &[ContributionOperation::Edit], "a")
            .await
            .unwrap()
            .is_none());

        assert_eq!(
            tx.contributions_for_batch(&batch.id).await.unwrap(),
            vec![create, reorder]
        );
        assert_eq!(tx.count_contributions(&batch.id).await.unwrap(), 2);
        tx.commit().await.unwrap();
    }
}
