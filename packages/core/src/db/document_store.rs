//! Tree Store
//!
//! Record operations on spaces and documents, scoped to a
//! [`StoreTransaction`]. Writes that change a document's own fields bump its
//! `modified_at` through [`next_modified_at`]; range writes do not.

use crate::db::error::DatabaseError;
use crate::db::rows::{
    flag, get_flag, get_int, get_opt_text, get_text, get_timestamp, int, opt_text, text,
    timestamp,
};
use crate::db::transaction::StoreTransaction;
use crate::models::{next_modified_at, Document, DocumentUpdate, Space};
use libsql::Row;

const DOCUMENT_COLUMNS: &str = "id, space_id, title, content, route, is_group, is_published, \
     parent_id, sort_order, lft, rgt, created_at, modified_at";

fn row_to_document(row: &Row) -> Result<Document, DatabaseError> {
    Ok(Document {
        id: get_text(row, 0, "id")?,
        space_id: get_text(row, 1, "space_id")?,
        title: get_text(row, 2, "title")?,
        content: get_text(row, 3, "content")?,
        route: get_text(row, 4, "route")?,
        is_group: get_flag(row, 5, "is_group")?,
        is_published: get_flag(row, 6, "is_published")?,
        parent_id: get_opt_text(row, 7, "parent_id")?,
        sort_order: get_int(row, 8, "sort_order")?,
        lft: get_int(row, 9, "lft")?,
        rgt: get_int(row, 10, "rgt")?,
        created_at: get_timestamp(row, 11, "created_at")?,
        modified_at: get_timestamp(row, 12, "modified_at")?,
    })
}

fn row_to_space(row: &Row) -> Result<Space, DatabaseError> {
    Ok(Space {
        id: get_text(row, 0, "id")?,
        name: get_text(row, 1, "name")?,
        route: get_text(row, 2, "route")?,
        root_group: get_text(row, 3, "root_group")?,
        created_at: get_timestamp(row, 4, "created_at")?,
    })
}

impl StoreTransaction {
    //
    // SPACES
    //

    pub async fn insert_space(&self, space: &Space) -> Result<(), DatabaseError> {
        self.execute(
            "INSERT INTO spaces (id, name, route, root_group, created_at) VALUES (?, ?, ?, ?, ?)",
            vec![
                text(&space.id),
                text(&space.name),
                text(&space.route),
                text(&space.root_group),
                timestamp(&space.created_at),
            ],
            "insert space",
        )
        .await?;
        Ok(())
    }

    pub async fn get_space(&self, id: &str) -> Result<Option<Space>, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT id, name, route, root_group, created_at FROM spaces WHERE id = ?",
                [id],
                "get space",
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_space(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_spaces(&self) -> Result<Vec<Space>, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT id, name, route, root_group, created_at FROM spaces ORDER BY created_at, id",
                (),
                "list spaces",
            )
            .await?;
        let mut spaces = Vec::new();
        while let Some(row) = rows.next().await? {
            spaces.push(row_to_space(&row)?);
        }
        Ok(spaces)
    }

    pub async fn space_route_exists(&self, route: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT 1 FROM spaces WHERE route = ?",
                [route],
                "check space route",
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    //
    // DOCUMENTS
    //

    pub async fn insert_document(&self, doc: &Document) -> Result<(), DatabaseError> {
        self.execute(
            &format!(
                "INSERT INTO documents ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                DOCUMENT_COLUMNS
            ),
            vec![
                text(&doc.id),
                text(&doc.space_id),
                text(&doc.title),
                text(&doc.content),
                text(&doc.route),
                flag(doc.is_group),
                flag(doc.is_published),
                opt_text(doc.parent_id.as_deref()),
                int(doc.sort_order),
                int(doc.lft),
                int(doc.rgt),
                timestamp(&doc.created_at),
                timestamp(&doc.modified_at),
            ],
            "insert document",
        )
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, DatabaseError> {
        let mut rows = self
            .query(
                &format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS),
                [id],
                "get document",
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// Write the mutable fields of `doc` as given, including `modified_at`
    async fn write_document(&self, doc: &Document) -> Result<(), DatabaseError> {
        self.execute(
            "UPDATE documents SET title = ?, content = ?, is_published = ?, parent_id = ?,
                    sort_order = ?, modified_at = ?
             WHERE id = ?",
            vec![
                text(&doc.title),
                text(&doc.content),
                flag(doc.is_published),
                opt_text(doc.parent_id.as_deref()),
                int(doc.sort_order),
                timestamp(&doc.modified_at),
                text(&doc.id),
            ],
            "update document",
        )
        .await?;
        Ok(())
    }

    /// Apply `update` to `doc`. Returns the stored document.
    ///
    /// Leaves the row (and `modified_at`) untouched when nothing changes.
    pub async fn update_document(
        &self,
        doc: &Document,
        update: &DocumentUpdate,
    ) -> Result<Document, DatabaseError> {
        if !update.changes(doc) {
            return Ok(doc.clone());
        }
        let mut updated = doc.clone();
        if let Some(title) = &update.title {
            updated.title = title.clone();
        }
        if let Some(content) = &update.content {
            updated.content = content.clone();
        }
        if let Some(is_published) = update.is_published {
            updated.is_published = is_published;
        }
        updated.modified_at = next_modified_at(doc.modified_at);
        self.write_document(&updated).await?;
        Ok(updated)
    }

    pub async fn set_parent(
        &self,
        doc: &Document,
        parent_id: &str,
    ) -> Result<Document, DatabaseError> {
        if doc.parent_id.as_deref() == Some(parent_id) {
            return Ok(doc.clone());
        }
        let mut updated = doc.clone();
        updated.parent_id = Some(parent_id.to_string());
        updated.modified_at = next_modified_at(doc.modified_at);
        self.write_document(&updated).await?;
        Ok(updated)
    }

    pub async fn set_sort_order(
        &self,
        doc: &Document,
        sort_order: i64,
    ) -> Result<Document, DatabaseError> {
        if doc.sort_order == sort_order {
            return Ok(doc.clone());
        }
        let mut updated = doc.clone();
        updated.sort_order = sort_order;
        updated.modified_at = next_modified_at(doc.modified_at);
        self.write_document(&updated).await?;
        Ok(updated)
    }

    /// Write derived ordering fields without touching `modified_at`
    pub async fn set_ranges(
        &self,
        id: &str,
        lft: i64,
        rgt: i64,
        sort_order: i64,
    ) -> Result<(), DatabaseError> {
        self.execute(
            "UPDATE documents SET lft = ?, rgt = ?, sort_order = ? WHERE id = ?",
            vec![int(lft), int(rgt), int(sort_order), text(id)],
            "write document ranges",
        )
        .await?;
        Ok(())
    }

    /// Hard delete. Returns whether a row was removed.
    pub async fn delete_document(&self, id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .execute("DELETE FROM documents WHERE id = ?", [id], "delete document")
            .await?;
        Ok(affected > 0)
    }

    async fn collect_documents(
        &self,
        sql: &str,
        params: Vec<libsql::Value>,
        context: &str,
    ) -> Result<Vec<Document>, DatabaseError> {
        let mut rows = self.query(sql, params, context).await?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next().await? {
            docs.push(row_to_document(&row)?);
        }
        Ok(docs)
    }

    /// Direct children of `parent_id` ordered by `sort_order`
    pub async fn children_of(&self, parent_id: &str) -> Result<Vec<Document>, DatabaseError> {
        self.collect_documents(
            &format!(
                "SELECT {} FROM documents WHERE parent_id = ? ORDER BY sort_order, lft, id",
                DOCUMENT_COLUMNS
            ),
            vec![text(parent_id)],
            "list children",
        )
        .await
    }

    /// All documents strictly inside `root`'s range, ordered by `lft`
    pub async fn descendants_of(&self, root: &Document) -> Result<Vec<Document>, DatabaseError> {
        self.collect_documents(
            &format!(
                "SELECT {} FROM documents WHERE space_id = ? AND lft > ? AND rgt < ? ORDER BY lft",
                DOCUMENT_COLUMNS
            ),
            vec![text(&root.space_id), int(root.lft), int(root.rgt)],
            "list descendants",
        )
        .await
    }

    /// Every document in a space, ordered by `lft`
    pub async fn space_documents(&self, space_id: &str) -> Result<Vec<Document>, DatabaseError> {
        self.collect_documents(
            &format!(
                "SELECT {} FROM documents WHERE space_id = ? ORDER BY lft, id",
                DOCUMENT_COLUMNS
            ),
            vec![text(space_id)],
            "list space documents",
        )
        .await
    }

    pub async fn max_child_sort_order(&self, parent_id: &str) -> Result<Option<i64>, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT MAX(sort_order) FROM documents WHERE parent_id = ?",
                [parent_id],
                "compute max sort order",
            )
            .await?;
        match rows.next().await? {
            Some(row) => row
                .get::<Option<i64>>(0)
                .map_err(|e| DatabaseError::corrupt_record(format!("max sort_order: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn count_children(&self, parent_id: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT COUNT(*) FROM documents WHERE parent_id = ?",
                [parent_id],
                "count children",
            )
            .await?;
        match rows.next().await? {
            Some(row) => get_int(&row, 0, "count"),
            None => Ok(0),
        }
    }

    pub async fn route_exists(&self, route: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .query(
                "SELECT 1 FROM documents WHERE route = ?",
                [route],
                "check document route",
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    /// First free route of the form `base`, `base-2`, `base-3`, ...
    pub async fn unique_route(&self, base: &str) -> Result<String, DatabaseError> {
        if !self.route_exists(base).await? {
            return Ok(base.to_string());
        }
        let mut suffix = 2;
        loop {
            let candidate = format!("{}-{}", base, suffix);
            if !self.route_exists(&candidate).await? {
                return Ok(candidate);
            }
            suffix += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::db::DatabaseService;
    use crate::models::{db_now, Document, DocumentUpdate, Space};
    use tempfile::TempDir;

    async fn setup() -> (DatabaseService, Space, Document, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let root = Document::new("space-1", None, "Docs", "docs").with_group(true);
        let space = Space {
            id: "space-1".into(),
            name: "Docs".into(),
            route: "docs".into(),
            root_group: root.id.clone(),
            created_at: db_now(),
        };
        let tx = db.begin().await.unwrap();
        tx.insert_space(&space).await.unwrap();
        tx.insert_document(&root).await.unwrap();
        tx.commit().await.unwrap();

        (db, space, root, temp_dir)
    }

    #[tokio::test]
    async fn test_insert_and_get_document() {
        let (db, space, root, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();

        let page = Document::new(&space.id, Some(root.id.clone()), "Intro", "docs/intro")
            .with_content("Hello")
            .with_published(true)
            .with_sort_order(3);
        tx.insert_document(&page).await.unwrap();

        let loaded = tx.get_document(&page.id).await.unwrap().unwrap();
        assert_eq!(loaded, page);
        assert!(tx.get_document("missing").await.unwrap().is_none());
        assert_eq!(tx.get_space(&space.id).await.unwrap(), Some(space));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_bumps_modified_only_on_change() {
        let (db, space, root, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();
        let page = Document::new(&space.id, Some(root.id.clone()), "Intro", "docs/intro");
        tx.insert_document(&page).await.unwrap();

        let same = tx
            .update_document(&page, &DocumentUpdate::new().with_title("Intro"))
            .await
            .unwrap();
        assert_eq!(same.modified_at, page.modified_at);

        let edited = tx
            .update_document(&page, &DocumentUpdate::new().with_content("Body"))
            .await
            .unwrap();
        assert!(edited.modified_at > page.modified_at);

        let stored = tx.get_document(&page.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "Body");
        assert_eq!(stored.modified_at, edited.modified_at);

        tx.set_ranges(&page.id, 5, 6, 0).await.unwrap();
        let ranged = tx.get_document(&page.id).await.unwrap().unwrap();
        assert_eq!((ranged.lft, ranged.rgt), (5, 6));
        assert_eq!(ranged.modified_at, edited.modified_at);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_children_ordering_and_max_sort_order() {
        let (db, space, root, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();
        assert_eq!(tx.max_child_sort_order(&root.id).await.unwrap(), None);

        for (title, order) in [("B", 1), ("C", 2), ("A", 0)] {
            let doc = Document::new(
                &space.id,
                Some(root.id.clone()),
                title,
                format!("docs/{}", title),
            )
            .with_sort_order(order);
            tx.insert_document(&doc).await.unwrap();
        }

        let titles: Vec<String> = tx
            .children_of(&root.id)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.title)
            .collect();
        assert_eq!(titles, vec!["A", "B", "C"]);
        assert_eq!(tx.max_child_sort_order(&root.id).await.unwrap(), Some(2));
        assert_eq!(tx.count_children(&root.id).await.unwrap(), 3);
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_unique_route_appends_suffix() {
        let (db, space, root, _temp_dir) = setup().await;
        let tx = db.begin().await.unwrap();
        assert_eq!(tx.unique_route("docs/faq").await.unwrap(), "docs/faq");

        let faq = Document::new(&space.id, Some(root.id.clone()), "FAQ", "docs/faq");
        tx.insert_document(&faq).await.unwrap();
        assert_eq!(tx.unique_route("docs/faq").await.unwrap(), "docs/faq-2");
        tx.commit().await.unwrap();
    }
}
