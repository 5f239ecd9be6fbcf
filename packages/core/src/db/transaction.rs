//! Unit of Work
//!
//! A [`StoreTransaction`] owns one connection with an open SQLite
//! transaction. Tree store and contribution store operations are methods on
//! it (see `document_store` and `contribution_store`), so everything a logical
//! operation touches commits or rolls back together.

use crate::db::error::DatabaseError;
use libsql::params::IntoParams;
use libsql::{Connection, Rows};

/// One logical operation's commit/rollback boundary
pub struct StoreTransaction {
    conn: Connection,
    open: bool,
}

impl StoreTransaction {
    pub(crate) async fn begin(conn: Connection, begin_sql: &str) -> Result<Self, DatabaseError> {
        conn.execute(begin_sql, ())
            .await
            .map_err(|e| DatabaseError::transaction(format!("Failed to begin: {}", e)))?;
        Ok(Self { conn, open: true })
    }

    pub(crate) async fn execute(
        &self,
        sql: &str,
        params: impl IntoParams,
        context: &str,
    ) -> Result<u64, DatabaseError> {
        self.conn
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to {}: {}", context, e)))
    }

    pub(crate) async fn query(
        &self,
        sql: &str,
        params: impl IntoParams,
        context: &str,
    ) -> Result<Rows, DatabaseError> {
        self.conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::sql_execution(format!("Failed to {}: {}", context, e)))
    }

    pub async fn commit(mut self) -> Result<(), DatabaseError> {
        self.open = false;
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            if let Err(rollback_err) = self.conn.execute("ROLLBACK", ()).await {
                tracing::warn!("Rollback failed after commit error: {}", rollback_err);
            }
            return Err(DatabaseError::transaction(format!("Failed to commit: {}", e)));
        }
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), DatabaseError> {
        self.open = false;
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::transaction(format!("Failed to roll back: {}", e)))?;
        Ok(())
    }

    /// Commit on `Ok`, roll back on `Err`, and hand `result` back.
    ///
    /// A failed rollback is logged; the original error is still returned.
    pub async fn finish<T, E>(self, result: Result<T, E>) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!("Rollback failed after error: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl Drop for StoreTransaction {
    fn drop(&mut self) {
        if self.open {
            // Closing the connection rolls back the open transaction
            tracing::debug!("transaction dropped without commit");
        }
    }
}
