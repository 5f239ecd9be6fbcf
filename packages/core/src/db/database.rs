//! Database Connection Management
//!
//! This module provides the database connection and initialization
//! functionality using libsql for the wiki record store.
//!
//! # Architecture
//!
//! - **Path-agnostic**: Accepts any valid PathBuf
//! - **Idempotent schema**: `CREATE TABLE IF NOT EXISTS`, safe on every start
//! - **WAL mode**: Write-Ahead Logging for concurrent readers
//! - **Foreign keys**: Enabled on every connection
//! - **One transaction per logical operation**: see [`StoreTransaction`]
//!
//! # Database Connection Patterns
//!
//! **Use `begin()` / `begin_read()` in service code.** Each returns a
//! [`StoreTransaction`] on a dedicated connection configured by
//! `connect_with_timeout()`, so concurrent operations wait on the busy
//! timeout instead of failing with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use wikiflow_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let db_service = DatabaseService::new(PathBuf::from("./data/wiki.db")).await?;
//! let tx = db_service.begin().await?;
//! // ... tree store / contribution store operations ...
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

use crate::config::WikiConfig;
use crate::db::error::DatabaseError;
use crate::db::transaction::StoreTransaction;
use libsql::{Builder, Database};
use std::path::PathBuf;
use std::sync::Arc;

/// Default busy timeout applied to every connection, in milliseconds
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// Database service for managing the libsql connection and schema
///
/// # Examples
///
/// ```no_run
/// use wikiflow_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_path = PathBuf::from("/path/to/wiki.db");
///     let db_service = DatabaseService::new(db_path).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    busy_timeout_ms: u64,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::open(db_path, DEFAULT_BUSY_TIMEOUT_MS).await
    }

    /// Open the database described by `config`
    pub async fn from_config(config: &WikiConfig) -> Result<Self, DatabaseError> {
        config
            .validate()
            .map_err(DatabaseError::initialization_failed)?;
        Self::open(config.database_path.clone(), config.busy_timeout_ms).await
    }

    async fn open(db_path: PathBuf, busy_timeout_ms: u64) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            busy_timeout_ms,
        };

        service.initialize_schema().await?;
        tracing::debug!(path = %service.db_path.display(), "wiki database ready");

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(
        &self,
        conn: &libsql::Connection,
        pragma: &str,
    ) -> Result<(), DatabaseError> {
        let mut stmt = conn.prepare(pragma).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        let _ = stmt.query(()).await.map_err(|e| {
            DatabaseError::sql_execution(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// # Schema
    ///
    /// - `spaces`: top-level scopes with their root group
    /// - `documents`: tree nodes with `sort_order` and the `lft`/`rgt` pair
    /// - `contribution_batches`: staged change requests, one Draft per (owner, space)
    /// - `contributions`: staged operations, cascade-deleted with their batch
    async fn initialize_schema(&self) -> Result<(), DatabaseError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL")
            .await?;

        let statements: [(&str, &str); 4] = [
            (
                "spaces table",
                "CREATE TABLE IF NOT EXISTS spaces (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    route TEXT NOT NULL UNIQUE,
                    root_group TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
            ),
            (
                "documents table",
                "CREATE TABLE IF NOT EXISTS documents (
                    id TEXT PRIMARY KEY,
                    space_id TEXT NOT NULL,
                    title TEXT NOT NULL,
                    content TEXT NOT NULL DEFAULT '',
                    route TEXT NOT NULL UNIQUE,
                    is_group INTEGER NOT NULL DEFAULT 0,
                    is_published INTEGER NOT NULL DEFAULT 0,
                    parent_id TEXT,
                    sort_order INTEGER NOT NULL DEFAULT 0,
                    lft INTEGER NOT NULL DEFAULT 0,
                    rgt INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL,
                    modified_at TEXT NOT NULL,
                    FOREIGN KEY (space_id) REFERENCES spaces(id) ON DELETE CASCADE,
                    FOREIGN KEY (parent_id) REFERENCES documents(id)
                )",
            ),
            (
                "contribution_batches table",
                "CREATE TABLE IF NOT EXISTS contribution_batches (
                    id TEXT PRIMARY KEY,
                    space_id TEXT NOT NULL,
                    owner TEXT NOT NULL,
                    title TEXT NOT NULL,
                    status TEXT NOT NULL,
                    review_comment TEXT,
                    reviewed_by TEXT,
                    created_at TEXT NOT NULL,
                    modified_at TEXT NOT NULL,
                    submitted_at TEXT,
                    merged_at TEXT,
                    FOREIGN KEY (space_id) REFERENCES spaces(id) ON DELETE CASCADE
                )",
            ),
            (
                "contributions table",
                "CREATE TABLE IF NOT EXISTS contributions (
                    id TEXT PRIMARY KEY,
                    batch_id TEXT NOT NULL,
                    seq INTEGER NOT NULL,
                    operation TEXT NOT NULL,
                    target_document TEXT,
                    temp_id TEXT UNIQUE,
                    parent_ref TEXT,
                    proposed_title TEXT,
                    proposed_content TEXT,
                    proposed_is_published INTEGER,
                    proposed_is_group INTEGER,
                    proposed_sort_order INTEGER,
                    siblings_order TEXT,
                    base_modified_at TEXT,
                    merged_document TEXT,
                    created_at TEXT NOT NULL,
                    modified_at TEXT NOT NULL,
                    FOREIGN KEY (batch_id) REFERENCES contribution_batches(id) ON DELETE CASCADE
                )",
            ),
        ];

        for (name, sql) in statements {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to create {}: {}", name, e))
            })?;
        }

        self.create_indexes(&conn).await?;

        Ok(())
    }

    async fn create_indexes(&self, conn: &libsql::Connection) -> Result<(), DatabaseError> {
        let indexes: [(&str, &str); 6] = [
            (
                "idx_documents_space_lft",
                "CREATE INDEX IF NOT EXISTS idx_documents_space_lft ON documents(space_id, lft)",
            ),
            (
                "idx_documents_parent_order",
                "CREATE INDEX IF NOT EXISTS idx_documents_parent_order ON documents(parent_id, sort_order)",
            ),
            (
                "idx_batches_owner",
                "CREATE INDEX IF NOT EXISTS idx_batches_owner ON contribution_batches(owner, created_at)",
            ),
            (
                "idx_batches_status",
                "CREATE INDEX IF NOT EXISTS idx_batches_status ON contribution_batches(status)",
            ),
            // At most one Draft batch per (owner, space)
            (
                "idx_batches_one_draft",
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_batches_one_draft
                 ON contribution_batches(owner, space_id) WHERE status = 'draft'",
            ),
            (
                "idx_contributions_batch",
                "CREATE INDEX IF NOT EXISTS idx_contributions_batch ON contributions(batch_id, seq)",
            ),
        ];

        for (name, sql) in indexes {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::sql_execution(format!("Failed to create index '{}': {}", name, e))
            })?;
        }

        Ok(())
    }

    /// Get a raw connection without per-connection configuration
    ///
    /// Only for single-threaded, synchronous contexts. Service code should
    /// use `begin()` or `connect_with_timeout()`.
    pub fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        self.db.connect().map_err(DatabaseError::LibsqlError)
    }

    /// Get an async connection with busy timeout and foreign keys configured
    pub async fn connect_with_timeout(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self.connect()?;

        self.execute_pragma(
            &conn,
            &format!("PRAGMA busy_timeout = {}", self.busy_timeout_ms),
        )
        .await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON")
            .await?;

        Ok(conn)
    }

    /// Start a write unit of work
    ///
    /// Uses `BEGIN IMMEDIATE` so the write lock is taken up front and two
    /// concurrent merges serialize instead of failing on lock upgrade.
    pub async fn begin(&self) -> Result<StoreTransaction, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        StoreTransaction::begin(conn, "BEGIN IMMEDIATE").await
    }

    /// Start a read-only unit of work with a consistent snapshot
    pub async fn begin_read(&self) -> Result<StoreTransaction, DatabaseError> {
        let conn = self.connect_with_timeout().await?;
        StoreTransaction::begin(conn, "BEGIN").await
    }
}
