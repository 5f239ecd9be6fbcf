//! Database Layer
//!
//! This module handles all database interactions using libsql:
//!
//! - Database initialization and connection management (`DatabaseService`)
//! - Per-operation commit/rollback boundary (`StoreTransaction`)
//! - Tree Store: spaces and documents (`document_store`)
//! - Contribution Store: batches and staged operations (`contribution_store`)
//! - Domain events published after commit (`events`)
//!
//! # Architecture
//!
//! Store operations are inherent methods on [`StoreTransaction`], so a
//! service composes any number of reads and writes inside one transaction
//! and finishes it with a single commit or rollback.

mod contribution_store;
mod database;
mod document_store;
mod error;
pub mod events;
mod rows;
mod transaction;

pub use database::{DatabaseService, DEFAULT_BUSY_TIMEOUT_MS};
pub use error::DatabaseError;
pub use events::DomainEvent;
pub use transaction::StoreTransaction;
