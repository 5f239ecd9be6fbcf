//! WikiFlow Core Business Logic Layer
//!
//! This crate provides the document tree, ordering engine, and contribution
//! workflow for the WikiFlow knowledge base.
//!
//! # Architecture
//!
//! - **Two ordering keys**: every document carries a parent-relative
//!   `sort_order` and a nested-set `(lft, rgt)` range; the range rebuild
//!   derives the latter from the former after every ordering write
//! - **Direct or staged writes**: capable actors mutate the tree; everyone
//!   else records contributions in a Draft batch for review
//! - **Optimistic merges**: staged edits and deletes carry the target's
//!   `modified_at` and fail the merge with a conflict when it moved on
//! - **libsql**: Embedded SQLite-compatible database, one transaction per
//!   operation
//!
//! # Modules
//!
//! - [`models`] - Data structures (Document, Space, ContributionBatch, etc.)
//! - [`operations`] - Write request parameters and outcomes
//! - [`services`] - Business services (WikiService, OrderingEngine, etc.)
//! - [`db`] - Database layer with libsql integration
//! - [`config`] - Runtime configuration

pub mod config;
pub mod db;
pub mod models;
pub mod operations;
pub mod services;

// Re-export commonly used types
pub use config::WikiConfig;
pub use models::*;
pub use operations::*;
pub use services::*;
