//! Business Services
//!
//! This module contains the core business logic services:
//!
//! - `WikiService` - Workflow controller: direct/staged dispatch, batch review
//! - `OrderingEngine` - Sibling order resolution and nested-set range rebuild
//! - `TreeQueryService` - Management and public tree views
//! - `MergeEngine` - Replays a Submitted batch against the tree store
//! - `AccessPolicy` / `VisibilityPredicate` - External capability seams
//!
//! Services coordinate between the database layer and application logic,
//! implementing business rules and orchestrating multi-step operations.

pub mod access;
mod dispatch;
pub mod error;
pub mod merge;
pub mod ordering;
pub mod preview;
mod review;
pub mod tree_query;
pub mod wiki_service;


pub use access::{
    decide_write_mode, AccessPolicy, PublishedOnly, StaticRoleAccess, VisibilityPredicate,
    WriteMode, WriteTarget,
};
pub use error::WikiError;
pub use merge::{plan_merge_order, MergeEngine, MergeReport};
pub use ordering::{
    OrderingEngine, OrderingViolation, RangeAssignment, RangePlan, RebuildReport,
};
pub use preview::preview_batch;
pub use tree_query::{build_management_tree, build_public_tree, TreeQueryService};
pub use wiki_service::WikiService;
