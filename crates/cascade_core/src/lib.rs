//! Core persistence logic for parent aggregates and their child collections.
//! This crate owns the identity rules and merge-time reconciliation.

pub mod changeset;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use changeset::{compute_change_set, same_child_set, ChangeSet};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::child::{ChildId, ChildRecord, EmbeddedChild, IdentityStrategy, ReferencedChild};
pub use model::parent::{Parent, ParentId, ParentValidationError};
pub use repo::child_mapping::ChildMapping;
pub use repo::parent_repo::{ParentRepository, RepoError, RepoResult, SqliteParentRepository};
pub use service::merge_locks::{LockTimeout, MergeGuard, MergeLocks, DEFAULT_LOCK_TIMEOUT};
pub use service::parent_service::{MergeOutcome, ParentService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
