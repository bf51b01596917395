//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into `save`, `get`, `merge` and `delete`.
//! - Serialize reconciliation per parent identifier.
//!
//! # See also
//! - `crate::changeset` for the reconciliation rules.

pub mod merge_locks;
pub mod parent_service;
