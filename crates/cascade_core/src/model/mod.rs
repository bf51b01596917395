//! Aggregate model for parents and their owned child collections.
//!
//! # Responsibility
//! - Define the aggregate root (`Parent`) and both child variants.
//! - Define the identity rule each child variant is compared by.
//!
//! # Invariants
//! - A parent is addressed by a caller-assigned, immutable `ParentId`.
//! - A parent's children never contain two members of the same identity.
//!
//! # See also
//! - `crate::changeset` for merge-time reconciliation.

pub mod child;
pub mod parent;
