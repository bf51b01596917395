//! Merge-time reconciliation of child collections.
//!
//! # Responsibility
//! - Compare a prior child snapshot against an incoming one.
//! - Partition children into insert, delete and update sets.
//!
//! # Invariants
//! - Computation is pure: no storage access, no mutation of inputs.
//! - Applying the change set to the prior snapshot yields the incoming one.
//! - Embedded children are never updated; an edit is a delete plus an insert.

pub mod calculator;

pub use calculator::{compute_change_set, same_child_set, ChangeSet};
