//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define storage contracts for parent aggregates and their children.
//! - Isolate SQLite query details and per-variant table shapes from the
//!   service layer.
//!
//! # Invariants
//! - Repository writes must enforce `Parent::validate()` before persistence.
//! - Repository APIs return semantic errors (`NotFound`,
//!   `DuplicateIdentifier`, `ConstraintViolation`) in addition to DB
//!   transport errors.

pub mod child_mapping;
pub mod parent_repo;
