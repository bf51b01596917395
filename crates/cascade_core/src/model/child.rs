//! Child variants and the identity rule each one is compared by.
//!
//! # Responsibility
//! - Model referenced children (own identifier, own table).
//! - Model embedded children (value objects, identity is their value).
//! - Decide whether two children denote the same logical record.
//!
//! # Invariants
//! - `same_identity` is reflexive, symmetric and transitive for every variant.
//! - Embedded comparison covers every field; `None` equals only `None`.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Caller-assigned identifier of a referenced child.
pub type ChildId = i64;

/// Rule used to pair a prior child with an incoming child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityStrategy {
    /// Same logical child iff identifiers match.
    Identifier,
    /// Same logical child iff every field matches.
    Value,
}

/// Contract shared by both child variants.
///
/// `PartialEq` is full structural equality and decides whether a paired child
/// needs its fields rewritten. `same_identity` decides pairing.
pub trait ChildRecord: Clone + Debug + PartialEq {
    /// Identity rule of this variant.
    const STRATEGY: IdentityStrategy;

    /// Returns whether `self` and `other` are the same logical child.
    fn same_identity(&self, other: &Self) -> bool;

    /// Short, metadata-only label used in validation errors and logs.
    fn identity_label(&self) -> String;

    /// Checks field-level rules of the variant.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Child entity with an independent, caller-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferencedChild {
    /// Primary key in `referenced_children`.
    pub id: ChildId,
    pub description: Option<String>,
}

impl ReferencedChild {
    pub fn new(id: ChildId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: Some(description.into()),
        }
    }
}

impl ChildRecord for ReferencedChild {
    const STRATEGY: IdentityStrategy = IdentityStrategy::Identifier;

    fn same_identity(&self, other: &Self) -> bool {
        self.id == other.id
    }

    fn identity_label(&self) -> String {
        format!("id={}", self.id)
    }

    fn validate(&self) -> Result<(), String> {
        if self.id <= 0 {
            return Err(format!("child id must be positive, got {}", self.id));
        }
        Ok(())
    }
}

/// Value object embedded in the parent's collection table.
///
/// `id` is an ordinary nullable value column here, not a key: two embedded
/// children with equal `id` but different descriptions are different values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddedChild {
    pub id: Option<i64>,
    pub description: Option<String>,
}

impl EmbeddedChild {
    pub fn new(id: i64, description: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            description: Some(description.into()),
        }
    }

    /// Creates a value with no `id` column set.
    pub fn unnumbered(description: impl Into<String>) -> Self {
        Self {
            id: None,
            description: Some(description.into()),
        }
    }
}

impl ChildRecord for EmbeddedChild {
    const STRATEGY: IdentityStrategy = IdentityStrategy::Value;

    fn same_identity(&self, other: &Self) -> bool {
        self == other
    }

    fn identity_label(&self) -> String {
        match self.id {
            Some(id) => format!("value(id={id})"),
            None => "value(id=null)".to_string(),
        }
    }
}
