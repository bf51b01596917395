//! Aggregate root model.
//!
//! # Responsibility
//! - Own the root scalar fields and the child collection as one unit.
//! - Validate identifier and set-semantics invariants before persistence.
//!
//! # Invariants
//! - `id` is assigned by the caller and never changes after creation.
//! - `children` contains no two members with the same identity.
//!
//! # See also
//! - `crate::model::child::ChildRecord`

use crate::model::child::ChildRecord;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-assigned identifier of an aggregate root.
pub type ParentId = i64;

/// Validation failures for a parent aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentValidationError {
    /// Identifiers must be positive.
    InvalidParentId(ParentId),
    /// Two children share one identity under the variant's rule.
    DuplicateChild { parent_id: ParentId, child: String },
    /// A child breaks a field-level rule of its variant.
    InvalidChild { parent_id: ParentId, reason: String },
}

impl Display for ParentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidParentId(id) => write!(f, "parent id must be positive, got {id}"),
            Self::DuplicateChild { parent_id, child } => write!(
                f,
                "parent {parent_id} holds more than one child with identity {child}"
            ),
            Self::InvalidChild { parent_id, reason } => {
                write!(f, "parent {parent_id} holds an invalid child: {reason}")
            }
        }
    }
}

impl Error for ParentValidationError {}

/// Aggregate root owning a collection of children of one variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parent<C> {
    pub id: ParentId,
    pub description: Option<String>,
    pub children: Vec<C>,
}

impl<C: ChildRecord> Parent<C> {
    /// Creates a root with no children.
    pub fn new(id: ParentId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: Some(description.into()),
            children: Vec::new(),
        }
    }

    /// Creates a root with the given children.
    pub fn with_children(
        id: ParentId,
        description: impl Into<String>,
        children: impl IntoIterator<Item = C>,
    ) -> Self {
        Self {
            id,
            description: Some(description.into()),
            children: children.into_iter().collect(),
        }
    }

    /// Adds children, skipping any whose identity is already present.
    ///
    /// Returns how many were actually added.
    pub fn add(&mut self, children: impl IntoIterator<Item = C>) -> usize {
        let mut added = 0;
        for child in children {
            if self.contains_identity(&child) {
                continue;
            }
            self.children.push(child);
            added += 1;
        }
        added
    }

    /// Returns whether a child with the same identity is already owned.
    pub fn contains_identity(&self, child: &C) -> bool {
        self.children
            .iter()
            .any(|existing| existing.same_identity(child))
    }

    /// Validates identifier and child set semantics.
    ///
    /// # Errors
    /// - `InvalidParentId` when `id <= 0`.
    /// - `InvalidChild` when a child breaks its variant's field rules.
    /// - `DuplicateChild` when two children compare as the same identity.
    pub fn validate(&self) -> Result<(), ParentValidationError> {
        if self.id <= 0 {
            return Err(ParentValidationError::InvalidParentId(self.id));
        }

        for (index, child) in self.children.iter().enumerate() {
            child
                .validate()
                .map_err(|reason| ParentValidationError::InvalidChild {
                    parent_id: self.id,
                    reason,
                })?;
            let duplicated = self.children[index + 1..]
                .iter()
                .any(|other| other.same_identity(child));
            if duplicated {
                return Err(ParentValidationError::DuplicateChild {
                    parent_id: self.id,
                    child: child.identity_label(),
                });
            }
        }

        Ok(())
    }
}
