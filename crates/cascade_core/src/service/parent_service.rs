//! Parent aggregate use-case service.
//!
//! # Responsibility
//! - Save new aggregates, read them back, reconcile detached copies, and
//!   delete them.
//! - Run each operation inside one repository transaction.
//!
//! # Invariants
//! - `merge` and `delete` hold the parent's lock for their whole transaction.
//! - A failed `merge` leaves the stored aggregate exactly as it was.
//! - Log events carry ids and counts only, never descriptions.

use crate::changeset::{compute_change_set, ChangeSet};
use crate::model::child::ChildRecord;
use crate::model::parent::{Parent, ParentId};
use crate::repo::parent_repo::{ParentRepository, RepoError, RepoResult};
use crate::service::merge_locks::{LockTimeout, MergeLocks};
use log::{info, warn};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;

impl From<LockTimeout> for RepoError {
    fn from(value: LockTimeout) -> Self {
        Self::ConcurrentModification(value.parent_id)
    }
}

/// Result of reconciling a detached parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome<C> {
    /// Aggregate as stored after the merge committed.
    pub parent: Parent<C>,
    /// Child operations that were applied.
    pub change_set: ChangeSet<C>,
}

/// Use-case service for one child variant's aggregates.
pub struct ParentService<C, R> {
    repo: R,
    locks: Arc<MergeLocks>,
    _child: PhantomData<C>,
}

impl<C, R> ParentService<C, R>
where
    C: ChildRecord,
    R: ParentRepository<C>,
{
    /// Creates a service with its own lock table.
    pub fn new(repo: R) -> Self {
        Self::with_locks(repo, Arc::new(MergeLocks::default()))
    }

    /// Creates a service sharing `locks` with other services on the same
    /// database.
    pub fn with_locks(repo: R, locks: Arc<MergeLocks>) -> Self {
        Self {
            repo,
            locks,
            _child: PhantomData,
        }
    }

    /// Persists a new aggregate with all of its children.
    ///
    /// # Errors
    /// - `Validation` when the aggregate breaks model invariants.
    /// - `DuplicateIdentifier` when `parent.id` is already stored.
    /// - `ConstraintViolation` when a child row collides with stored data.
    pub fn save(&self, parent: &Parent<C>) -> RepoResult<ParentId> {
        let started_at = Instant::now();
        let result = parent
            .validate()
            .map_err(RepoError::from)
            .and_then(|()| {
                self.repo.in_transaction(parent.id, |repo| {
                    if repo.parent_exists(parent.id)? {
                        return Err(RepoError::DuplicateIdentifier(parent.id));
                    }
                    repo.insert_parent(parent)
                })
            });

        match &result {
            Ok(()) => info!(
                "event=parent_save module=service status=ok parent_id={} strategy={:?} children={} duration_ms={}",
                parent.id,
                C::STRATEGY,
                parent.children.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("parent_save", parent.id, err, started_at),
        }

        result.map(|()| parent.id)
    }

    /// Loads one aggregate with its full child collection.
    ///
    /// Root and children come from one read snapshot, so a merge committed
    /// by another connection is seen either fully or not at all.
    ///
    /// # Errors
    /// - `NotFound` when `parent_id` is not stored.
    pub fn get(&self, parent_id: ParentId) -> RepoResult<Parent<C>> {
        self.repo.in_read_transaction(parent_id, |repo| {
            repo.load_parent(parent_id)?
                .ok_or(RepoError::NotFound(parent_id))
        })
    }

    /// Returns whether `parent_id` is stored.
    pub fn exists(&self, parent_id: ParentId) -> RepoResult<bool> {
        self.repo.parent_exists(parent_id)
    }

    /// Reconciles a detached aggregate against its stored state.
    ///
    /// The root description is written unconditionally. Children are
    /// reconciled through `compute_change_set`, so embedded children whose
    /// value changed are deleted and re-inserted rather than updated.
    ///
    /// # Errors
    /// - `Validation` when the detached aggregate breaks model invariants.
    /// - `NotFound` when `detached.id` is not stored.
    /// - `ConcurrentModification` when the parent stays locked past the
    ///   bounded wait.
    pub fn merge(&self, detached: &Parent<C>) -> RepoResult<MergeOutcome<C>> {
        let started_at = Instant::now();
        let result = self.merge_locked(detached);

        match &result {
            Ok(outcome) => info!(
                "event=parent_merge module=service status=ok parent_id={} strategy={:?} inserted={} deleted={} updated={} unchanged={} duration_ms={}",
                detached.id,
                C::STRATEGY,
                outcome.change_set.to_insert.len(),
                outcome.change_set.to_delete.len(),
                outcome.change_set.to_update.len(),
                outcome.change_set.unchanged,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("parent_merge", detached.id, err, started_at),
        }

        result
    }

    /// Removes an aggregate and all of its children.
    ///
    /// # Errors
    /// - `NotFound` when `parent_id` is not stored.
    /// - `ConcurrentModification` when the parent stays locked past the
    ///   bounded wait.
    pub fn delete(&self, parent_id: ParentId) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self
            .locks
            .acquire(parent_id)
            .map_err(RepoError::from)
            .and_then(|_guard| {
                self.repo
                    .in_transaction(parent_id, |repo| repo.delete_parent(parent_id))
            });

        match &result {
            Ok(()) => info!(
                "event=parent_delete module=service status=ok parent_id={} duration_ms={}",
                parent_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => log_failure("parent_delete", parent_id, err, started_at),
        }

        result
    }

    fn merge_locked(&self, detached: &Parent<C>) -> RepoResult<MergeOutcome<C>> {
        detached.validate()?;
        let parent_id = detached.id;
        let _guard = self.locks.acquire(parent_id)?;

        self.repo.in_transaction(parent_id, |repo| {
            if !repo.parent_exists(parent_id)? {
                return Err(RepoError::NotFound(parent_id));
            }

            let prior = repo.load_children(parent_id)?;
            let change_set = compute_change_set(&prior, &detached.children);

            repo.update_description(parent_id, detached.description.as_deref())?;
            repo.apply_change_set(parent_id, &change_set)?;

            let parent = repo
                .load_parent(parent_id)?
                .ok_or(RepoError::NotFound(parent_id))?;
            Ok(MergeOutcome { parent, change_set })
        })
    }
}

fn log_failure(event: &str, parent_id: ParentId, err: &RepoError, started_at: Instant) {
    warn!(
        "event={event} module=service status=error parent_id={parent_id} error_code={} duration_ms={} error={err}",
        error_code(err),
        started_at.elapsed().as_millis()
    );
}

fn error_code(err: &RepoError) -> &'static str {
    match err {
        RepoError::DuplicateIdentifier(_) => "duplicate_identifier",
        RepoError::NotFound(_) => "not_found",
        RepoError::ConstraintViolation(_) => "constraint_violation",
        RepoError::ConcurrentModification(_) => "concurrent_modification",
        RepoError::Validation(_) => "validation",
        RepoError::Db(_) => "db",
        RepoError::InvalidData(_) => "invalid_data",
    }
}
