//! Parent repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist parent rows and delegate child rows to the variant's mapping.
//! - Provide one write scope for read-then-write reconciliation and one
//!   read scope for snapshot-consistent loads.
//!
//! # Invariants
//! - Write paths call `Parent::validate()` before SQL mutations.
//! - A failed transaction scope leaves no partial writes behind.
//! - Parent removal relies on `ON DELETE CASCADE` for child rows.

use crate::changeset::ChangeSet;
use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::parent::{Parent, ParentId, ParentValidationError};
use crate::repo::child_mapping::ChildMapping;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from parent aggregate persistence.
#[derive(Debug)]
pub enum RepoError {
    /// `save` with an identifier that is already stored.
    DuplicateIdentifier(ParentId),
    /// `get`, `merge` or `delete` on an identifier that is not stored.
    NotFound(ParentId),
    /// Storage-level uniqueness or foreign-key failure.
    ConstraintViolation(String),
    /// Another writer holds the parent past the bounded wait.
    ConcurrentModification(ParentId),
    Validation(ParentValidationError),
    Db(DbError),
    /// Connection schema or persisted rows do not match expectations.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateIdentifier(id) => write!(f, "parent already exists: {id}"),
            Self::NotFound(id) => write!(f, "parent not found: {id}"),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::ConcurrentModification(id) => {
                write!(f, "parent {id} is being modified concurrently")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted parent data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::DuplicateIdentifier(_)
            | Self::NotFound(_)
            | Self::ConstraintViolation(_)
            | Self::ConcurrentModification(_)
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ParentValidationError> for RepoError {
    fn from(value: ParentValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Sqlite(err) => Self::from(err),
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if value.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
            return Self::ConstraintViolation(value.to_string());
        }
        Self::Db(DbError::Sqlite(value))
    }
}

impl RepoError {
    /// Reclassifies SQLite busy/locked failures as a concurrent modification
    /// of `parent_id`.
    pub fn for_parent(self, parent_id: ParentId) -> Self {
        let contended = matches!(
            &self,
            Self::Db(DbError::Sqlite(err)) if matches!(
                err.sqlite_error_code(),
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
            )
        );
        if contended {
            Self::ConcurrentModification(parent_id)
        } else {
            self
        }
    }
}

/// Storage contract for one child variant's aggregates.
pub trait ParentRepository<C> {
    /// Runs `work` inside one write transaction.
    ///
    /// Commits when `work` succeeds and rolls back otherwise.
    fn in_transaction<T, F>(&self, parent_id: ParentId, work: F) -> RepoResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> RepoResult<T>;
    /// Runs `work` inside one read transaction.
    ///
    /// Every read in `work` sees the same committed snapshot.
    fn in_read_transaction<T, F>(&self, parent_id: ParentId, work: F) -> RepoResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> RepoResult<T>;
    fn parent_exists(&self, parent_id: ParentId) -> RepoResult<bool>;
    /// Inserts the root row and every child row.
    fn insert_parent(&self, parent: &Parent<C>) -> RepoResult<()>;
    fn load_parent(&self, parent_id: ParentId) -> RepoResult<Option<Parent<C>>>;
    fn load_children(&self, parent_id: ParentId) -> RepoResult<Vec<C>>;
    fn update_description(&self, parent_id: ParentId, description: Option<&str>)
        -> RepoResult<()>;
    /// Writes deletes, then inserts, then updates.
    fn apply_change_set(&self, parent_id: ParentId, change_set: &ChangeSet<C>) -> RepoResult<()>;
    /// Removes the root row and, by cascade, all of its children.
    fn delete_parent(&self, parent_id: ParentId) -> RepoResult<()>;
}

/// SQLite-backed parent repository for child variant `C`.
pub struct SqliteParentRepository<'conn, C> {
    conn: &'conn Connection,
    _child: PhantomData<C>,
}

impl<'conn, C: ChildMapping> SqliteParentRepository<'conn, C> {
    /// Creates repository from a migrated connection.
    ///
    /// # Errors
    /// - `InvalidData` when the schema version or required tables are missing.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, C::TABLE)?;
        Ok(Self {
            conn,
            _child: PhantomData,
        })
    }

    fn scoped<T, F>(
        &self,
        behavior: TransactionBehavior,
        parent_id: ParentId,
        work: F,
    ) -> RepoResult<T>
    where
        F: FnOnce(&Self) -> RepoResult<T>,
    {
        let tx = Transaction::new_unchecked(self.conn, behavior)
            .map_err(|err| RepoError::from(err).for_parent(parent_id))?;
        let value = work(self).map_err(|err| err.for_parent(parent_id))?;
        tx.commit()
            .map_err(|err| RepoError::from(err).for_parent(parent_id))?;
        Ok(value)
    }
}

impl<C: ChildMapping> ParentRepository<C> for SqliteParentRepository<'_, C> {
    fn in_transaction<T, F>(&self, parent_id: ParentId, work: F) -> RepoResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> RepoResult<T>,
    {
        self.scoped(TransactionBehavior::Immediate, parent_id, work)
    }

    fn in_read_transaction<T, F>(&self, parent_id: ParentId, work: F) -> RepoResult<T>
    where
        Self: Sized,
        F: FnOnce(&Self) -> RepoResult<T>,
    {
        self.scoped(TransactionBehavior::Deferred, parent_id, work)
    }

    fn parent_exists(&self, parent_id: ParentId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM parents WHERE id = ?1);",
            [parent_id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn insert_parent(&self, parent: &Parent<C>) -> RepoResult<()> {
        parent.validate()?;

        self.conn.execute(
            "INSERT INTO parents (id, description) VALUES (?1, ?2);",
            params![parent.id, parent.description.as_deref()],
        )?;
        for child in &parent.children {
            child.insert(self.conn, parent.id)?;
        }
        Ok(())
    }

    fn load_parent(&self, parent_id: ParentId) -> RepoResult<Option<Parent<C>>> {
        let description: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT description FROM parents WHERE id = ?1;",
                [parent_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(description) = description else {
            return Ok(None);
        };

        let parent = Parent {
            id: parent_id,
            description,
            children: C::load(self.conn, parent_id)?,
        };
        parent.validate().map_err(|err| {
            RepoError::InvalidData(format!("stored parent {parent_id} is invalid: {err}"))
        })?;
        Ok(Some(parent))
    }

    fn load_children(&self, parent_id: ParentId) -> RepoResult<Vec<C>> {
        C::load(self.conn, parent_id)
    }

    fn update_description(
        &self,
        parent_id: ParentId,
        description: Option<&str>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE parents SET description = ?2 WHERE id = ?1;",
            params![parent_id, description],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound(parent_id));
        }
        Ok(())
    }

    fn apply_change_set(&self, parent_id: ParentId, change_set: &ChangeSet<C>) -> RepoResult<()> {
        // Deletes go first so a re-inserted embedded value never meets its
        // own stale row.
        for child in &change_set.to_delete {
            child.delete(self.conn, parent_id)?;
        }
        for child in &change_set.to_insert {
            child.insert(self.conn, parent_id)?;
        }
        for child in &change_set.to_update {
            child.update(self.conn, parent_id)?;
        }
        Ok(())
    }

    fn delete_parent(&self, parent_id: ParentId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM parents WHERE id = ?1;", [parent_id])?;
        if changed == 0 {
            return Err(RepoError::NotFound(parent_id));
        }
        Ok(())
    }
}

fn ensure_connection_ready(conn: &Connection, child_table: &'static str) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::InvalidData(format!(
            "parent repository requires schema version {expected_version}, got {actual_version}"
        )));
    }

    for table in ["parents", child_table] {
        if !table_exists(conn, table)? {
            return Err(RepoError::InvalidData(format!(
                "parent repository requires table `{table}`"
            )));
        }
    }

    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(RepoError::InvalidData(
            "parent repository requires `PRAGMA foreign_keys = ON`".to_string(),
        ));
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
