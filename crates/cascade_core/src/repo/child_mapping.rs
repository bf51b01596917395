//! Static table mappings for each child variant.
//!
//! # Responsibility
//! - Own the SQL shape of `referenced_children` and `embedded_children`.
//! - Address child rows the way the variant's identity rule does.
//!
//! # Invariants
//! - Referenced rows are addressed by `(id, parent_id)`.
//! - Embedded rows are addressed by every column with null-safe `IS`.
//! - Each delete/update touches exactly one row or reports stale state.

use crate::model::child::{ChildRecord, EmbeddedChild, ReferencedChild};
use crate::model::parent::ParentId;
use crate::repo::parent_repo::{RepoError, RepoResult};
use rusqlite::{params, Connection, Row};

/// Storage shape of one child variant.
pub trait ChildMapping: ChildRecord + Sized {
    /// Table holding this variant's rows.
    const TABLE: &'static str;

    /// Loads all children of `parent_id` in storage order.
    fn load(conn: &Connection, parent_id: ParentId) -> RepoResult<Vec<Self>>;
    fn insert(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()>;
    fn delete(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()>;
    /// Rewrites non-identity fields of a paired child.
    fn update(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()>;
}

impl ChildMapping for ReferencedChild {
    const TABLE: &'static str = "referenced_children";

    fn load(conn: &Connection, parent_id: ParentId) -> RepoResult<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description
             FROM referenced_children
             WHERE parent_id = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([parent_id])?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            children.push(parse_referenced_row(row)?);
        }
        Ok(children)
    }

    fn insert(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()> {
        conn.execute(
            "INSERT INTO referenced_children (id, parent_id, description)
             VALUES (?1, ?2, ?3);",
            params![self.id, parent_id, self.description.as_deref()],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()> {
        let changed = conn.execute(
            "DELETE FROM referenced_children
             WHERE id = ?1
               AND parent_id = ?2;",
            params![self.id, parent_id],
        )?;
        expect_single_row(changed, Self::TABLE, "delete", parent_id, self)
    }

    fn update(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()> {
        let changed = conn.execute(
            "UPDATE referenced_children
             SET description = ?3
             WHERE id = ?1
               AND parent_id = ?2;",
            params![self.id, parent_id, self.description.as_deref()],
        )?;
        expect_single_row(changed, Self::TABLE, "update", parent_id, self)
    }
}

impl ChildMapping for EmbeddedChild {
    const TABLE: &'static str = "embedded_children";

    fn load(conn: &Connection, parent_id: ParentId) -> RepoResult<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT child_id, description
             FROM embedded_children
             WHERE parent_id = ?1
             ORDER BY rowid ASC;",
        )?;
        let mut rows = stmt.query([parent_id])?;
        let mut children = Vec::new();
        while let Some(row) = rows.next()? {
            children.push(EmbeddedChild {
                id: row.get("child_id")?,
                description: row.get("description")?,
            });
        }
        Ok(children)
    }

    fn insert(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()> {
        conn.execute(
            "INSERT INTO embedded_children (parent_id, child_id, description)
             VALUES (?1, ?2, ?3);",
            params![parent_id, self.id, self.description.as_deref()],
        )?;
        Ok(())
    }

    fn delete(&self, conn: &Connection, parent_id: ParentId) -> RepoResult<()> {
        let changed = conn.execute(
            "DELETE FROM embedded_children
             WHERE rowid = (
                SELECT rowid
                FROM embedded_children
                WHERE parent_id = ?1
                  AND child_id IS ?2
                  AND description IS ?3
                LIMIT 1
             );",
            params![parent_id, self.id, self.description.as_deref()],
        )?;
        expect_single_row(changed, Self::TABLE, "delete", parent_id, self)
    }

    fn update(&self, _conn: &Connection, parent_id: ParentId) -> RepoResult<()> {
        // Value identity: a changed field is a different child.
        Err(RepoError::InvalidData(format!(
            "embedded child {} of parent {parent_id} cannot be updated in place",
            self.identity_label()
        )))
    }
}

fn parse_referenced_row(row: &Row<'_>) -> RepoResult<ReferencedChild> {
    let id: i64 = row.get("id")?;
    if id <= 0 {
        return Err(RepoError::InvalidData(format!(
            "invalid id value `{id}` in referenced_children.id"
        )));
    }
    Ok(ReferencedChild {
        id,
        description: row.get("description")?,
    })
}

fn expect_single_row<C: ChildRecord>(
    changed: usize,
    table: &'static str,
    operation: &'static str,
    parent_id: ParentId,
    child: &C,
) -> RepoResult<()> {
    if changed == 1 {
        return Ok(());
    }
    Err(RepoError::InvalidData(format!(
        "{operation} on {table} for parent {parent_id} child {} touched {changed} rows",
        child.identity_label()
    )))
}
