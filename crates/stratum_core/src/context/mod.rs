//! Persistence context: change tracking and the pending-change batch.
//!
//! # Responsibility
//! - Own the SQLite connection shared by every BLL instance.
//! - Track per-instance state (added/unchanged/modified/detached) via
//!   scalar snapshots captured on load.
//! - Accumulate staged operations and flush them in one transaction.
//!
//! # Invariants
//! - `commit` executes the whole batch inside a single transaction.
//! - A failed commit rolls back and restores the pending batch untouched.
//! - Foreign-key links always resolve against identities generated
//!   earlier in the same batch.
//! - One context serves one caller at a time; there is no internal
//!   locking.

use crate::db::DbError;
use crate::entity::{AnyEntity, Column};
use crate::error::{BllError, BllResult};
use log::{debug, error};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Transaction};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;

/// Index of a staged operation inside the pending batch.
pub type SlotId = usize;

/// Tracking state of one entity instance relative to this context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Never persisted (`id == 0`).
    Added,
    /// Loaded through this context and unmodified since.
    Unchanged,
    /// Loaded through this context and modified since.
    Modified,
    /// Carries an identity but was never loaded through this context.
    Detached,
}

/// Deferred foreign-key binding resolved during commit.
#[derive(Debug, Clone)]
pub(crate) struct FkLink {
    pub column: &'static str,
    pub from_slot: SlotId,
}

#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    Insert {
        table: &'static str,
        columns: &'static [Column],
        values: Vec<Value>,
        created_at: i64,
        created_by: Option<String>,
        fk_links: Vec<FkLink>,
    },
    Update {
        table: &'static str,
        columns: &'static [Column],
        values: Vec<Value>,
        id: i64,
        modified_at: i64,
        modified_by: Option<String>,
        fk_links: Vec<FkLink>,
    },
    Delete {
        table: &'static str,
        id: i64,
    },
    DeleteAll {
        table: &'static str,
    },
}

/// Result of flushing the pending batch.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Total rows written by the commit.
    pub rows_affected: usize,
    generated_ids: Vec<Option<i64>>,
}

impl CommitOutcome {
    /// Identity generated for the staged insert at `slot`, if any.
    pub(crate) fn generated_id(&self, slot: SlotId) -> Option<i64> {
        self.generated_ids.get(slot).copied().flatten()
    }
}

/// Shared persistence context for one connection.
pub struct Context {
    conn: Connection,
    actor: Option<String>,
    batch: RefCell<Vec<PendingOp>>,
    snapshots: RefCell<HashMap<(TypeId, i64), String>>,
}

impl Context {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            actor: None,
            batch: RefCell::new(Vec::new()),
            snapshots: RefCell::new(HashMap::new()),
        }
    }

    /// Context whose mutations are attributed to `actor` in audit columns.
    pub fn with_actor(conn: Connection, actor: impl Into<String>) -> Self {
        let mut ctx = Self::new(conn);
        ctx.actor = Some(actor.into());
        ctx
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    /// Raw connection access for read queries and manual SQL.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of staged operations awaiting commit.
    pub fn pending_count(&self) -> usize {
        self.batch.borrow().len()
    }

    /// Drops every staged operation without touching the store.
    pub fn discard_pending(&self) {
        self.batch.borrow_mut().clear();
    }

    pub(crate) fn stage(&self, op: PendingOp) -> SlotId {
        let mut batch = self.batch.borrow_mut();
        batch.push(op);
        batch.len() - 1
    }

    /// Tracking state of `entity` relative to this context.
    pub fn state_of(&self, entity: &dyn AnyEntity) -> BllResult<TrackState> {
        let meta = entity.entity_meta();
        if meta.is_new() {
            return Ok(TrackState::Added);
        }

        let key = (entity.as_any().type_id(), meta.id);
        match self.snapshots.borrow().get(&key) {
            None => Ok(TrackState::Detached),
            Some(snapshot) => {
                let current = snapshot_of(entity)?;
                if *snapshot == current {
                    Ok(TrackState::Unchanged)
                } else {
                    Ok(TrackState::Modified)
                }
            }
        }
    }

    /// Records the entity's current scalar state as its clean snapshot.
    pub(crate) fn track(&self, entity: &dyn AnyEntity) -> BllResult<()> {
        let snapshot = snapshot_of(entity)?;
        self.snapshots
            .borrow_mut()
            .insert((entity.as_any().type_id(), entity.entity_meta().id), snapshot);
        Ok(())
    }

    pub(crate) fn untrack(&self, type_id: TypeId, id: i64) {
        self.snapshots.borrow_mut().remove(&(type_id, id));
    }

    pub(crate) fn untrack_type(&self, type_id: TypeId) {
        self.snapshots
            .borrow_mut()
            .retain(|(tracked_type, _), _| *tracked_type != type_id);
    }

    /// Flushes the pending batch inside one transaction.
    ///
    /// On failure the transaction rolls back and the batch is restored, so
    /// the caller can retry or `discard_pending`.
    pub fn commit(&self) -> BllResult<CommitOutcome> {
        let batch = self.batch.take();
        if batch.is_empty() {
            return Ok(CommitOutcome::default());
        }

        debug!(
            "event=ctx_commit module=context status=start ops={}",
            batch.len()
        );
        match self.run_batch(&batch) {
            Ok(outcome) => {
                debug!(
                    "event=ctx_commit module=context status=ok ops={} rows={}",
                    batch.len(),
                    outcome.rows_affected
                );
                Ok(outcome)
            }
            Err(err) => {
                error!("event=ctx_commit module=context status=error error={err}");
                *self.batch.borrow_mut() = batch;
                Err(err)
            }
        }
    }

    fn run_batch(&self, batch: &[PendingOp]) -> BllResult<CommitOutcome> {
        let tx = self.conn.unchecked_transaction().map_err(DbError::Sqlite)?;
        let mut generated_ids: Vec<Option<i64>> = vec![None; batch.len()];
        let mut rows_affected = 0usize;

        for (slot, op) in batch.iter().enumerate() {
            match op {
                PendingOp::Insert {
                    table,
                    columns,
                    values,
                    created_at,
                    created_by,
                    fk_links,
                } => {
                    let mut bound = values.clone();
                    resolve_fk_links(columns, &mut bound, fk_links, &generated_ids, *table)?;

                    let mut names: Vec<&str> = columns.iter().map(|column| column.name).collect();
                    names.extend(["created_at", "modified_at", "created_by", "modified_by"]);
                    let placeholders = vec!["?"; names.len()].join(", ");
                    let sql = format!(
                        "INSERT INTO {table} ({}) VALUES ({placeholders})",
                        names.join(", ")
                    );

                    bound.push(Value::Integer(*created_at));
                    bound.push(Value::Null);
                    bound.push(opt_text(created_by));
                    bound.push(Value::Null);

                    rows_affected += execute(&tx, &sql, bound)?;
                    generated_ids[slot] = Some(tx.last_insert_rowid());
                }
                PendingOp::Update {
                    table,
                    columns,
                    values,
                    id,
                    modified_at,
                    modified_by,
                    fk_links,
                } => {
                    let mut bound = values.clone();
                    resolve_fk_links(columns, &mut bound, fk_links, &generated_ids, *table)?;

                    let mut assignments: Vec<String> =
                        columns
                            .iter()
                            .map(|column| format!("{} = ?", column.name))
                            .collect();
                    assignments.push("modified_at = ?".to_string());
                    assignments.push("modified_by = ?".to_string());
                    let sql = format!(
                        "UPDATE {table} SET {} WHERE id = ?",
                        assignments.join(", ")
                    );

                    bound.push(Value::Integer(*modified_at));
                    bound.push(opt_text(modified_by));
                    bound.push(Value::Integer(*id));

                    let changed = execute(&tx, &sql, bound)?;
                    if changed == 0 {
                        return Err(BllError::NotFound {
                            table: *table,
                            id: *id,
                        });
                    }
                    rows_affected += changed;
                }
                PendingOp::Delete { table, id } => {
                    let sql = format!("DELETE FROM {table} WHERE id = ?");
                    rows_affected += tx.execute(&sql, [*id])?;
                }
                PendingOp::DeleteAll { table } => {
                    let sql = format!("DELETE FROM {table}");
                    rows_affected += tx.execute(&sql, [])?;
                }
            }
        }

        tx.commit().map_err(DbError::Sqlite)?;
        Ok(CommitOutcome {
            rows_affected,
            generated_ids,
        })
    }
}

fn execute(tx: &Transaction<'_>, sql: &str, bound: Vec<Value>) -> BllResult<usize> {
    Ok(tx.execute(sql, params_from_iter(bound))?)
}

fn resolve_fk_links(
    columns: &[Column],
    bound: &mut [Value],
    fk_links: &[FkLink],
    generated_ids: &[Option<i64>],
    table: &'static str,
) -> BllResult<()> {
    for link in fk_links {
        let index = columns
            .iter()
            .position(|column| column.name == link.column)
            .ok_or_else(|| BllError::Resolution {
                entity: table,
                reason: format!("unknown foreign-key column `{}`", link.column),
            })?;
        let id = generated_ids
            .get(link.from_slot)
            .copied()
            .flatten()
            .ok_or_else(|| BllError::Resolution {
                entity: table,
                reason: format!(
                    "no generated identity for staged relation column `{}`",
                    link.column
                ),
            })?;
        bound[index] = Value::Integer(id);
    }
    Ok(())
}

fn snapshot_of(entity: &dyn AnyEntity) -> BllResult<String> {
    entity.snapshot_json().map_err(|err| BllError::Resolution {
        entity: entity.table(),
        reason: format!("snapshot serialization failed: {err}"),
    })
}

fn opt_text(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::{Context, TrackState};
    use crate::entity::testing::Widget;
    use rusqlite::Connection;

    fn context() -> Context {
        Context::new(Connection::open_in_memory().unwrap())
    }

    #[test]
    fn unpersisted_entity_is_added() {
        let ctx = context();
        let widget = Widget::new("w", 1);
        assert_eq!(ctx.state_of(&widget).unwrap(), TrackState::Added);
    }

    #[test]
    fn identified_but_unloaded_entity_is_detached() {
        let ctx = context();
        let mut widget = Widget::new("w", 1);
        widget.meta.id = 42;
        assert_eq!(ctx.state_of(&widget).unwrap(), TrackState::Detached);
    }

    #[test]
    fn tracked_entity_reports_unchanged_then_modified() {
        let ctx = context();
        let mut widget = Widget::new("w", 1);
        widget.meta.id = 42;

        ctx.track(&widget).unwrap();
        assert_eq!(ctx.state_of(&widget).unwrap(), TrackState::Unchanged);

        widget.weight = 2;
        assert_eq!(ctx.state_of(&widget).unwrap(), TrackState::Modified);
    }

    #[test]
    fn untrack_returns_entity_to_detached() {
        let ctx = context();
        let mut widget = Widget::new("w", 1);
        widget.meta.id = 42;

        ctx.track(&widget).unwrap();
        ctx.untrack(std::any::TypeId::of::<Widget>(), 42);
        assert_eq!(ctx.state_of(&widget).unwrap(), TrackState::Detached);
    }

    #[test]
    fn commit_of_empty_batch_is_a_no_op() {
        let ctx = context();
        let outcome = ctx.commit().unwrap();
        assert_eq!(outcome.rows_affected, 0);
        assert_eq!(ctx.pending_count(), 0);
    }
}
