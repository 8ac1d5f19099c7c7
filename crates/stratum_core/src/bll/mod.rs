//! Generic business logic layer over one entity type.
//!
//! # Responsibility
//! - Provide uniform CRUD and cascade save entry points for any
//!   registered entity type, backed by a shared persistence context.
//! - Emit structured operation events around every mutating call.
//!
//! # Invariants
//! - Absence on lookup is a normal `Ok(None)`/empty result, never an
//!   error; deleting a specific missing identity is `NotFound`.
//! - `persist = false` only stages work in the context's pending batch;
//!   `persist = true` commits immediately and surfaces store failures.
//! - List reads are ordered by `created_at` ascending, id ascending on
//!   ties.

pub mod registry;
mod save;

use crate::context::{Context, PendingOp};
use crate::entity::Entity;
use crate::error::{BllError, BllResult};
use log::{debug, error, info};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, OptionalExtension};
use self::registry::BllRegistry;
use self::save::{apply_commit, stage_entity_save, SaveMode, StagedSave};
use std::any::TypeId;
use std::marker::PhantomData;
use std::time::Instant;

/// Generic BLL bound to one entity type, a shared context and a registry.
pub struct Bll<'ctx, T: Entity> {
    ctx: &'ctx Context,
    registry: &'ctx BllRegistry,
    _entity: PhantomData<fn() -> T>,
}

impl<'ctx, T: Entity> Bll<'ctx, T> {
    pub fn new(ctx: &'ctx Context, registry: &'ctx BllRegistry) -> Self {
        Self {
            ctx,
            registry,
            _entity: PhantomData,
        }
    }

    pub fn context(&self) -> &Context {
        self.ctx
    }

    /// Fetches one entity by identity. Absence is `Ok(None)`.
    pub fn get_by_id(&self, id: i64) -> BllResult<Option<T>> {
        self.observed_read("bll_get", |bll| {
            let sql = format!(
                "SELECT {} FROM {} WHERE id = ?",
                Self::select_columns(),
                T::TABLE
            );
            let found = bll
                .ctx
                .connection()
                .query_row(&sql, [id], |row| T::from_row(row))
                .optional()?;
            match found {
                Some(entity) => {
                    bll.ctx.track(&entity)?;
                    Ok(Some(entity))
                }
                None => Ok(None),
            }
        })
    }

    /// Fetches every entity whose identity is in `ids`, ordered by
    /// creation time. Empty input never touches the store.
    pub fn get_by_ids(&self, ids: &[i64]) -> BllResult<Vec<T>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.observed_read("bll_get_many", |bll| {
            let placeholders = vec!["?"; ids.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM {} WHERE id IN ({placeholders}) ORDER BY created_at ASC, id ASC",
                Self::select_columns(),
                T::TABLE
            );
            bll.query_rows(&sql, ids.iter().map(|id| Value::Integer(*id)).collect())
        })
    }

    /// Fetches every entity of the type, ordered by creation time.
    pub fn get_all(&self) -> BllResult<Vec<T>> {
        self.observed_read("bll_get_all", |bll| {
            let sql = format!(
                "SELECT {} FROM {} ORDER BY created_at ASC, id ASC",
                Self::select_columns(),
                T::TABLE
            );
            bll.query_rows(&sql, Vec::new())
        })
    }

    /// Stages a fresh row for `entity`, cascading its relations.
    ///
    /// Stamps `created_at`, clears `modified_at` and records the context
    /// actor. With `persist` the batch commits immediately and the
    /// assigned identity is written back; otherwise the identity stays
    /// `0` until the caller commits the context.
    pub fn insert(&self, entity: &mut T, persist: bool) -> BllResult<i64> {
        self.observed("bll_insert", persist, |bll| {
            let staged = stage_entity_save(bll.ctx, Some(bll.registry), entity, SaveMode::Insert)?;
            bll.finish_single(entity, &staged, persist)?;
            Ok(entity.meta().id)
        })
    }

    /// Bulk insert. Returns the number submitted when staging, or the
    /// rows actually written when persisting.
    pub fn insert_many(&self, entities: &mut [T], persist: bool) -> BllResult<usize> {
        self.observed("bll_insert_many", persist, |bll| {
            bll.stage_many(entities, SaveMode::Insert, persist)
        })
    }

    /// Upsert: `id == 0` inserts, anything else stages an update that
    /// stamps `modified_at` and preserves `created_at`.
    pub fn save(&self, entity: &mut T, persist: bool) -> BllResult<i64> {
        self.observed("bll_save", persist, |bll| {
            let staged = stage_entity_save(bll.ctx, Some(bll.registry), entity, SaveMode::Upsert)?;
            bll.finish_single(entity, &staged, persist)?;
            Ok(entity.meta().id)
        })
    }

    /// Bulk upsert, counted like [`Bll::insert_many`].
    pub fn save_many(&self, entities: &mut [T], persist: bool) -> BllResult<usize> {
        self.observed("bll_save_many", persist, |bll| {
            bll.stage_many(entities, SaveMode::Upsert, persist)
        })
    }

    /// Stages removal of the row with `id`.
    ///
    /// The row must exist; a missing identity is `NotFound`. Returns
    /// whether a removal was applied.
    pub fn delete_by_id(&self, id: i64, persist: bool) -> BllResult<bool> {
        self.observed("bll_delete", persist, |bll| {
            if !bll.exists(id)? {
                return Err(BllError::NotFound {
                    table: T::TABLE,
                    id,
                });
            }
            bll.ctx.stage(PendingOp::Delete {
                table: T::TABLE,
                id,
            });
            bll.ctx.untrack(TypeId::of::<T>(), id);
            if persist {
                Ok(bll.ctx.commit()?.rows_affected > 0)
            } else {
                Ok(true)
            }
        })
    }

    /// Stages removal of `entity` by its identity.
    pub fn delete(&self, entity: &T, persist: bool) -> BllResult<bool> {
        self.delete_by_id(entity.meta().id, persist)
    }

    /// Stages removal of every row matching `ids`; missing identities are
    /// skipped. Returns the submitted/removed count.
    pub fn delete_many_by_ids(&self, ids: &[i64], persist: bool) -> BllResult<usize> {
        self.observed("bll_delete_many", persist, |bll| {
            if ids.is_empty() {
                return Ok(0);
            }
            let matched = bll.existing_ids(ids)?;
            for id in &matched {
                bll.ctx.stage(PendingOp::Delete {
                    table: T::TABLE,
                    id: *id,
                });
                bll.ctx.untrack(TypeId::of::<T>(), *id);
            }
            if persist {
                Ok(bll.ctx.commit()?.rows_affected)
            } else {
                Ok(matched.len())
            }
        })
    }

    /// Stages removal of every entity in the slice by identity.
    pub fn delete_many(&self, entities: &[T], persist: bool) -> BllResult<usize> {
        let ids: Vec<i64> = entities.iter().map(|entity| entity.meta().id).collect();
        self.delete_many_by_ids(&ids, persist)
    }

    /// Stages removal of every row of the type. Returns the
    /// submitted/removed count.
    pub fn delete_all(&self, persist: bool) -> BllResult<usize> {
        self.observed("bll_delete_all", persist, |bll| {
            let staged_count = bll.count_all()?;
            bll.ctx.stage(PendingOp::DeleteAll { table: T::TABLE });
            bll.ctx.untrack_type(TypeId::of::<T>());
            if persist {
                Ok(bll.ctx.commit()?.rows_affected)
            } else {
                Ok(staged_count)
            }
        })
    }

    /// Indexer-style read accessor; equivalent to [`Bll::get_by_id`].
    pub fn at(&self, id: i64) -> BllResult<Option<T>> {
        self.get_by_id(id)
    }

    /// Indexer-style write accessor; stages a save without committing.
    pub fn put(&self, entity: &mut T) -> BllResult<i64> {
        self.save(entity, false)
    }

    fn stage_many(
        &self,
        entities: &mut [T],
        mode: SaveMode,
        persist: bool,
    ) -> BllResult<usize> {
        let mut staged_all = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            staged_all.push(stage_entity_save(
                self.ctx,
                Some(self.registry),
                entity,
                mode,
            )?);
        }
        if persist {
            let outcome = self.ctx.commit()?;
            for (entity, staged) in entities.iter_mut().zip(&staged_all) {
                apply_commit(self.ctx, entity, staged, &outcome)?;
            }
            Ok(outcome.rows_affected)
        } else {
            Ok(entities.len())
        }
    }

    fn finish_single(&self, entity: &mut T, staged: &StagedSave, persist: bool) -> BllResult<()> {
        if persist {
            let outcome = self.ctx.commit()?;
            apply_commit(self.ctx, entity, staged, &outcome)?;
        }
        Ok(())
    }

    fn observed_read<R>(
        &self,
        op: &'static str,
        run: impl FnOnce(&Self) -> BllResult<R>,
    ) -> BllResult<R> {
        let started_at = Instant::now();
        debug!(
            "event={op} module=bll table={table} status=start",
            table = T::TABLE
        );
        match run(self) {
            Ok(value) => {
                debug!(
                    "event={op} module=bll table={table} status=ok duration_ms={}",
                    started_at.elapsed().as_millis(),
                    table = T::TABLE
                );
                Ok(value)
            }
            Err(err) => {
                error!(
                    "event={op} module=bll table={table} status=error duration_ms={} error={err}",
                    started_at.elapsed().as_millis(),
                    table = T::TABLE
                );
                Err(err)
            }
        }
    }

    fn observed<R>(
        &self,
        op: &'static str,
        persist: bool,
        run: impl FnOnce(&Self) -> BllResult<R>,
    ) -> BllResult<R> {
        let started_at = Instant::now();
        debug!(
            "event={op} module=bll table={table} status=start persist={persist}",
            table = T::TABLE
        );
        match run(self) {
            Ok(value) => {
                info!(
                    "event={op} module=bll table={table} status=ok persist={persist} duration_ms={}",
                    started_at.elapsed().as_millis(),
                    table = T::TABLE
                );
                Ok(value)
            }
            Err(err) => {
                error!(
                    "event={op} module=bll table={table} status=error persist={persist} duration_ms={} error={err}",
                    started_at.elapsed().as_millis(),
                    table = T::TABLE
                );
                Err(err)
            }
        }
    }

    fn query_rows(&self, sql: &str, bind: Vec<Value>) -> BllResult<Vec<T>> {
        let conn = self.ctx.connection();
        let mut stmt = conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let entity = T::from_row(row)?;
            self.ctx.track(&entity)?;
            items.push(entity);
        }
        Ok(items)
    }

    fn exists(&self, id: i64) -> BllResult<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = ?", T::TABLE);
        Ok(self
            .ctx
            .connection()
            .query_row(&sql, [id], |_| Ok(()))
            .optional()?
            .is_some())
    }

    fn existing_ids(&self, ids: &[i64]) -> BllResult<Vec<i64>> {
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id FROM {} WHERE id IN ({placeholders})",
            T::TABLE
        );
        let conn = self.ctx.connection();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(
            ids.iter().map(|id| Value::Integer(*id)),
        ))?;
        let mut matched = Vec::new();
        while let Some(row) = rows.next()? {
            matched.push(row.get(0)?);
        }
        Ok(matched)
    }

    fn count_all(&self) -> BllResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", T::TABLE);
        let count: i64 = self.ctx.connection().query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn select_columns() -> String {
        let mut names = vec!["id"];
        names.extend(T::COLUMNS.iter().map(|column| column.name));
        names.extend(["created_at", "modified_at", "created_by", "modified_by"]);
        names.join(", ")
    }
}
